use crate::error::{AdminError, Result};
use std::fmt;

const ATEXT_SPECIALS: &str = "!#$%&'*+-/=?^_`{|}~";

/// An email address with a dot-atom localpart and a normalized domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub localpart: String,
    pub domain: String,
}

impl Address {
    pub fn new(localpart: impl Into<String>, domain: impl Into<String>) -> Self {
        Address {
            localpart: localpart.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.localpart, self.domain)
    }
}

/// Parse and normalize a domain name: lower-cased, no trailing dot.
pub fn parse_domain(domain: &str) -> Result<String> {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() {
        return Err(AdminError::InvalidDomain("Domain is empty".to_string()));
    }
    if domain.len() > 253 {
        return Err(AdminError::InvalidDomain(format!(
            "{}: longer than 253 characters",
            domain
        )));
    }

    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(AdminError::InvalidDomain(format!(
                "{}: label must be 1 to 63 characters",
                domain
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(AdminError::InvalidDomain(format!(
                "{}: label cannot start or end with a hyphen",
                domain
            )));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AdminError::InvalidDomain(format!(
                "{}: invalid character in label {:?}",
                domain, label
            )));
        }
    }

    Ok(domain.to_ascii_lowercase())
}

/// Validate a dot-atom localpart (RFC 5321). Quoted localparts are not supported.
pub fn parse_localpart(localpart: &str) -> Result<String> {
    if localpart.is_empty() {
        return Err(AdminError::InvalidAddress("Localpart is empty".to_string()));
    }
    if localpart.len() > 64 {
        return Err(AdminError::InvalidAddress(format!(
            "{}: localpart longer than 64 characters",
            localpart
        )));
    }
    if localpart.starts_with('.') || localpart.ends_with('.') || localpart.contains("..") {
        return Err(AdminError::InvalidAddress(format!(
            "{}: misplaced dot in localpart",
            localpart
        )));
    }
    if let Some(c) = localpart
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || ATEXT_SPECIALS.contains(*c)))
    {
        return Err(AdminError::InvalidAddress(format!(
            "{}: invalid character {:?} in localpart",
            localpart, c
        )));
    }
    Ok(localpart.to_string())
}

/// Parse an email address of the form `localpart@domain`.
pub fn parse_address(address: &str) -> Result<Address> {
    if address.is_empty() {
        return Err(AdminError::InvalidAddress("Email is empty".to_string()));
    }

    let (local, domain) = address
        .rsplit_once('@')
        .ok_or_else(|| AdminError::InvalidAddress(format!("{}: must contain @", address)))?;

    let localpart = parse_localpart(local)?;
    let domain = parse_domain(domain)
        .map_err(|e| AdminError::InvalidAddress(format!("{}: {}", address, e)))?;

    Ok(Address { localpart, domain })
}
