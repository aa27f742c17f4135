//! Address uniqueness index
//!
//! Maps every canonical address and `@domain` catchall of the instance to the
//! account it is delivered to. Built from scratch for each candidate
//! configuration, so a configuration with ambiguous routing never gets
//! published.

use crate::config::listener::StaticConfig;
use crate::config::types::{Domain, DynamicConfig};
use crate::error::{AdminError, Result};
use crate::utils::email::{parse_address, parse_domain, Address};
use std::collections::BTreeMap;

/// Where mail for an indexed address goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDestination {
    pub account: String,
    /// Key in the account's destinations. `None` for reserved addresses
    /// that are derived from report settings instead of being configured.
    pub destination: Option<String>,
    pub catchall: bool,
}

impl AccountDestination {
    pub fn is_reserved(&self) -> bool {
        self.destination.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddressIndex {
    entries: BTreeMap<String, AccountDestination>,
}

/// Canonical form of a localpart: everything from the catchall separator on is
/// dropped, and it is lower-cased unless the domain is case sensitive.
pub fn canonical_localpart(localpart: &str, domain: &Domain) -> String {
    let localpart = match domain.localpart_catchall_separator {
        Some(sep) => localpart.split(sep).next().unwrap_or(localpart),
        None => localpart,
    };
    if domain.localpart_case_sensitive {
        localpart.to_string()
    } else {
        localpart.to_lowercase()
    }
}

/// Index key for an address. Addresses at unknown domains are kept literally.
fn address_key(addr: &Address, dynamic: &DynamicConfig) -> String {
    match dynamic.domains.get(&addr.domain) {
        Some(domain) => format!("{}@{}", canonical_localpart(&addr.localpart, domain), addr.domain),
        None => addr.to_string().to_lowercase(),
    }
}

impl AddressIndex {
    /// Build the index, failing on any address that routes ambiguously.
    pub fn build(static_config: &StaticConfig, dynamic: &DynamicConfig) -> Result<Self> {
        let mut index = AddressIndex::default();

        for (account_name, account) in &dynamic.accounts {
            for dest in account.destinations.keys() {
                let (key, catchall) = if let Some(domain) = dest.strip_prefix('@') {
                    (format!("@{}", parse_domain(domain)?), true)
                } else {
                    let addr = parse_address(dest)?;
                    if let Some(domain) = dynamic.domains.get(&addr.domain) {
                        if let Some(sep) = domain.localpart_catchall_separator {
                            if addr.localpart.contains(sep) {
                                return Err(AdminError::Config(format!(
                                    "localpart of address {} of account {} includes catchall separator {}",
                                    dest, account_name, sep
                                )));
                            }
                        }
                    }
                    (address_key(&addr, dynamic), false)
                };

                index.insert(
                    key,
                    AccountDestination {
                        account: account_name.clone(),
                        destination: Some(dest.clone()),
                        catchall,
                    },
                )?;
            }
        }

        for (domain_name, domain) in &dynamic.domains {
            for recipient in [&domain.dmarc, &domain.tlsrpt].into_iter().flatten() {
                let addr = parse_address(&recipient.address(domain_name))?;
                index.insert(
                    address_key(&addr, dynamic),
                    AccountDestination {
                        account: recipient.account.clone(),
                        destination: None,
                        catchall: false,
                    },
                )?;
            }
        }

        if let Some(tlsrpt) = &static_config.host_tlsrpt {
            let addr = Address::new(&tlsrpt.localpart, &static_config.hostname);
            index.insert(
                address_key(&addr, dynamic),
                AccountDestination {
                    account: tlsrpt.account.clone(),
                    destination: None,
                    catchall: false,
                },
            )?;
        }

        Ok(index)
    }

    fn insert(&mut self, key: String, dest: AccountDestination) -> Result<()> {
        if let Some(existing) = self.entries.get(&key) {
            return Err(AdminError::Config(format!(
                "duplicate canonical address {} for account {}, already configured for account {}",
                key, dest.account, existing.account
            )));
        }
        self.entries.insert(key, dest);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&AccountDestination> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AccountDestination)> {
        self.entries.iter()
    }

    /// Index key for a user supplied address or `@domain` catchall.
    pub fn key_for(address: &str, dynamic: &DynamicConfig) -> Result<String> {
        if let Some(domain) = address.strip_prefix('@') {
            return Ok(format!("@{}", parse_domain(domain)?));
        }
        let addr = parse_address(address)?;
        Ok(address_key(&addr, dynamic))
    }

    /// Check that `addr` can be added as a new destination: its domain is
    /// configured, its canonical form is not routed yet, and its localpart does
    /// not contain the domain's catchall separator.
    pub fn check_available(&self, dynamic: &DynamicConfig, addr: &Address) -> Result<()> {
        let unavailable = |reason: String| AdminError::AddressUnavailable {
            address: addr.to_string(),
            reason,
        };

        let domain = dynamic
            .domains
            .get(&addr.domain)
            .ok_or_else(|| unavailable("domain does not exist".to_string()))?;

        let key = address_key(addr, dynamic);
        if self.entries.contains_key(&key) {
            return Err(unavailable(format!(
                "canonicalized address {} already configured",
                key
            )));
        }
        if let Some(sep) = domain.localpart_catchall_separator {
            if addr.localpart.contains(sep) {
                return Err(unavailable(format!(
                    "localpart cannot include domain catchall separator {}",
                    sep
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::listener::HostTlsRpt;
    use crate::config::types::{Account, Destination, ReportRecipient};

    fn account(domain: &str, dests: &[&str]) -> Account {
        Account {
            domain: domain.to_string(),
            destinations: dests
                .iter()
                .map(|d| (d.to_string(), Destination::default()))
                .collect(),
            ..Default::default()
        }
    }

    fn config() -> DynamicConfig {
        let mut dynamic = DynamicConfig::default();
        dynamic.domains.insert(
            "example.org".to_string(),
            Domain {
                localpart_catchall_separator: Some('+'),
                dmarc: Some(ReportRecipient {
                    account: "alice".to_string(),
                    localpart: "dmarc-reports".to_string(),
                    domain: None,
                    mailbox: "DMARC".to_string(),
                }),
                ..Default::default()
            },
        );
        dynamic.accounts.insert(
            "alice".to_string(),
            account("example.org", &["Alice@example.org", "@example.org"]),
        );
        dynamic
    }

    #[test]
    fn test_canonical_localpart() {
        let domain = Domain {
            localpart_catchall_separator: Some('+'),
            ..Default::default()
        };
        assert_eq!(canonical_localpart("Bob+news", &domain), "bob");
        assert_eq!(canonical_localpart("bob", &domain), "bob");

        let sensitive = Domain {
            localpart_case_sensitive: true,
            ..Default::default()
        };
        assert_eq!(canonical_localpart("Bob+news", &sensitive), "Bob+news");
    }

    #[test]
    fn test_build_index() {
        let static_config = StaticConfig::new("mail.example.org").unwrap();
        let index = AddressIndex::build(&static_config, &config()).unwrap();

        let alice = index.get("alice@example.org").unwrap();
        assert_eq!(alice.account, "alice");
        assert_eq!(alice.destination.as_deref(), Some("Alice@example.org"));
        assert!(index.get("@example.org").unwrap().catchall);

        let dmarc = index.get("dmarc-reports@example.org").unwrap();
        assert!(dmarc.is_reserved());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_duplicate_across_accounts() {
        let static_config = StaticConfig::new("mail.example.org").unwrap();
        let mut dynamic = config();
        dynamic.accounts.insert(
            "bob".to_string(),
            account("example.org", &["alice@EXAMPLE.org"]),
        );
        assert!(AddressIndex::build(&static_config, &dynamic).is_err());
    }

    #[test]
    fn test_separator_in_destination_rejected() {
        let static_config = StaticConfig::new("mail.example.org").unwrap();
        let mut dynamic = config();
        dynamic.accounts.insert(
            "bob".to_string(),
            account("example.org", &["bob+x@example.org"]),
        );
        assert!(AddressIndex::build(&static_config, &dynamic).is_err());
    }

    #[test]
    fn test_host_tlsrpt_is_reserved() {
        let mut static_config = StaticConfig::new("mail.example.org").unwrap();
        static_config.host_tlsrpt = Some(HostTlsRpt {
            account: "alice".to_string(),
            localpart: "tls-reports".to_string(),
            mailbox: "TLSRPT".to_string(),
        });
        let index = AddressIndex::build(&static_config, &config()).unwrap();
        assert!(index.get("tls-reports@mail.example.org").unwrap().is_reserved());
    }

    #[test]
    fn test_check_available() {
        let static_config = StaticConfig::new("mail.example.org").unwrap();
        let dynamic = config();
        let index = AddressIndex::build(&static_config, &dynamic).unwrap();

        assert!(index
            .check_available(&dynamic, &parse_address("bob@example.org").unwrap())
            .is_ok());
        assert!(index
            .check_available(&dynamic, &parse_address("ALICE@example.org").unwrap())
            .is_err());
        assert!(index
            .check_available(&dynamic, &parse_address("bob+x@example.org").unwrap())
            .is_err());
        assert!(index
            .check_available(&dynamic, &parse_address("dmarc-reports@example.org").unwrap())
            .is_err());
        assert!(index
            .check_available(&dynamic, &parse_address("bob@other.org").unwrap())
            .is_err());
    }

    #[test]
    fn test_key_for() {
        let dynamic = config();
        assert_eq!(
            AddressIndex::key_for("Bob+tag@Example.org", &dynamic).unwrap(),
            "bob@example.org"
        );
        assert_eq!(
            AddressIndex::key_for("@Example.org", &dynamic).unwrap(),
            "@example.org"
        );
        assert_eq!(
            AddressIndex::key_for("Bob+tag@other.org", &dynamic).unwrap(),
            "bob+tag@other.org"
        );
    }
}
