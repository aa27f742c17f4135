//! DMARC (Domain-based Message Authentication, Reporting & Conformance)
//!
//! Builds the `_dmarc` TXT record published for hosted domains (RFC 7489).

use std::fmt;

/// DMARC policy actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmarcPolicy {
    /// No action (monitoring mode)
    None,
    /// Mark as spam but deliver
    Quarantine,
    /// Reject the message
    Reject,
}

impl DmarcPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DmarcPolicy::None => "none",
            DmarcPolicy::Quarantine => "quarantine",
            DmarcPolicy::Reject => "reject",
        }
    }
}

/// Aggregate report destination with optional size limit, e.g. `mailto:a@b!10m`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportUri {
    pub address: String,
    pub max_size: Option<u64>,
    pub unit: &'static str,
}

impl fmt::Display for ReportUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if let Some(size) = self.max_size {
            write!(f, "!{}{}", size, self.unit)?;
        }
        Ok(())
    }
}

/// DMARC DNS TXT record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmarcRecord {
    pub policy: DmarcPolicy,
    pub aggregate_report_addresses: Vec<ReportUri>,
}

impl Default for DmarcRecord {
    fn default() -> Self {
        DmarcRecord {
            policy: DmarcPolicy::None,
            aggregate_report_addresses: Vec::new(),
        }
    }
}

impl fmt::Display for DmarcRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v=DMARC1; p={}", self.policy.as_str())?;
        if !self.aggregate_report_addresses.is_empty() {
            let uris: Vec<String> = self
                .aggregate_report_addresses
                .iter()
                .map(|u| u.to_string())
                .collect();
            write!(f, "; rua={}", uris.join(","))?;
        }
        Ok(())
    }
}
