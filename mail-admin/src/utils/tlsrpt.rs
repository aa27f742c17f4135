//! SMTP TLS reporting record (RFC 8460).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsRptRecord {
    pub ruas: Vec<String>,
}

impl TlsRptRecord {
    /// Record requesting reports by email to `address`.
    pub fn mailto(address: &str) -> Self {
        TlsRptRecord {
            ruas: vec![format!("mailto:{}", address)],
        }
    }
}

impl fmt::Display for TlsRptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v=TLSRPTv1; rua={}", self.ruas.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailto_record() {
        let record = TlsRptRecord::mailto("tls-reports@example.org");
        assert_eq!(
            record.to_string(),
            "v=TLSRPTv1; rua=mailto:tls-reports@example.org"
        );
    }
}
