//! DNS record synthesis
//!
//! Produces the zone file lines an operator has to publish for a hosted
//! domain: MX, DKIM, SPF, DMARC, MTA-STS, TLSRPT, autoconfig/SRV, and
//! optionally DANE TLSA and CAA records. Output is deterministic for a given
//! configuration and is meant to be copied into a zone by hand.

use crate::config::listener::{HostKey, StaticConfig};
use crate::config::types::Domain;
use crate::config::Snapshot;
use crate::error::{AdminError, Result};
use crate::utils::dkim::DkimRecord;
use crate::utils::dmarc::{DmarcPolicy, DmarcRecord, ReportUri};
use crate::utils::tlsrpt::TlsRptRecord;
use crate::utils::txt::{txt_strings, TXT_SEGMENT_MAX};
use data_encoding::HEXUPPER;
use sha2::{Digest, Sha256};

/// Listener whose host keys are published for DANE.
pub const PUBLIC_LISTENER: &str = "public";

/// Name column width used to align records.
const NAME_WIDTH: usize = 20;

/// DANE-EE (3), SPKI (1), SHA2-256 (1).
pub fn tlsa_record(key: &HostKey) -> String {
    let sum = Sha256::digest(&key.spki_der);
    format!("3 1 1 {}", HEXUPPER.encode(&sum))
}

/// DNS record generator for one hosted domain
pub struct DnsConfigGenerator<'a> {
    static_config: &'a StaticConfig,
    domain_conf: &'a Domain,
    domain: String,
    has_dnssec: bool,
    cert_issuer: Option<String>,
    acme_account_uri: Option<String>,
}

impl<'a> DnsConfigGenerator<'a> {
    pub fn new(static_config: &'a StaticConfig, domain_conf: &'a Domain, domain: &str) -> Self {
        DnsConfigGenerator {
            static_config,
            domain_conf,
            domain: domain.to_string(),
            has_dnssec: false,
            cert_issuer: None,
            acme_account_uri: None,
        }
    }

    /// Generator for a domain of the published configuration.
    pub fn for_domain(snapshot: &'a Snapshot, domain: &str) -> Result<Self> {
        let domain_conf = snapshot
            .domain(domain)
            .ok_or_else(|| AdminError::DomainNotFound(domain.to_string()))?;
        Ok(Self::new(&snapshot.static_config, domain_conf, domain))
    }

    /// Whether the zone is DNSSEC-signed. Without it, TLSA records are
    /// commented out.
    pub fn with_dnssec(mut self, has_dnssec: bool) -> Self {
        self.has_dnssec = has_dnssec;
        self
    }

    /// Domain name of the CA to allow in a CAA record, e.g. `letsencrypt.org`.
    pub fn with_cert_issuer(mut self, issuer: &str) -> Self {
        self.cert_issuer = Some(issuer.to_string()).filter(|s| !s.is_empty());
        self
    }

    pub fn with_acme_account_uri(mut self, uri: &str) -> Self {
        self.acme_account_uri = Some(uri.to_string()).filter(|s| !s.is_empty());
        self
    }

    /// Generate the zone file lines.
    pub fn generate_records(&self) -> Result<Vec<String>> {
        let d = self.domain.as_str();
        let h = self.static_config.hostname.as_str();
        let host = format!("{}.", h);

        let mut records: Vec<String> = vec![
            "; Time To Live of 5 minutes, may be recognized if importing as a zone file.".into(),
            "; Once your setup is working, you may want to increase the TTL.".into(),
            "$TTL 300".into(),
            "".into(),
        ];

        self.push_dane_records(&mut records, d, &host);

        if d != h {
            records.extend([
                "; For the machine, only needs to be created once, for the first domain added:"
                    .to_string(),
                "; ".to_string(),
                "; SPF-allow host for itself, resulting in relaxed DMARC pass for (postmaster)"
                    .to_string(),
                "; messages (DSNs) sent from host:".to_string(),
                format!(
                    "{:<width$} TXT \"v=spf1 a -all\"",
                    host,
                    width = NAME_WIDTH + d.len()
                ),
                String::new(),
            ]);

            if let Some(tlsrpt) = &self.static_config.host_tlsrpt {
                let record = TlsRptRecord::mailto(&format!("{}@{}", tlsrpt.localpart, h));
                records.extend([
                    "; For the machine, only needs to be created once, for the first domain added:"
                        .to_string(),
                    "; ".to_string(),
                    "; Request reporting about success/failures of TLS connections to (MX) host, for DANE."
                        .to_string(),
                    format!(
                        "_smtp._tls.{:<width$}         TXT \"{}\"",
                        host,
                        record,
                        width = NAME_WIDTH + d.len() - "_smtp._tls.".len()
                    ),
                    String::new(),
                ]);
            }
        }

        records.extend([
            "; Deliver email for the domain to this host.".to_string(),
            format!("{}.                    MX 10 {}", d, host),
            String::new(),
            "; Outgoing messages will be signed with the first two DKIM keys. The other two"
                .to_string(),
            "; configured for backup, switching to them is just a config change.".to_string(),
        ]);

        // Selectors are kept in a sorted map, so this is in name order.
        for (name, selector) in &self.domain_conf.dkim.selectors {
            let key = selector.key.as_ref().ok_or_else(|| {
                AdminError::Dns(format!("no private key loaded for DKIM selector {:?}", name))
            })?;
            let txt = DkimRecord::for_key(key)
                .map_err(|e| AdminError::Dns(format!("DKIM selector {:?}: {}", name, e)))?
                .to_txt();

            if txt.len() > TXT_SEGMENT_MAX {
                records.push(
                    "; NOTE: The following strings must be added to DNS as single record."
                        .to_string(),
                );
            }
            records.push(format!(
                "{}._domainkey.{}.   TXT {}",
                name,
                d,
                txt_strings(&txt)
            ));
        }

        let mut dmarc = DmarcRecord {
            policy: DmarcPolicy::Reject,
            ..Default::default()
        };
        if let Some(recipient) = &self.domain_conf.dmarc {
            dmarc.aggregate_report_addresses.push(ReportUri {
                address: format!("mailto:{}", recipient.address(d)),
                max_size: Some(10),
                unit: "m",
            });
        }

        records.extend([
            String::new(),
            "; Specify the MX host is allowed to send for our domain and for itself (for DSNs)."
                .to_string(),
            "; ~all means softfail for anything else, which is done instead of -all to prevent older"
                .to_string(),
            "; mail servers from rejecting the message because they never get to looking for a dkim/dmarc pass."
                .to_string(),
            format!("{}.                    TXT \"v=spf1 mx ~all\"", d),
            String::new(),
            "; Emails that fail the DMARC check (without aligned DKIM and without aligned SPF)"
                .to_string(),
            "; should be rejected, and request reports. If you email through mailing lists that"
                .to_string(),
            "; strip DKIM-Signature headers and don't rewrite the From header, you may want to"
                .to_string(),
            "; set the policy to p=none.".to_string(),
            format!("_dmarc.{}.             TXT \"{}\"", d, dmarc),
            String::new(),
        ]);

        match &self.domain_conf.mta_sts {
            Some(sts) => records.extend([
                "; Remote servers can use MTA-STS to verify our TLS certificate with the".to_string(),
                "; WebPKI pool of CA's (certificate authorities) when delivering over SMTP with"
                    .to_string(),
                "; STARTTLS.".to_string(),
                format!("mta-sts.{}.            CNAME {}", d, host),
                format!("_mta-sts.{}.           TXT \"v=STSv1; id={}\"", d, sts.policy_id),
                String::new(),
            ]),
            None => records.extend([
                "; Note: No MTA-STS to indicate TLS should be used. Either because disabled for the"
                    .to_string(),
                "; domain or because the static config does not have a listener with MTA-STS configured."
                    .to_string(),
                String::new(),
            ]),
        }

        if let Some(recipient) = &self.domain_conf.tlsrpt {
            let record = TlsRptRecord::mailto(&recipient.address(d));
            records.extend([
                "; Request reporting about TLS failures.".to_string(),
                format!("_smtp._tls.{}.         TXT \"{}\"", d, record),
                String::new(),
            ]);
        }

        records.extend([
            "; Autoconfig is used by Thunderbird. Autodiscover is (in theory) used by Microsoft."
                .to_string(),
            format!("autoconfig.{}.         CNAME {}", d, host),
            format!("_autodiscover._tcp.{}. SRV 0 1 443 {}", d, host),
            String::new(),
            "; For secure IMAP and submission autoconfig, point to mail host.".to_string(),
            format!("_imaps._tcp.{}.        SRV 0 1 993 {}", d, host),
            format!("_submissions._tcp.{}.  SRV 0 1 465 {}", d, host),
            String::new(),
            "; Next records specify POP3 and non-TLS ports are not to be used.".to_string(),
            "; These are optional and safe to leave out (e.g. if you have to click a lot in a"
                .to_string(),
            "; DNS admin web interface).".to_string(),
            format!("_imap._tcp.{}.         SRV 0 1 143 .", d),
            format!("_submission._tcp.{}.   SRV 0 1 587 .", d),
            format!("_pop3._tcp.{}.         SRV 0 1 110 .", d),
            format!("_pop3s._tcp.{}.        SRV 0 1 995 .", d),
        ]);

        if let Some(issuer) = &self.cert_issuer {
            self.push_caa_records(&mut records, d, &host, issuer);
        }

        Ok(records)
    }

    fn push_dane_records(&self, records: &mut Vec<String>, d: &str, host: &str) {
        let tls = match self
            .static_config
            .listeners
            .get(PUBLIC_LISTENER)
            .and_then(|l| l.tls.as_ref())
        {
            Some(tls) if tls.has_host_keys() => tls,
            _ => return,
        };

        records.extend(
            [
                "; DANE: These records indicate that a remote mail server trying to deliver email",
                "; with SMTP (TCP port 25) must verify the TLS certificate with DANE-EE (3), based",
                "; on the certificate public key (\"SPKI\", 1) that is SHA2-256-hashed (1) to the",
                "; hexadecimal hash. DANE-EE verification means only the certificate or public",
                "; key is verified, not whether the certificate is signed by a (centralized)",
                "; certificate authority (CA), is expired, or matches the host name.",
                ";",
                "; NOTE: Create the records below only once: They are for the machine, and apply",
                "; to all hosted domains.",
            ]
            .map(String::from),
        );
        if !self.has_dnssec {
            records.extend(
                [
                    ";",
                    "; WARNING: Domain does not appear to be DNSSEC-signed. To enable DANE, first",
                    "; enable DNSSEC on your domain, then add the TLSA records. Records below have been",
                    "; commented out.",
                ]
                .map(String::from),
            );
        }

        // ECDSA before RSA.
        for key in tls.host_ecdsa_p256_keys.iter().chain(&tls.host_rsa2048_keys) {
            let tlsa = tlsa_record(key);
            let line = if self.has_dnssec {
                format!(
                    "_25._tcp.{:<width$} TLSA {}",
                    host,
                    tlsa,
                    width = NAME_WIDTH + d.len() - "_25._tcp.".len()
                )
            } else {
                format!(
                    ";; _25._tcp.{:<width$} TLSA {}",
                    host,
                    tlsa,
                    width = NAME_WIDTH + d.len() - ";; _25._tcp.".len()
                )
            };
            records.push(line);
        }
        records.push(String::new());
    }

    fn push_caa_records(&self, records: &mut Vec<String>, d: &str, host: &str, issuer: &str) {
        records.extend([
            String::new(),
            "; Optional:".to_string(),
            "; You could mark Let's Encrypt as the only Certificate Authority allowed to".to_string(),
            "; sign TLS certificates for your domain.".to_string(),
            format!("{}.                    CAA 0 issue \"{}\"", d, issuer),
        ]);

        let account_uri = match &self.acme_account_uri {
            Some(uri) => uri,
            None => {
                records.extend(
                    [
                        ";",
                        "; Note: After starting up, once an ACME account has been created, CAA records",
                        "; that restrict issuance to the account will be suggested.",
                    ]
                    .map(String::from),
                );
                return;
            }
        };

        let value = format!(
            "{}; accounturi={}; validationmethods=tls-alpn-01,http-01",
            issuer, account_uri
        );
        records.extend([
            ";".to_string(),
            "; Optionally limit certificates for this domain to the account ID and methods used by the mail server."
                .to_string(),
            format!(";; {}.                 CAA 0 issue \"{}\"", d, value),
            ";".to_string(),
            "; Or alternatively only limit for email-specific subdomains, so you can use".to_string(),
            "; other accounts/methods for other subdomains.".to_string(),
            format!(";; autoconfig.{}.      CAA 0 issue \"{}\"", d, value),
            format!(";; mta-sts.{}.         CAA 0 issue \"{}\"", d, value),
        ]);

        if self
            .static_config
            .hostname
            .ends_with(&format!(".{}", d))
        {
            records.extend([
                ";".to_string(),
                "; And the mail hostname.".to_string(),
                format!(
                    ";; {:<width$} CAA 0 issue \"{}\"",
                    host,
                    value,
                    width = NAME_WIDTH - 3 + d.len()
                ),
            ]);
        }
    }

    /// Records as zone file text, one per line.
    pub fn generate_zone_file(&self) -> Result<String> {
        let mut zone = self.generate_records()?.join("\n");
        zone.push('\n');
        Ok(zone)
    }
}

/// Zone file lines for `domain`, see [`DnsConfigGenerator`].
pub fn domain_records(
    static_config: &StaticConfig,
    domain_conf: &Domain,
    domain: &str,
    has_dnssec: bool,
    cert_issuer: Option<&str>,
    acme_account_uri: Option<&str>,
) -> Result<Vec<String>> {
    let mut generator =
        DnsConfigGenerator::new(static_config, domain_conf, domain).with_dnssec(has_dnssec);
    if let Some(issuer) = cert_issuer {
        generator = generator.with_cert_issuer(issuer);
    }
    if let Some(uri) = acme_account_uri {
        generator = generator.with_acme_account_uri(uri);
    }
    generator.generate_records()
}
