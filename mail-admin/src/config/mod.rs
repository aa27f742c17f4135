//! Configuration management
//!
//! A [`Snapshot`] combines the read-only [`StaticConfig`], the current
//! [`DynamicConfig`] and the address index derived from both. Snapshots are
//! built with [`Snapshot::prepare`], which validates every invariant, and are
//! immutable afterwards.

pub mod listener;
pub mod store;
pub mod types;

pub use listener::{HostKey, Listener, ListenerTls, Protocol, StaticConfig};
pub use store::{DocumentStore, FsKeyFileStore, KeyFileStore, TomlDocumentStore};
pub use types::{
    Account, Destination, Dkim, Domain, DynamicConfig, MtaSts, MtaStsMode, ReportRecipient,
    Selector, WebHandler,
};

use crate::admin::index::AddressIndex;
use crate::error::{AdminError, Result};
use crate::utils::dkim::DkimKey;
use crate::utils::email::{parse_domain, parse_localpart};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// Published configuration state
#[derive(Debug)]
pub struct Snapshot {
    pub static_config: Arc<StaticConfig>,
    pub dynamic: DynamicConfig,
    pub index: AddressIndex,
}

impl Snapshot {
    /// Validate `dynamic` against `static_config` and derive the address index.
    pub fn prepare(static_config: Arc<StaticConfig>, dynamic: DynamicConfig) -> Result<Self> {
        validate_dynamic(&static_config, &dynamic)?;
        let index = AddressIndex::build(&static_config, &dynamic)?;
        Ok(Snapshot {
            static_config,
            dynamic,
            index,
        })
    }

    pub fn domain(&self, name: &str) -> Option<&Domain> {
        self.dynamic.domains.get(name)
    }

    pub fn account(&self, name: &str) -> Option<&Account> {
        self.dynamic.accounts.get(name)
    }
}

/// Load DKIM private keys for all selectors that do not have one yet.
pub fn load_dkim_keys(dynamic: &mut DynamicConfig, key_files: &dyn KeyFileStore) -> Result<()> {
    for (domain, conf) in dynamic.domains.iter_mut() {
        for (name, selector) in conf.dkim.selectors.iter_mut() {
            if selector.key.is_some() {
                continue;
            }
            let pem = key_files.read(&selector.private_key_file)?;
            let key = DkimKey::from_pem(&pem).map_err(|e| AdminError::KeyFile {
                path: selector.private_key_file.clone(),
                reason: e.to_string(),
            })?;
            debug!("Loaded DKIM key for selector {} of {}", name, domain);
            selector.key = Some(Arc::new(key));
        }
    }
    Ok(())
}

fn validate_regexp(what: &str, pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Ok(());
    }
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| AdminError::Config(format!("invalid {} {:?}: {}", what, pattern, e)))
}

fn validate_dynamic(static_config: &StaticConfig, dynamic: &DynamicConfig) -> Result<()> {
    for (name, domain) in &dynamic.domains {
        if parse_domain(name)? != *name {
            return Err(AdminError::Config(format!(
                "domain {:?} is not in normalized form",
                name
            )));
        }

        if let Some(sep) = domain.localpart_catchall_separator {
            if sep.is_ascii_alphanumeric() || sep == '.' || sep == '@' {
                return Err(AdminError::Config(format!(
                    "domain {}: invalid catchall separator {:?}",
                    name, sep
                )));
            }
        }

        for (selector_name, selector) in &domain.dkim.selectors {
            if selector.key.is_none() {
                return Err(AdminError::Config(format!(
                    "domain {}: no private key loaded for DKIM selector {}",
                    name, selector_name
                )));
            }
        }
        for sign in &domain.dkim.sign {
            if !domain.dkim.selectors.contains_key(sign) {
                return Err(AdminError::Config(format!(
                    "domain {}: DKIM sign selector {} is not configured",
                    name, sign
                )));
            }
        }

        let reports = [("dmarc", &domain.dmarc), ("tlsrpt", &domain.tlsrpt)];
        for (kind, recipient) in reports {
            if let Some(recipient) = recipient {
                parse_localpart(&recipient.localpart)?;
                if !dynamic.accounts.contains_key(&recipient.account) {
                    return Err(AdminError::Config(format!(
                        "domain {}: {} account {} does not exist",
                        name, kind, recipient.account
                    )));
                }
            }
        }
    }

    if let Some(tlsrpt) = &static_config.host_tlsrpt {
        if !dynamic.accounts.contains_key(&tlsrpt.account) {
            return Err(AdminError::Config(format!(
                "host tlsrpt account {} does not exist",
                tlsrpt.account
            )));
        }
    }

    for (name, account) in &dynamic.accounts {
        let flags = &account.automatic_junk_flags;
        validate_regexp("junk mailbox regexp", &flags.junk_mailbox_regexp)
            .and_then(|_| validate_regexp("neutral mailbox regexp", &flags.neutral_mailbox_regexp))
            .and_then(|_| {
                validate_regexp("not junk mailbox regexp", &flags.not_junk_mailbox_regexp)
            })
            .map_err(|e| AdminError::Config(format!("account {}: {}", name, e)))?;
    }

    for handler in &dynamic.web_handlers {
        if handler.kind_count() != 1 {
            return Err(AdminError::Config(format!(
                "web handler {}: must have exactly one of static, redirect or forward",
                handler.log_name
            )));
        }
        validate_regexp("web handler path regexp", &handler.path_regexp)?;
        if let Some(redirect) = &handler.web_redirect {
            validate_regexp("redirect path regexp", &redirect.orig_path_regexp)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn static_config() -> Arc<StaticConfig> {
        Arc::new(StaticConfig::new("mail.example.org").unwrap())
    }

    fn domain_with_selector(key: Option<Arc<DkimKey>>) -> Domain {
        let mut selectors = BTreeMap::new();
        selectors.insert(
            "s1".to_string(),
            Selector {
                hash: "sha256".to_string(),
                expiration: "72h".to_string(),
                private_key_file: PathBuf::from("dkim/s1.pem"),
                key,
            },
        );
        Domain {
            dkim: Dkim {
                selectors,
                sign: vec!["s1".to_string()],
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_prepare_requires_loaded_keys() {
        let mut dynamic = DynamicConfig::default();
        dynamic
            .domains
            .insert("example.org".to_string(), domain_with_selector(None));

        let err = Snapshot::prepare(static_config(), dynamic).unwrap_err();
        assert!(err.to_string().contains("no private key loaded"));
    }

    #[test]
    fn test_prepare_rejects_unknown_sign_selector() {
        let key = Arc::new(DkimKey::Unsupported("1.2.3".to_string()));
        let mut domain = domain_with_selector(Some(key));
        domain.dkim.sign.push("missing".to_string());

        let mut dynamic = DynamicConfig::default();
        dynamic.domains.insert("example.org".to_string(), domain);
        assert!(Snapshot::prepare(static_config(), dynamic).is_err());
    }

    #[test]
    fn test_prepare_rejects_unnormalized_domain() {
        let mut dynamic = DynamicConfig::default();
        dynamic
            .domains
            .insert("Example.org".to_string(), Domain::default());
        assert!(Snapshot::prepare(static_config(), dynamic).is_err());
    }

    #[test]
    fn test_prepare_rejects_bad_regexp() {
        let mut dynamic = DynamicConfig::default();
        let mut account = Account {
            domain: "example.org".to_string(),
            ..Default::default()
        };
        account.automatic_junk_flags.junk_mailbox_regexp = "(".to_string();
        dynamic.accounts.insert("alice".to_string(), account);
        assert!(Snapshot::prepare(static_config(), dynamic).is_err());
    }

    #[test]
    fn test_prepare_rejects_missing_report_account() {
        let mut domain = Domain::default();
        domain.dmarc = Some(ReportRecipient {
            account: "nobody".to_string(),
            localpart: "dmarc-reports".to_string(),
            domain: None,
            mailbox: "DMARC".to_string(),
        });
        let mut dynamic = DynamicConfig::default();
        dynamic.domains.insert("example.org".to_string(), domain);
        assert!(Snapshot::prepare(static_config(), dynamic).is_err());
    }
}
