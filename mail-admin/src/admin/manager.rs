//! Configuration manager
//!
//! Owns the published [`Snapshot`] and performs every configuration change.
//! A change works on a copy of the current dynamic configuration, validates
//! it, persists it and only then publishes it. Changes are serialized by a
//! single lock, reads never take it.

use crate::admin::index::AddressIndex;
use crate::admin::staging::StagedKeyFiles;
use crate::config::listener::StaticConfig;
use crate::config::store::{DocumentStore, KeyFileStore};
use crate::config::types::{
    Account, AutomaticJunkFlags, Destination, Dkim, Domain, DynamicConfig, JunkFilter, JunkParams,
    MtaSts, MtaStsMode, ReportRecipient, Selector, SubjectPass, WebHandler,
};
use crate::config::{load_dkim_keys, Snapshot};
use crate::error::{AdminError, Result};
use crate::utils::dkim::{make_key, DkimKey, KeyKind};
use crate::utils::email::{parse_address, parse_domain, parse_localpart, Address};
use arc_swap::ArcSwap;
use chrono::{Datelike, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

pub const DMARC_REPORTS_LOCALPART: &str = "dmarc-reports";
pub const DMARC_REPORTS_MAILBOX: &str = "DMARC";
pub const TLS_REPORTS_LOCALPART: &str = "tls-reports";
pub const TLS_REPORTS_MAILBOX: &str = "TLSRPT";

const DKIM_KEY_DIR: &str = "dkim";
const DKIM_EXPIRATION: &str = "72h";
const MTA_STS_MAX_AGE: u64 = 24 * 60 * 60;
const SUBJECT_PASS_PERIOD: u64 = 12 * 60 * 60;
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Selector suffixes and key kinds for a new domain. The first two sign.
const NEW_DOMAIN_SELECTORS: [(&str, KeyKind); 4] = [
    ("a", KeyKind::Ed25519),
    ("b", KeyKind::Rsa2048),
    ("c", KeyKind::Ed25519),
    ("d", KeyKind::Rsa2048),
];

/// Default configuration for a new account receiving mail at `addr`.
pub fn make_account_config(addr: &Address) -> Account {
    let mut account = Account {
        domain: addr.domain.clone(),
        rejects_mailbox: "Rejects".to_string(),
        junk_filter: Some(JunkFilter {
            threshold: 0.95,
            params: JunkParams {
                onegrams: true,
                twograms: false,
                threegrams: false,
                max_power: 0.01,
                top_words: 10,
                ignore_words: 0.1,
                rare_words: 2,
            },
        }),
        automatic_junk_flags: AutomaticJunkFlags {
            enabled: true,
            junk_mailbox_regexp: "^(junk|spam)".to_string(),
            neutral_mailbox_regexp: "^(inbox|neutral|postmaster|dmarc|tlsrpt|rejects)".to_string(),
            not_junk_mailbox_regexp: String::new(),
        },
        subject_pass: SubjectPass {
            period: SUBJECT_PASS_PERIOD,
        },
        ..Default::default()
    };
    account
        .destinations
        .insert(addr.to_string(), Destination::default());
    account
}

/// Build the configuration for a new domain, writing its four DKIM keys
/// through `staged`.
fn make_domain_config(
    static_config: &StaticConfig,
    domain: &str,
    account: &str,
    staged: &mut StagedKeyFiles<'_>,
) -> Result<Domain> {
    let now = Utc::now();
    let year = now.year();
    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();

    let mut dkim = Dkim::default();
    for (suffix, kind) in NEW_DOMAIN_SELECTORS {
        let name = format!("{}{}", year, suffix);
        let pem = make_key(kind, Some(&name), Some(domain))?;
        let key = DkimKey::from_pem(&pem)?;

        let record = format!("{}._domainkey.{}", name, domain);
        let path = Path::new(DKIM_KEY_DIR).join(format!(
            "{}.{}.{}.privatekey.pkcs8.pem",
            record,
            timestamp,
            kind.file_tag()
        ));
        staged.write(&path, &pem)?;

        dkim.selectors.insert(
            name,
            Selector {
                hash: "sha256".to_string(),
                expiration: DKIM_EXPIRATION.to_string(),
                private_key_file: path,
                key: Some(Arc::new(key)),
            },
        );
    }
    dkim.sign = NEW_DOMAIN_SELECTORS[..2]
        .iter()
        .map(|(suffix, _)| format!("{}{}", year, suffix))
        .collect();

    let mta_sts = static_config
        .listeners
        .values()
        .any(|l| l.mta_sts_https.enabled)
        .then(|| MtaSts {
            policy_id: timestamp.clone(),
            mode: MtaStsMode::Enforce,
            max_age: MTA_STS_MAX_AGE,
            mx: vec![static_config.hostname.clone()],
        });

    Ok(Domain {
        localpart_catchall_separator: Some('+'),
        dkim,
        dmarc: Some(ReportRecipient {
            account: account.to_string(),
            localpart: DMARC_REPORTS_LOCALPART.to_string(),
            domain: None,
            mailbox: DMARC_REPORTS_MAILBOX.to_string(),
        }),
        mta_sts,
        tlsrpt: Some(ReportRecipient {
            account: account.to_string(),
            localpart: TLS_REPORTS_LOCALPART.to_string(),
            domain: None,
            mailbox: TLS_REPORTS_MAILBOX.to_string(),
        }),
        ..Default::default()
    })
}

/// Lexically normalized path, so differently spelled references to one key
/// file compare equal. `..` removes the preceding normal component, and is
/// dropped directly below the root.
fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            _ => parts.push(component),
        }
    }
    parts.iter().collect()
}

/// `dir/file` becomes `dir/old/file`.
fn old_key_path(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    dir.join("old").join(path.file_name().unwrap_or_default())
}

fn account_mut<'a>(dynamic: &'a mut DynamicConfig, account: &str) -> Result<&'a mut Account> {
    dynamic
        .accounts
        .get_mut(account)
        .ok_or_else(|| AdminError::AccountNotFound(account.to_string()))
}

/// Holder of the published configuration
pub struct ConfigManager {
    current: ArcSwap<Snapshot>,
    mutation_lock: Mutex<()>,
    documents: Box<dyn DocumentStore>,
    key_files: Box<dyn KeyFileStore>,
}

impl ConfigManager {
    /// Create a manager for an existing dynamic configuration. DKIM keys not
    /// loaded yet are read from `key_files`.
    pub fn new(
        static_config: StaticConfig,
        mut dynamic: DynamicConfig,
        documents: Box<dyn DocumentStore>,
        key_files: Box<dyn KeyFileStore>,
    ) -> Result<Self> {
        load_dkim_keys(&mut dynamic, key_files.as_ref())?;
        let snapshot = Snapshot::prepare(Arc::new(static_config), dynamic)?;
        Ok(ConfigManager {
            current: ArcSwap::from_pointee(snapshot),
            mutation_lock: Mutex::new(()),
            documents,
            key_files,
        })
    }

    /// Load the dynamic configuration from `documents`, starting empty if
    /// there is none yet.
    pub fn load(
        static_config: StaticConfig,
        documents: Box<dyn DocumentStore>,
        key_files: Box<dyn KeyFileStore>,
    ) -> Result<Self> {
        let dynamic = documents.read()?.unwrap_or_default();
        let manager = Self::new(static_config, dynamic, documents, key_files)?;
        let snapshot = manager.snapshot();
        info!(
            "Configuration loaded: {} domains, {} accounts",
            snapshot.dynamic.domains.len(),
            snapshot.dynamic.accounts.len()
        );
        Ok(manager)
    }

    /// Currently published configuration.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn key_files(&self) -> &dyn KeyFileStore {
        self.key_files.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate, persist and publish a new dynamic configuration.
    fn commit(&self, current: &Snapshot, dynamic: DynamicConfig) -> Result<Arc<Snapshot>> {
        let snapshot = Snapshot::prepare(current.static_config.clone(), dynamic)?;
        self.documents.write(&snapshot.dynamic)?;
        let snapshot = Arc::new(snapshot);
        self.current.store(snapshot.clone());
        debug!("Published new configuration");
        Ok(snapshot)
    }

    /// Check whether `address` could be added as a new address of an account.
    pub fn check_address_available(&self, address: &str) -> Result<()> {
        let addr = parse_address(address)?;
        let snapshot = self.snapshot();
        snapshot.index.check_available(&snapshot.dynamic, &addr)
    }

    /// Add a domain with fresh DKIM keys and report addresses for `account`.
    ///
    /// If the account does not exist, it is created with `localpart` at the
    /// new domain as its address. An existing account gets a postmaster
    /// address for the domain instead, and `localpart` must then be absent.
    pub fn domain_add(&self, domain: &str, account: &str, localpart: Option<&str>) -> Result<()> {
        let _guard = self.lock();
        match self.try_domain_add(domain, account, localpart) {
            Ok(()) => {
                info!("Domain {} added for account {}", domain, account);
                Ok(())
            }
            Err(e) => {
                error!("Failed to add domain {}: {}", domain, e);
                Err(e)
            }
        }
    }

    fn try_domain_add(&self, domain: &str, account: &str, localpart: Option<&str>) -> Result<()> {
        let current = self.snapshot();
        let domain = parse_domain(domain)?;
        if current.dynamic.domains.contains_key(&domain) {
            return Err(AdminError::DomainExists(domain));
        }

        let localpart = localpart.filter(|lp| !lp.is_empty());
        if account.is_empty() {
            return Err(AdminError::InvalidRequest("account name is empty".to_string()));
        }
        let exists = current.dynamic.accounts.contains_key(account);
        if exists && localpart.is_some() {
            return Err(AdminError::InvalidRequest(
                "account already exists (leave localpart empty when using an existing account)"
                    .to_string(),
            ));
        }
        if !exists && localpart.is_none() {
            return Err(AdminError::InvalidRequest(
                "account does not yet exist (specify a localpart)".to_string(),
            ));
        }

        let mut dynamic = current.dynamic.clone();
        if let Some(localpart) = localpart {
            let addr = Address::new(parse_localpart(localpart)?, domain.clone());
            dynamic
                .accounts
                .insert(account.to_string(), make_account_config(&addr));
        } else if account != current.static_config.postmaster.account {
            let postmaster = Address::new("postmaster", domain.clone());
            account_mut(&mut dynamic, account)?
                .destinations
                .insert(postmaster.to_string(), Destination::default());
        }

        let mut staged = StagedKeyFiles::new(self.key_files.as_ref());
        let conf = make_domain_config(&current.static_config, &domain, account, &mut staged)?;
        dynamic.domains.insert(domain, conf);

        self.commit(&current, dynamic)?;
        staged.commit();
        Ok(())
    }

    /// Remove a domain. Accounts are kept. DKIM key files no other domain
    /// uses are moved to an `old` directory next to them.
    pub fn domain_remove(&self, domain: &str) -> Result<()> {
        let _guard = self.lock();
        match self.try_domain_remove(domain) {
            Ok(()) => {
                info!("Domain {} removed", domain);
                Ok(())
            }
            Err(e) => {
                error!("Failed to remove domain {}: {}", domain, e);
                Err(e)
            }
        }
    }

    fn try_domain_remove(&self, domain: &str) -> Result<()> {
        let current = self.snapshot();
        let domain = parse_domain(domain)?;
        let removed = current
            .dynamic
            .domains
            .get(&domain)
            .ok_or_else(|| AdminError::DomainNotFound(domain.clone()))?;

        let mut dynamic = current.dynamic.clone();
        dynamic.domains.remove(&domain);
        let published = self.commit(&current, dynamic)?;

        // Relocation is housekeeping, the removal itself has been published.
        let in_use: BTreeSet<PathBuf> = published
            .dynamic
            .domains
            .values()
            .flat_map(|d| d.dkim.selectors.values())
            .map(|s| clean_path(&s.private_key_file))
            .collect();
        let orphaned: BTreeSet<PathBuf> = removed
            .dkim
            .selectors
            .values()
            .map(|s| clean_path(&s.private_key_file))
            .filter(|p| !p.as_os_str().is_empty() && !in_use.contains(p))
            .collect();

        for path in orphaned {
            let dest = old_key_path(&path);
            if let Err(e) = self.relocate_key_file(&path, &dest) {
                error!(
                    "Failed to move DKIM private key file {} of removed domain {} to {}: {}",
                    path.display(),
                    domain,
                    dest.display(),
                    e
                );
            }
        }
        Ok(())
    }

    fn relocate_key_file(&self, from: &Path, to: &Path) -> Result<()> {
        if self.key_files.exists(to) {
            return Err(AdminError::KeyFile {
                path: to.to_path_buf(),
                reason: "destination already exists".to_string(),
            });
        }
        self.key_files.rename(from, to)?;
        debug!("Moved DKIM private key file {} to {}", from.display(), to.display());
        Ok(())
    }

    /// Add an account with a single address.
    pub fn account_add(&self, account: &str, address: &str) -> Result<()> {
        let _guard = self.lock();
        match self.try_account_add(account, address) {
            Ok(()) => {
                info!("Account {} added with address {}", account, address);
                Ok(())
            }
            Err(e) => {
                error!("Failed to add account {}: {}", account, e);
                Err(e)
            }
        }
    }

    fn try_account_add(&self, account: &str, address: &str) -> Result<()> {
        let current = self.snapshot();
        if account.is_empty() {
            return Err(AdminError::InvalidRequest("account name is empty".to_string()));
        }
        if current.dynamic.accounts.contains_key(account) {
            return Err(AdminError::AccountExists(account.to_string()));
        }
        let addr = parse_address(address)?;
        current.index.check_available(&current.dynamic, &addr)?;

        let mut dynamic = current.dynamic.clone();
        dynamic
            .accounts
            .insert(account.to_string(), make_account_config(&addr));
        self.commit(&current, dynamic)?;
        Ok(())
    }

    /// Remove an account and all its addresses.
    pub fn account_remove(&self, account: &str) -> Result<()> {
        let _guard = self.lock();
        match self.try_account_remove(account) {
            Ok(()) => {
                info!("Account {} removed", account);
                Ok(())
            }
            Err(e) => {
                error!("Failed to remove account {}: {}", account, e);
                Err(e)
            }
        }
    }

    fn try_account_remove(&self, account: &str) -> Result<()> {
        let current = self.snapshot();
        let mut dynamic = current.dynamic.clone();
        if dynamic.accounts.remove(account).is_none() {
            return Err(AdminError::AccountNotFound(account.to_string()));
        }
        self.commit(&current, dynamic)?;
        Ok(())
    }

    /// Add an address, or an `@domain` catchall, to an account.
    pub fn address_add(&self, address: &str, account: &str) -> Result<()> {
        let _guard = self.lock();
        match self.try_address_add(address, account) {
            Ok(()) => {
                info!("Address {} added to account {}", address, account);
                Ok(())
            }
            Err(e) => {
                error!("Failed to add address {} to account {}: {}", address, account, e);
                Err(e)
            }
        }
    }

    fn try_address_add(&self, address: &str, account: &str) -> Result<()> {
        let current = self.snapshot();
        if !current.dynamic.accounts.contains_key(account) {
            return Err(AdminError::AccountNotFound(account.to_string()));
        }

        let destination = if let Some(domain) = address.strip_prefix('@') {
            let domain = parse_domain(domain)?;
            if !current.dynamic.domains.contains_key(&domain) {
                return Err(AdminError::DomainNotFound(domain));
            }
            let catchall = format!("@{}", domain);
            if current.index.contains(&catchall) {
                return Err(AdminError::CatchallExists(domain));
            }
            catchall
        } else {
            let addr = parse_address(address)?;
            current.index.check_available(&current.dynamic, &addr)?;
            addr.to_string()
        };

        let mut dynamic = current.dynamic.clone();
        account_mut(&mut dynamic, account)?
            .destinations
            .insert(destination, Destination::default());
        self.commit(&current, dynamic)?;
        Ok(())
    }

    /// Remove a configured address or catchall from its account.
    ///
    /// Report addresses derived from domain settings cannot be removed this
    /// way.
    pub fn address_remove(&self, address: &str) -> Result<()> {
        let _guard = self.lock();
        match self.try_address_remove(address) {
            Ok(account) => {
                info!("Address {} removed from account {}", address, account);
                Ok(())
            }
            Err(e) => {
                error!("Failed to remove address {}: {}", address, e);
                Err(e)
            }
        }
    }

    fn try_address_remove(&self, address: &str) -> Result<String> {
        let current = self.snapshot();

        // Addresses with a catchall suffix are not configured themselves.
        if !address.starts_with('@') {
            let addr = parse_address(address)?;
            if let Some(sep) = current
                .dynamic
                .domains
                .get(&addr.domain)
                .and_then(|d| d.localpart_catchall_separator)
            {
                if addr.localpart.contains(sep) {
                    return Err(AdminError::AddressNotFound(address.to_string()));
                }
            }
        }

        let key = AddressIndex::key_for(address, &current.dynamic)?;
        let entry = current
            .index
            .get(&key)
            .ok_or_else(|| AdminError::AddressNotFound(address.to_string()))?;
        let destination = entry
            .destination
            .as_ref()
            .ok_or_else(|| AdminError::ReservedAddress(address.to_string()))?;

        let mut dynamic = current.dynamic.clone();
        let account = account_mut(&mut dynamic, &entry.account)?;
        if account.destinations.remove(destination).is_none() {
            return Err(AdminError::ReservedAddress(address.to_string()));
        }
        self.commit(&current, dynamic)?;
        Ok(entry.account.clone())
    }

    pub fn account_full_name_save(&self, account: &str, full_name: &str) -> Result<()> {
        let _guard = self.lock();
        let result = self.update_account(account, |acc| {
            acc.full_name = full_name.to_string();
            Ok(())
        });
        match result {
            Ok(()) => {
                info!("Full name of account {} saved", account);
                Ok(())
            }
            Err(e) => {
                error!("Failed to save full name of account {}: {}", account, e);
                Err(e)
            }
        }
    }

    /// Replace the settings of one existing destination of an account.
    pub fn destination_save(
        &self,
        account: &str,
        destination_name: &str,
        destination: Destination,
    ) -> Result<()> {
        let _guard = self.lock();
        let result = self.update_account(account, |acc| {
            let current = acc.destinations.get_mut(destination_name).ok_or_else(|| {
                AdminError::DestinationNotFound {
                    account: account.to_string(),
                    destination: destination_name.to_string(),
                }
            })?;
            *current = destination;
            Ok(())
        });
        match result {
            Ok(()) => {
                info!("Destination {} of account {} saved", destination_name, account);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to save destination {} of account {}: {}",
                    destination_name, account, e
                );
                Err(e)
            }
        }
    }

    /// Save sending limits and message size quota, 0 meaning no limit.
    pub fn account_limits_save(
        &self,
        account: &str,
        max_outgoing_messages_per_day: u32,
        max_first_time_recipients_per_day: u32,
        quota_message_size: i64,
    ) -> Result<()> {
        let _guard = self.lock();
        let result = self.update_account(account, |acc| {
            acc.max_outgoing_messages_per_day = max_outgoing_messages_per_day;
            acc.max_first_time_recipients_per_day = max_first_time_recipients_per_day;
            acc.quota_message_size = quota_message_size;
            Ok(())
        });
        match result {
            Ok(()) => {
                info!("Limits of account {} saved", account);
                Ok(())
            }
            Err(e) => {
                error!("Failed to save limits of account {}: {}", account, e);
                Err(e)
            }
        }
    }

    /// Apply `update` to a copy of an account and commit it.
    fn update_account<F>(&self, account: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut Account) -> Result<()>,
    {
        let current = self.snapshot();
        let mut dynamic = current.dynamic.clone();
        update(account_mut(&mut dynamic, account)?)?;
        self.commit(&current, dynamic)?;
        Ok(())
    }

    /// Replace the web domain redirects and handlers as a whole.
    pub fn web_config_save(
        &self,
        domain_redirects: BTreeMap<String, String>,
        handlers: Vec<WebHandler>,
    ) -> Result<()> {
        let _guard = self.lock();
        let handler_count = handlers.len();
        let current = self.snapshot();
        let mut dynamic = current.dynamic.clone();
        dynamic.web_domain_redirects = domain_redirects;
        dynamic.web_handlers = handlers;
        match self.commit(&current, dynamic) {
            Ok(_) => {
                info!("Web configuration saved with {} handlers", handler_count);
                Ok(())
            }
            Err(e) => {
                error!("Failed to save web configuration: {}", e);
                Err(e)
            }
        }
    }
}
