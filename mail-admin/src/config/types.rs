//! Dynamic configuration: domains, accounts and web routing.
//!
//! This is the document rewritten on every change. It is replaced wholesale,
//! never edited in place once published.

use crate::utils::dkim::DkimKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DynamicConfig {
    #[serde(default)]
    pub domains: BTreeMap<String, Domain>,
    #[serde(default)]
    pub accounts: BTreeMap<String, Account>,
    #[serde(default)]
    pub web_domain_redirects: BTreeMap<String, String>,
    #[serde(default)]
    pub web_handlers: Vec<WebHandler>,
}

/// Hosted email domain
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Domain {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Separator after which a localpart is ignored for routing, e.g. `+`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localpart_catchall_separator: Option<char>,
    #[serde(default)]
    pub localpart_case_sensitive: bool,
    #[serde(default)]
    pub dkim: Dkim,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dmarc: Option<ReportRecipient>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mta_sts: Option<MtaSts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tlsrpt: Option<ReportRecipient>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Dkim {
    #[serde(default)]
    pub selectors: BTreeMap<String, Selector>,
    /// Selectors used for signing outgoing messages, in order.
    #[serde(default)]
    pub sign: Vec<String>,
}

/// Named DKIM key slot, published at `<name>._domainkey.<domain>`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Selector {
    #[serde(default = "default_hash")]
    pub hash: String,
    /// Signature validity, e.g. `72h`.
    pub expiration: String,
    /// Path relative to the configuration directory.
    pub private_key_file: PathBuf,
    #[serde(skip)]
    pub key: Option<Arc<DkimKey>>,
}

fn default_hash() -> String {
    "sha256".to_string()
}

/// Account and mailbox receiving DMARC or TLS reports
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReportRecipient {
    pub account: String,
    pub localpart: String,
    /// Domain of the report address, the configured domain when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub mailbox: String,
}

impl ReportRecipient {
    /// Report address, using `domain` when no other domain is configured.
    pub fn address(&self, domain: &str) -> String {
        format!(
            "{}@{}",
            self.localpart,
            self.domain.as_deref().unwrap_or(domain)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MtaStsMode {
    Enforce,
    Testing,
    None,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MtaSts {
    pub policy_id: String,
    pub mode: MtaStsMode,
    /// Policy max age in seconds.
    pub max_age: u64,
    #[serde(default)]
    pub mx: Vec<String>,
}

/// Delivery settings for a single address of an account
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Destination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SubjectPass {
    /// Seconds a subject pass token stays valid.
    #[serde(default)]
    pub period: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AutomaticJunkFlags {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub junk_mailbox_regexp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub neutral_mailbox_regexp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub not_junk_mailbox_regexp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct JunkParams {
    #[serde(default)]
    pub onegrams: bool,
    #[serde(default)]
    pub twograms: bool,
    #[serde(default)]
    pub threegrams: bool,
    pub max_power: f64,
    pub top_words: u32,
    pub ignore_words: f64,
    pub rare_words: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JunkFilter {
    pub threshold: f64,
    pub params: JunkParams,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Account {
    /// Default domain for the account.
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub full_name: String,
    #[serde(default)]
    pub destinations: BTreeMap<String, Destination>,
    #[serde(default)]
    pub subject_pass: SubjectPass,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rejects_mailbox: String,
    #[serde(default)]
    pub automatic_junk_flags: AutomaticJunkFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub junk_filter: Option<JunkFilter>,
    #[serde(default)]
    pub max_outgoing_messages_per_day: u32,
    #[serde(default)]
    pub max_first_time_recipients_per_day: u32,
    #[serde(default)]
    pub quota_message_size: i64,
}

/// HTTP handler for a domain and path, exactly one of the kinds must be set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WebHandler {
    pub log_name: String,
    pub domain: String,
    pub path_regexp: String,
    #[serde(default)]
    pub dont_redirect_plain_http: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_static: Option<WebStatic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_redirect: Option<WebRedirect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_forward: Option<WebForward>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WebStatic {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strip_prefix: String,
    pub root: String,
    #[serde(default)]
    pub list_files: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WebRedirect {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub orig_path_regexp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replace_path: String,
    #[serde(default)]
    pub status_code: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WebForward {
    #[serde(default)]
    pub strip_path: bool,
    pub url: String,
}

impl WebHandler {
    /// Number of handler kinds configured.
    pub fn kind_count(&self) -> usize {
        [
            self.web_static.is_some(),
            self.web_redirect.is_some(),
            self.web_forward.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}
