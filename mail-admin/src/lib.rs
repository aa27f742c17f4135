//! mail-admin: Hosted domain and account administration
//!
//! Manages the domains, accounts, addresses and DKIM keys of a mail server,
//! and derives the DNS records an operator has to publish for each domain.
//!
//! # Features
//!
//! - **Transactional changes**: every change is validated, persisted and only
//!   then published; DKIM key files written for a failed change are removed
//! - **Unique routing**: canonical addresses are unique across the instance
//! - **DNS records**: MX, DKIM, SPF, DMARC, MTA-STS, TLSRPT, DANE and CAA
//! - **Client config**: IMAP and submission endpoints for mail clients
//!
//! # Example
//!
//! ```no_run
//! use mail_admin::admin::{ConfigManager, DnsConfigGenerator};
//! use mail_admin::config::{FsKeyFileStore, StaticConfig, TomlDocumentStore};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let static_config = StaticConfig::load("/etc/mail/mail-admin.toml")?;
//!     let manager = ConfigManager::load(
//!         static_config,
//!         Box::new(TomlDocumentStore::new("/etc/mail/domains.toml")),
//!         Box::new(FsKeyFileStore::new("/etc/mail")),
//!     )?;
//!
//!     manager.domain_add("example.org", "alice", Some("alice"))?;
//!
//!     let snapshot = manager.snapshot();
//!     let zone = DnsConfigGenerator::for_domain(&snapshot, "example.org")?
//!         .with_cert_issuer("letsencrypt.org")
//!         .generate_zone_file()?;
//!     println!("{}", zone);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`admin`]: Configuration changes, DNS records and client config
//! - [`config`]: Static and dynamic configuration, persistence
//! - [`error`]: Error types and handling
//! - [`utils`]: Address parsing and DNS record encodings

pub mod admin;
pub mod config;
pub mod error;
pub mod utils;

// Re-export commonly used types
pub use admin::ConfigManager;
pub use config::{Snapshot, StaticConfig};
pub use error::{AdminError, Result};
