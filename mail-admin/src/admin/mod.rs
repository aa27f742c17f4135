/// Admin module for hosted domain and account management
///
/// Provides:
/// - Configuration changes with key file staging (`manager`)
/// - Address uniqueness checks (`index`)
/// - DNS record generation for hosted domains (`dns`)
/// - Mail client endpoint discovery (`client`)

pub mod client;
pub mod dns;
pub mod index;
pub mod manager;
pub mod staging;

pub use client::{
    client_config_domain, client_configs_domain, ClientConfig, ClientConfigs, ClientConfigsEntry,
    ProtocolConfig, TlsMode,
};
pub use dns::{domain_records, DnsConfigGenerator};
pub use index::{AccountDestination, AddressIndex};
pub use manager::ConfigManager;
pub use staging::StagedKeyFiles;
