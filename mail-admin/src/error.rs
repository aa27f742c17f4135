use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Domain already present: {0}")]
    DomainExists(String),

    #[error("Domain does not exist: {0}")]
    DomainNotFound(String),

    #[error("Account already present: {0}")]
    AccountExists(String),

    #[error("Account does not exist: {0}")]
    AccountNotFound(String),

    #[error("Destination {destination} not present for account {account}")]
    DestinationNotFound { account: String, destination: String },

    #[error("Address {address} not available: {reason}")]
    AddressUnavailable { address: String, reason: String },

    #[error("Catchall address already configured for domain {0}")]
    CatchallExists(String),

    #[error("Address does not exist: {0}")]
    AddressNotFound(String),

    #[error("Address {0} not removed, likely a postmaster/reporting address")]
    ReservedAddress(String),

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Key file {path}: {reason}")]
    KeyFile { path: PathBuf, reason: String },

    #[error("Writing dynamic config: {0}")]
    Persist(String),

    #[error("DNS record error: {0}")]
    Dns(String),

    #[error("No listeners found for imap and/or submission")]
    NoListeners,
}

pub type Result<T> = std::result::Result<T, AdminError>;
