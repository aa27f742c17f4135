//! Static configuration: instance hostname and network listeners.
//!
//! Loaded once at startup and read-only afterwards.

use crate::error::{AdminError, Result};
use crate::utils::email::{parse_domain, parse_localpart};
use rcgen::{KeyPair, PKCS_ECDSA_P256_SHA256, PKCS_RSA_SHA256};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variables with this prefix override file settings,
/// e.g. `MAIL_ADMIN__HOSTNAME`.
pub const ENV_PREFIX: &str = "MAIL_ADMIN";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticConfig {
    /// Instance hostname, the MX target for all hosted domains.
    pub hostname: String,
    #[serde(default)]
    pub postmaster: PostmasterConfig,
    /// Host-level TLS reporting address, localpart at the instance hostname.
    #[serde(default)]
    pub host_tlsrpt: Option<HostTlsRpt>,
    #[serde(default)]
    pub listeners: BTreeMap<String, Listener>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PostmasterConfig {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub mailbox: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostTlsRpt {
    pub account: String,
    pub localpart: String,
    pub mailbox: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Listener {
    #[serde(default)]
    pub ips: Vec<String>,
    /// Overrides the instance hostname for this listener.
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub tls: Option<ListenerTls>,
    #[serde(default)]
    pub smtp: Protocol,
    #[serde(default)]
    pub submission: Protocol,
    #[serde(default)]
    pub submissions: Protocol,
    #[serde(default)]
    pub imap: Protocol,
    #[serde(default)]
    pub imaps: Protocol,
    #[serde(default)]
    pub mta_sts_https: Protocol,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Protocol {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub port: Option<u16>,
    /// Only meaningful for plain IMAP and submission.
    #[serde(default)]
    pub no_require_starttls: bool,
}

impl Protocol {
    pub fn enabled(port: Option<u16>) -> Self {
        Protocol {
            enabled: true,
            port,
            no_require_starttls: false,
        }
    }

    /// Configured port, or the protocol default.
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListenerTls {
    /// PEM PKCS#8 host private keys, ECDSA P-256 or RSA-2048, used for DANE.
    #[serde(default)]
    pub host_private_key_files: Vec<PathBuf>,
    #[serde(skip)]
    pub host_ecdsa_p256_keys: Vec<HostKey>,
    #[serde(skip)]
    pub host_rsa2048_keys: Vec<HostKey>,
}

impl ListenerTls {
    pub fn has_host_keys(&self) -> bool {
        !self.host_ecdsa_p256_keys.is_empty() || !self.host_rsa2048_keys.is_empty()
    }
}

/// Public half of a host TLS key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKey {
    /// DER encoded SubjectPublicKeyInfo.
    pub spki_der: Vec<u8>,
}

/// Kind of a parsed host key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyKind {
    EcdsaP256,
    Rsa2048,
}

/// Parse a PEM PKCS#8 host private key into its public key info.
pub fn parse_host_key(data: &[u8]) -> Result<(HostKeyKind, HostKey)> {
    let block = pem::parse(data)
        .map_err(|e| AdminError::Config(format!("parsing host private key pem: {}", e)))?;
    if block.tag() != "PRIVATE KEY" {
        return Err(AdminError::Config(format!(
            "host private key must be PKCS#8, got PEM block {:?}",
            block.tag()
        )));
    }
    let der = block.contents();
    let pair = KeyPair::from_der(der)
        .map_err(|e| AdminError::Config(format!("parsing host private key: {}", e)))?;

    if pair.is_compatible(&PKCS_ECDSA_P256_SHA256) {
        Ok((
            HostKeyKind::EcdsaP256,
            HostKey {
                spki_der: pair.public_key_der(),
            },
        ))
    } else if pair.is_compatible(&PKCS_RSA_SHA256) {
        let bits = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| AdminError::Config(format!("parsing rsa host key: {}", e)))?
            .size()
            * 8;
        if bits != 2048 {
            return Err(AdminError::Config(format!(
                "rsa host key has {} bits, need 2048",
                bits
            )));
        }
        Ok((
            HostKeyKind::Rsa2048,
            HostKey {
                spki_der: pair.public_key_der(),
            },
        ))
    } else {
        Err(AdminError::Config(format!(
            "unsupported host key algorithm {:?}",
            pair.algorithm()
        )))
    }
}

impl StaticConfig {
    /// Load from a TOML file, with environment overrides.
    ///
    /// Relative host key paths are resolved against the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Toml))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| AdminError::Config(format!("{}: {}", path.display(), e)))?;

        let config: StaticConfig = settings
            .try_deserialize()
            .map_err(|e| AdminError::Config(format!("{}: {}", path.display(), e)))?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let config = config.finish(dir)?;
        info!("Static configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse from TOML text, resolving key files against `config_dir`.
    pub fn from_toml_str(content: &str, config_dir: &Path) -> Result<Self> {
        let config: StaticConfig =
            toml::from_str(content).map_err(|e| AdminError::Config(e.to_string()))?;
        config.finish(config_dir)
    }

    /// Minimal configuration without listeners.
    pub fn new(hostname: &str) -> Result<Self> {
        Ok(StaticConfig {
            hostname: parse_domain(hostname)?,
            postmaster: PostmasterConfig::default(),
            host_tlsrpt: None,
            listeners: BTreeMap::new(),
        })
    }

    fn finish(mut self, config_dir: &Path) -> Result<Self> {
        self.hostname = parse_domain(&self.hostname)?;
        if let Some(tlsrpt) = &mut self.host_tlsrpt {
            tlsrpt.localpart = parse_localpart(&tlsrpt.localpart)?;
        }

        for (name, listener) in self.listeners.iter_mut() {
            if let Some(hostname) = &listener.hostname {
                listener.hostname = Some(parse_domain(hostname)?);
            }
            if let Some(tls) = &mut listener.tls {
                tls.host_ecdsa_p256_keys.clear();
                tls.host_rsa2048_keys.clear();
                for file in &tls.host_private_key_files {
                    let path = config_dir.join(file);
                    let pem = std::fs::read(&path).map_err(|e| AdminError::KeyFile {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                    let (kind, key) = parse_host_key(&pem).map_err(|e| AdminError::KeyFile {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                    debug!("Loaded {:?} host key for listener {}", kind, name);
                    match kind {
                        HostKeyKind::EcdsaP256 => tls.host_ecdsa_p256_keys.push(key),
                        HostKeyKind::Rsa2048 => tls.host_rsa2048_keys.push(key),
                    }
                }
            }
        }
        Ok(self)
    }

    /// Hostname a listener is reachable at.
    pub fn listener_hostname<'a>(&'a self, listener: &'a Listener) -> &'a str {
        listener.hostname.as_deref().unwrap_or(&self.hostname)
    }
}
