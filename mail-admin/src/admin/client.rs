//! Client configuration
//!
//! Resolves the IMAP and submission endpoints mail clients should use for a
//! hosted domain from the configured listeners.

use crate::config::listener::{Listener, StaticConfig};
use crate::config::Snapshot;
use crate::error::{AdminError, Result};
use crate::admin::dns::PUBLIC_LISTENER;
use serde::Serialize;
use std::fmt;

pub const IMAPS_PORT: u16 = 993;
pub const IMAP_PORT: u16 = 143;
pub const SUBMISSIONS_PORT: u16 = 465;
pub const SUBMISSION_PORT: u16 = 587;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// TLS from the start of the connection
    Immediate,
    StartTls,
    /// Plain text, the listener has no TLS configured
    None,
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::Immediate => write!(f, "TLS"),
            TlsMode::StartTls => write!(f, "STARTTLS"),
            TlsMode::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolConfig {
    pub host: String,
    pub port: u16,
    pub tls_mode: TlsMode,
}

/// Single IMAP and submission endpoint for a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientConfig {
    pub imap: ProtocolConfig,
    pub submission: ProtocolConfig,
}

/// One enabled endpoint of a listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientConfigsEntry {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub listener: String,
    pub note: String,
}

/// All IMAP and submission endpoints for a domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientConfigs {
    pub entries: Vec<ClientConfigsEntry>,
}

fn ensure_domain(snapshot: &Snapshot, domain: &str) -> Result<()> {
    if snapshot.domain(domain).is_none() {
        return Err(AdminError::DomainNotFound(domain.to_string()));
    }
    Ok(())
}

/// First endpoint of each protocol, found while scanning listeners.
#[derive(Default)]
struct Gathered {
    imap: Option<ProtocolConfig>,
    submission: Option<ProtocolConfig>,
}

impl Gathered {
    fn done(&self) -> bool {
        self.imap.is_some() && self.submission.is_some()
    }

    fn gather(&mut self, static_config: &StaticConfig, listener: &Listener) {
        let host = static_config.listener_hostname(listener).to_string();
        let plain_mode = if listener.tls.is_some() {
            TlsMode::StartTls
        } else {
            TlsMode::None
        };

        if self.imap.is_none() {
            if listener.imaps.enabled {
                self.imap = Some(ProtocolConfig {
                    host: host.clone(),
                    port: listener.imaps.port_or(IMAPS_PORT),
                    tls_mode: TlsMode::Immediate,
                });
            } else if listener.imap.enabled {
                self.imap = Some(ProtocolConfig {
                    host: host.clone(),
                    port: listener.imap.port_or(IMAP_PORT),
                    tls_mode: plain_mode,
                });
            }
        }

        if self.submission.is_none() {
            if listener.submissions.enabled {
                self.submission = Some(ProtocolConfig {
                    host,
                    port: listener.submissions.port_or(SUBMISSIONS_PORT),
                    tls_mode: TlsMode::Immediate,
                });
            } else if listener.submission.enabled {
                self.submission = Some(ProtocolConfig {
                    host,
                    port: listener.submission.port_or(SUBMISSION_PORT),
                    tls_mode: plain_mode,
                });
            }
        }
    }
}

/// The IMAP and submission endpoint to configure in mail clients for
/// `domain`.
///
/// The `public` listener is looked at first, then the others by name.
/// Implicit TLS is preferred over STARTTLS within a listener.
pub fn client_config_domain(snapshot: &Snapshot, domain: &str) -> Result<ClientConfig> {
    ensure_domain(snapshot, domain)?;

    let static_config = &snapshot.static_config;
    let public = static_config.listeners.get(PUBLIC_LISTENER);
    let others = static_config
        .listeners
        .iter()
        .filter(|(name, _)| name.as_str() != PUBLIC_LISTENER)
        .map(|(_, listener)| listener);

    let mut gathered = Gathered::default();
    for listener in public.into_iter().chain(others) {
        gathered.gather(static_config, listener);
        if gathered.done() {
            break;
        }
    }

    match gathered {
        Gathered {
            imap: Some(imap),
            submission: Some(submission),
        } => Ok(ClientConfig { imap, submission }),
        _ => Err(AdminError::NoListeners),
    }
}

fn starttls_note(has_tls: bool, require_tls: bool) -> &'static str {
    if !has_tls {
        "plain text, no STARTTLS configured"
    } else if require_tls {
        "STARTTLS required"
    } else {
        "STARTTLS optional"
    }
}

/// Every IMAP and submission endpoint of every listener, by listener name.
pub fn client_configs_domain(snapshot: &Snapshot, domain: &str) -> Result<ClientConfigs> {
    ensure_domain(snapshot, domain)?;

    let static_config = &snapshot.static_config;
    let mut configs = ClientConfigs::default();
    for (name, listener) in &static_config.listeners {
        let host = static_config.listener_hostname(listener);
        let has_tls = listener.tls.is_some();
        let mut add = |protocol: &str, port: u16, note: &str| {
            configs.entries.push(ClientConfigsEntry {
                protocol: protocol.to_string(),
                host: host.to_string(),
                port,
                listener: name.clone(),
                note: note.to_string(),
            });
        };

        if listener.submissions.enabled {
            add(
                "Submission (SMTP)",
                listener.submissions.port_or(SUBMISSIONS_PORT),
                "with TLS",
            );
        }
        if listener.imaps.enabled {
            add("IMAP", listener.imaps.port_or(IMAPS_PORT), "with TLS");
        }
        if listener.submission.enabled {
            add(
                "Submission (SMTP)",
                listener.submission.port_or(SUBMISSION_PORT),
                starttls_note(has_tls, !listener.submission.no_require_starttls),
            );
        }
        if listener.imap.enabled {
            add(
                "IMAP",
                listener.imap.port_or(IMAP_PORT),
                starttls_note(has_tls, !listener.imap.no_require_starttls),
            );
        }
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::listener::{ListenerTls, Protocol};
    use crate::config::types::{Domain, DynamicConfig};
    use std::sync::Arc;

    fn snapshot(listeners: Vec<(&str, Listener)>) -> Snapshot {
        let mut static_config = StaticConfig::new("mail.example.org").unwrap();
        for (name, listener) in listeners {
            static_config.listeners.insert(name.to_string(), listener);
        }
        let mut dynamic = DynamicConfig::default();
        dynamic
            .domains
            .insert("example.org".to_string(), Domain::default());
        Snapshot::prepare(Arc::new(static_config), dynamic).unwrap()
    }

    fn tls() -> Option<ListenerTls> {
        Some(ListenerTls::default())
    }

    #[test]
    fn test_prefers_public_and_implicit_tls() {
        let snapshot = snapshot(vec![
            (
                "internal",
                Listener {
                    hostname: Some("internal.example.org".to_string()),
                    imap: Protocol::enabled(None),
                    submission: Protocol::enabled(None),
                    ..Default::default()
                },
            ),
            (
                "public",
                Listener {
                    tls: tls(),
                    imap: Protocol::enabled(None),
                    imaps: Protocol::enabled(None),
                    submission: Protocol::enabled(Some(2587)),
                    ..Default::default()
                },
            ),
        ]);

        let config = client_config_domain(&snapshot, "example.org").unwrap();
        assert_eq!(
            config.imap,
            ProtocolConfig {
                host: "mail.example.org".to_string(),
                port: 993,
                tls_mode: TlsMode::Immediate,
            }
        );
        assert_eq!(config.submission.port, 2587);
        assert_eq!(config.submission.tls_mode, TlsMode::StartTls);
    }

    #[test]
    fn test_falls_back_to_other_listeners() {
        let snapshot = snapshot(vec![
            (
                "b",
                Listener {
                    hostname: Some("b.example.org".to_string()),
                    submission: Protocol::enabled(None),
                    ..Default::default()
                },
            ),
            (
                "public",
                Listener {
                    tls: tls(),
                    imaps: Protocol::enabled(None),
                    ..Default::default()
                },
            ),
        ]);

        let config = client_config_domain(&snapshot, "example.org").unwrap();
        assert_eq!(config.imap.host, "mail.example.org");
        assert_eq!(config.submission.host, "b.example.org");
        assert_eq!(config.submission.port, 587);
        assert_eq!(config.submission.tls_mode, TlsMode::None);
    }

    #[test]
    fn test_no_listeners() {
        let snapshot = snapshot(vec![(
            "public",
            Listener {
                imaps: Protocol::enabled(None),
                ..Default::default()
            },
        )]);
        let err = client_config_domain(&snapshot, "example.org").unwrap_err();
        assert!(matches!(err, AdminError::NoListeners));
    }

    #[test]
    fn test_unknown_domain() {
        let snapshot = snapshot(Vec::new());
        assert!(matches!(
            client_config_domain(&snapshot, "example.net"),
            Err(AdminError::DomainNotFound(_))
        ));
        assert!(client_configs_domain(&snapshot, "example.net").is_err());
    }

    #[test]
    fn test_client_configs_lists_all_endpoints() {
        let snapshot = snapshot(vec![
            (
                "plain",
                Listener {
                    imap: Protocol::enabled(None),
                    ..Default::default()
                },
            ),
            (
                "public",
                Listener {
                    tls: tls(),
                    submissions: Protocol::enabled(None),
                    imaps: Protocol::enabled(None),
                    submission: Protocol::enabled(None),
                    imap: Protocol {
                        enabled: true,
                        port: None,
                        no_require_starttls: true,
                    },
                    ..Default::default()
                },
            ),
        ]);

        let configs = client_configs_domain(&snapshot, "example.org").unwrap();
        let summary: Vec<(&str, u16, &str, &str)> = configs
            .entries
            .iter()
            .map(|e| {
                (
                    e.protocol.as_str(),
                    e.port,
                    e.listener.as_str(),
                    e.note.as_str(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("IMAP", 143, "plain", "plain text, no STARTTLS configured"),
                ("Submission (SMTP)", 465, "public", "with TLS"),
                ("IMAP", 993, "public", "with TLS"),
                ("Submission (SMTP)", 587, "public", "STARTTLS required"),
                ("IMAP", 143, "public", "STARTTLS optional"),
            ]
        );
    }
}
