//! CLI for hosted domain and account administration
//!
//! # Usage
//!
//! ```bash
//! # Add a domain, creating account alice with address alice@example.org
//! mail-admin --config /etc/mail/mail-admin.toml domain add example.org alice alice
//!
//! # Print the DNS records to publish for it
//! mail-admin domain records example.org --dnssec --cert-issuer letsencrypt.org
//!
//! # Add another address to the account
//! mail-admin address add bob@example.org alice
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use mail_admin::admin::{client_config_domain, client_configs_domain, DnsConfigGenerator};
use mail_admin::config::{FsKeyFileStore, StaticConfig, TomlDocumentStore};
use mail_admin::ConfigManager;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mail-admin")]
#[command(about = "Manage hosted domains, accounts and DKIM keys", long_about = None)]
struct Cli {
    /// Static configuration file
    #[arg(short, long, default_value = "mail-admin.toml")]
    config: PathBuf,

    /// Dynamic configuration file, defaults to domains.toml next to the
    /// static configuration
    #[arg(long)]
    domains: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage domains
    #[command(subcommand)]
    Domain(DomainCommand),
    /// Manage accounts
    #[command(subcommand)]
    Account(AccountCommand),
    /// Manage addresses of accounts
    #[command(subcommand)]
    Address(AddressCommand),
    /// Check whether an address can be added to an account
    CheckAddress {
        address: String,
    },
}

#[derive(Subcommand)]
enum DomainCommand {
    /// Add a domain with new DKIM keys
    Add {
        domain: String,
        /// Account receiving DMARC and TLS reports
        account: String,
        /// Localpart for a new account, omit for an existing account
        localpart: Option<String>,
    },
    /// Remove a domain, accounts are kept
    Remove { domain: String },
    /// Print DNS records to publish for a domain
    Records {
        domain: String,
        /// The zone is DNSSEC-signed, publish DANE records
        #[arg(long)]
        dnssec: bool,
        /// CA to allow in a CAA record
        #[arg(long)]
        cert_issuer: Option<String>,
        /// ACME account URI to suggest in CAA records
        #[arg(long)]
        acme_account_uri: Option<String>,
    },
    /// Print IMAP and submission settings for mail clients
    ClientConfig {
        domain: String,
        /// List all endpoints instead of the preferred ones
        #[arg(long)]
        all: bool,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Add an account with an initial address
    Add { account: String, address: String },
    /// Remove an account and its addresses
    Remove { account: String },
    /// Set the full name used in outgoing messages
    FullName { account: String, full_name: String },
    /// Set sending limits and message size quota, 0 for no limit
    Limits {
        account: String,
        #[arg(long, default_value_t = 0)]
        max_outgoing_messages_per_day: u32,
        #[arg(long, default_value_t = 0)]
        max_first_time_recipients_per_day: u32,
        #[arg(long, default_value_t = 0)]
        quota_message_size: i64,
    },
}

#[derive(Subcommand)]
enum AddressCommand {
    /// Add an address or @domain catchall to an account
    Add { address: String, account: String },
    /// Remove an address or catchall
    Remove { address: String },
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mail_admin=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn load_manager(cli: &Cli) -> anyhow::Result<ConfigManager> {
    let static_config = StaticConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let config_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let domains = cli
        .domains
        .clone()
        .unwrap_or_else(|| config_dir.join("domains.toml"));
    let documents = TomlDocumentStore::new(domains);
    info!("Using dynamic configuration {}", documents.path().display());

    let manager = ConfigManager::load(
        static_config,
        Box::new(documents),
        Box::new(FsKeyFileStore::new(config_dir)),
    )?;
    Ok(manager)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let manager = load_manager(&cli)?;

    match cli.command {
        Commands::Domain(DomainCommand::Add {
            domain,
            account,
            localpart,
        }) => {
            manager.domain_add(&domain, &account, localpart.as_deref())?;
            println!("✓ Domain {} added", domain);
        }
        Commands::Domain(DomainCommand::Remove { domain }) => {
            manager.domain_remove(&domain)?;
            println!("✓ Domain {} removed", domain);
        }
        Commands::Domain(DomainCommand::Records {
            domain,
            dnssec,
            cert_issuer,
            acme_account_uri,
        }) => {
            let snapshot = manager.snapshot();
            let mut generator =
                DnsConfigGenerator::for_domain(&snapshot, &domain)?.with_dnssec(dnssec);
            if let Some(issuer) = &cert_issuer {
                generator = generator.with_cert_issuer(issuer);
            }
            if let Some(uri) = &acme_account_uri {
                generator = generator.with_acme_account_uri(uri);
            }
            print!("{}", generator.generate_zone_file()?);
        }
        Commands::Domain(DomainCommand::ClientConfig { domain, all, json }) => {
            let snapshot = manager.snapshot();
            if all {
                let configs = client_configs_domain(&snapshot, &domain)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&configs)?);
                } else {
                    println!(
                        "{:<20} {:<30} {:<6} {:<12} {}",
                        "Protocol", "Host", "Port", "Listener", "Note"
                    );
                    println!("{:-<90}", "");
                    for entry in &configs.entries {
                        println!(
                            "{:<20} {:<30} {:<6} {:<12} {}",
                            entry.protocol, entry.host, entry.port, entry.listener, entry.note
                        );
                    }
                }
            } else {
                let config = client_config_domain(&snapshot, &domain)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                } else {
                    println!(
                        "IMAP:       {}:{} ({})",
                        config.imap.host, config.imap.port, config.imap.tls_mode
                    );
                    println!(
                        "Submission: {}:{} ({})",
                        config.submission.host, config.submission.port, config.submission.tls_mode
                    );
                }
            }
        }
        Commands::Account(AccountCommand::Add { account, address }) => {
            manager.account_add(&account, &address)?;
            println!("✓ Account {} added", account);
        }
        Commands::Account(AccountCommand::Remove { account }) => {
            manager.account_remove(&account)?;
            println!("✓ Account {} removed", account);
        }
        Commands::Account(AccountCommand::FullName { account, full_name }) => {
            manager.account_full_name_save(&account, &full_name)?;
            println!("✓ Full name of account {} saved", account);
        }
        Commands::Account(AccountCommand::Limits {
            account,
            max_outgoing_messages_per_day,
            max_first_time_recipients_per_day,
            quota_message_size,
        }) => {
            manager.account_limits_save(
                &account,
                max_outgoing_messages_per_day,
                max_first_time_recipients_per_day,
                quota_message_size,
            )?;
            println!("✓ Limits of account {} saved", account);
        }
        Commands::Address(AddressCommand::Add { address, account }) => {
            manager.address_add(&address, &account)?;
            println!("✓ Address {} added to account {}", address, account);
        }
        Commands::Address(AddressCommand::Remove { address }) => {
            manager.address_remove(&address)?;
            println!("✓ Address {} removed", address);
        }
        Commands::CheckAddress { address } => match manager.check_address_available(&address) {
            Ok(()) => println!("✓ Address {} is available", address),
            Err(e) => {
                println!("✗ {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
