//! sentinel-acme - operator tool for clustered ACME state
//!
//! Inspects the records Sentinel replicas share through their KV backend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, warn};

use sentinel_acme::{connect_backend, resolve_replica_id, CertificateStore, KvCertificateStore};
use sentinel_acme::{ChallengeCoordinator, ChallengeProvider};
use sentinel_common::init_tracing;
use sentinel_config::Config;

/// Inspect clustered ACME state shared by Sentinel replicas
#[derive(Parser, Debug)]
#[command(name = "sentinel-acme")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "SENTINEL_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and probe the backend
    Check,
    /// Show the replica currently holding HTTP challenge leadership
    Leader,
    /// Print the stored ACME account of a resolver
    Account {
        /// Certificate resolver name
        resolver: String,
    },
    /// List the stored certificates of a resolver
    Certificates {
        /// Certificate resolver name
        resolver: String,
    },
    /// Follow certificate changes of a resolver until interrupted
    Watch {
        /// Certificate resolver name
        resolver: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_tracing(level, config.logging.format)?;

    config.validate().context("Configuration validation failed")?;

    let store = connect_backend(&config.cluster)
        .await
        .context("Failed to connect to KV backend")?;
    let records = KvCertificateStore::new(store.clone()).with_lock_ttl(config.cluster.lock_ttl());

    match cli.command {
        Commands::Check => {
            let replica = resolve_replica_id(&config.cluster)?;
            let coordinator = ChallengeCoordinator::new(store.clone(), replica)
                .with_lock_ttl(config.cluster.lock_ttl());
            let leader = coordinator.leader().await?;
            let (timeout, interval) = coordinator.timeout();

            println!(
                "sentinel-acme: configuration {} is valid",
                cli.config.as_deref().unwrap_or("(embedded)")
            );
            println!("  backend:          {}", store.backend_name());
            println!("  replica:          {}", coordinator.replica());
            println!("  lock ttl:         {}s", config.cluster.lock_ttl_secs);
            println!(
                "  challenge leader: {}",
                leader.as_deref().unwrap_or("(none)")
            );
            println!(
                "  challenge timeout {}s, poll every {}s",
                timeout.as_secs(),
                interval.as_secs()
            );
        }
        Commands::Leader => {
            let replica = resolve_replica_id(&config.cluster)?;
            let coordinator = ChallengeCoordinator::new(store, replica);
            match coordinator.leader().await? {
                Some(leader) => println!("{leader}"),
                None => println!("(no challenge leader)"),
            }
        }
        Commands::Account { resolver } => match records.get_account(&resolver).await? {
            Some(account) => {
                println!("email:        {}", account.email);
                println!("key type:     {}", account.key_type);
                println!(
                    "registration: {}",
                    account
                        .registration
                        .as_ref()
                        .map(|r| r.uri.as_str())
                        .unwrap_or("(none)")
                );
            }
            None => println!("no account stored for resolver '{resolver}'"),
        },
        Commands::Certificates { resolver } => {
            let certificates = records.get_certificates(&resolver).await?;
            if certificates.is_empty() {
                println!("no certificates stored for resolver '{resolver}'");
            }
            for cert in &certificates {
                let names: Vec<&str> = cert.certificate.domain.names().collect();
                println!("[{}] {}", cert.store, names.join(", "));
            }
        }
        Commands::Watch { resolver } => watch(&records, &resolver).await?,
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).context("Failed to load configuration file"),
        None => Config::default_embedded().context("Failed to load embedded configuration"),
    }
}

async fn watch(records: &KvCertificateStore, resolver: &str) -> Result<()> {
    let mut events = records.watch_certificate_changes(resolver).await?;
    info!(resolver = %resolver, "Watching certificate changes, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    warn!(resolver = %resolver, "Watch stream ended");
                    return Ok(());
                };
                let certificates = records.get_certificates(resolver).await?;
                println!(
                    "{:?} {}: {} certificate(s)",
                    event.kind,
                    event.key,
                    certificates.len()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        }
    }
}
