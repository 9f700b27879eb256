use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use pkg_constants::paths::{DEFAULT_CONFIG, DEFAULT_DATA_DIR};
use pkg_constants::tokens::{DEFAULT_RESYNC_INTERVAL_SECS, SYSTEM_NAMESPACE};
use pkg_controllers::cache::{CacheSyncer, SecretCache};
use pkg_controllers::tokencleaner::TokenCleaner;
use pkg_state::client::StateStore;
use pkg_state::leader::LeaderElection;
use pkg_state::secrets::RegistrySecrets;
use pkg_types::config::{CleanerConfigFile, load_config_file};

#[derive(Parser, Debug)]
#[command(name = "token-cleaner", about = "bootstrap token cleanup controller")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Namespace that holds bootstrap token secrets
    #[arg(long)]
    namespace: Option<String>,

    /// Safety-net full-cache rescan interval, in seconds
    #[arg(long)]
    resync_interval_secs: Option<u64>,

    /// Identity used for leader election
    #[arg(long)]
    server_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: CleanerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let namespace = cli
        .namespace
        .or(file_cfg.namespace)
        .unwrap_or_else(|| SYSTEM_NAMESPACE.to_string());
    let mut resync_secs = cli
        .resync_interval_secs
        .or(file_cfg.resync_interval_secs)
        .unwrap_or(DEFAULT_RESYNC_INTERVAL_SECS);
    if resync_secs == 0 {
        warn!(
            "resync-interval-secs must be non-zero, using default {}s",
            DEFAULT_RESYNC_INTERVAL_SECS
        );
        resync_secs = DEFAULT_RESYNC_INTERVAL_SECS;
    }
    let server_id = cli
        .server_id
        .or(file_cfg.server_id)
        .unwrap_or_else(|| format!("token-cleaner-{}", std::process::id()));

    info!("Starting token-cleaner");
    info!("  Data dir:  {}", data_dir);
    info!("  Namespace: {}", namespace);
    info!("  Resync:    {}s", resync_secs);
    info!("  Server id: {}", server_id);

    let store = StateStore::new(&data_dir).await?;

    // The cleaner mutates shared state, so it only runs on the leader.
    let election = LeaderElection::new(store.clone(), server_id);
    let (_election_handle, mut leader_rx) = election.start();
    while !*leader_rx.borrow() {
        leader_rx.changed().await?;
    }

    let cache = SecretCache::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let syncer = CacheSyncer::new(store.clone(), cache.clone(), &namespace, events_tx);
    let syncer_handle = syncer.start();

    let secrets = Arc::new(RegistrySecrets::new(store.clone()));
    let cleaner = TokenCleaner::new(cache, secrets, Duration::from_secs(resync_secs));
    let cleaner_handle = cleaner.start(events_rx);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cleaner_handle.abort();
    syncer_handle.abort();
    store.close().await?;

    Ok(())
}
