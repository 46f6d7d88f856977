//! proxypact daemon -- headless consent/presence core.
//!
//! Usage:
//!
//!   proxypact-daemon --user <USER_ID> [OPTIONS]
//!
//! Options:
//!
//!   --user <USER_ID>          Our identity on the social network (required)
//!   --resource <NAME>         Client id suffix (default: pact)
//!   --name <NAME>             Display name sent in handshakes
//!   --description <TEXT>      Device label sent in handshakes
//!   --data-dir <PATH>         Data directory (default: platform-specific)
//!   --monitor-interval <SECS> Handshake recovery sweep interval
//!   --config <PATH>           Load config from JSON file
//!
//! The transport is stdio: inbound events arrive as JSON lines on
//! stdin, outbound envelopes leave as JSON lines on stdout, and all
//! logging goes to stderr. The daemon runs until stdin closes or it
//! is interrupted with Ctrl+C.

use std::sync::Arc;

use proxypact_core::records::{LocalIdentityRecord, OptionsRecord};
use proxypact_core::{LocalInstance, Network};
use proxypact_storage::{keys, SledStore, Storage};
use proxypact_types::{ClientId, CoreEvent, InstanceId, KeyHash, ProxypactError, UserId};
use rand::distributions::Alphanumeric;
use rand::Rng;

mod config;
mod stdio;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const STORAGE_DIR: &str = "storage";

/// Length of a generated instance identifier.
const INSTANCE_ID_LEN: usize = 40;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Tracing / logging. stdout is the protocol stream, so logs go
    // to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI arguments.
    let cli = config::CliArgs::parse_from_env();

    // Load or merge config file if provided.
    let daemon_config = match &cli.config_path {
        Some(path) => match config::DaemonConfig::load(path) {
            Ok(cfg) => cfg.merge_cli(&cli),
            Err(e) => {
                tracing::error!("failed to load config file: {e}");
                std::process::exit(1);
            }
        },
        None => config::DaemonConfig::from_cli(&cli),
    };

    // Run the daemon.
    if let Err(e) = run_daemon(daemon_config).await {
        tracing::error!("daemon error: {e}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Daemon main logic
// ---------------------------------------------------------------------------

async fn run_daemon(cfg: config::DaemonConfig) -> Result<(), String> {
    let user_id = cfg
        .user_id
        .clone()
        .ok_or_else(|| "no user id configured; pass --user <USER_ID>".to_string())?;

    // -----------------------------------------------------------------------
    // 1. Storage
    // -----------------------------------------------------------------------

    let storage_path = cfg.data_dir.join(STORAGE_DIR);
    std::fs::create_dir_all(&storage_path)
        .map_err(|e| format!("failed to create data directory: {e}"))?;

    let storage: Arc<dyn Storage> = Arc::new(
        SledStore::open(&storage_path).map_err(|e| format!("failed to open storage: {e}"))?,
    );

    tracing::info!(data_dir = %cfg.data_dir.display(), "storage opened");

    // -----------------------------------------------------------------------
    // 2. Local identity
    // -----------------------------------------------------------------------

    let identity = load_or_create_identity(&storage).await?;
    let options = load_or_update_options(&storage, &cfg.description).await?;

    let local = LocalInstance {
        user_id: UserId::new(user_id.clone()),
        client_id: ClientId::new(format!("{user_id}/{}", cfg.resource)),
        instance_id: identity.instance_id.clone(),
        key_hash: identity.key_hash.clone(),
        name: cfg.display_name.clone(),
        description: options.description.clone(),
    };

    tracing::info!(
        user = %local.user_id,
        client = %local.client_id,
        instance = %local.instance_id,
        "local identity ready"
    );

    // -----------------------------------------------------------------------
    // 3. Network core
    // -----------------------------------------------------------------------

    let mut network = Network::new(
        Arc::clone(&storage),
        Arc::new(stdio::StdoutOutbound::new()),
        local,
    );
    network.set_monitor_interval_secs(cfg.monitor_interval_secs);

    network
        .load()
        .await
        .map_err(|e| format!("failed to restore roster: {e}"))?;

    let transport_tx = network.transport_sender();
    let command_tx = network.command_sender();
    let event_rx = network
        .take_event_receiver()
        .ok_or_else(|| "event receiver already taken".to_string())?;

    let mut loop_handle = network
        .start()
        .map_err(|e| format!("network start failed: {e}"))?;

    tracing::info!("network core started");

    // Consumer side of the policy boundary: the core only reports
    // offers; the operator decides (via a REQUEST consent command)
    // whether to take one up.
    let event_handle = tokio::spawn(consume_events(event_rx));

    // Transport pump: stdin → core (network traffic and operator
    // consent actions share the line protocol).
    let pump_handle = tokio::spawn(stdio::pump_stdin(transport_tx, command_tx));

    // -----------------------------------------------------------------------
    // 4. Wait for shutdown
    // -----------------------------------------------------------------------

    // `network` must stay alive here: dropping it closes the command
    // channel and the event loop would exit on its own.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down...");
        }
        _ = pump_handle => {
            tracing::info!("transport ended, shutting down...");
        }
        result = &mut loop_handle => {
            match result {
                Ok(()) => tracing::error!("event loop exited unexpectedly"),
                Err(e) => tracing::error!(%e, "event loop panicked"),
            }
            event_handle.abort();
            return Err("event loop stopped unexpectedly".into());
        }
    }

    network
        .shutdown()
        .map_err(|e| format!("shutdown failed: {e}"))?;
    let _ = loop_handle.await;
    event_handle.abort();

    tracing::info!("daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Identity bootstrap
// ---------------------------------------------------------------------------

/// Loads the persisted local identity, generating one on first run.
async fn load_or_create_identity(
    storage: &Arc<dyn Storage>,
) -> Result<LocalIdentityRecord, String> {
    match storage.load::<LocalIdentityRecord>(keys::ME).await {
        Ok(identity) => Ok(identity),
        Err(ProxypactError::MissingRecord { .. }) => {
            let identity = LocalIdentityRecord {
                instance_id: InstanceId::new(random_token(INSTANCE_ID_LEN)),
                key_hash: KeyHash::new(random_token(INSTANCE_ID_LEN)),
            };
            storage
                .save(keys::ME, &identity)
                .await
                .map_err(|e| format!("failed to persist local identity: {e}"))?;
            tracing::info!(instance = %identity.instance_id, "generated local identity");
            Ok(identity)
        }
        Err(e) => Err(format!("failed to load local identity: {e}")),
    }
}

/// Loads operator options, updating the stored description when the
/// configured one differs.
async fn load_or_update_options(
    storage: &Arc<dyn Storage>,
    description: &str,
) -> Result<OptionsRecord, String> {
    let mut options = match storage.load::<OptionsRecord>(keys::OPTIONS).await {
        Ok(options) => options,
        Err(ProxypactError::MissingRecord { .. }) => OptionsRecord::default(),
        Err(e) => return Err(format!("failed to load options: {e}")),
    };

    if options.description != description {
        options.description = description.to_string();
        storage
            .save(keys::OPTIONS, &options)
            .await
            .map_err(|e| format!("failed to persist options: {e}"))?;
    }
    Ok(options)
}

/// Random alphanumeric token for locally generated identifiers.
fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Event consumer
// ---------------------------------------------------------------------------

/// Logs core events for the operator.
async fn consume_events(mut event_rx: tokio::sync::mpsc::Receiver<CoreEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            CoreEvent::UserUpdated { user_id } => {
                tracing::debug!(user = %user_id, "roster updated");
            }
            CoreEvent::OfferReceived { user_id, instance_id } => {
                tracing::info!(
                    user = %user_id,
                    instance = %instance_id,
                    "peer is offering access; send a REQUEST consent action to accept"
                );
            }
            CoreEvent::SignalFromClientPeer { user_id, instance_id, .. } => {
                tracing::debug!(
                    user = %user_id,
                    instance = %instance_id,
                    "client-peer signal received (no data plane attached)"
                );
            }
            CoreEvent::SignalFromServerPeer { user_id, instance_id, .. } => {
                tracing::debug!(
                    user = %user_id,
                    instance = %instance_id,
                    "server-peer signal received (no data plane attached)"
                );
            }
        }
    }
}
