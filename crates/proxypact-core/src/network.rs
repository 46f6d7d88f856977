//! Network lifecycle and the roster aggregate.
//!
//! The [`Network`] is the public entry point for the proxypact core.
//! It owns the roster, the injected collaborators, and the channels,
//! and exposes a channel-based API to external consumers (UI, RPC,
//! transport adapters, tests). No ambient globals: the caller
//! constructs it, loads it, runs it, and tears it down.
//!
//! # State machine
//!
//! ```text
//! Initializing ──start()──▶ Running ──shutdown()──▶ ShuttingDown ──▶ (dropped)
//! ```
//!
//! - `Initializing` — components created, roster optionally restored.
//! - `Running` — event loop active, processing events and commands.
//! - `ShuttingDown` — draining in-flight work.
//!
//! Double-start and shutdown-from-initializing are rejected with
//! `ProxypactError::ConfigError`.

use std::collections::HashMap;
use std::sync::Arc;

use proxypact_storage::{keys, Storage};
use proxypact_types::{
    CoreEvent, InstanceId, ProxypactError, Result, UserId,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::command::NetworkCommand;
use crate::context::{LocalInstance, NetworkContext};
use crate::event_loop;
use crate::records::InstanceRecord;
use crate::transport::{Outbound, TransportEvent};
use crate::user::User;

// ---------------------------------------------------------------------------
// Channel buffer sizes
// ---------------------------------------------------------------------------

/// Bounded command channel capacity.
///
/// Commands from UI/RPC. Small buffer — callers await backpressure if
/// the event loop is overloaded.
const COMMAND_CHANNEL_SIZE: usize = 256;

/// Bounded transport channel capacity.
///
/// Inbound presence and envelopes. Larger buffer to absorb the burst
/// a reconnecting network delivers.
const TRANSPORT_CHANNEL_SIZE: usize = 1024;

/// Bounded core event channel capacity.
const EVENT_CHANNEL_SIZE: usize = 1024;

/// Default monitor tick interval in seconds.
const MONITOR_TICK_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// NetworkState
// ---------------------------------------------------------------------------

/// Lifecycle state of the network aggregate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetworkState {
    /// Components created, event loop not started.
    Initializing,
    /// Event loop is active.
    Running,
    /// Graceful shutdown in progress.
    ShuttingDown,
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

// ---------------------------------------------------------------------------
// NetworkRuntime (internal)
// ---------------------------------------------------------------------------

/// Owned runtime state moved into the event loop task.
pub(crate) struct NetworkRuntime {
    pub roster: HashMap<UserId, User>,
    pub ctx: NetworkContext,
    pub transport_rx: mpsc::Receiver<TransportEvent>,
    pub command_rx: mpsc::Receiver<NetworkCommand>,
    pub shutdown_rx: watch::Receiver<bool>,
    pub monitor_tick_secs: u64,
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// The proxypact core aggregate — owns the roster and drives the
/// event loop.
///
/// After construction via [`Network::new`] and an optional
/// [`Network::load`], call [`Network::start`] to spawn the event
/// loop. Interact through the channels:
///
/// - Feed inbound traffic via [`Network::transport_sender`].
/// - Send [`NetworkCommand`]s via [`Network::command_sender`].
/// - Receive [`CoreEvent`]s via [`Network::take_event_receiver`].
/// - Shut down via [`NetworkCommand::Shutdown`] or [`Network::shutdown`].
pub struct Network {
    /// Current lifecycle state.
    state: NetworkState,

    /// Components to be moved into the event loop. `None` after
    /// `start()` has been called.
    runtime: Option<NetworkRuntime>,

    /// Sender for commands to the event loop.
    command_tx: mpsc::Sender<NetworkCommand>,

    /// Sender for inbound transport events.
    transport_tx: mpsc::Sender<TransportEvent>,

    /// Receiver for events from the event loop.
    /// `None` after taken by the consumer.
    event_rx: Option<mpsc::Receiver<CoreEvent>>,

    /// Signals the event loop to shut down.
    shutdown_tx: watch::Sender<bool>,
}

impl Network {
    /// Creates a network aggregate around the injected collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        outbound: Arc<dyn Outbound>,
        local: LocalInstance,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = NetworkContext::new(storage, outbound, event_tx, local);

        let runtime = NetworkRuntime {
            roster: HashMap::new(),
            ctx,
            transport_rx,
            command_rx,
            shutdown_rx,
            monitor_tick_secs: MONITOR_TICK_SECS,
        };

        Self {
            state: NetworkState::Initializing,
            runtime: Some(runtime),
            command_tx,
            transport_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
        }
    }

    /// Overrides the monitor tick interval (before `start`).
    pub fn set_monitor_interval_secs(&mut self, secs: u64) {
        if let Some(runtime) = self.runtime.as_mut() {
            runtime.monitor_tick_secs = secs.max(1);
        }
    }

    /// Restores the roster from storage.
    ///
    /// Reads the instance-id index, loads each record, and groups the
    /// instances by owning user. A record that fails to load is
    /// skipped with a warning — the instance is treated as
    /// not-yet-known and the next handshake recreates it.
    ///
    /// # Errors
    ///
    /// - `ProxypactError::ConfigError` if called after `start`.
    /// - `ProxypactError::StorageError` if the index itself cannot be
    ///   read (an absent index is normal on first run).
    pub async fn load(&mut self) -> Result<()> {
        let runtime = self.runtime.as_mut().ok_or_else(|| {
            ProxypactError::ConfigError {
                reason: "cannot load after the network has been started".into(),
            }
        })?;

        let ids: Vec<InstanceId> =
            match runtime.ctx.storage().load(keys::INSTANCE_IDS).await {
                Ok(ids) => ids,
                Err(ProxypactError::MissingRecord { .. }) => Vec::new(),
                Err(e) => return Err(e),
            };

        let mut grouped: HashMap<UserId, Vec<InstanceRecord>> = HashMap::new();
        let mut restored_ids = Vec::new();
        for instance_id in ids {
            let key = keys::instance(&instance_id);
            match runtime.ctx.storage().load::<InstanceRecord>(&key).await {
                Ok(record) => {
                    restored_ids.push(record.instance_id.clone());
                    grouped.entry(record.user_id.clone()).or_default().push(record);
                }
                Err(e) => {
                    tracing::warn!(
                        instance = %instance_id,
                        error = %e,
                        "skipping unloadable instance record; a handshake will recreate it",
                    );
                }
            }
        }

        runtime.ctx.seed_index(restored_ids)?;
        for (user_id, records) in grouped {
            let count = records.len();
            runtime
                .roster
                .insert(user_id.clone(), User::from_records(user_id.clone(), records));
            tracing::info!(user = %user_id, instances = count, "restored roster entry");
        }
        Ok(())
    }

    /// Starts the event loop in a new tokio task.
    ///
    /// Transitions `Initializing → Running`. Returns a `JoinHandle`
    /// that resolves when the event loop exits (after shutdown).
    ///
    /// # Errors
    ///
    /// - `ProxypactError::ConfigError` if the network is not in
    ///   `Initializing` state (prevents double-start).
    pub fn start(&mut self) -> Result<JoinHandle<()>> {
        if self.state != NetworkState::Initializing {
            return Err(ProxypactError::ConfigError {
                reason: format!(
                    "cannot start network in state '{}'; expected 'initializing'",
                    self.state,
                ),
            });
        }

        let runtime = self.runtime.take().ok_or_else(|| {
            ProxypactError::ConfigError {
                reason: "runtime already consumed (double start?)".into(),
            }
        })?;

        let handle = tokio::spawn(async move {
            event_loop::run_event_loop(runtime).await;
        });

        self.state = NetworkState::Running;
        Ok(handle)
    }

    /// Initiates graceful shutdown.
    ///
    /// Signals the event loop to exit; await the `JoinHandle`
    /// returned by [`start`](Self::start) to wait for completion.
    /// Idempotent once running.
    ///
    /// # Errors
    ///
    /// - `ProxypactError::ConfigError` if the network was never
    ///   started (nothing to shut down).
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == NetworkState::Initializing {
            return Err(ProxypactError::ConfigError {
                reason: "cannot shutdown a network that has not been started".into(),
            });
        }
        if self.state == NetworkState::ShuttingDown {
            return Ok(());
        }

        self.state = NetworkState::ShuttingDown;
        let _ = self.shutdown_tx.send(true);
        Ok(())
    }

    /// Returns a sender for submitting commands.
    ///
    /// Cloneable — multiple callers can hold copies.
    pub fn command_sender(&self) -> mpsc::Sender<NetworkCommand> {
        self.command_tx.clone()
    }

    /// Returns a sender for inbound transport events.
    ///
    /// Cloneable — a transport adapter holds one per connection.
    pub fn transport_sender(&self) -> mpsc::Sender<TransportEvent> {
        self.transport_tx.clone()
    }

    /// Takes the event receiver (can only be called once).
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<CoreEvent>> {
        self.event_rx.take()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> NetworkState {
        self.state
    }
}
