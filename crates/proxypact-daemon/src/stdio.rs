//! Line-delimited JSON stdio transport.
//!
//! The daemon's "manual network": an external adapter pipes inbound
//! chat-network traffic to stdin, one JSON object per line, and reads
//! our outbound envelopes from stdout the same way. Logs go to
//! stderr, so stdout stays a clean protocol stream.
//!
//! A malformed line drops that one line with a warning — the pump
//! must survive anything an adapter can emit.

use async_trait::async_trait;
use proxypact_core::{ConsentAction, NetworkCommand, Outbound, TransportEvent};
use proxypact_protocol::validation::validate_envelope;
use proxypact_protocol::{encode_envelope, Envelope};
use proxypact_types::{ClientId, ClientState, ProxypactError, Result, UserId, UserProfile};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// One stdin line, tagged by `event`.
///
/// `presence`/`profile`/`message` are network traffic relayed by the
/// adapter; `consent` is the operator acting on the roster.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum InboundLine {
    /// Presence change from the network.
    Presence(ClientState),
    /// Roster profile from the network.
    Profile(UserProfile),
    /// A message envelope from a remote client.
    Message(Envelope),
    /// The adapter recovered its connection with the session intact.
    Reconnected,
    /// The adapter's session ended.
    Disconnected,
    /// An operator consent action toward a peer.
    Consent {
        user_id: UserId,
        action: ConsentAction,
    },
}

/// Reads stdin until EOF, feeding events into the core.
///
/// Returns when stdin closes or the core's channels are gone.
pub async fn pump_stdin(
    transport_tx: mpsc::Sender<TransportEvent>,
    command_tx: mpsc::Sender<NetworkCommand>,
) {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("stdin closed; transport pump exiting");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed; transport pump exiting");
                return;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<InboundLine>(trimmed) {
            Ok(InboundLine::Presence(state)) => TransportEvent::Presence(state),
            Ok(InboundLine::Profile(profile)) => TransportEvent::Profile(profile),
            Ok(InboundLine::Message(envelope)) => {
                if let Err(e) = validate_envelope(&envelope) {
                    tracing::warn!(error = %e, "dropping invalid envelope");
                    continue;
                }
                TransportEvent::Message(envelope)
            }
            Ok(InboundLine::Reconnected) => TransportEvent::Reconnected,
            Ok(InboundLine::Disconnected) => TransportEvent::Disconnected,
            Ok(InboundLine::Consent { user_id, action }) => {
                if submit_consent(&command_tx, user_id, action).await.is_err() {
                    tracing::info!("core channel closed; transport pump exiting");
                    return;
                }
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed input line");
                continue;
            }
        };

        if transport_tx.send(event).await.is_err() {
            tracing::info!("core channel closed; transport pump exiting");
            return;
        }
    }
}

/// Submits one consent action and logs its outcome when it lands.
///
/// The reply is awaited off the pump so a slow save never stalls
/// reading stdin.
async fn submit_consent(
    command_tx: &mpsc::Sender<NetworkCommand>,
    user_id: UserId,
    action: ConsentAction,
) -> std::result::Result<(), ()> {
    let (reply, reply_rx) = oneshot::channel();
    command_tx
        .send(NetworkCommand::ModifyConsent {
            user_id: user_id.clone(),
            action,
            reply,
        })
        .await
        .map_err(|_| ())?;

    tokio::spawn(async move {
        match reply_rx.await {
            Ok(Ok(())) => {
                tracing::info!(user = %user_id, ?action, "consent action applied");
            }
            Ok(Err(e)) => {
                tracing::warn!(user = %user_id, ?action, error = %e, "consent action failed");
            }
            Err(_) => {
                tracing::warn!(user = %user_id, "consent reply channel dropped");
            }
        }
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Writes outbound envelopes as JSON lines on stdout.
pub struct StdoutOutbound {
    stdout: tokio::sync::Mutex<tokio::io::Stdout>,
}

impl StdoutOutbound {
    /// Creates the writer around the process stdout.
    pub fn new() -> Self {
        Self {
            stdout: tokio::sync::Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutOutbound {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Outbound for StdoutOutbound {
    async fn send(&self, to_client: &ClientId, envelope: Envelope) -> Result<()> {
        let mut line = encode_envelope(&envelope)?;
        line.push('\n');
        tracing::debug!(client = %to_client, "writing envelope to stdout");

        let write_err = |e: std::io::Error| ProxypactError::NetworkError {
            reason: format!("stdout write failed: {e}"),
        };
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(line.as_bytes()).await.map_err(write_err)?;
        stdout.flush().await.map_err(write_err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
