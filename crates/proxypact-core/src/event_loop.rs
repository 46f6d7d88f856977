//! Main event loop driving one network session.
//!
//! [`run_event_loop`] is spawned as a tokio task by `Network::start`.
//! It uses `tokio::select!` to multiplex:
//!
//! 1. **Transport events** — presence, profiles, message envelopes.
//! 2. **Commands** — consent actions, roster queries, reset, shutdown.
//! 3. **Monitor tick** — periodic recovery of missing handshakes.
//! 4. **Shutdown signal** — graceful exit via `watch` channel.
//!
//! One iteration handles one item, so all mutation of the roster and
//! its maps is serialized here — the single-actor discipline that
//! makes the reconciliation's ordering-independence sufficient
//! without any further locking. Storage writes are awaited inline,
//! which also gives per-instance write ordering for free.
//!
//! Nothing in this loop is fatal: a failure while handling one peer's
//! event is logged and must never affect other peers.

use std::time::Duration;

use proxypact_storage::Storage;
use proxypact_types::ProxypactError;

use crate::command::NetworkCommand;
use crate::context::NetworkContext;
use crate::network::NetworkRuntime;
use crate::transport::TransportEvent;
use crate::user::User;

// ---------------------------------------------------------------------------
// Event loop entry point
// ---------------------------------------------------------------------------

/// Runs the network event loop until shutdown is signalled.
pub(crate) async fn run_event_loop(mut rt: NetworkRuntime) {
    tracing::info!("network event loop started");

    let mut monitor_tick =
        tokio::time::interval(Duration::from_secs(rt.monitor_tick_secs));

    loop {
        tokio::select! {
            Some(event) = rt.transport_rx.recv() => {
                handle_transport_event(&mut rt.roster, &rt.ctx, event).await;
            }

            Some(command) = rt.command_rx.recv() => {
                let should_shutdown = handle_command(&mut rt, command).await;
                if should_shutdown {
                    tracing::info!("shutdown command received -- exiting event loop");
                    break;
                }
            }

            _ = monitor_tick.tick() => {
                handle_monitor_tick(&rt.roster, &rt.ctx).await;
            }

            _ = rt.shutdown_rx.changed() => {
                if *rt.shutdown_rx.borrow() {
                    tracing::info!("shutdown signal received -- exiting event loop");
                    break;
                }
            }
        }
    }

    tracing::info!("network event loop exited");
}

// ---------------------------------------------------------------------------
// Transport event handler
// ---------------------------------------------------------------------------

/// Routes one inbound transport event to the owning user.
///
/// Events for a user id we have never heard of lazily create the
/// roster entry — a peer can message us before any presence or
/// profile event about them arrives, and that must never crash
/// dispatch. Events about our own user id are not roster traffic and
/// are ignored.
async fn handle_transport_event(
    roster: &mut std::collections::HashMap<proxypact_types::UserId, User>,
    ctx: &NetworkContext,
    event: TransportEvent,
) {
    match event {
        TransportEvent::Presence(client) => {
            if client.user_id == ctx.local().user_id {
                tracing::debug!(client = %client.client_id, "own presence; ignoring");
                return;
            }
            let user = get_or_add_user(roster, client.user_id.clone());
            user.handle_client(ctx, client).await;
        }

        TransportEvent::Profile(profile) => {
            if profile.user_id == ctx.local().user_id {
                tracing::debug!("own profile; ignoring");
                return;
            }
            let user = get_or_add_user(roster, profile.user_id.clone());
            if let Err(e) = user.update_profile(ctx, profile).await {
                tracing::warn!(error = %e, "failed to apply profile");
            }
        }

        TransportEvent::Message(envelope) => {
            if envelope.from_user_id == ctx.local().user_id {
                tracing::debug!("message from own user id; ignoring");
                return;
            }
            let from_user = envelope.from_user_id.clone();
            let user = get_or_add_user(roster, from_user.clone());
            if let Err(e) = user
                .handle_message(ctx, envelope.from_client_id, envelope.message)
                .await
            {
                tracing::warn!(
                    user = %from_user,
                    error = %e,
                    "failed to process message; peer state unchanged",
                );
            }
        }

        TransportEvent::Reconnected => {
            tracing::info!("transport reconnected; re-sending instance handshakes");
            for user in roster.values() {
                user.resend_instance_handshakes(ctx).await;
            }
        }

        TransportEvent::Disconnected => {
            tracing::info!("transport session ended; clearing presence state");
            for user in roster.values_mut() {
                user.handle_logout();
            }
        }
    }
}

/// Finds or lazily creates the roster entry for `user_id`.
fn get_or_add_user(
    roster: &mut std::collections::HashMap<proxypact_types::UserId, User>,
    user_id: proxypact_types::UserId,
) -> &mut User {
    roster.entry(user_id.clone()).or_insert_with(|| {
        tracing::debug!(user = %user_id, "added user to roster");
        User::new(user_id)
    })
}

// ---------------------------------------------------------------------------
// Command handler
// ---------------------------------------------------------------------------

/// Processes a single command. Returns `true` on shutdown.
async fn handle_command(rt: &mut NetworkRuntime, command: NetworkCommand) -> bool {
    match command {
        NetworkCommand::ModifyConsent { user_id, action, reply } => {
            let result = match rt.roster.get_mut(&user_id) {
                Some(user) => user.modify_consent(&rt.ctx, action).await,
                None => Err(ProxypactError::InvalidIdentifier {
                    reason: format!("no roster entry for '{user_id}'"),
                }),
            };
            let _ = reply.send(result);
            false
        }

        NetworkCommand::GetRoster { reply } => {
            let mut summaries: Vec<_> = rt.roster.values().map(User::summary).collect();
            summaries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
            let _ = reply.send(summaries);
            false
        }

        NetworkCommand::GetUser { user_id, reply } => {
            let summary = rt.roster.get(&user_id).map(User::summary);
            let _ = reply.send(summary);
            false
        }

        NetworkCommand::Reset { reply } => {
            let result = reset(rt).await;
            let _ = reply.send(result);
            false
        }

        NetworkCommand::Shutdown => true,
    }
}

/// Wipes persisted state and the in-memory roster.
async fn reset(rt: &mut NetworkRuntime) -> proxypact_types::Result<()> {
    rt.ctx.storage().reset().await?;
    rt.ctx.clear_index()?;
    rt.roster.clear();
    tracing::info!("full reset: storage wiped and roster cleared");
    Ok(())
}

// ---------------------------------------------------------------------------
// Monitor tick handler
// ---------------------------------------------------------------------------

/// Sweeps every user for online clients that never handshook.
async fn handle_monitor_tick(
    roster: &std::collections::HashMap<proxypact_types::UserId, User>,
    ctx: &NetworkContext,
) {
    for user in roster.values() {
        user.monitor(ctx).await;
    }
}
