//! One roster entry: the reconciliation engine for a single peer.
//!
//! A `User` reconciles two independent, asynchronously-arriving event
//! streams — client presence and instance handshakes — into one
//! consistent `client ↔ instance` mapping. Events for the same peer
//! can be duplicated, reordered relative to each other, and can race
//! operator commands; the handlers here are written so that any
//! interleaving of the same multiset of events converges to the same
//! final mapping.
//!
//! Presence is session bookkeeping; instances are durable. An
//! `Offline` event clears only the presence entry — the instance
//! relationship (and its consent) outlives transient disconnects and
//! is only removed by an explicit full reset.

use std::collections::HashMap;

use proxypact_protocol::{InstanceHandshake, PeerMessage, WireConsent};
use proxypact_types::{
    ClientId, ClientState, ClientStatus, CoreEvent, InstanceId, ProxypactError, Result, UserId,
    UserProfile,
};

use crate::command::{InstanceSummary, UserSummary};
use crate::consent::ConsentAction;
use crate::context::NetworkContext;
use crate::instance::RemoteInstance;
use crate::records::InstanceRecord;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// State for one remote peer identity.
pub struct User {
    user_id: UserId,
    /// Display name; `None` until a profile or handshake supplies one.
    name: Option<String>,
    /// Presence of this peer's clients. Only clients that speak this
    /// protocol appear here; `OnlineWithOtherApp` clients never do.
    client_status: HashMap<ClientId, ClientStatus>,
    /// Durable instances, keyed by instance id.
    instances: HashMap<InstanceId, RemoteInstance>,
    /// Which instance a handshaken client carries. A client with no
    /// completed handshake has no entry.
    client_to_instance: HashMap<ClientId, InstanceId>,
    /// Which client currently carries an instance. At most one live
    /// client per instance at any time.
    instance_to_client: HashMap<InstanceId, ClientId>,
}

impl User {
    /// Creates an empty roster entry.
    ///
    /// Users are constructed purely on the basis of a `user_id`: a
    /// peer can message us before any presence or profile event about
    /// them arrives.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            name: None,
            client_status: HashMap::new(),
            instances: HashMap::new(),
            client_to_instance: HashMap::new(),
            instance_to_client: HashMap::new(),
        }
    }

    /// Restores a roster entry from persisted instance records.
    ///
    /// Presence and client mappings start empty — they are session
    /// state and will be rebuilt from live traffic.
    pub fn from_records(user_id: UserId, records: Vec<InstanceRecord>) -> Self {
        let mut user = Self::new(user_id);
        for record in records {
            if user.name.is_none() {
                user.name = record.user_name.clone();
            }
            user.instances.insert(
                record.instance_id.clone(),
                RemoteInstance::from_record(record),
            );
        }
        user
    }

    /// The peer identity this entry tracks.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Display name, when known.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    // -----------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------

    /// Handles one presence event for this peer.
    ///
    /// A newly online client gets exactly one instance handshake; a
    /// duplicate unchanged presence event gets none (handshakes are
    /// idempotent at the receiver, but duplicate presence must not
    /// cause handshake storms). `Offline` clears only the presence
    /// entry. `OnlineWithOtherApp` clients do not speak this protocol
    /// and are ignored entirely.
    pub async fn handle_client(&mut self, ctx: &NetworkContext, client: ClientState) {
        if client.user_id != self.user_id {
            tracing::warn!(
                user = %self.user_id,
                event_user = %client.user_id,
                "presence event routed to the wrong user; dropping",
            );
            return;
        }

        if self.client_status.get(&client.client_id) == Some(&client.status) {
            // Duplicate presence (networks re-announce on every message).
            tracing::debug!(
                user = %self.user_id,
                client = %client.client_id,
                status = %client.status,
                "presence unchanged; skipping",
            );
            return;
        }

        match client.status {
            ClientStatus::OnlineWithOtherApp => {
                tracing::debug!(
                    user = %self.user_id,
                    client = %client.client_id,
                    "client runs another app; not tracked",
                );
                return;
            }
            ClientStatus::Online => {
                if let Err(e) = self.send_instance_handshake(ctx, &client.client_id).await {
                    tracing::warn!(
                        client = %client.client_id,
                        error = %e,
                        "failed to send instance handshake; peer can recover via INSTANCE_REQUEST",
                    );
                }
                self.client_status
                    .insert(client.client_id.clone(), ClientStatus::Online);
            }
            ClientStatus::Offline => {
                if self.client_status.remove(&client.client_id).is_none() {
                    // Offline for a client we never tracked.
                    return;
                }
                // The client ↔ instance mapping stays: instances
                // outlive transient disconnects.
            }
        }

        ctx.emit(CoreEvent::UserUpdated {
            user_id: self.user_id.clone(),
        })
        .await;
    }

    // -----------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------

    /// Dispatches one peer message from `client_id`.
    pub async fn handle_message(
        &mut self,
        ctx: &NetworkContext,
        client_id: ClientId,
        message: PeerMessage,
    ) -> Result<()> {
        match message {
            PeerMessage::Instance(handshake) => {
                self.sync_instance(ctx, client_id, handshake).await
            }
            PeerMessage::SignalFromClientPeer(payload) => {
                self.forward_signal(ctx, &client_id, payload, SignalSide::Client)
                    .await;
                Ok(())
            }
            PeerMessage::SignalFromServerPeer(payload) => {
                self.forward_signal(ctx, &client_id, payload, SignalSide::Server)
                    .await;
                Ok(())
            }
            PeerMessage::InstanceRequest => {
                tracing::debug!(
                    user = %self.user_id,
                    client = %client_id,
                    "peer requested our instance handshake",
                );
                self.send_instance_handshake(ctx, &client_id).await
            }
            PeerMessage::Unknown => {
                // Forward compatibility: newer peers may send types
                // this build does not know.
                tracing::trace!(
                    user = %self.user_id,
                    client = %client_id,
                    "dropping message of unknown type",
                );
                Ok(())
            }
        }
    }

    /// Forwards a data-plane signal for the instance behind `client_id`.
    ///
    /// A signal from a client with no completed handshake is a benign
    /// race (the handshake is still in flight) or a stale message; it
    /// is dropped with a warning, never an error.
    async fn forward_signal(
        &self,
        ctx: &NetworkContext,
        client_id: &ClientId,
        payload: serde_json::Value,
        side: SignalSide,
    ) {
        let Some(instance_id) = self.client_to_instance.get(client_id) else {
            tracing::warn!(
                user = %self.user_id,
                client = %client_id,
                "signal from a client with no known instance; dropping",
            );
            return;
        };

        let event = match side {
            SignalSide::Client => CoreEvent::SignalFromClientPeer {
                user_id: self.user_id.clone(),
                instance_id: instance_id.clone(),
                payload,
            },
            SignalSide::Server => CoreEvent::SignalFromServerPeer {
                user_id: self.user_id.clone(),
                instance_id: instance_id.clone(),
                payload,
            },
        };
        ctx.emit(event).await;
    }

    // -----------------------------------------------------------------
    // Instance reconciliation
    // -----------------------------------------------------------------

    /// Reconciles one instance handshake from `client_id`.
    ///
    /// Correct under arbitrary ordering relative to presence events
    /// and under duplicated/reordered handshakes:
    ///
    /// 1. If another client currently carries this instance, that
    ///    stale client loses its mapping (device/session churn).
    /// 2. If this client previously carried a different instance, the
    ///    stale reverse entry is dropped too, keeping both maps exact
    ///    inverses restricted to live pairs.
    /// 3. Both maps then point at the latest `(client, instance)`
    ///    pair; on duplicates the latest received payload wins.
    /// 4. The instance is created on first sight, merged from the
    ///    handshake, and persisted before this future resolves.
    /// 5. On first sight of an instance that is offering access, an
    ///    `OfferReceived` event surfaces the policy decision to the
    ///    consumer.
    async fn sync_instance(
        &mut self,
        ctx: &NetworkContext,
        client_id: ClientId,
        handshake: InstanceHandshake,
    ) -> Result<()> {
        let instance_id = handshake.instance_id.clone();
        tracing::debug!(
            user = %self.user_id,
            instance = %instance_id,
            client = %client_id,
            "received instance handshake",
        );

        // Stale-client cleanup: the old client no longer owns this
        // instance.
        if let Some(old_client) = self.instance_to_client.get(&instance_id) {
            if *old_client != client_id {
                let old_client = old_client.clone();
                self.client_to_instance.remove(&old_client);
                tracing::debug!(
                    instance = %instance_id,
                    old_client = %old_client,
                    new_client = %client_id,
                    "instance reconnected under a new client",
                );
            }
        }

        // Bind the pair in both directions. If this client previously
        // carried another instance, drop that reverse entry as well.
        if let Some(previous) = self
            .client_to_instance
            .insert(client_id.clone(), instance_id.clone())
        {
            if previous != instance_id
                && self.instance_to_client.get(&previous) == Some(&client_id)
            {
                self.instance_to_client.remove(&previous);
            }
        }
        self.instance_to_client
            .insert(instance_id.clone(), client_id.clone());

        // Fall back to handshake-supplied naming while no profile has
        // arrived; some networks never deliver one.
        let mut named_now = false;
        if self.name.is_none() {
            if let Some(name) = &handshake.name {
                self.name = Some(name.clone());
                named_now = true;
            } else if let Some(user_id) = &handshake.user_id {
                self.name = Some(user_id.to_string());
                named_now = true;
            }
        }

        let first_sight = !self.instances.contains_key(&instance_id);
        let instance = self
            .instances
            .entry(instance_id.clone())
            .or_insert_with(|| RemoteInstance::new(instance_id.clone()));
        let changed = instance.update_from_handshake(&handshake);

        if first_sight || changed || named_now {
            let record = instance.to_record(&self.user_id, self.name.as_deref());
            ctx.save_instance(&record).await?;
        }

        if first_sight && handshake.consent.is_offering {
            ctx.emit(CoreEvent::OfferReceived {
                user_id: self.user_id.clone(),
                instance_id: instance_id.clone(),
            })
            .await;
        }

        ctx.emit(CoreEvent::UserUpdated {
            user_id: self.user_id.clone(),
        })
        .await;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Profile
    // -----------------------------------------------------------------

    /// Applies a roster profile for this peer.
    ///
    /// # Errors
    ///
    /// Returns [`ProxypactError::InvalidIdentifier`] if the profile is
    /// for a different user — that indicates a routing bug upstream.
    pub async fn update_profile(
        &mut self,
        ctx: &NetworkContext,
        profile: UserProfile,
    ) -> Result<()> {
        if profile.user_id != self.user_id {
            return Err(ProxypactError::InvalidIdentifier {
                reason: format!(
                    "profile for '{}' routed to user '{}'",
                    profile.user_id, self.user_id,
                ),
            });
        }

        if self.name.as_deref() == Some(profile.name.as_str()) {
            return Ok(());
        }
        self.name = Some(profile.name);

        // The name rides inside each instance record; refresh them so
        // the roster restores with the right label.
        for instance in self.instances.values() {
            let record = instance.to_record(&self.user_id, self.name.as_deref());
            ctx.save_instance(&record).await?;
        }

        ctx.emit(CoreEvent::UserUpdated {
            user_id: self.user_id.clone(),
        })
        .await;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Consent
    // -----------------------------------------------------------------

    /// Applies one operator consent action toward this peer.
    ///
    /// The action runs against every known instance (consent is an
    /// agreement with the peer identity; each instance carries its
    /// copy). Each mutated record is persisted before the next one is
    /// touched, and this future resolves only after all saves — the
    /// caller must not assume durability earlier. Afterwards the new
    /// consent bits go out as fresh handshakes to every online
    /// instance.
    ///
    /// An action whose precondition holds on no instance is a silent
    /// no-op, matching the state machine's tolerance for racing a
    /// remote-driven change.
    pub async fn modify_consent(
        &mut self,
        ctx: &NetworkContext,
        action: ConsentAction,
    ) -> Result<()> {
        if self.instances.is_empty() {
            tracing::debug!(
                user = %self.user_id,
                ?action,
                "consent action for a user with no instances; nothing to do",
            );
            return Ok(());
        }

        let mut changed_any = false;
        for instance in self.instances.values_mut() {
            if instance.apply_consent(action) {
                let record = instance.to_record(&self.user_id, self.name.as_deref());
                ctx.save_instance(&record).await?;
                changed_any = true;
            }
        }

        if !changed_any {
            return Ok(());
        }

        let online_clients: Vec<ClientId> = self
            .instance_to_client
            .values()
            .filter(|client_id| {
                self.client_status.get(*client_id) == Some(&ClientStatus::Online)
            })
            .cloned()
            .collect();
        for client_id in online_clients {
            if let Err(e) = self.send_instance_handshake(ctx, &client_id).await {
                tracing::warn!(
                    client = %client_id,
                    error = %e,
                    "failed to send updated consent; peer will resync on next handshake",
                );
            }
        }

        ctx.emit(CoreEvent::UserUpdated {
            user_id: self.user_id.clone(),
        })
        .await;
        Ok(())
    }

    /// The consent bits we assert on the wire toward this peer.
    ///
    /// Aggregated across instances; `modify_consent` keeps them in
    /// step, so this is the peer-level local intent.
    pub fn wire_consent(&self) -> WireConsent {
        let mut wire = WireConsent::default();
        for instance in self.instances.values() {
            let bits = instance.consent().to_wire();
            wire.is_requesting |= bits.is_requesting;
            wire.is_offering |= bits.is_offering;
        }
        wire
    }

    // -----------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------

    /// Sends our instance handshake to one client of this peer.
    pub async fn send_instance_handshake(
        &self,
        ctx: &NetworkContext,
        client_id: &ClientId,
    ) -> Result<()> {
        let local = ctx.local();
        let handshake = InstanceHandshake {
            instance_id: local.instance_id.clone(),
            key_hash: local.key_hash.clone(),
            description: local.description.clone(),
            consent: self.wire_consent(),
            user_id: Some(local.user_id.clone()),
            name: local.name.clone(),
        };
        tracing::debug!(
            user = %self.user_id,
            client = %client_id,
            "sending instance handshake",
        );
        ctx.send_to_client(&self.user_id, client_id, PeerMessage::Instance(handshake))
            .await
    }

    /// Re-sends our handshake to every client currently carrying an
    /// instance. Used after a transport reconnect.
    pub async fn resend_instance_handshakes(&self, ctx: &NetworkContext) {
        for client_id in self.instance_to_client.values() {
            if let Err(e) = self.send_instance_handshake(ctx, client_id).await {
                tracing::warn!(
                    client = %client_id,
                    error = %e,
                    "handshake re-send failed",
                );
            }
        }
    }

    /// Recovery sweep: any client recorded online without a completed
    /// handshake gets an `INSTANCE_REQUEST`.
    ///
    /// Handshakes can be lost (dropped message, peer restart); the
    /// periodic monitor tick drives this instead of a timeout/retry
    /// loop per handshake.
    pub async fn monitor(&self, ctx: &NetworkContext) {
        for (client_id, status) in &self.client_status {
            let missing_instance = *status == ClientStatus::Online
                && !self.client_to_instance.contains_key(client_id);
            if missing_instance {
                tracing::warn!(
                    user = %self.user_id,
                    client = %client_id,
                    "online client has no instance; requesting handshake",
                );
                if let Err(e) = ctx
                    .send_to_client(&self.user_id, client_id, PeerMessage::InstanceRequest)
                    .await
                {
                    tracing::warn!(
                        client = %client_id,
                        error = %e,
                        "instance request failed",
                    );
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Session teardown
    // -----------------------------------------------------------------

    /// Drops all session state on local logout.
    ///
    /// Client ids die with the transport session; the durable
    /// instances (and their consent) remain for the next login.
    pub fn handle_logout(&mut self) {
        self.client_status.clear();
        self.client_to_instance.clear();
        self.instance_to_client.clear();
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// The instance a handshaken client carries, if any.
    pub fn client_to_instance(&self, client_id: &ClientId) -> Option<&InstanceId> {
        self.client_to_instance.get(client_id)
    }

    /// The client currently carrying an instance, if any.
    pub fn instance_to_client(&self, instance_id: &InstanceId) -> Option<&ClientId> {
        self.instance_to_client.get(instance_id)
    }

    /// `true` if the instance's current client is recorded online.
    pub fn is_instance_online(&self, instance_id: &InstanceId) -> bool {
        self.instance_to_client
            .get(instance_id)
            .map(|client_id| self.client_status.get(client_id) == Some(&ClientStatus::Online))
            .unwrap_or(false)
    }

    /// Ids of every persisted instance record this user owns.
    pub fn instance_ids(&self) -> impl Iterator<Item = &InstanceId> {
        self.instances.keys()
    }

    /// Roster snapshot for consumers.
    pub fn summary(&self) -> UserSummary {
        let mut instances: Vec<InstanceSummary> = self
            .instances
            .values()
            .map(|instance| InstanceSummary {
                instance_id: instance.instance_id().clone(),
                key_hash: instance.key_hash().clone(),
                description: instance.description().to_string(),
                is_online: self.is_instance_online(instance.instance_id()),
                consent: instance.consent(),
            })
            .collect();
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

        UserSummary {
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            is_online: instances.iter().any(|i| i.is_online),
            instances,
        }
    }
}

/// Which data-plane direction a signal belongs to.
#[derive(Clone, Copy, Debug)]
enum SignalSide {
    Client,
    Server,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use proxypact_protocol::Envelope;
    use proxypact_storage::{keys, MemoryStore, Storage};
    use proxypact_types::{KeyHash, Timestamp};
    use tokio::sync::mpsc;

    use super::*;
    use crate::context::LocalInstance;
    use crate::records::InstanceRecord;

    // Records every envelope instead of delivering it.
    #[derive(Default)]
    struct RecordingOutbound {
        sent: Mutex<Vec<(ClientId, Envelope)>>,
    }

    impl RecordingOutbound {
        fn sent(&self) -> Vec<(ClientId, Envelope)> {
            self.sent.lock().unwrap().clone()
        }

        fn handshakes_to(&self, client_id: &ClientId) -> Vec<InstanceHandshake> {
            self.sent()
                .into_iter()
                .filter(|(to, _)| to == client_id)
                .filter_map(|(_, envelope)| match envelope.message {
                    PeerMessage::Instance(handshake) => Some(handshake),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl crate::transport::Outbound for RecordingOutbound {
        async fn send(&self, to_client: &ClientId, envelope: Envelope) -> Result<()> {
            self.sent.lock().unwrap().push((to_client.clone(), envelope));
            Ok(())
        }
    }

    struct Fixture {
        ctx: NetworkContext,
        outbound: Arc<RecordingOutbound>,
        storage: Arc<dyn Storage>,
        events: mpsc::Receiver<CoreEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
            let outbound = Arc::new(RecordingOutbound::default());
            let (event_tx, events) = mpsc::channel(256);
            let local = LocalInstance {
                user_id: UserId::new("me@example.com"),
                client_id: ClientId::new("me@example.com/pact"),
                instance_id: InstanceId::new("local-instance"),
                key_hash: KeyHash::new("local-kh"),
                name: Some("Me".into()),
                description: "workstation".into(),
            };
            let ctx = NetworkContext::new(
                Arc::clone(&storage),
                outbound.clone(),
                event_tx,
                local,
            );
            Self {
                ctx,
                outbound,
                storage,
                events,
            }
        }

        fn drain_events(&mut self) -> Vec<CoreEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn presence(user: &str, client: &str, status: ClientStatus) -> ClientState {
        ClientState {
            user_id: UserId::new(user),
            client_id: ClientId::new(client),
            status,
            timestamp: Timestamp::now(),
        }
    }

    fn handshake(instance: &str, offering: bool) -> InstanceHandshake {
        InstanceHandshake {
            instance_id: InstanceId::new(instance),
            key_hash: KeyHash::new(format!("kh-{instance}")),
            description: "phone".into(),
            consent: WireConsent {
                is_requesting: false,
                is_offering: offering,
            },
            user_id: Some(UserId::new("alice")),
            name: Some("Alice".into()),
        }
    }

    #[tokio::test]
    async fn online_presence_sends_exactly_one_handshake() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));

        user.handle_client(&fx.ctx, presence("alice", "alice/dev1", ClientStatus::Online))
            .await;
        assert_eq!(fx.outbound.sent().len(), 1);

        // Duplicate unchanged presence: no second handshake.
        user.handle_client(&fx.ctx, presence("alice", "alice/dev1", ClientStatus::Online))
            .await;
        assert_eq!(fx.outbound.sent().len(), 1);
    }

    #[tokio::test]
    async fn other_app_clients_are_never_tracked() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));

        user.handle_client(
            &fx.ctx,
            presence("alice", "alice/xmpp", ClientStatus::OnlineWithOtherApp),
        )
        .await;

        assert!(fx.outbound.sent().is_empty());
        assert!(user.summary().instances.is_empty());

        // Even a later Offline for that client is a no-op.
        user.handle_client(&fx.ctx, presence("alice", "alice/xmpp", ClientStatus::Offline))
            .await;
        assert!(fx.outbound.sent().is_empty());
    }

    #[tokio::test]
    async fn misrouted_presence_is_dropped() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));

        user.handle_client(&fx.ctx, presence("bob", "bob/dev1", ClientStatus::Online))
            .await;

        assert!(fx.outbound.sent().is_empty());
        assert!(!user.summary().is_online);
    }

    #[tokio::test]
    async fn handshake_binds_client_and_instance() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");

        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-a", false)),
        )
        .await
        .unwrap();

        assert_eq!(
            user.client_to_instance(&dev1),
            Some(&InstanceId::new("inst-a")),
        );
        assert_eq!(
            user.instance_to_client(&InstanceId::new("inst-a")),
            Some(&dev1),
        );
        assert_eq!(user.name(), Some("Alice"));
    }

    #[tokio::test]
    async fn duplicate_handshake_is_idempotent() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");

        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-a", true)),
        )
        .await
        .unwrap();
        let first = user.summary();

        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-a", true)),
        )
        .await
        .unwrap();
        let second = user.summary();

        assert_eq!(first.instances.len(), second.instances.len());
        assert_eq!(first.instances[0].consent, second.instances[0].consent);
        assert_eq!(
            user.instance_to_client(&InstanceId::new("inst-a")),
            Some(&dev1),
        );
    }

    #[tokio::test]
    async fn stale_client_loses_its_mapping() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");
        let dev2 = ClientId::new("alice/dev2");

        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-a", false)),
        )
        .await
        .unwrap();
        user.handle_message(
            &fx.ctx,
            dev2.clone(),
            PeerMessage::Instance(handshake("inst-a", false)),
        )
        .await
        .unwrap();

        assert_eq!(
            user.instance_to_client(&InstanceId::new("inst-a")),
            Some(&dev2),
        );
        assert_eq!(user.client_to_instance(&dev1), None);
        assert_eq!(
            user.client_to_instance(&dev2),
            Some(&InstanceId::new("inst-a")),
        );
    }

    #[tokio::test]
    async fn client_rebinding_to_new_instance_drops_old_reverse_entry() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");

        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-a", false)),
        )
        .await
        .unwrap();
        // Same client re-handshakes as a different instance
        // (reinstall on the same device).
        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-b", false)),
        )
        .await
        .unwrap();

        assert_eq!(
            user.client_to_instance(&dev1),
            Some(&InstanceId::new("inst-b")),
        );
        assert_eq!(user.instance_to_client(&InstanceId::new("inst-a")), None);
        assert_eq!(
            user.instance_to_client(&InstanceId::new("inst-b")),
            Some(&dev1),
        );
    }

    #[tokio::test]
    async fn offline_clears_presence_but_keeps_instances() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");

        user.handle_client(&fx.ctx, presence("alice", "alice/dev1", ClientStatus::Online))
            .await;
        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-a", true)),
        )
        .await
        .unwrap();
        assert!(user.is_instance_online(&InstanceId::new("inst-a")));

        user.handle_client(&fx.ctx, presence("alice", "alice/dev1", ClientStatus::Offline))
            .await;

        assert!(!user.is_instance_online(&InstanceId::new("inst-a")));
        // The durable relationship survives the disconnect.
        assert_eq!(
            user.client_to_instance(&dev1),
            Some(&InstanceId::new("inst-a")),
        );
        assert_eq!(user.summary().instances.len(), 1);
    }

    #[tokio::test]
    async fn signal_without_handshake_is_dropped() {
        let mut fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));

        user.handle_message(
            &fx.ctx,
            ClientId::new("alice/dev1"),
            PeerMessage::SignalFromClientPeer(serde_json::json!({"sdp": "v=0"})),
        )
        .await
        .unwrap();

        assert!(fx.drain_events().is_empty());
    }

    #[tokio::test]
    async fn signal_after_handshake_is_forwarded() {
        let mut fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");

        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-a", false)),
        )
        .await
        .unwrap();
        fx.drain_events();

        user.handle_message(
            &fx.ctx,
            dev1,
            PeerMessage::SignalFromServerPeer(serde_json::json!({"sdp": "v=0"})),
        )
        .await
        .unwrap();

        let events = fx.drain_events();
        assert!(events.iter().any(|event| matches!(
            event,
            CoreEvent::SignalFromServerPeer { instance_id, .. }
                if instance_id == &InstanceId::new("inst-a")
        )));
    }

    #[tokio::test]
    async fn offer_event_only_on_first_sight() {
        let mut fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");

        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-a", true)),
        )
        .await
        .unwrap();
        let offers = fx
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, CoreEvent::OfferReceived { .. }))
            .count();
        assert_eq!(offers, 1);

        user.handle_message(
            &fx.ctx,
            dev1,
            PeerMessage::Instance(handshake("inst-a", true)),
        )
        .await
        .unwrap();
        let offers = fx
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, CoreEvent::OfferReceived { .. }))
            .count();
        assert_eq!(offers, 0);
    }

    #[tokio::test]
    async fn modify_consent_persists_and_resends() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");

        user.handle_client(&fx.ctx, presence("alice", "alice/dev1", ClientStatus::Online))
            .await;
        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-a", true)),
        )
        .await
        .unwrap();

        user.modify_consent(&fx.ctx, ConsentAction::Request)
            .await
            .unwrap();

        // Durable: the record on disk carries the new local intent.
        let record: InstanceRecord = fx
            .storage
            .load(&keys::instance(&InstanceId::new("inst-a")))
            .await
            .unwrap();
        assert!(record.consent.getter.local_requests_access_from_remote);
        assert!(record.consent.getter.remote_grants_access_to_local);

        // The peer's online client got a handshake with the new bits.
        let handshakes = fx.outbound.handshakes_to(&dev1);
        let last = handshakes.last().unwrap();
        assert!(last.consent.is_requesting);
    }

    #[tokio::test]
    async fn noop_consent_action_sends_nothing() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");

        user.handle_message(
            &fx.ctx,
            dev1,
            PeerMessage::Instance(handshake("inst-a", false)),
        )
        .await
        .unwrap();
        let sends_before = fx.outbound.sent().len();

        // No pending request to cancel: silent no-op.
        user.modify_consent(&fx.ctx, ConsentAction::CancelRequest)
            .await
            .unwrap();

        assert_eq!(fx.outbound.sent().len(), sends_before);
    }

    #[tokio::test]
    async fn consent_action_without_instances_is_noop() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));

        user.modify_consent(&fx.ctx, ConsentAction::Offer)
            .await
            .unwrap();

        assert!(fx.outbound.sent().is_empty());
        assert!(fx.storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn monitor_requests_missing_handshakes() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));

        user.handle_client(&fx.ctx, presence("alice", "alice/dev1", ClientStatus::Online))
            .await;
        user.monitor(&fx.ctx).await;

        let requests = fx
            .outbound
            .sent()
            .into_iter()
            .filter(|(_, envelope)| {
                matches!(envelope.message, PeerMessage::InstanceRequest)
            })
            .count();
        assert_eq!(requests, 1);

        // Once the handshake lands, the monitor goes quiet.
        user.handle_message(
            &fx.ctx,
            ClientId::new("alice/dev1"),
            PeerMessage::Instance(handshake("inst-a", false)),
        )
        .await
        .unwrap();
        let before = fx.outbound.sent().len();
        user.monitor(&fx.ctx).await;
        assert_eq!(fx.outbound.sent().len(), before);
    }

    #[tokio::test]
    async fn instance_request_triggers_handshake() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");

        user.handle_message(&fx.ctx, dev1.clone(), PeerMessage::InstanceRequest)
            .await
            .unwrap();

        let handshakes = fx.outbound.handshakes_to(&dev1);
        assert_eq!(handshakes.len(), 1);
        assert_eq!(handshakes[0].instance_id, InstanceId::new("local-instance"));
    }

    #[tokio::test]
    async fn unknown_message_type_is_dropped() {
        let mut fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));

        user.handle_message(
            &fx.ctx,
            ClientId::new("alice/dev1"),
            PeerMessage::Unknown,
        )
        .await
        .unwrap();

        assert!(fx.outbound.sent().is_empty());
        assert!(fx.drain_events().is_empty());
    }

    #[tokio::test]
    async fn logout_clears_session_state_only() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));
        let dev1 = ClientId::new("alice/dev1");

        user.handle_client(&fx.ctx, presence("alice", "alice/dev1", ClientStatus::Online))
            .await;
        user.handle_message(
            &fx.ctx,
            dev1.clone(),
            PeerMessage::Instance(handshake("inst-a", false)),
        )
        .await
        .unwrap();

        user.handle_logout();

        assert_eq!(user.client_to_instance(&dev1), None);
        assert_eq!(user.instance_to_client(&InstanceId::new("inst-a")), None);
        assert_eq!(user.summary().instances.len(), 1);
    }

    #[tokio::test]
    async fn profile_mismatch_is_an_error() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));

        let err = user
            .update_profile(
                &fx.ctx,
                UserProfile {
                    user_id: UserId::new("bob"),
                    name: "Bob".into(),
                    timestamp: Timestamp::now(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxypactError::InvalidIdentifier { .. }));
    }

    #[tokio::test]
    async fn profile_name_overrides_handshake_fallback() {
        let fx = Fixture::new();
        let mut user = User::new(UserId::new("alice"));

        user.handle_message(
            &fx.ctx,
            ClientId::new("alice/dev1"),
            PeerMessage::Instance(handshake("inst-a", false)),
        )
        .await
        .unwrap();
        assert_eq!(user.name(), Some("Alice"));

        user.update_profile(
            &fx.ctx,
            UserProfile {
                user_id: UserId::new("alice"),
                name: "Alice Liddell".into(),
                timestamp: Timestamp::now(),
            },
        )
        .await
        .unwrap();
        assert_eq!(user.name(), Some("Alice Liddell"));

        // The persisted record carries the profile name now.
        let record: InstanceRecord = fx
            .storage
            .load(&keys::instance(&InstanceId::new("inst-a")))
            .await
            .unwrap();
        assert_eq!(record.user_name.as_deref(), Some("Alice Liddell"));
    }
}
