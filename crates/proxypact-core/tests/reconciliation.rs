//! Integration tests for the reconciliation engine and the network
//! lifecycle.
//!
//! The ordering tests exercise the property the whole design leans
//! on: for a fixed multiset of presence and handshake events
//! describing one peer's session, every interleaving converges to the
//! same final `client ↔ instance` mapping. Randomized permutations
//! use a seeded RNG so failures reproduce.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot};

use proxypact_core::{
    ConsentAction, LocalInstance, Network, NetworkCommand, NetworkContext, TransportEvent, User,
};
use proxypact_protocol::{Envelope, InstanceHandshake, PeerMessage, WireConsent};
use proxypact_storage::{MemoryStore, Storage};
use proxypact_types::{
    ClientId, ClientState, ClientStatus, CoreEvent, InstanceId, KeyHash, Timestamp, UserId,
    UserProfile,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Records every envelope instead of delivering it.
#[derive(Default)]
struct RecordingOutbound {
    sent: Mutex<Vec<(ClientId, Envelope)>>,
}

impl RecordingOutbound {
    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl proxypact_core::Outbound for RecordingOutbound {
    async fn send(&self, to_client: &ClientId, envelope: Envelope) -> proxypact_types::Result<()> {
        self.sent.lock().unwrap().push((to_client.clone(), envelope));
        Ok(())
    }
}

fn local_instance() -> LocalInstance {
    LocalInstance {
        user_id: UserId::new("me@example.com"),
        client_id: ClientId::new("me@example.com/pact"),
        instance_id: InstanceId::new("local-instance"),
        key_hash: KeyHash::new("local-kh"),
        name: Some("Me".into()),
        description: "workstation".into(),
    }
}

fn test_context(storage: Arc<dyn Storage>) -> (NetworkContext, mpsc::Receiver<CoreEvent>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let ctx = NetworkContext::new(
        storage,
        Arc::new(RecordingOutbound::default()),
        event_tx,
        local_instance(),
    );
    (ctx, event_rx)
}

fn presence(client: &str, status: ClientStatus) -> ClientState {
    ClientState {
        user_id: UserId::new("alice"),
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

/// One element of the permuted event multiset.
#[derive(Clone)]
enum PeerEvent {
    Client(ClientState),
    Handshake(ClientId, InstanceHandshake),
}

async fn apply_events(ctx: &NetworkContext, user: &mut User, events: &[PeerEvent]) {
    for event in events {
        match event {
            PeerEvent::Client(state) => user.handle_client(ctx, state.clone()).await,
            PeerEvent::Handshake(client_id, handshake) => {
                user.handle_message(
                    ctx,
                    client_id.clone(),
                    PeerMessage::Instance(handshake.clone()),
                )
                .await
                .expect("handshake processing failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Order independence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_permutation_converges_to_the_same_mapping() {
    // One peer, two devices, each with its own instance, plus the
    // noise a real session produces: duplicated presence, duplicated
    // handshakes, a non-protocol client, an offline event for a
    // client we never tracked.
    let base: Vec<PeerEvent> = vec![
        PeerEvent::Client(presence("u1/dev1", ClientStatus::Online)),
        PeerEvent::Client(presence("u1/dev1", ClientStatus::Online)),
        PeerEvent::Client(presence("u1/dev2", ClientStatus::Online)),
        PeerEvent::Client(presence("u1/other", ClientStatus::OnlineWithOtherApp)),
        PeerEvent::Client(presence("u1/gone", ClientStatus::Offline)),
        PeerEvent::Handshake(ClientId::new("u1/dev1"), handshake("inst-a", true)),
        PeerEvent::Handshake(ClientId::new("u1/dev1"), handshake("inst-a", true)),
        PeerEvent::Handshake(ClientId::new("u1/dev2"), handshake("inst-b", false)),
    ];

    let mut rng = StdRng::seed_from_u64(0x70ac7);
    for round in 0..200 {
        let mut events = base.clone();
        events.shuffle(&mut rng);

        let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let (ctx, _event_rx) = test_context(storage);
        let mut user = User::new(UserId::new("alice"));
        apply_events(&ctx, &mut user, &events).await;

        let dev1 = ClientId::new("u1/dev1");
        let dev2 = ClientId::new("u1/dev2");
        assert_eq!(
            user.client_to_instance(&dev1),
            Some(&InstanceId::new("inst-a")),
            "round {round}: dev1 mapping diverged",
        );
        assert_eq!(
            user.client_to_instance(&dev2),
            Some(&InstanceId::new("inst-b")),
            "round {round}: dev2 mapping diverged",
        );
        assert_eq!(user.instance_to_client(&InstanceId::new("inst-a")), Some(&dev1));
        assert_eq!(user.instance_to_client(&InstanceId::new("inst-b")), Some(&dev2));

        let summary = user.summary();
        assert_eq!(summary.instances.len(), 2, "round {round}");
        assert!(
            user.client_to_instance(&ClientId::new("u1/other")).is_none(),
            "round {round}: non-protocol client acquired a mapping",
        );
    }
}

#[tokio::test]
async fn handshake_before_presence_still_binds() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
    let (ctx, _event_rx) = test_context(storage);
    let mut user = User::new(UserId::new("alice"));

    // Handshake arrives first; presence catches up later.
    apply_events(
        &ctx,
        &mut user,
        &[
            PeerEvent::Handshake(ClientId::new("u1/dev1"), handshake("inst-a", false)),
            PeerEvent::Client(presence("u1/dev1", ClientStatus::Online)),
        ],
    )
    .await;

    assert!(user.is_instance_online(&InstanceId::new("inst-a")));
}

#[tokio::test]
async fn instance_follows_its_latest_client() {
    // Device churn: instance "abc" first handshakes from dev1,
    // later from dev2.
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
    let (ctx, _event_rx) = test_context(storage);
    let mut user = User::new(UserId::new("alice"));

    apply_events(
        &ctx,
        &mut user,
        &[
            PeerEvent::Handshake(ClientId::new("u1/dev1"), handshake("abc", false)),
            PeerEvent::Handshake(ClientId::new("u1/dev2"), handshake("abc", false)),
        ],
    )
    .await;

    assert_eq!(
        user.instance_to_client(&InstanceId::new("abc")),
        Some(&ClientId::new("u1/dev2")),
    );
    assert_eq!(user.client_to_instance(&ClientId::new("u1/dev1")), None);
}

// ---------------------------------------------------------------------------
// Restart round-trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn consent_survives_disconnect_and_restart() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());

    // Session one: handshake, grant consent, peer goes offline.
    {
        let (ctx, _event_rx) = test_context(Arc::clone(&storage));
        let mut user = User::new(UserId::new("alice"));
        apply_events(
            &ctx,
            &mut user,
            &[
                PeerEvent::Client(presence("u1/dev1", ClientStatus::Online)),
                PeerEvent::Handshake(ClientId::new("u1/dev1"), handshake("inst-a", true)),
            ],
        )
        .await;
        user.modify_consent(&ctx, ConsentAction::Request).await.unwrap();
        user.handle_client(&ctx, presence("u1/dev1", ClientStatus::Offline))
            .await;

        let summary = user.summary();
        assert_eq!(summary.instances.len(), 1);
        assert!(summary.instances[0].consent.can_get());
    }

    // Session two: a fresh Network restores the roster from storage.
    let outbound = Arc::new(RecordingOutbound::default());
    let mut network = Network::new(
        Arc::clone(&storage),
        outbound,
        local_instance(),
    );
    network.load().await.unwrap();
    let commands = network.command_sender();
    let handle = network.start().unwrap();

    let (reply, rx) = oneshot::channel();
    commands
        .send(NetworkCommand::GetUser {
            user_id: UserId::new("alice"),
            reply,
        })
        .await
        .unwrap();
    let summary = rx.await.unwrap().expect("alice missing after restart");

    assert_eq!(summary.name.as_deref(), Some("Alice"));
    assert_eq!(summary.instances.len(), 1);
    assert_eq!(summary.instances[0].instance_id, InstanceId::new("inst-a"));
    assert!(summary.instances[0].consent.can_get());
    // Presence is session state; nothing is online after a restart.
    assert!(!summary.is_online);

    commands.send(NetworkCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}

// ---------------------------------------------------------------------------
// Full lifecycle through the channels
// ---------------------------------------------------------------------------

/// Polls the roster until `check` passes or a timeout expires.
async fn wait_for_roster<F>(
    commands: &mpsc::Sender<NetworkCommand>,
    check: F,
) -> Vec<proxypact_core::UserSummary>
where
    F: Fn(&[proxypact_core::UserSummary]) -> bool,
{
    for _ in 0..100 {
        let (reply, rx) = oneshot::channel();
        commands
            .send(NetworkCommand::GetRoster { reply })
            .await
            .unwrap();
        let roster = rx.await.unwrap();
        if check(&roster) {
            return roster;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("roster never reached the expected state");
}

#[tokio::test]
async fn reconnect_resends_handshakes_and_disconnect_clears_session() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
    let outbound = Arc::new(RecordingOutbound::default());
    let mut network = Network::new(Arc::clone(&storage), outbound.clone(), local_instance());
    let transport = network.transport_sender();
    let commands = network.command_sender();
    let _events = network.take_event_receiver().unwrap();
    let handle = network.start().unwrap();

    transport
        .send(TransportEvent::Presence(ClientState {
            user_id: UserId::new("alice"),
            client_id: ClientId::new("u1/dev1"),
            status: ClientStatus::Online,
            timestamp: Timestamp::now(),
        }))
        .await
        .unwrap();
    transport
        .send(TransportEvent::Message(Envelope {
            from_user_id: UserId::new("alice"),
            from_client_id: ClientId::new("u1/dev1"),
            to_user_id: UserId::new("me@example.com"),
            to_client_id: ClientId::new("me@example.com/pact"),
            message: PeerMessage::Instance(handshake("inst-a", false)),
        }))
        .await
        .unwrap();
    wait_for_roster(&commands, |roster| {
        roster.len() == 1 && roster[0].is_online
    })
    .await;

    // A short transport blip: our handshake goes out again to the
    // client carrying the instance.
    let sends_before = outbound.sent_count();
    transport.send(TransportEvent::Reconnected).await.unwrap();
    for _ in 0..100 {
        if outbound.sent_count() > sends_before {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(outbound.sent_count() > sends_before, "no handshake re-sent");

    // A full session drop: presence and mappings go, instances stay.
    transport.send(TransportEvent::Disconnected).await.unwrap();
    let roster = wait_for_roster(&commands, |roster| !roster[0].is_online).await;
    assert_eq!(roster[0].instances.len(), 1);

    commands.send(NetworkCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn network_dispatches_and_resets() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
    let outbound = Arc::new(RecordingOutbound::default());
    let mut network = Network::new(
        Arc::clone(&storage),
        outbound.clone(),
        local_instance(),
    );
    let transport = network.transport_sender();
    let commands = network.command_sender();
    let mut events = network.take_event_receiver().unwrap();
    let handle = network.start().unwrap();

    // A message can arrive before any presence or profile: the user
    // is created lazily and the handshake still binds.
    transport
        .send(TransportEvent::Message(Envelope {
            from_user_id: UserId::new("alice"),
            from_client_id: ClientId::new("u1/dev1"),
            to_user_id: UserId::new("me@example.com"),
            to_client_id: ClientId::new("me@example.com/pact"),
            message: PeerMessage::Instance(handshake("inst-a", true)),
        }))
        .await
        .unwrap();

    let roster = wait_for_roster(&commands, |roster| roster.len() == 1).await;
    assert_eq!(roster[0].user_id, UserId::new("alice"));
    assert_eq!(roster[0].instances.len(), 1);

    // The first offering handshake surfaced the policy decision.
    let mut saw_offer = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, CoreEvent::OfferReceived { .. }) {
            saw_offer = true;
        }
    }
    assert!(saw_offer, "OfferReceived never emitted");

    // Presence for the same client makes the instance online and
    // triggers our handshake.
    transport
        .send(TransportEvent::Presence(ClientState {
            user_id: UserId::new("alice"),
            client_id: ClientId::new("u1/dev1"),
            status: ClientStatus::Online,
            timestamp: Timestamp::now(),
        }))
        .await
        .unwrap();
    wait_for_roster(&commands, |roster| roster[0].is_online).await;
    assert!(outbound.sent_count() >= 1);

    // A profile names the user.
    transport
        .send(TransportEvent::Profile(UserProfile {
            user_id: UserId::new("alice"),
            name: "Alice Liddell".into(),
            timestamp: Timestamp::now(),
        }))
        .await
        .unwrap();
    wait_for_roster(&commands, |roster| {
        roster[0].name.as_deref() == Some("Alice Liddell")
    })
    .await;

    // Consent command round-trip.
    let (reply, rx) = oneshot::channel();
    commands
        .send(NetworkCommand::ModifyConsent {
            user_id: UserId::new("alice"),
            action: ConsentAction::Request,
            reply,
        })
        .await
        .unwrap();
    rx.await.unwrap().unwrap();

    let roster = wait_for_roster(&commands, |roster| {
        roster[0].instances[0].consent.can_get()
    })
    .await;
    assert!(roster[0].instances[0]
        .consent
        .getter
        .local_requests_access_from_remote);

    // Consent for an unknown peer is a typed error, not a crash.
    let (reply, rx) = oneshot::channel();
    commands
        .send(NetworkCommand::ModifyConsent {
            user_id: UserId::new("nobody"),
            action: ConsentAction::Request,
            reply,
        })
        .await
        .unwrap();
    assert!(rx.await.unwrap().is_err());

    // Full reset wipes the roster and storage.
    let (reply, rx) = oneshot::channel();
    commands.send(NetworkCommand::Reset { reply }).await.unwrap();
    rx.await.unwrap().unwrap();

    let roster = wait_for_roster(&commands, |roster| roster.is_empty()).await;
    assert!(roster.is_empty());
    assert!(storage.keys().await.unwrap().is_empty());

    commands.send(NetworkCommand::Shutdown).await.unwrap();
    handle.await.unwrap();
}
