//! Shared dependencies handed to the reconciliation code.
//!
//! A [`NetworkContext`] bundles what every `User` operation needs:
//! storage, the outbound send surface, the event channel, and the
//! local identity. It also owns the instance-id index so that every
//! instance save rewrites the `instanceIds` record consistently.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use proxypact_protocol::{Envelope, PeerMessage};
use proxypact_storage::{keys, Storage};
use proxypact_types::{
    ClientId, CoreEvent, InstanceId, KeyHash, ProxypactError, Result, UserId,
};
use tokio::sync::mpsc;

use crate::records::InstanceRecord;

// ---------------------------------------------------------------------------
// LocalInstance
// ---------------------------------------------------------------------------

/// The local side's own identity, assembled at login.
///
/// `instance_id`/`key_hash` come from the persisted `me` record;
/// `user_id`/`client_id` are assigned by the transport session;
/// `description` comes from the operator's options.
#[derive(Clone, Debug)]
pub struct LocalInstance {
    /// Our identity on the social network.
    pub user_id: UserId,
    /// Our client connection for this session.
    pub client_id: ClientId,
    /// Our stable instance identity.
    pub instance_id: InstanceId,
    /// Our trust fingerprint.
    pub key_hash: KeyHash,
    /// Our display name, if the network gave us one.
    pub name: Option<String>,
    /// Device label sent in our handshakes.
    pub description: String,
}

// ---------------------------------------------------------------------------
// NetworkContext
// ---------------------------------------------------------------------------

/// Dependencies shared by all users of one network session.
pub struct NetworkContext {
    storage: Arc<dyn Storage>,
    outbound: Arc<dyn crate::transport::Outbound>,
    event_tx: mpsc::Sender<CoreEvent>,
    local: LocalInstance,
    /// Ids behind the persisted `instanceIds` index record.
    index: Mutex<BTreeSet<InstanceId>>,
}

impl NetworkContext {
    /// Creates a context around the injected collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        outbound: Arc<dyn crate::transport::Outbound>,
        event_tx: mpsc::Sender<CoreEvent>,
        local: LocalInstance,
    ) -> Self {
        Self {
            storage,
            outbound,
            event_tx,
            local,
            index: Mutex::new(BTreeSet::new()),
        }
    }

    /// The local identity.
    pub fn local(&self) -> &LocalInstance {
        &self.local
    }

    /// The storage collaborator.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Persists one instance record, then rewrites the id index.
    ///
    /// The index rewrite on every save keeps `instanceIds` exactly in
    /// step with the records on disk, so a reset that empties it can
    /// never leave phantom ids behind.
    pub async fn save_instance(&self, record: &InstanceRecord) -> Result<()> {
        let key = keys::instance(&record.instance_id);
        self.storage.save(&key, record).await?;

        let ids: Vec<InstanceId> = {
            let mut index = self.lock_index()?;
            index.insert(record.instance_id.clone());
            index.iter().cloned().collect()
        };
        self.storage.save(keys::INSTANCE_IDS, &ids).await
    }

    /// Seeds the index from ids restored at startup.
    pub fn seed_index(&self, ids: impl IntoIterator<Item = InstanceId>) -> Result<()> {
        let mut index = self.lock_index()?;
        index.extend(ids);
        Ok(())
    }

    /// Empties the index after a full reset.
    pub fn clear_index(&self) -> Result<()> {
        self.lock_index()?.clear();
        Ok(())
    }

    /// Emits one event to the consumer.
    ///
    /// A closed event channel means the consumer dropped; the core
    /// keeps running and logs at warn.
    pub async fn emit(&self, event: CoreEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::warn!("core event channel closed -- consumer may have dropped");
        }
    }

    /// Sends one peer message, wrapping it in an envelope from the
    /// local identity.
    pub async fn send_to_client(
        &self,
        to_user: &UserId,
        to_client: &ClientId,
        message: PeerMessage,
    ) -> Result<()> {
        let envelope = Envelope {
            from_user_id: self.local.user_id.clone(),
            from_client_id: self.local.client_id.clone(),
            to_user_id: to_user.clone(),
            to_client_id: to_client.clone(),
            message,
        };
        self.outbound.send(to_client, envelope).await
    }

    fn lock_index(&self) -> Result<std::sync::MutexGuard<'_, BTreeSet<InstanceId>>> {
        self.index.lock().map_err(|_| ProxypactError::StorageError {
            reason: "instance index mutex poisoned".into(),
        })
    }
}
