use crate::error::EngineError;
use fibermesh_crdt::{ActorId, DocId, GroupId};
use fibermesh_log::Log;
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};

/// Block 0 of every log, in full (spec §3). `hypermerge` is carried as a
/// literal version tag on the wire rather than inferred from context, the
/// way the teacher's own `Delta`/`SyncRequest` envelopes carry an explicit
/// schema hash rather than assuming one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub hypermerge: u8,
    #[serde(rename = "docId")]
    pub doc_id: DocId,
    #[serde(rename = "groupId")]
    pub group_id: GroupId,
    #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ActorId>,
}

impl Metadata {
    pub fn root(doc_id: DocId) -> Self {
        Self {
            hypermerge: 1,
            doc_id,
            group_id: doc_id,
            parent_id: None,
        }
    }

    pub fn fork(new_actor: ActorId, parent: ActorId, group_id: GroupId) -> Self {
        Self {
            hypermerge: 1,
            doc_id: new_actor,
            group_id,
            parent_id: Some(parent),
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Metadata always serializes")
    }
}

/// In-memory indices mapping actor id -> metadata, group id -> actor ids,
/// doc id -> actor ids (spec §2.3, §4.2). Metadata is durable (block 0 of
/// every log); this store is just the materialized cache of it.
#[derive(Default)]
pub struct MetadataStore {
    by_actor: FnvHashMap<ActorId, Metadata>,
    doc_index: FnvHashMap<DocId, FnvHashSet<ActorId>>,
    group_index: FnvHashMap<GroupId, FnvHashSet<ActorId>>,
}

impl MetadataStore {
    pub fn get(&self, actor: &ActorId) -> Option<&Metadata> {
        self.by_actor.get(actor)
    }

    pub fn doc_actors(&self, doc: &DocId) -> FnvHashSet<ActorId> {
        self.doc_index.get(doc).cloned().unwrap_or_default()
    }

    pub fn group_actors(&self, group: &GroupId) -> FnvHashSet<ActorId> {
        self.group_index.get(group).cloned().unwrap_or_default()
    }

    /// First-writer-wins: a second `set` for an already-known actor is a
    /// nop. Returns whether this call was the one that took effect.
    pub fn set(&mut self, actor: ActorId, metadata: Metadata) -> bool {
        if self.by_actor.contains_key(&actor) {
            return false;
        }
        self.doc_index.entry(metadata.doc_id).or_default().insert(actor);
        self.group_index.entry(metadata.group_id).or_default().insert(actor);
        self.by_actor.insert(actor, metadata);
        true
    }

    /// Returns the cached record if present; otherwise reads block 0 of
    /// `log`, decodes it, and caches the result. Idempotent: a second load
    /// for the same actor returns the cached value without touching the
    /// log again.
    pub async fn load(&mut self, actor: ActorId, log: &dyn Log) -> Result<Metadata, EngineError> {
        if let Some(m) = self.by_actor.get(&actor) {
            return Ok(m.clone());
        }
        let len = log.len().await?;
        if len == 0 {
            return Err(EngineError::MetadataNotFound(actor));
        }
        let block = log.get(0).await?;
        let metadata = Metadata::decode(&block).map_err(|err| {
            tracing::warn!(%actor, %err, "corrupt metadata, actor excluded from all documents");
            EngineError::CorruptMetadata {
                actor,
                reason: err.to_string(),
            }
        })?;
        // First-loaded wins even if this actor's metadata conflicts with a
        // concurrently-discovered record for the same key (spec §4.4
        // byzantine tie-break); `set` already encodes that rule.
        self.set(actor, metadata.clone());
        Ok(metadata)
    }

    /// Writes block 0. Requires the log to still be empty; metadata is
    /// immutable once present (spec §3 invariant).
    pub async fn append_metadata(
        &mut self,
        actor: ActorId,
        metadata: Metadata,
        log: &dyn Log,
    ) -> Result<(), EngineError> {
        if log.len().await? != 0 {
            return Err(EngineError::MetadataNonEmpty(actor));
        }
        log.append(vec![metadata.encode()]).await?;
        self.set(actor, metadata);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibermesh_log::{Log, MemoryLogTransport, LogTransport};

    fn actor(b: u8) -> ActorId {
        ActorId::new([b; 32])
    }

    #[async_std::test]
    async fn append_then_load_roundtrips() {
        let transport = MemoryLogTransport::new();
        let log = transport.create_or_open(None).await.unwrap();
        let id = log.actor_id();
        let mut store = MetadataStore::default();
        store
            .append_metadata(id, Metadata::root(id), log.as_ref())
            .await
            .unwrap();

        let mut fresh = MetadataStore::default();
        let loaded = fresh.load(id, log.as_ref()).await.unwrap();
        assert_eq!(loaded.doc_id, id);
        assert_eq!(fresh.doc_actors(&id).len(), 1);
    }

    #[async_std::test]
    async fn append_metadata_rejects_non_empty_log() {
        let transport = MemoryLogTransport::new();
        let log = transport.create_or_open(None).await.unwrap();
        log.append(vec![b"not metadata".to_vec()]).await.unwrap();
        let mut store = MetadataStore::default();
        let err = store
            .append_metadata(log.actor_id(), Metadata::root(log.actor_id()), log.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MetadataNonEmpty(_)));
    }

    #[async_std::test]
    async fn load_on_empty_log_is_not_found() {
        let transport = MemoryLogTransport::new();
        let log = transport.create_or_open(None).await.unwrap();
        let mut store = MetadataStore::default();
        let err = store.load(log.actor_id(), log.as_ref()).await.unwrap_err();
        assert!(matches!(err, EngineError::MetadataNotFound(_)));
    }

    #[test]
    fn set_is_first_writer_wins() {
        let mut store = MetadataStore::default();
        let a = actor(1);
        let doc = actor(9);
        assert!(store.set(a, Metadata::root(doc)));
        let other = Metadata {
            hypermerge: 1,
            doc_id: actor(7),
            group_id: actor(7),
            parent_id: None,
        };
        assert!(!store.set(a, other));
        assert_eq!(store.get(&a).unwrap().doc_id, doc);
    }
}
