use crate::error::LogError;
use async_trait::async_trait;
use fibermesh_crdt::ActorId;
use std::sync::Arc;

/// A 32-byte rendezvous token derived from a log's public key, handed to the
/// swarm so peers interested in the same log can find each other.
pub type DiscoveryKey = [u8; 32];

pub fn discovery_key(actor: &ActorId) -> DiscoveryKey {
    *blake3::hash(&[b"fibermesh-discovery-key", actor.as_ref()].concat()).as_bytes()
}

/// A thin adapter over one append-only binary log (spec §2.1 "Log Handle").
/// Block 0 is reserved for the writer's metadata record; blocks 1..N carry
/// CRDT changes. This crate never interprets block contents — that is the
/// metadata store's and the causal loader's job.
#[async_trait]
pub trait Log: Send + Sync {
    fn actor_id(&self) -> ActorId;
    fn is_writable(&self) -> bool;
    fn discovery_key(&self) -> DiscoveryKey;
    /// Exclusive upper bound of valid block indices.
    async fn len(&self) -> Result<u64, LogError>;
    /// Appends blocks, returning the new length. Fails if this log was
    /// opened read-only (we don't hold its keypair).
    async fn append(&self, blocks: Vec<Vec<u8>>) -> Result<u64, LogError>;
    async fn get(&self, index: u64) -> Result<Vec<u8>, LogError>;
}

/// Owns the set of logs on disk and in memory (spec §4.1 Log Registry's
/// storage half; the registry itself additionally tracks swarm join/leave,
/// which is an engine-level concern, not a transport one).
#[async_trait]
pub trait LogTransport: Send + Sync {
    type Log: Log;

    /// If `actor` is given, returns the existing log or opens an empty one
    /// to be filled in later by replication (never fails just because the
    /// key is unfamiliar). If omitted, creates a new writable log under a
    /// freshly generated keypair (spec §4.1).
    async fn create_or_open(&self, actor: Option<ActorId>) -> Result<Arc<Self::Log>, LogError>;

    /// Archives and evicts a log's on-disk storage handle. Per spec §4.1
    /// this never deletes the underlying blocks.
    fn remove(&self, actor: &ActorId);

    /// All actor ids this transport already has storage for, regardless of
    /// whether they're currently open — used once at startup to enumerate
    /// every on-disk log before the registry reports itself ready.
    fn existing_actors(&self) -> Result<Vec<ActorId>, LogError>;
}
