use crate::error::LogError;
use crate::transport::{discovery_key, DiscoveryKey, Log, LogTransport};
use async_trait::async_trait;
use fibermesh_crdt::{ActorId, Keypair};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Sentinel key marking a tree as writable, i.e. this process holds the
/// keypair behind it. Grounded in the teacher's `Secrets` (`src/secrets.rs`),
/// which likewise keys auxiliary facts into the same `sled::Tree` as the
/// data they describe rather than a side table.
const WRITABLE_MARKER: &[u8] = b"\xff\xffwritable";

fn block_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

pub struct SledLog {
    actor: ActorId,
    tree: sled::Tree,
    writable: bool,
}

#[async_trait]
impl Log for SledLog {
    fn actor_id(&self) -> ActorId {
        self.actor
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn discovery_key(&self) -> DiscoveryKey {
        discovery_key(&self.actor)
    }

    async fn len(&self) -> Result<u64, LogError> {
        let count = self
            .tree
            .iter()
            .keys()
            .filter(|k| k.as_ref().map(|k| k.as_ref() != WRITABLE_MARKER).unwrap_or(true))
            .count();
        Ok(count as u64)
    }

    async fn append(&self, blocks: Vec<Vec<u8>>) -> Result<u64, LogError> {
        if !self.writable {
            return Err(LogError::NotWritable {
                actor: self.actor.to_string(),
            });
        }
        let mut next = self.len().await?;
        for block in blocks {
            self.tree.insert(block_key(next), block)?;
            next += 1;
        }
        self.tree.flush()?;
        Ok(next)
    }

    async fn get(&self, index: u64) -> Result<Vec<u8>, LogError> {
        self.tree
            .get(block_key(index))?
            .map(|v| v.to_vec())
            .ok_or_else(|| LogError::NotFound {
                actor: self.actor.to_string(),
                index,
            })
    }
}

/// `sled`-backed block storage, one tree per actor, the durable counterpart
/// of [`crate::memory::MemoryLogTransport`]. Mirrors the teacher's use of a
/// `sled::Db` as the single on-disk root for all per-document state.
pub struct SledLogTransport {
    db: sled::Db,
    cache: RwLock<FnvHashMap<ActorId, Arc<SledLog>>>,
}

impl SledLogTransport {
    pub fn new(db: sled::Db) -> Self {
        Self {
            db,
            cache: RwLock::new(FnvHashMap::default()),
        }
    }

    pub fn memory() -> Result<Self, LogError> {
        Ok(Self::new(sled::Config::new().temporary(true).open()?))
    }

    fn tree_for(&self, actor: &ActorId) -> Result<sled::Tree, LogError> {
        Ok(self.db.open_tree(actor.to_string())?)
    }
}

#[async_trait]
impl LogTransport for SledLogTransport {
    type Log = SledLog;

    async fn create_or_open(&self, actor: Option<ActorId>) -> Result<Arc<SledLog>, LogError> {
        if let Some(actor) = actor {
            if let Some(log) = self.cache.read().get(&actor).cloned() {
                return Ok(log);
            }
            let tree = self.tree_for(&actor)?;
            let writable = tree.get(WRITABLE_MARKER)?.is_some();
            let log = Arc::new(SledLog {
                actor,
                tree,
                writable,
            });
            self.cache.write().insert(actor, log.clone());
            return Ok(log);
        }
        let actor = Keypair::generate().actor_id();
        let tree = self.tree_for(&actor)?;
        tree.insert(WRITABLE_MARKER, &[1u8][..])?;
        let log = Arc::new(SledLog {
            actor,
            tree,
            writable: true,
        });
        self.cache.write().insert(actor, log.clone());
        Ok(log)
    }

    fn remove(&self, actor: &ActorId) {
        // Evict the in-memory handle only; per spec §4.1 `remove` never
        // deletes blocks from disk.
        self.cache.write().remove(actor);
    }

    fn existing_actors(&self) -> Result<Vec<ActorId>, LogError> {
        use std::str::FromStr;
        Ok(self
            .db
            .tree_names()
            .into_iter()
            .filter_map(|name| std::str::from_utf8(&name).ok().map(str::to_owned))
            .filter_map(|name| ActorId::from_str(&name).ok())
            .collect())
    }
}
