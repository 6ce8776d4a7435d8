use crate::error::LogError;
use crate::transport::{discovery_key, DiscoveryKey, Log, LogTransport};
use async_trait::async_trait;
use fibermesh_crdt::{ActorId, Keypair};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// In-process log storage, the counterpart of the teacher's
/// `sled::Config::temporary(true)` ephemeral store — used for tests and for
/// any run that doesn't need durability across restarts.
pub struct MemoryLog {
    actor: ActorId,
    writable: bool,
    blocks: RwLock<Vec<Vec<u8>>>,
}

#[async_trait]
impl Log for MemoryLog {
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
        Ok(self.blocks.read().len() as u64)
    }

    async fn append(&self, blocks: Vec<Vec<u8>>) -> Result<u64, LogError> {
        if !self.writable {
            return Err(LogError::NotWritable {
                actor: self.actor.to_string(),
            });
        }
        let mut guard = self.blocks.write();
        guard.extend(blocks);
        Ok(guard.len() as u64)
    }

    async fn get(&self, index: u64) -> Result<Vec<u8>, LogError> {
        self.blocks
            .read()
            .get(index as usize)
            .cloned()
            .ok_or_else(|| LogError::NotFound {
                actor: self.actor.to_string(),
                index,
            })
    }
}

#[derive(Default)]
pub struct MemoryLogTransport {
    logs: RwLock<FnvHashMap<ActorId, Arc<MemoryLog>>>,
}

impl MemoryLogTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogTransport for MemoryLogTransport {
    type Log = MemoryLog;

    async fn create_or_open(&self, actor: Option<ActorId>) -> Result<Arc<MemoryLog>, LogError> {
        if let Some(actor) = actor {
            if let Some(log) = self.logs.read().get(&actor).cloned() {
                return Ok(log);
            }
            let log = Arc::new(MemoryLog {
                actor,
                writable: false,
                blocks: RwLock::new(Vec::new()),
            });
            self.logs.write().insert(actor, log.clone());
            return Ok(log);
        }
        let actor = Keypair::generate().actor_id();
        let log = Arc::new(MemoryLog {
            actor,
            writable: true,
            blocks: RwLock::new(Vec::new()),
        });
        self.logs.write().insert(actor, log.clone());
        Ok(log)
    }

    fn remove(&self, actor: &ActorId) {
        self.logs.write().remove(actor);
    }

    fn existing_actors(&self) -> Result<Vec<ActorId>, LogError> {
        Ok(self.logs.read().keys().copied().collect())
    }
}
