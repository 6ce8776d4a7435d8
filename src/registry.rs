use fibermesh_crdt::{ActorId, DocId};
use fibermesh_log::{DiscoveryKey, Log, LogTransport};
use fnv::{FnvHashMap, FnvHashSet};
use std::sync::Arc;

/// What the registry wants the swarm to do in response to a log entering or
/// leaving it. Returned rather than emitted directly (spec §9 "Event
/// emission as cross-cutting concern") so the orchestrator stays the only
/// place that talks to the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmAction {
    Join(DiscoveryKey),
    Leave(DiscoveryKey),
}

/// Owns the set of logs on disk and in memory (spec §4.1). Swarm join/leave
/// is driven from here via the `SwarmAction`s each mutating call returns;
/// the on-disk archive itself lives behind `T: LogTransport`.
pub struct LogRegistry<T: LogTransport> {
    transport: Arc<T>,
    logs: FnvHashMap<ActorId, Arc<T::Log>>,
    /// Guards the Open Question in spec §9: never allocate a second
    /// writable log for a doc id while one is already writable or already
    /// being created for it.
    opening: FnvHashSet<DocId>,
}

impl<T: LogTransport> LogRegistry<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            logs: FnvHashMap::default(),
            opening: FnvHashSet::default(),
        }
    }

    pub fn get(&self, actor: &ActorId) -> Option<Arc<T::Log>> {
        self.logs.get(actor).cloned()
    }

    pub fn logs(&self) -> impl Iterator<Item = &Arc<T::Log>> {
        self.logs.values()
    }

    pub fn has_writable(&self, doc: &DocId) -> bool {
        self.logs.get(doc).map(|log| log.is_writable()).unwrap_or(false)
    }

    /// Opens an existing log, or creates a fresh writable one when `actor`
    /// is `None`. Returns the handle plus any swarm action to take.
    pub async fn create_or_open(
        &mut self,
        actor: Option<ActorId>,
    ) -> Result<(Arc<T::Log>, Option<SwarmAction>), fibermesh_log::LogError> {
        if let Some(actor) = actor {
            if let Some(existing) = self.logs.get(&actor) {
                return Ok((existing.clone(), None));
            }
        }
        let log = self.transport.create_or_open(actor).await?;
        let id = log.actor_id();
        self.opening.remove(&id);
        let action = if self.logs.contains_key(&id) {
            None
        } else {
            Some(SwarmAction::Join(log.discovery_key()))
        };
        self.logs.insert(id, log.clone());
        Ok((log, action))
    }

    /// True if a fresh writable log for `doc` is either already present or
    /// already in flight — the guard the Open Question in spec §9 asks for.
    pub fn should_skip_create(&self, doc: &DocId) -> bool {
        self.has_writable(doc) || self.opening.contains(doc)
    }

    pub fn mark_opening(&mut self, doc: DocId) {
        self.opening.insert(doc);
    }

    /// Archives and evicts a log; never deletes its on-disk blocks (the
    /// transport owns that guarantee). Returns the swarm leave action.
    pub fn remove(&mut self, actor: &ActorId) -> Option<SwarmAction> {
        let log = self.logs.remove(actor)?;
        self.transport.remove(actor);
        Some(SwarmAction::Leave(log.discovery_key()))
    }

    /// Opens every log already on disk and reports the swarm joins needed
    /// for all of them. Called once at startup before the engine emits
    /// `ready` (spec §4.7).
    pub async fn enumerate(&mut self) -> Result<Vec<SwarmAction>, fibermesh_log::LogError> {
        let mut actions = Vec::new();
        for actor in self.transport.existing_actors()? {
            let (_, action) = self.create_or_open(Some(actor)).await?;
            actions.extend(action);
        }
        Ok(actions)
    }
}
