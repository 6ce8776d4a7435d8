use crate::cache::DocumentCache;
use crate::error::EngineError;
use crate::events::Event;
use crate::metadata::{Metadata, MetadataStore};
use crate::registry::{LogRegistry, SwarmAction};
use crate::tracker::BlockRequestTracker;
use fibermesh_crdt::{ActorId, Change, CrdtBackend, DocId, Transaction};
use fibermesh_log::{Log, LogTransport};
use fnv::FnvHashSet;
use std::sync::Arc;

/// The component graph from spec §2, owned by one struct rather than split
/// into a borrow-holding loader: `Engine` holds the registry, metadata
/// store, tracker and document cache directly, so the causal loader's
/// recursive fetch-apply-recurse routine (§4.4) is just a handful of
/// `&mut self` methods instead of a separate type juggling borrowed
/// references into all four.
pub struct Engine<T: LogTransport, D: CrdtBackend> {
    registry: LogRegistry<T>,
    metadata: MetadataStore,
    tracker: BlockRequestTracker,
    cache: DocumentCache<D>,
    ready: FnvHashSet<DocId>,
    enumerated: bool,
}

impl<T: LogTransport, D: CrdtBackend> Engine<T, D> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            registry: LogRegistry::new(transport),
            metadata: MetadataStore::default(),
            tracker: BlockRequestTracker::default(),
            cache: DocumentCache::default(),
            ready: FnvHashSet::default(),
            enumerated: false,
        }
    }

    fn require_ready(&self) -> Result<(), EngineError> {
        if self.enumerated {
            Ok(())
        } else {
            Err(EngineError::NotReady)
        }
    }

    pub fn group_members(&self, group: &ActorId) -> Vec<ActorId> {
        self.metadata.group_actors(group).into_iter().collect()
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Folds a freshly-applied document value back into the cache and
    /// decides which lifecycle event it earns (spec §4.4 "Readiness
    /// emission" / "Subsequent updates"): no event while dependencies are
    /// still missing, `DocumentReady` the first time they reach zero,
    /// `DocumentUpdated` every time after that.
    fn record_update(&mut self, doc: DocId, new_doc: D) -> Option<Event> {
        let settled = new_doc.missing_deps().is_empty();
        self.cache.set(doc, new_doc);
        if !settled {
            return None;
        }
        Some(if self.ready.insert(doc) {
            Event::DocumentReady(doc)
        } else {
            Event::DocumentUpdated(doc)
        })
    }

    /// Brings our own copy of `doc`'s root log up to its on-disk length
    /// (spec §4.4 `loadOwn`), before assessing missingness against peers.
    async fn load_own(&mut self, doc: DocId) -> Result<Vec<Event>, EngineError> {
        let log = self.registry.get(&doc).ok_or(EngineError::NotOpened(doc))?;
        let len = log.len().await?;
        let first = self.tracker.max(doc, doc, len);
        if first >= len {
            return Ok(Vec::new());
        }
        let mut changes = Vec::new();
        for index in first..len {
            match log.get(index).await {
                Ok(bytes) => match serde_json::from_slice::<Change>(&bytes) {
                    Ok(change) => changes.push(change),
                    Err(err) => {
                        tracing::warn!(%doc, index, %err, "unparseable own block, skipped")
                    }
                },
                Err(err) => {
                    tracing::debug!(%doc, index, %err, "own block read failed, retry on next trigger")
                }
            }
        }
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        let current = self.cache.get(&doc).ok_or(EngineError::NotOpened(doc))?;
        let updated = current.apply_changes(&changes)?;
        Ok(self.record_update(doc, updated).into_iter().collect())
    }

    /// The heart of the core (spec §4.4): pulls whatever blocks `doc`'s
    /// current missing-dependency map names, applies them, and recurses
    /// until a fixed point — either no missing deps remain, or every
    /// remaining gap names an actor we have no log for yet (we wait for a
    /// FEEDS_SHARED to introduce it rather than erroring).
    async fn load_missing(&mut self, doc: DocId) -> Result<Vec<Event>, EngineError> {
        let mut any_applied = false;
        loop {
            let current = self.cache.get(&doc).ok_or(EngineError::NotOpened(doc))?;
            let missing = current.missing_deps();
            if missing.is_empty() {
                break;
            }
            let mut fetched = Vec::new();
            for (actor, highest_seq_needed) in missing {
                let log = match self.registry.get(&actor) {
                    Some(log) => log,
                    None => continue,
                };
                let last = highest_seq_needed + 1;
                let first = self.tracker.max(doc, actor, last);
                if first >= last {
                    continue;
                }
                for index in first..last {
                    match log.get(index).await {
                        Ok(bytes) => match serde_json::from_slice::<Change>(&bytes) {
                            Ok(change) => fetched.push(change),
                            Err(err) => {
                                tracing::warn!(%actor, index, %err, "unparseable change block, skipped")
                            }
                        },
                        Err(err) => {
                            tracing::debug!(%actor, index, %err, "block read failed, retry on next trigger")
                        }
                    }
                }
            }
            if fetched.is_empty() {
                break;
            }
            let updated = current.apply_changes(&fetched)?;
            self.cache.set(doc, updated);
            any_applied = true;
        }
        if !any_applied {
            return Ok(Vec::new());
        }
        let settled = self.cache.get(&doc).ok_or(EngineError::NotOpened(doc))?;
        Ok(self.record_update(doc, settled).into_iter().collect())
    }

    /// Invoked whenever a log finishes opening, whether from startup
    /// enumeration, `open`, or a FEEDS_SHARED-triggered fetch. Loads its
    /// metadata (silently waiting for replication if block 0 isn't there
    /// yet), then runs `loadOwn`/`loadMissing` for the document it belongs
    /// to.
    async fn on_feed_ready(&mut self, actor: ActorId) -> Result<Vec<Event>, EngineError> {
        let log = self.registry.get(&actor).ok_or(EngineError::NotOpened(actor))?;
        let metadata = match self.metadata.load(actor, log.as_ref()).await {
            Ok(m) => m,
            Err(EngineError::MetadataNotFound(_)) => return Ok(Vec::new()),
            Err(EngineError::CorruptMetadata { .. }) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let doc = metadata.doc_id;
        if !self.cache.contains(&doc) {
            self.cache.set(doc, D::init(doc));
        }
        let mut events = vec![Event::FeedReady(actor)];
        if actor == doc {
            events.extend(self.load_own(doc).await?);
        }
        events.extend(self.load_missing(doc).await?);
        Ok(events)
    }

    /// A peer announced these actor ids belong to a document group we care
    /// about (spec §4.6 FEEDS_SHARED). Opens any we don't already have and
    /// re-runs the causal loader for each; a newly-opened actor can also
    /// satisfy a dependency some other already-cached document was blocked
    /// on, so every not-yet-ready document gets a chance to re-check too.
    pub async fn on_feeds_shared(
        &mut self,
        actors: Vec<ActorId>,
    ) -> Result<(Vec<Event>, Vec<SwarmAction>), EngineError> {
        let mut events = Vec::new();
        let mut actions = Vec::new();
        let mut opened_new = false;
        for actor in actors {
            if self.registry.get(&actor).is_some() {
                continue;
            }
            let (_, action) = self.registry.create_or_open(Some(actor)).await?;
            actions.extend(action);
            events.extend(self.on_feed_ready(actor).await?);
            opened_new = true;
        }
        if opened_new {
            for doc in self.cache.doc_ids() {
                if self.ready.contains(&doc) {
                    continue;
                }
                events.extend(self.load_missing(doc).await?);
            }
        }
        Ok((events, actions))
    }

    /// Opens every log already on disk (spec §4.7 `ready`): must run once,
    /// before any other public operation is allowed.
    pub async fn enumerate(&mut self) -> Result<(Vec<Event>, Vec<SwarmAction>), EngineError> {
        let actions = self.registry.enumerate().await?;
        let actors: Vec<ActorId> = self.registry.logs().map(|log| log.actor_id()).collect();
        let mut events = vec![Event::Ready];
        for actor in actors {
            events.extend(self.on_feed_ready(actor).await?);
        }
        self.enumerated = true;
        Ok((events, actions))
    }

    /// `create(metadata)` (spec §4.5): allocate a writable root log, write
    /// its metadata record, and seed an empty document for it.
    pub async fn create(&mut self) -> Result<(DocId, Vec<Event>, Vec<SwarmAction>), EngineError> {
        self.require_ready()?;
        let (log, action) = self.registry.create_or_open(None).await?;
        let actor = log.actor_id();
        self.metadata
            .append_metadata(actor, Metadata::root(actor), log.as_ref())
            .await?;
        self.tracker.max(actor, actor, 1);
        self.cache.set(actor, D::init(actor));
        self.ready.insert(actor);
        let events = vec![Event::FeedReady(actor), Event::DocumentReady(actor)];
        Ok((actor, events, action.into_iter().collect()))
    }

    /// `open(docId)` (spec §4.5): ensure a log handle exists for `docId`,
    /// possibly empty until replication fills it, and run the causal
    /// loader over whatever is already there.
    pub async fn open(&mut self, doc: DocId) -> Result<(Vec<Event>, Vec<SwarmAction>), EngineError> {
        self.require_ready()?;
        let (_log, action) = self.registry.create_or_open(Some(doc)).await?;
        if !self.cache.contains(&doc) {
            self.cache.set(doc, D::init(doc));
        }
        let events = self.on_feed_ready(doc).await?;
        Ok((events, action.into_iter().collect()))
    }

    pub fn find(&self, doc: &DocId) -> Result<D, EngineError> {
        self.require_ready()?;
        self.cache.get(doc).ok_or_else(|| EngineError::NotOpened(*doc))
    }

    /// `change(doc, message, fn) -> doc'` (spec §4.5): only the changes we
    /// authored go into our own log, never peer-authored ones folded in by
    /// a prior merge.
    pub async fn change<F>(
        &mut self,
        doc: DocId,
        message: Option<String>,
        f: F,
    ) -> Result<(D, Vec<Event>), EngineError>
    where
        F: FnOnce(&mut Transaction),
    {
        self.require_ready()?;
        let current = self.cache.get(&doc).ok_or(EngineError::NotOpened(doc))?;
        let actor = current.actor();
        let updated = current.change(message, f);
        let own_new: Vec<Change> = updated
            .changes_since(&current)
            .into_iter()
            .filter(|c| c.actor == actor)
            .collect();
        if !own_new.is_empty() {
            let log = self.registry.get(&actor).ok_or(EngineError::NotOpened(doc))?;
            let blocks = own_new
                .iter()
                .map(|c| serde_json::to_vec(c).expect("Change always serializes"))
                .collect();
            log.append(blocks).await?;
            self.tracker.bump(doc, actor, own_new.len() as u64);
        }
        let events = self.record_update(doc, updated.clone()).into_iter().collect();
        Ok((updated, events))
    }

    /// `merge(destId, sourceId)` (spec §4.5): folds `source` into `dest`;
    /// any resulting change authored by `dest`'s own actor is persisted to
    /// `dest`'s log (ordinarily none, since merging doesn't mint new
    /// changes, but a backend is free to do so).
    pub async fn merge(&mut self, dest: DocId, source: DocId) -> Result<(D, Vec<Event>), EngineError> {
        self.require_ready()?;
        let dest_doc = self.cache.get(&dest).ok_or(EngineError::NotOpened(dest))?;
        let source_doc = self.cache.get(&source).ok_or(EngineError::NotOpened(source))?;
        let dest_actor = dest_doc.actor();
        let merged = dest_doc.merge(&source_doc);
        let own_new: Vec<Change> = merged
            .changes_since(&dest_doc)
            .into_iter()
            .filter(|c| c.actor == dest_actor)
            .collect();
        if !own_new.is_empty() {
            let log = self.registry.get(&dest_actor).ok_or(EngineError::NotOpened(dest))?;
            let blocks = own_new
                .iter()
                .map(|c| serde_json::to_vec(c).expect("Change always serializes"))
                .collect();
            log.append(blocks).await?;
            self.tracker.bump(dest, dest_actor, own_new.len() as u64);
        }
        let events = self.record_update(dest, merged.clone()).into_iter().collect();
        Ok((merged, events))
    }

    /// `fork(parentId)` (spec §4.5): a fresh keypair every time (spec §9 —
    /// forks never reuse an existing writable actor), seeded with a single
    /// self-authored change that carries every field the parent has already
    /// materialized. The seed change has empty `deps`, so `docIndex[fork] =
    /// {new_actor}` alone is enough to re-fold the fork's full state from
    /// disk (spec §3) — the fork never depends on the parent's log being
    /// present or even known to whoever opens it next.
    pub async fn fork(
        &mut self,
        parent: DocId,
    ) -> Result<(DocId, D, Vec<Event>, Vec<SwarmAction>), EngineError> {
        self.require_ready()?;
        let parent_doc = self.cache.get(&parent).ok_or(EngineError::NotOpened(parent))?;
        let parent_metadata = self
            .metadata
            .get(&parent)
            .cloned()
            .ok_or(EngineError::NotOpened(parent))?;
        let (log, action) = self.registry.create_or_open(None).await?;
        let new_actor = log.actor_id();
        self.metadata
            .append_metadata(
                new_actor,
                Metadata::fork(new_actor, parent, parent_metadata.group_id),
                log.as_ref(),
            )
            .await?;
        self.tracker.max(new_actor, new_actor, 1);

        let base = D::init(new_actor);
        let fields = parent_doc.fields();
        let seeded = if fields.is_empty() {
            base.clone()
        } else {
            base.change(Some(format!("fork of {parent}")), |t| {
                for (key, value) in fields {
                    t.set(key, value);
                }
            })
        };
        let seed_blocks: Vec<Change> = seeded.changes_since(&base);
        if !seed_blocks.is_empty() {
            let blocks = seed_blocks
                .iter()
                .map(|c| serde_json::to_vec(c).expect("Change always serializes"))
                .collect();
            log.append(blocks).await?;
            self.tracker.bump(new_actor, new_actor, seed_blocks.len() as u64);
        }
        self.cache.set(new_actor, seeded.clone());
        self.ready.insert(new_actor);
        let events = vec![Event::FeedReady(new_actor), Event::DocumentReady(new_actor)];
        Ok((new_actor, seeded, events, action.into_iter().collect()))
    }

    /// `delete(docId)` (spec §4.5): archives and evicts; never touches
    /// on-disk blocks.
    pub fn delete(&mut self, doc: DocId) -> Vec<SwarmAction> {
        self.cache.remove(&doc);
        self.ready.remove(&doc);
        self.registry.remove(&doc).into_iter().collect()
    }
}
