use crate::change::{Change, Op};
use crate::error::CrdtError;
use crate::id::ActorId;
use std::collections::BTreeMap;

impl Change {
    /// Minimal shape validation before folding a change into a document.
    /// Anything structurally bogus is rejected here rather than silently
    /// ignored, in the spirit of the strict tagged-variant decoding called
    /// for in the design notes.
    pub fn validate(&self) -> Result<(), CrdtError> {
        if self.ops.is_empty() {
            return Err(CrdtError::Invalid("change carries no ops".into()));
        }
        if self.seq == 0 {
            return Err(CrdtError::Invalid("seq must start at 1".into()));
        }
        Ok(())
    }
}

/// A mutation scope handed to the closure passed to [`CrdtBackend::change`].
pub struct Transaction {
    ops: Vec<Op>,
}

impl Transaction {
    fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Assigns `value` to `key`, last-writer-wins.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.ops.push(Op::Set(key.into(), value.into()));
    }
}

/// The role an external CRDT library plays in this system (spec §6.1):
/// construct, locally mutate, merge, diff, fold, and report missing
/// dependencies. `fibermesh` is generic over this trait; [`LwwDoc`] is the
/// one concrete implementation bundled so the engine and its tests have
/// something to run against.
pub trait CrdtBackend: Clone + Send + Sync + 'static {
    fn init(actor: ActorId) -> Self;
    fn actor(&self) -> ActorId;
    fn vector_clock(&self) -> BTreeMap<ActorId, u64>;
    fn change<F>(&self, message: Option<String>, f: F) -> Self
    where
        F: FnOnce(&mut Transaction);
    fn merge(&self, other: &Self) -> Self;
    /// Every change present in `self` but not in `old`.
    fn changes_since(&self, old: &Self) -> Vec<Change>;
    fn apply_changes(&self, changes: &[Change]) -> Result<Self, CrdtError>;
    /// `{actorId -> highestSeqNeeded}` for every causal dependency this
    /// document has seen referenced but not yet materialized.
    fn missing_deps(&self) -> BTreeMap<ActorId, u64>;
    fn fields(&self) -> BTreeMap<String, String>;
    /// `{fieldPath -> {actorId -> losingValue}}`, surfaced but not
    /// interpreted by the replication layer (spec §6.1).
    fn conflicts(&self) -> BTreeMap<String, BTreeMap<ActorId, String>>;
}

#[derive(Clone)]
struct Entry {
    actor: ActorId,
    seq: u64,
    /// Causal depth of the change that wrote this entry: `1 +
    /// max(depended-on seq)`. Two concurrent changes extending the same
    /// parent state land on the same depth, so ties are broken by actor id
    /// rather than by whichever per-actor log happened to run ahead.
    depth: u64,
    value: String,
}

fn causal_depth(change: &Change) -> u64 {
    1 + change.deps.values().map(|bound| bound - 1).max().unwrap_or(0)
}

/// A last-writer-wins field map. Concurrent writes to the same key are kept
/// side by side until one causally dominates the other (the writer has
/// since seen the other's change); while concurrent, ties are broken by
/// actor id, the highest winning. Grounded in the teacher's MVReg case
/// study (`crdt/src/lib.rs` module docs): "a set of concurrently written
/// values... when a value is assigned all previous values are cleared."
#[derive(Clone)]
pub struct LwwDoc {
    actor: ActorId,
    clock: BTreeMap<ActorId, u64>,
    applied: BTreeMap<(ActorId, u64), Change>,
    pending: Vec<Change>,
    multivalue: BTreeMap<String, Vec<Entry>>,
}

impl LwwDoc {
    fn next_seq(&self) -> u64 {
        self.clock.get(&self.actor).copied().unwrap_or(0) + 1
    }

    fn current_deps(&self) -> BTreeMap<ActorId, u64> {
        self.clock.iter().map(|(a, s)| (*a, s + 1)).collect()
    }

    fn deps_satisfied(&self, change: &Change) -> bool {
        change
            .deps
            .iter()
            .all(|(actor, bound)| self.clock.get(actor).copied().unwrap_or(0) + 1 >= *bound)
    }

    /// Folds one already dependency-satisfied change into the working
    /// state. Idempotent: re-applying a dot already in `applied` is a nop.
    fn fold(&mut self, change: Change) {
        let dot = change.dot();
        if self.applied.contains_key(&dot) {
            return;
        }
        let depth = causal_depth(&change);
        for op in &change.ops {
            let Op::Set(key, value) = op;
            let entries = self.multivalue.entry(key.clone()).or_default();
            entries.retain(|e| {
                let their_bound = change.deps.get(&e.actor).copied().unwrap_or(0);
                // Keep entries the incoming change has not already seen.
                their_bound <= e.seq
            });
            entries.push(Entry {
                actor: change.actor,
                seq: change.seq,
                depth,
                value: value.clone(),
            });
        }
        let slot = self.clock.entry(change.actor).or_insert(0);
        *slot = (*slot).max(change.seq);
        self.applied.insert(dot, change);
    }

    fn settle(&mut self) {
        loop {
            let mut progressed = false;
            let mut still_pending = Vec::new();
            for change in std::mem::take(&mut self.pending) {
                if self.deps_satisfied(&change) {
                    self.fold(change);
                    progressed = true;
                } else {
                    still_pending.push(change);
                }
            }
            self.pending = still_pending;
            if !progressed {
                break;
            }
        }
    }

    fn winner(entries: &[Entry]) -> Option<&Entry> {
        entries
            .iter()
            .max_by(|a, b| (a.depth, a.actor).cmp(&(b.depth, b.actor)))
    }
}

impl CrdtBackend for LwwDoc {
    fn init(actor: ActorId) -> Self {
        Self {
            actor,
            clock: BTreeMap::new(),
            applied: BTreeMap::new(),
            pending: Vec::new(),
            multivalue: BTreeMap::new(),
        }
    }

    fn actor(&self) -> ActorId {
        self.actor
    }

    fn vector_clock(&self) -> BTreeMap<ActorId, u64> {
        self.clock.clone()
    }

    fn change<F>(&self, message: Option<String>, f: F) -> Self
    where
        F: FnOnce(&mut Transaction),
    {
        let mut txn = Transaction::new();
        f(&mut txn);
        if txn.ops.is_empty() {
            return self.clone();
        }
        let change = Change {
            actor: self.actor,
            seq: self.next_seq(),
            deps: self.current_deps(),
            message,
            ops: txn.ops,
        };
        let mut doc = self.clone();
        doc.fold(change);
        doc
    }

    fn merge(&self, other: &Self) -> Self {
        let new_changes = other.changes_since(self);
        self.apply_changes(&new_changes)
            .expect("merging another document's own changes never fails validation")
    }

    fn changes_since(&self, old: &Self) -> Vec<Change> {
        self.applied
            .iter()
            .filter(|(dot, _)| !old.applied.contains_key(dot))
            .map(|(_, change)| change.clone())
            .collect()
    }

    fn apply_changes(&self, changes: &[Change]) -> Result<Self, CrdtError> {
        for change in changes {
            change.validate()?;
        }
        let mut doc = self.clone();
        doc.pending.extend(changes.iter().cloned());
        doc.settle();
        Ok(doc)
    }

    fn missing_deps(&self) -> BTreeMap<ActorId, u64> {
        let mut missing: BTreeMap<ActorId, u64> = BTreeMap::new();
        for change in &self.pending {
            for (actor, bound) in &change.deps {
                let have = self.clock.get(actor).copied().unwrap_or(0);
                if have + 1 < *bound {
                    let highest_needed = *bound - 1;
                    let slot = missing.entry(*actor).or_insert(0);
                    *slot = (*slot).max(highest_needed);
                }
            }
        }
        missing
    }

    fn fields(&self) -> BTreeMap<String, String> {
        self.multivalue
            .iter()
            .filter_map(|(k, entries)| Self::winner(entries).map(|e| (k.clone(), e.value.clone())))
            .collect()
    }

    fn conflicts(&self) -> BTreeMap<String, BTreeMap<ActorId, String>> {
        let mut out = BTreeMap::new();
        for (key, entries) in &self.multivalue {
            if entries.len() < 2 {
                continue;
            }
            let winner = Self::winner(entries).map(|e| (e.actor, e.seq));
            let losers: BTreeMap<ActorId, String> = entries
                .iter()
                .filter(|e| Some((e.actor, e.seq)) != winner)
                .map(|e| (e.actor, e.value.clone()))
                .collect();
            if !losers.is_empty() {
                out.insert(key.clone(), losers);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(byte: u8) -> ActorId {
        ActorId::new([byte; 32])
    }

    #[test]
    fn solo_change_materializes_fields() {
        let alice = actor(0xA1);
        let doc = LwwDoc::init(alice).change(None, |t| {
            t.set("x0y0", "w");
            t.set("x0y1", "w");
            t.set("x1y0", "w");
            t.set("x1y1", "w");
        });
        let fields = doc.fields();
        assert_eq!(fields.get("x0y0").unwrap(), "w");
        assert_eq!(fields.len(), 4);
        assert!(doc.conflicts().is_empty());
    }

    #[test]
    fn idempotent_apply() {
        let alice = actor(0xA1);
        let base = LwwDoc::init(alice);
        let doc = base.change(None, |t| t.set("k", "v"));
        let changes = doc.changes_since(&base);
        let once = base.apply_changes(&changes).unwrap();
        let twice = once.apply_changes(&changes).unwrap();
        assert_eq!(once.fields(), twice.fields());
        assert_eq!(once.vector_clock(), twice.vector_clock());
    }

    #[test]
    fn concurrent_writes_surface_as_conflicts_with_actor_tiebreak() {
        // bob's hex is lexicographically greater than alice's: bob must win ties.
        let alice = ActorId::new([0x11; 32]);
        let bob = ActorId::new([0x99; 32]);
        assert!(bob.to_string() > alice.to_string());

        let base = LwwDoc::init(alice).change(None, |t| t.set("k", "base"));
        let base_for_bob = LwwDoc::init(bob)
            .apply_changes(&base.changes_since(&LwwDoc::init(alice)))
            .unwrap();

        let a = base.change(None, |t| t.set("k", "from-alice"));
        let b = base_for_bob.change(None, |t| t.set("k", "from-bob"));

        let merged_on_a = a.merge(&b);
        let merged_on_b = b.merge(&a);

        assert_eq!(merged_on_a.fields().get("k").unwrap(), "from-bob");
        assert_eq!(merged_on_a.fields(), merged_on_b.fields());
        let conflicts = merged_on_a.conflicts();
        assert_eq!(conflicts.get("k").unwrap().get(&alice).unwrap(), "from-alice");
    }

    #[test]
    fn missing_deps_reported_until_satisfied() {
        let alice = actor(0xA1);
        let bob = actor(0xB2);
        let a1 = LwwDoc::init(alice).change(None, |t| t.set("k", "1"));
        let a2 = a1.change(None, |t| t.set("k", "2"));

        // bob only receives a2's change, never a1's — a2 depends on a1.
        let a2_only_change = a2.changes_since(&a1);
        let mut bobs_doc = LwwDoc::init(bob);
        bobs_doc = bobs_doc.apply_changes(&a2_only_change).unwrap();
        assert!(bobs_doc.fields().get("k").is_none());
        let missing = bobs_doc.missing_deps();
        assert_eq!(missing.get(&alice).copied(), Some(1));

        let a1_change = a1.changes_since(&LwwDoc::init(alice));
        bobs_doc = bobs_doc.apply_changes(&a1_change).unwrap();
        assert!(bobs_doc.missing_deps().is_empty());
        assert_eq!(bobs_doc.fields().get("k").unwrap(), "2");
    }
}
