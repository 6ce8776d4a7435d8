use crate::id::ActorId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single field assignment. The only mutation the bundled CRDT backend
/// understands; kept deliberately minimal since the CRDT algebra itself is
/// an external role (spec §1) and this crate only needs enough of one to
/// exercise the replication engine end to end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Set(String, String),
}

/// One atomic CRDT delta, opaque above this layer except for the authoring
/// actor and the causal dependency vector every loader needs.
///
/// `deps` uses the exclusive-upper-bound convention throughout (spec §3):
/// `deps[a] = n` means this change depends on actor `a`'s blocks `[1, n)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub actor: ActorId,
    pub seq: u64,
    #[serde(default)]
    pub deps: BTreeMap<ActorId, u64>,
    #[serde(default)]
    pub message: Option<String>,
    pub ops: Vec<Op>,
}

impl Change {
    /// The dot this change occupies: `(actor, seq)`.
    pub fn dot(&self) -> (ActorId, u64) {
        (self.actor, self.seq)
    }
}
