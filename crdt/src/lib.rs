//! Identifiers, changes, and the CRDT backend role for `fibermesh`.
//!
//! The CRDT algebra itself — change generation, merge, conflict resolution —
//! is treated as an external collaborator: this crate only fixes the shape
//! of the interface (`CrdtBackend`) the replication engine needs, and
//! bundles one concrete, fully-tested implementation (`LwwDoc`) so the
//! engine and its tests have something real to run against.
mod change;
mod doc;
mod error;
mod id;

pub use change::{Change, Op};
pub use doc::{CrdtBackend, LwwDoc, Transaction};
pub use error::CrdtError;
pub use id::{ActorId, DocId, GroupId, Keypair};
