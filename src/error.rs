use fibermesh_crdt::{ActorId, CrdtError, DocId};
use fibermesh_log::LogError;
use thiserror::Error;

/// Error kinds surfaced by the core (spec §7), plus two cases the component
/// design (§4.1, §4.2) calls out by name but the summary table omits:
/// `MetadataNotFound` (reading block 0 of an empty log) and the transparent
/// wraps of the log/CRDT crates' own errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation called before the initial enumeration completed")]
    NotReady,
    #[error("no cached document for {0}")]
    NotOpened(DocId),
    #[error("tried to write metadata into a non-empty log for actor {0}")]
    MetadataNonEmpty(ActorId),
    #[error("block 0 of actor {actor}'s log is not valid metadata: {reason}")]
    CorruptMetadata { actor: ActorId, reason: String },
    #[error("metadata requested for actor {0} but its log is still empty")]
    MetadataNotFound(ActorId),
    #[error("log transport error: {0}")]
    Transport(#[from] LogError),
    #[error("crdt error: {0}")]
    Crdt(#[from] CrdtError),
}
