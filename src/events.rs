use fibermesh_crdt::{ActorId, DocId};
use serde_json::Value;

/// A peer connection, named by the libp2p identity behind it. Kept as a
/// small opaque handle here; the swarm layer is the only place that needs
/// to resolve it to an actual connection.
pub type PeerHandle = libp2p::PeerId;

/// Lifecycle events observable from outside the engine (spec §4.7).
/// Components never emit directly: each operation returns the events it
/// produced and the orchestrator dispatches them to subscribers, keeping
/// ordering explicit (spec §9, "Event emission as cross-cutting concern").
#[derive(Debug, Clone)]
pub enum Event {
    /// The registry has enumerated all on-disk logs and is open for
    /// operations.
    Ready,
    /// One log finished its initial handshake.
    FeedReady(ActorId),
    /// `docId` reached the no-missing-deps state for the first time.
    DocumentReady(DocId),
    /// A previously-ready document has new state.
    DocumentUpdated(DocId),
    PeerJoined(ActorId, PeerHandle),
    PeerLeft(ActorId, PeerHandle),
    PeerMessage(ActorId, PeerHandle, Value),
    PeerExtension(ActorId, String, Vec<u8>, PeerHandle),
}
