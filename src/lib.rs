//! `fibermesh`: a peer-to-peer replication engine for multi-writer CRDT
//! documents (see `SPEC_FULL.md`). A document is composed of one or more
//! per-writer append-only logs; this crate owns log registration, the
//! causal block loader, and the `hypermerge` peer extension protocol, and
//! is generic over both the log transport (`fibermesh_log::LogTransport`)
//! and the CRDT algebra (`fibermesh_crdt::CrdtBackend`).

mod cache;
mod engine;
mod error;
mod events;
mod metadata;
mod orchestrator;
mod protocol;
mod registry;
mod swarm;
mod tracker;
mod transport;

pub use engine::Engine;
pub use error::EngineError;
pub use events::{Event, PeerHandle};
pub use metadata::{Metadata, MetadataStore};
pub use orchestrator::{init_logging, Orchestrator};
pub use protocol::{ExtensionMessage, EXTENSION_NAME};
pub use registry::SwarmAction;

pub use fibermesh_crdt::{ActorId, Change, CrdtBackend, DocId, GroupId, Keypair, LwwDoc, Op, Transaction};
pub use fibermesh_log::{DiscoveryKey, Log, LogError, LogTransport, MemoryLog, MemoryLogTransport, SledLog, SledLogTransport};
pub use libp2p::Multiaddr;
