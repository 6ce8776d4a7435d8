//! Append-only per-actor block logs (spec §6.1 "Log transport capability
//! set"), the other role this system treats as external. Two
//! implementations are bundled: an in-memory one for tests, and a
//! `sled`-backed one for durable storage, grounded in the teacher's use of
//! `sled` for its own on-disk state (`src/secrets.rs`, `src/store.rs`).
mod error;
mod memory;
mod sled_log;
mod transport;

pub use error::LogError;
pub use memory::{MemoryLog, MemoryLogTransport};
pub use sled_log::{SledLog, SledLogTransport};
pub use transport::{discovery_key, DiscoveryKey, Log, LogTransport};

#[cfg(test)]
mod tests {
    use super::*;
    use fibermesh_crdt::ActorId;

    async fn roundtrip<T: LogTransport>(transport: T) {
        let log = transport.create_or_open(None).await.unwrap();
        assert!(log.is_writable());
        assert_eq!(log.len().await.unwrap(), 0);

        log.append(vec![b"block0".to_vec()]).await.unwrap();
        let len = log.append(vec![b"block1".to_vec(), b"block2".to_vec()]).await.unwrap();
        assert_eq!(len, 3);
        assert_eq!(log.get(0).await.unwrap(), b"block0");
        assert_eq!(log.get(2).await.unwrap(), b"block2");
        assert!(log.get(3).await.is_err());

        let reopened = transport.create_or_open(Some(log.actor_id())).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 3);
        assert!(reopened.is_writable());
    }

    #[async_std::test]
    async fn memory_roundtrip() {
        roundtrip(MemoryLogTransport::new()).await;
    }

    #[async_std::test]
    async fn sled_roundtrip() {
        roundtrip(SledLogTransport::memory().unwrap()).await;
    }

    #[async_std::test]
    async fn opening_unknown_key_creates_empty_unwritable_log() {
        let transport = MemoryLogTransport::new();
        let unknown = ActorId::new([0x42; 32]);
        let log = transport.create_or_open(Some(unknown)).await.unwrap();
        assert!(!log.is_writable());
        assert_eq!(log.len().await.unwrap(), 0);
        assert!(log.append(vec![vec![1]]).await.is_err());
    }

    #[async_std::test]
    async fn discovery_key_is_stable_and_actor_specific() {
        let a = ActorId::new([1; 32]);
        let b = ActorId::new([2; 32]);
        assert_eq!(discovery_key(&a), discovery_key(&a));
        assert_ne!(discovery_key(&a), discovery_key(&b));
    }
}
