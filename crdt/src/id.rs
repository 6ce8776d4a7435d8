use ed25519_dalek::{PublicKey, SecretKey, Signer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-byte public key naming one writer's append-only log.
///
/// [`DocId`] and [`GroupId`] are the same shape: a document is named by the
/// `ActorId` of its root log, and a group is named by the `ActorId` of the
/// document it was first forked from.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId([u8; 32]);

/// A document is named by the `ActorId` of its root log.
pub type DocId = ActorId;
/// A group is named by the `ActorId` of the document it descends from.
pub type GroupId = ActorId;

impl ActorId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for ActorId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<ActorId> for [u8; 32] {
    fn from(id: ActorId) -> Self {
        id.0
    }
}

/// 64-char lowercase hex, per the data model's identifier convention.
impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorId({}…)", &hex::encode(&self.0[..4]))
    }
}

impl FromStr for ActorId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            anyhow::bail!("invalid actor id length {} (want 64 hex chars)", s.len());
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// An ed25519 keypair, the authority behind one writable log.
#[derive(Clone, Copy)]
pub struct Keypair([u8; 32]);

impl Keypair {
    /// Generates a fresh keypair. Every fork and every `create` allocates one
    /// of these; none are ever reused (spec §9: forks always get a fresh key).
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        getrandom::getrandom(&mut secret).expect("system rng");
        Self(secret)
    }

    fn to_dalek(self) -> ed25519_dalek::Keypair {
        let secret = SecretKey::from_bytes(&self.0).expect("32 bytes is a valid ed25519 seed");
        let public = PublicKey::from(&secret);
        ed25519_dalek::Keypair { secret, public }
    }

    pub fn actor_id(&self) -> ActorId {
        ActorId(self.to_dalek().public.to_bytes())
    }

    pub fn sign(&self, payload: &[u8]) -> [u8; 64] {
        self.to_dalek().sign(payload).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let id = Keypair::generate().actor_id();
        let s = id.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(s.parse::<ActorId>().unwrap(), id);
    }

    #[test]
    fn rejects_bad_length() {
        assert!("deadbeef".parse::<ActorId>().is_err());
    }
}
