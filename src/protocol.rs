use fibermesh_crdt::ActorId;
use serde::{Deserialize, Serialize};

/// Named extension channel identifier (spec §4.6, §6.3).
pub const EXTENSION_NAME: &str = "hypermerge";

/// The libp2p protocol string the extension channel rides on.
pub const PROTOCOL_NAME: &[u8] = b"/fibermesh/hypermerge/1.0.0";

/// Payloads are UTF-8 JSON objects tagged by `type` (spec §6.3). Today
/// there is exactly one variant; unknown shapes are rejected rather than
/// defaulted, per the design notes' "strict tagged-variant decoder".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtensionMessage {
    #[serde(rename = "FEEDS_SHARED")]
    FeedsShared { keys: Vec<String> },
}

impl ExtensionMessage {
    pub fn feeds_shared(keys: impl IntoIterator<Item = ActorId>) -> Self {
        Self::FeedsShared {
            keys: keys.into_iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ExtensionMessage always serializes")
    }

    /// Strict decode: any byte string that isn't exactly one of the known
    /// tagged variants is an error, not a best-effort default.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Actor ids named by this message, already parsed and de-duplicated;
    /// malformed hex strings are dropped rather than failing the whole
    /// message, since a single bad key shouldn't block the rest.
    pub fn actor_ids(&self) -> Vec<ActorId> {
        match self {
            Self::FeedsShared { keys } => keys
                .iter()
                .filter_map(|k| k.parse().ok())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_feeds_shared() {
        let a = ActorId::new([0x11; 32]);
        let msg = ExtensionMessage::feeds_shared([a]);
        let bytes = msg.encode();
        assert!(std::str::from_utf8(&bytes).unwrap().contains("FEEDS_SHARED"));
        let decoded = ExtensionMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.actor_ids(), vec![a]);
    }

    #[test]
    fn rejects_unknown_shape() {
        assert!(ExtensionMessage::decode(br#"{"type":"NOPE"}"#).is_err());
        assert!(ExtensionMessage::decode(b"not json").is_err());
    }
}
