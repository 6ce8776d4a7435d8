use crate::protocol::{ExtensionMessage, PROTOCOL_NAME};
use async_trait::async_trait;
use fibermesh_crdt::ActorId;
use fnv::FnvHashMap;
use futures::io::{AsyncRead, AsyncWrite};
use futures::prelude::*;
use libp2p::mdns::{Mdns, MdnsConfig, MdnsEvent};
use libp2p::request_response::{
    ProtocolName, ProtocolSupport, RequestResponse, RequestResponseCodec, RequestResponseConfig,
    RequestResponseEvent, RequestResponseMessage,
};
use libp2p::swarm::NetworkBehaviourEventProcess;
use libp2p::NetworkBehaviour;
use libp2p::PeerId;
use std::collections::VecDeque;
use std::io;

#[derive(Clone, Default)]
pub struct ExtensionProtocol;

impl ProtocolName for ExtensionProtocol {
    fn protocol_name(&self) -> &[u8] {
        PROTOCOL_NAME
    }
}

/// Codec for the `hypermerge` extension channel. No response payload is
/// meaningful for a push protocol like FEEDS_SHARED, so the response side
/// just carries an empty acknowledgement.
#[derive(Clone, Default)]
pub struct ExtensionCodec;

#[async_trait]
impl RequestResponseCodec for ExtensionCodec {
    type Protocol = ExtensionProtocol;
    type Request = Vec<u8>;
    type Response = ();

    async fn read_request<T>(&mut self, _: &ExtensionProtocol, io: &mut T) -> io::Result<Vec<u8>>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut buf = Vec::new();
        io.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn read_response<T>(&mut self, _: &ExtensionProtocol, _: &mut T) -> io::Result<()>
    where
        T: AsyncRead + Unpin + Send,
    {
        Ok(())
    }

    async fn write_request<T>(
        &mut self,
        _: &ExtensionProtocol,
        io: &mut T,
        req: Vec<u8>,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.write_all(&req).await?;
        io.close().await
    }

    async fn write_response<T>(
        &mut self,
        _: &ExtensionProtocol,
        io: &mut T,
        _: (),
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.close().await
    }
}

/// Events the causal loader cares about, surfaced out of the swarm layer.
/// Mirrors `peer:joined`/`peer:left`/`peer:extension` from spec §4.6-4.7:
/// joined/left fire per *feed* attachment, not per raw connection, since a
/// single libp2p connection can carry FEEDS_SHARED for several of our own
/// root logs.
pub enum BehaviourOutEvent {
    PeerJoined(ActorId, PeerId),
    Extension(ExtensionMessage, PeerId),
    UnknownPayload(PeerId, Vec<u8>),
}

/// Wraps a request-response channel for the `hypermerge` extension plus
/// mdns peer discovery, grounded in the teacher's `sync::Behaviour`
/// (`RequestResponse<SyncCodec>` + injected events) but carrying JSON
/// extension payloads instead of rkyv sync requests, and mdns in place of
/// the teacher's `libp2p_broadcast` topic gossip since there is no longer a
/// per-discovery-key swarm to join.
#[derive(NetworkBehaviour)]
pub struct Behaviour {
    ext: RequestResponse<ExtensionCodec>,
    mdns: Mdns,
    #[behaviour(ignore)]
    out: VecDeque<BehaviourOutEvent>,
    #[behaviour(ignore)]
    joined: FnvHashMap<PeerId, Vec<ActorId>>,
}

impl Behaviour {
    pub async fn new() -> io::Result<Self> {
        Ok(Self {
            ext: RequestResponse::new(
                ExtensionCodec::default(),
                vec![(ExtensionProtocol, ProtocolSupport::Full)],
                RequestResponseConfig::default(),
            ),
            mdns: Mdns::new(MdnsConfig::default()).await?,
            out: VecDeque::new(),
            joined: FnvHashMap::default(),
        })
    }

    pub fn next_event(&mut self) -> Option<BehaviourOutEvent> {
        self.out.pop_front()
    }

    /// Announces that `actor` (one of our own writable root logs) attaches
    /// to `peer`, sending FEEDS_SHARED for the rest of its group (spec
    /// §4.6: "if the log's actor is a docId, send FEEDS_SHARED... and emit
    /// peer:joined").
    pub fn announce_feed(&mut self, peer: PeerId, actor: ActorId, group_members: Vec<ActorId>) {
        let msg = ExtensionMessage::feeds_shared(group_members);
        self.ext.send_request(&peer, msg.encode());
        self.joined.entry(peer).or_default().push(actor);
        self.out.push_back(BehaviourOutEvent::PeerJoined(actor, peer));
    }

    pub fn send_extension(&mut self, peer: &PeerId, msg: &ExtensionMessage) {
        self.ext.send_request(peer, msg.encode());
    }

    /// Drops and returns the actors this peer was joined for, so the caller
    /// can emit `peer:left` for each when the connection closes.
    pub fn take_joined(&mut self, peer: &PeerId) -> Vec<ActorId> {
        self.joined.remove(peer).unwrap_or_default()
    }
}

impl NetworkBehaviourEventProcess<RequestResponseEvent<Vec<u8>, ()>> for Behaviour {
    fn inject_event(&mut self, event: RequestResponseEvent<Vec<u8>, ()>) {
        if let RequestResponseEvent::Message { peer, message } = event {
            if let RequestResponseMessage::Request {
                request, channel, ..
            } = message
            {
                self.ext.send_response(channel, ()).ok();
                match ExtensionMessage::decode(&request) {
                    Ok(msg) => {
                        self.out.push_back(BehaviourOutEvent::Extension(msg, peer));
                    }
                    Err(err) => {
                        tracing::warn!(%peer, %err, "unrecognized hypermerge payload");
                        self.out.push_back(BehaviourOutEvent::UnknownPayload(peer, request));
                    }
                }
            }
        }
    }
}

impl NetworkBehaviourEventProcess<MdnsEvent> for Behaviour {
    fn inject_event(&mut self, event: MdnsEvent) {
        if let MdnsEvent::Discovered(peers) = event {
            for (peer, addr) in peers {
                self.ext.add_address(&peer, addr);
            }
        }
    }
}
