use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::Event;
use crate::swarm::{Behaviour, BehaviourOutEvent};
use crate::transport;
use anyhow::Result;
use fibermesh_crdt::{ActorId, CrdtBackend, DocId, Transaction};
use fibermesh_log::LogTransport;
use futures::channel::{mpsc, oneshot};
use futures::stream::StreamExt;
use libp2p::swarm::SwarmEvent;
use libp2p::{Multiaddr, Swarm};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Installs the tracing subscriber and panic hook, mirroring the teacher's
/// `Migrate::new` (`src/lib.rs`): one call, made once per process, before
/// any `Orchestrator` is built.
pub fn init_logging() {
    tracing_log::LogTracer::init().ok();
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_span_events(FmtSpan::ACTIVE | FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_panics::init();
}

type Mutator = Box<dyn FnOnce(&mut Transaction) + Send + 'static>;

enum Command<D> {
    Create(oneshot::Sender<Result<DocId, EngineError>>),
    Open(DocId, oneshot::Sender<Result<(), EngineError>>),
    Find(DocId, oneshot::Sender<Result<D, EngineError>>),
    Change(DocId, Option<String>, Mutator, oneshot::Sender<Result<D, EngineError>>),
    Merge(DocId, DocId, oneshot::Sender<Result<D, EngineError>>),
    Fork(DocId, oneshot::Sender<Result<(DocId, D), EngineError>>),
    Delete(DocId),
    Subscribe(oneshot::Sender<mpsc::UnboundedReceiver<Event>>),
}

/// The public face of the engine (spec §4.5, §4.7). All mutation happens on
/// one spawned task reached through this unbounded channel — the "single
/// mailbox" the concurrency model in spec §5 calls for — grounded in the
/// teacher's `Sdk`/`Command` pattern (`src/lib.rs`).
pub struct Orchestrator<D> {
    commands: mpsc::UnboundedSender<Command<D>>,
}

impl<D: CrdtBackend> Orchestrator<D> {
    /// `listen_addr` is the only genuine runtime configuration knob (spec
    /// §4's concurrency/resource model has no other caller-visible option);
    /// the document backend itself is chosen at compile time via `D`.
    pub async fn new<T: LogTransport + 'static>(transport: Arc<T>, listen_addr: Multiaddr) -> Result<Self> {
        let identity = libp2p::identity::Keypair::generate_ed25519();
        let peer_id = libp2p::PeerId::from(identity.public());
        let transport_io = transport::build(identity)?;
        let behaviour = Behaviour::new().await?;
        let mut swarm = Swarm::new(transport_io, behaviour, peer_id);
        swarm.listen_on(listen_addr)?;

        let mut engine = Engine::<T, D>::new(transport);
        let (initial_events, _actions) = engine.enumerate().await?;

        let (tx, mut rx) = mpsc::unbounded::<Command<D>>();
        let mut subscribers: Vec<mpsc::UnboundedSender<Event>> = Vec::new();
        let mut advertised_roots: Vec<ActorId> = initial_events
            .iter()
            .filter_map(|ev| match ev {
                Event::DocumentReady(doc) => Some(*doc),
                _ => None,
            })
            .collect();

        async_global_executor::spawn::<_, ()>(async move {
            loop {
                futures::select! {
                    cmd = rx.next() => {
                        let cmd = match cmd {
                            Some(cmd) => cmd,
                            None => break,
                        };
                        if let Command::Subscribe(reply) = cmd {
                            let (sub_tx, sub_rx) = mpsc::unbounded();
                            subscribers.push(sub_tx);
                            reply.send(sub_rx).ok();
                            continue;
                        }
                        let (events, new_root) = handle_command(&mut engine, cmd).await;
                        if let Some(root) = new_root {
                            advertised_roots.push(root);
                        }
                        dispatch(&mut subscribers, events);
                    }
                    event = swarm.select_next_some() => {
                        let events = match event {
                            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                                for actor in &advertised_roots {
                                    let group = engine
                                        .metadata()
                                        .get(actor)
                                        .map(|m| m.group_id)
                                        .unwrap_or(*actor);
                                    let members = engine.group_members(&group);
                                    swarm.behaviour_mut().announce_feed(peer_id, *actor, members);
                                }
                                Vec::new()
                            }
                            SwarmEvent::ConnectionClosed { peer_id, .. } => swarm
                                .behaviour_mut()
                                .take_joined(&peer_id)
                                .into_iter()
                                .map(|actor| Event::PeerLeft(actor, peer_id))
                                .collect(),
                            other => {
                                tracing::trace!(?other, "swarm event");
                                Vec::new()
                            }
                        };
                        dispatch(&mut subscribers, events);
                    }
                }
                while let Some(out_event) = swarm.behaviour_mut().next_event() {
                    let events = handle_behaviour_event(&mut engine, out_event).await;
                    dispatch(&mut subscribers, events);
                }
            }
        })
        .detach();

        Ok(Self { commands: tx })
    }

    pub async fn create(&self) -> Result<DocId, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands.unbounded_send(Command::Create(tx)).ok();
        rx.await.unwrap_or(Err(EngineError::NotReady))
    }

    pub async fn open(&self, doc: DocId) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands.unbounded_send(Command::Open(doc, tx)).ok();
        rx.await.unwrap_or(Err(EngineError::NotReady))
    }

    pub async fn find(&self, doc: DocId) -> Result<D, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands.unbounded_send(Command::Find(doc, tx)).ok();
        rx.await.unwrap_or(Err(EngineError::NotReady))
    }

    pub async fn change<F>(&self, doc: DocId, message: Option<String>, f: F) -> Result<D, EngineError>
    where
        F: FnOnce(&mut Transaction) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.commands
            .unbounded_send(Command::Change(doc, message, Box::new(f), tx))
            .ok();
        rx.await.unwrap_or(Err(EngineError::NotReady))
    }

    pub async fn merge(&self, dest: DocId, source: DocId) -> Result<D, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands.unbounded_send(Command::Merge(dest, source, tx)).ok();
        rx.await.unwrap_or(Err(EngineError::NotReady))
    }

    pub async fn fork(&self, parent: DocId) -> Result<(DocId, D), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands.unbounded_send(Command::Fork(parent, tx)).ok();
        rx.await.unwrap_or(Err(EngineError::NotReady))
    }

    pub fn delete(&self, doc: DocId) {
        self.commands.unbounded_send(Command::Delete(doc)).ok();
    }

    /// Subscribes to the lifecycle event stream (spec §4.7). Each call
    /// opens a new independent channel; events emitted before any
    /// subscriber exists are not buffered.
    pub async fn events(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = oneshot::channel();
        self.commands.unbounded_send(Command::Subscribe(tx)).ok();
        rx.await.unwrap_or_else(|_| mpsc::unbounded().1)
    }
}

fn dispatch(subscribers: &mut Vec<mpsc::UnboundedSender<Event>>, events: Vec<Event>) {
    if events.is_empty() {
        return;
    }
    subscribers.retain(|tx| !tx.is_closed());
    for event in events {
        for tx in subscribers.iter() {
            tx.unbounded_send(event.clone()).ok();
        }
    }
}

async fn handle_command<T: LogTransport, D: CrdtBackend>(
    engine: &mut Engine<T, D>,
    cmd: Command<D>,
) -> (Vec<Event>, Option<DocId>) {
    match cmd {
        Command::Create(reply) => match engine.create().await {
            Ok((doc, events, _actions)) => {
                reply.send(Ok(doc)).ok();
                (events, Some(doc))
            }
            Err(err) => {
                reply.send(Err(err)).ok();
                (Vec::new(), None)
            }
        },
        Command::Open(doc, reply) => match engine.open(doc).await {
            Ok((events, _actions)) => {
                reply.send(Ok(())).ok();
                (events, None)
            }
            Err(err) => {
                reply.send(Err(err)).ok();
                (Vec::new(), None)
            }
        },
        Command::Find(doc, reply) => {
            reply.send(engine.find(&doc)).ok();
            (Vec::new(), None)
        }
        Command::Change(doc, message, f, reply) => match engine.change(doc, message, f).await {
            Ok((value, events)) => {
                reply.send(Ok(value)).ok();
                (events, None)
            }
            Err(err) => {
                reply.send(Err(err)).ok();
                (Vec::new(), None)
            }
        },
        Command::Merge(dest, source, reply) => match engine.merge(dest, source).await {
            Ok((value, events)) => {
                reply.send(Ok(value)).ok();
                (events, None)
            }
            Err(err) => {
                reply.send(Err(err)).ok();
                (Vec::new(), None)
            }
        },
        Command::Fork(parent, reply) => match engine.fork(parent).await {
            Ok((doc, value, events, _actions)) => {
                reply.send(Ok((doc, value))).ok();
                (events, Some(doc))
            }
            Err(err) => {
                reply.send(Err(err)).ok();
                (Vec::new(), None)
            }
        },
        Command::Delete(doc) => {
            engine.delete(doc);
            (Vec::new(), None)
        }
        Command::Subscribe(_) => unreachable!("Subscribe is intercepted before handle_command"),
    }
}

async fn handle_behaviour_event<T: LogTransport, D: CrdtBackend>(
    engine: &mut Engine<T, D>,
    event: BehaviourOutEvent,
) -> Vec<Event> {
    match event {
        BehaviourOutEvent::PeerJoined(actor, peer) => vec![Event::PeerJoined(actor, peer)],
        BehaviourOutEvent::Extension(msg, peer) => match engine.on_feeds_shared(msg.actor_ids()).await {
            Ok((events, _actions)) => events,
            Err(err) => {
                tracing::warn!(%peer, %err, "failed to process FEEDS_SHARED");
                Vec::new()
            }
        },
        BehaviourOutEvent::UnknownPayload(peer, _bytes) => {
            tracing::warn!(%peer, "dropped unrecognized hypermerge payload");
            Vec::new()
        }
    }
}
