use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kameo::error::ActorStopReason;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::HibernationMetricsHook;
use super::handle::{ExecutionEngine, HandleParts};
use super::read_loop::ReadLoop;
use super::socket::HibernatableSocket;
use super::tags::TagIndex;
use super::writer::SocketSender;
use crate::core::{
    Arena, HibernationConfig, HibernationError, HibernationResult, HibernationStats, SocketId,
};
use crate::transport::{SocketTransport, into_boxed_halves};

/// Startup arguments for [`HibernationManager`].
pub struct HibernationManagerArgs<E> {
    pub engine: Arc<E>,
    pub config: HibernationConfig,
    pub metrics: Option<HibernationMetricsHook>,
}

impl<E> HibernationManagerArgs<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            config: HibernationConfig::default(),
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: HibernationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: HibernationMetricsHook) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Owns every hibernatable websocket of one actor instance.
///
/// All registry and tag-index mutation happens inside this actor's mailbox. Read loops run as
/// separate tasks tracked in a `JoinSet`, and reach back in through a weak reference.
pub struct HibernationManager<E: ExecutionEngine> {
    registry: Arena<HibernatableSocket<E::Handle>>,
    tags: TagIndex,
    engine: Arc<E>,
    read_loops: JoinSet<()>,
    event_timeout: watch::Sender<Option<Duration>>,
    config: HibernationConfig,
    metrics: Option<HibernationMetricsHook>,
    actor_ref: WeakActorRef<Self>,
}

impl<E: ExecutionEngine> HibernationManager<E> {
    fn reap_read_loops(&mut self) {
        while let Some(result) = self.read_loops.try_join_next() {
            if let Err(err) = result {
                if err.is_panic() {
                    warn!(error = %err, "websocket read loop panicked");
                }
            }
        }
    }

    fn check_accept(&self, tags: &[String]) -> HibernationResult<()> {
        let limits = self.config.limits;
        if self.registry.len() >= limits.max_sockets {
            return Err(HibernationError::TooManySockets {
                limit: limits.max_sockets,
            });
        }
        if tags.len() > limits.max_tags_per_socket {
            return Err(HibernationError::TooManyTagsForSocket {
                limit: limits.max_tags_per_socket,
                provided: tags.len(),
            });
        }
        if let Some(tag) = tags.iter().find(|t| t.len() > limits.max_tag_bytes) {
            return Err(HibernationError::TagTooLong {
                limit: limits.max_tag_bytes,
                len: tag.len(),
            });
        }
        let missing = self.tags.missing_tags(tags.iter().map(String::as_str));
        if self.tags.len() + missing > limits.max_tags {
            return Err(HibernationError::TooManyTags {
                limit: limits.max_tags,
            });
        }
        Ok(())
    }

    fn active_or_unhibernate(&mut self, socket: SocketId) -> HibernationResult<E::Handle> {
        let entry = self
            .registry
            .get_mut(socket.0)
            .ok_or(HibernationError::UnknownSocket(socket))?;
        let was_hibernating = entry.is_hibernating();
        let handle = entry.get_active_or_unhibernate(socket, &*self.engine)?;
        if was_hibernating {
            debug!(socket = %socket, "websocket unhibernated");
        }
        Ok(handle)
    }

    fn drop_socket(&mut self, socket: SocketId) {
        let Some(entry) = self.registry.remove(socket.0) else {
            return;
        };
        for membership in entry.memberships() {
            self.tags.remove_member(*membership);
        }
        entry.sender().shutdown();
        if let Some(metrics) = &self.metrics {
            metrics.track_socket_dropped(socket);
        }
        debug!(
            socket = %socket,
            close_dispatched = entry.close_dispatched().load(Ordering::SeqCst),
            remaining = self.registry.len(),
            "websocket dropped"
        );
    }
}

impl<E: ExecutionEngine> Actor for HibernationManager<E> {
    type Args = HibernationManagerArgs<E>;
    type Error = HibernationError;

    fn name() -> &'static str {
        "HibernationManager"
    }

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        let (event_timeout, _) = watch::channel(args.config.event_timeout);
        info!(
            max_sockets = args.config.limits.max_sockets,
            max_tags = args.config.limits.max_tags,
            "hibernation manager started"
        );
        Ok(Self {
            registry: Arena::with_capacity(args.config.limits.max_sockets.min(64)),
            tags: TagIndex::new(args.config.limits.max_tags),
            engine: args.engine,
            read_loops: JoinSet::new(),
            event_timeout,
            config: args.config,
            metrics: args.metrics,
            actor_ref: actor_ref.downgrade(),
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        self.read_loops.abort_all();
        let sockets: Vec<SocketId> = self.registry.keys().map(SocketId).collect();
        for socket in sockets {
            self.drop_socket(socket);
        }
        assert!(
            self.registry.is_empty() && self.tags.is_empty(),
            "hibernation manager stopped with live sockets or tags"
        );
        info!(reason = ?reason, "hibernation manager stopped");
        Ok(())
    }
}

/// Result of a successful [`AcceptWebSocket`].
#[derive(Clone, Debug)]
pub struct Accepted<H> {
    pub socket: SocketId,
    pub handle: H,
}

/// Take ownership of an upgraded websocket and start reading from it.
pub struct AcceptWebSocket<T> {
    pub transport: T,
    pub tags: Vec<String>,
}

impl<T> fmt::Debug for AcceptWebSocket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptWebSocket")
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

impl<E, T> KameoMessage<AcceptWebSocket<T>> for HibernationManager<E>
where
    E: ExecutionEngine,
    T: SocketTransport,
{
    type Reply = HibernationResult<Accepted<E::Handle>>;

    async fn handle(
        &mut self,
        msg: AcceptWebSocket<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.reap_read_loops();
        self.check_accept(&msg.tags)?;

        let socket = SocketId(self.registry.next_key());
        let mut memberships = Vec::with_capacity(msg.tags.len());
        let mut tags = Vec::with_capacity(msg.tags.len());
        for tag in &msg.tags {
            match self.tags.join(tag, socket) {
                Ok((membership, shared)) => {
                    memberships.push(membership);
                    tags.push(shared);
                }
                Err(err) => {
                    for membership in memberships {
                        self.tags.remove_member(membership);
                    }
                    return Err(err);
                }
            }
        }

        let (metadata, reader, writer) = into_boxed_halves(msg.transport);
        let sender = SocketSender::spawn(socket, writer);
        let handle = self.engine.build_handle(HandleParts {
            socket,
            sender: sender.clone(),
            attachment: None,
            metadata,
        });
        let close_dispatched = Arc::new(AtomicBool::new(false));
        let key = self.registry.insert(HibernatableSocket::new(
            sender,
            handle.clone(),
            memberships.into_boxed_slice(),
            tags.into_boxed_slice(),
            Arc::clone(&close_dispatched),
        ));
        debug_assert_eq!(key, socket.0);

        self.read_loops.spawn(
            ReadLoop {
                socket,
                reader,
                engine: Arc::clone(&self.engine),
                manager: self.actor_ref.clone(),
                close_dispatched,
                event_timeout: self.event_timeout.subscribe(),
                type_id: self.config.event_type_id,
                metrics: self.metrics.clone(),
            }
            .run(),
        );

        info!(
            socket = %socket,
            tags = ?msg.tags,
            sockets = self.registry.len(),
            "websocket accepted"
        );
        Ok(Accepted { socket, handle })
    }
}

/// Live handles for every socket carrying `tag`, or for all sockets when `tag` is `None`.
///
/// Every matching socket is woken even if one fails to unhibernate; the first failure is
/// returned after the rest have transitioned.
#[derive(Clone, Debug, Default)]
pub struct GetWebSockets {
    pub tag: Option<String>,
}

impl<E: ExecutionEngine> KameoMessage<GetWebSockets> for HibernationManager<E> {
    type Reply = HibernationResult<Vec<E::Handle>>;

    async fn handle(
        &mut self,
        msg: GetWebSockets,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let sockets: Vec<SocketId> = match msg.tag.as_deref() {
            Some(tag) => match self.tags.lookup(tag) {
                Some(bucket) => self.tags.members(bucket).collect(),
                None => return Ok(Vec::new()),
            },
            None => self.registry.keys().map(SocketId).collect(),
        };
        let mut handles = Vec::with_capacity(sockets.len());
        let mut failure = None;
        for socket in sockets {
            match self.active_or_unhibernate(socket) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    warn!(socket = %socket, error = %err, "websocket failed to unhibernate");
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(handles),
        }
    }
}

/// Move every active socket into hibernation. Replies with how many transitioned.
#[derive(Clone, Copy, Debug, Default)]
pub struct HibernateAll;

impl<E: ExecutionEngine> KameoMessage<HibernateAll> for HibernationManager<E> {
    type Reply = HibernationResult<usize>;

    async fn handle(
        &mut self,
        _msg: HibernateAll,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let mut hibernated = 0;
        for (key, entry) in self.registry.iter_mut() {
            match entry.hibernate(&*self.engine) {
                Ok(true) => hibernated += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        socket = %SocketId(key),
                        error = %err,
                        "websocket stays active, attachment did not serialize"
                    );
                }
            }
        }
        info!(hibernated, sockets = self.registry.len(), "websockets hibernated");
        Ok(hibernated)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GetActiveOrUnhibernate {
    pub socket: SocketId,
}

impl<E: ExecutionEngine> KameoMessage<GetActiveOrUnhibernate> for HibernationManager<E> {
    type Reply = HibernationResult<E::Handle>;

    async fn handle(
        &mut self,
        msg: GetActiveOrUnhibernate,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.active_or_unhibernate(msg.socket)
    }
}

/// Sent by a read loop once its socket is done.
#[derive(Clone, Copy, Debug)]
pub struct DropSocket {
    pub(crate) socket: SocketId,
}

impl<E: ExecutionEngine> KameoMessage<DropSocket> for HibernationManager<E> {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: DropSocket,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.drop_socket(msg.socket);
        self.reap_read_loops();
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SetEventTimeout {
    pub timeout: Option<Duration>,
}

impl<E: ExecutionEngine> KameoMessage<SetEventTimeout> for HibernationManager<E> {
    type Reply = HibernationResult<()>;

    async fn handle(
        &mut self,
        msg: SetEventTimeout,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.config.event_timeout = msg.timeout;
        self.event_timeout.send_replace(msg.timeout);
        debug!(timeout = ?msg.timeout, "websocket event timeout updated");
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GetEventTimeout;

impl<E: ExecutionEngine> KameoMessage<GetEventTimeout> for HibernationManager<E> {
    type Reply = HibernationResult<Option<Duration>>;

    async fn handle(
        &mut self,
        _msg: GetEventTimeout,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(*self.event_timeout.borrow())
    }
}

/// Creation-time tags of a socket.
#[derive(Clone, Copy, Debug)]
pub struct GetTags {
    pub socket: SocketId,
}

impl<E: ExecutionEngine> KameoMessage<GetTags> for HibernationManager<E> {
    type Reply = HibernationResult<Vec<Arc<str>>>;

    async fn handle(&mut self, msg: GetTags, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.registry
            .get(msg.socket.0)
            .map(|entry| entry.tags().to_vec())
            .ok_or(HibernationError::UnknownSocket(msg.socket))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GetHibernationStats;

impl<E: ExecutionEngine> KameoMessage<GetHibernationStats> for HibernationManager<E> {
    type Reply = HibernationResult<HibernationStats>;

    async fn handle(
        &mut self,
        _msg: GetHibernationStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(HibernationStats {
            sockets: self.registry.len(),
            hibernating: self
                .registry
                .iter()
                .filter(|(_, entry)| entry.is_hibernating())
                .count(),
            tags: self.tags.len(),
        })
    }
}
