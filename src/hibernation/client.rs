use std::sync::Arc;
use std::time::Duration;

use kameo::error::SendError;
use kameo::prelude::{Actor, ActorRef};

use super::handle::ExecutionEngine;
use super::manager::{
    AcceptWebSocket, Accepted, GetActiveOrUnhibernate, GetEventTimeout, GetHibernationStats,
    GetTags, GetWebSockets, HibernateAll, HibernationManager, HibernationManagerArgs,
    SetEventTimeout,
};
use crate::core::{HibernationError, HibernationResult, HibernationStats, SocketId};
use crate::transport::SocketTransport;

fn flatten<T, M>(result: Result<T, SendError<M, HibernationError>>) -> HibernationResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(SendError::HandlerError(err)) => Err(err),
        Err(_) => Err(HibernationError::ManagerUnavailable),
    }
}

/// Typed front door to a [`HibernationManager`].
pub struct HibernationClient<E: ExecutionEngine> {
    actor: ActorRef<HibernationManager<E>>,
}

impl<E: ExecutionEngine> Clone for HibernationClient<E> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
        }
    }
}

impl<E: ExecutionEngine> HibernationClient<E> {
    pub fn new(actor: ActorRef<HibernationManager<E>>) -> Self {
        Self { actor }
    }

    /// Spawn a manager and wrap it.
    pub fn spawn(args: HibernationManagerArgs<E>) -> Self {
        Self::new(HibernationManager::spawn(args))
    }

    /// Spawn a manager with default config around `engine`.
    pub fn with_engine(engine: Arc<E>) -> Self {
        Self::spawn(HibernationManagerArgs::new(engine))
    }

    pub fn actor_ref(&self) -> &ActorRef<HibernationManager<E>> {
        &self.actor
    }

    pub async fn accept_web_socket<T, I, S>(
        &self,
        transport: T,
        tags: I,
    ) -> HibernationResult<Accepted<E::Handle>>
    where
        T: SocketTransport,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(Into::into).collect();
        flatten(self.actor.ask(AcceptWebSocket { transport, tags }).await)
    }

    pub async fn get_web_sockets(&self, tag: Option<&str>) -> HibernationResult<Vec<E::Handle>> {
        flatten(
            self.actor
                .ask(GetWebSockets {
                    tag: tag.map(str::to_string),
                })
                .await,
        )
    }

    pub async fn hibernate_all(&self) -> HibernationResult<usize> {
        flatten(self.actor.ask(HibernateAll).await)
    }

    pub async fn get_active_or_unhibernate(
        &self,
        socket: SocketId,
    ) -> HibernationResult<E::Handle> {
        flatten(self.actor.ask(GetActiveOrUnhibernate { socket }).await)
    }

    pub async fn set_event_timeout(&self, timeout: Option<Duration>) -> HibernationResult<()> {
        flatten(self.actor.ask(SetEventTimeout { timeout }).await)
    }

    pub async fn get_event_timeout(&self) -> HibernationResult<Option<Duration>> {
        flatten(self.actor.ask(GetEventTimeout).await)
    }

    pub async fn get_tags(&self, socket: SocketId) -> HibernationResult<Vec<Arc<str>>> {
        flatten(self.actor.ask(GetTags { socket }).await)
    }

    pub async fn stats(&self) -> HibernationResult<HibernationStats> {
        flatten(self.actor.ask(GetHibernationStats).await)
    }

    /// Stop the manager and wait until every socket has been dropped.
    pub async fn shutdown(&self) {
        let _ = self.actor.stop_gracefully().await;
        self.actor.wait_for_shutdown().await;
    }
}
