use std::fmt;

use bytes::Bytes;
use kameo::actor::WeakActorRef;

use super::client::HibernationClient;
use super::handle::ExecutionEngine;
use super::manager::HibernationManager;
use crate::core::{HibernationError, HibernationResult, SocketId, TransportError};

/// Payload of a dispatched socket event.
#[derive(Clone, Debug, PartialEq)]
pub enum EventParams {
    Text(String),
    Binary(Bytes),
    Close {
        code: u16,
        reason: String,
        was_clean: bool,
    },
    Error(TransportError),
}

impl EventParams {
    pub fn is_close(&self) -> bool {
        matches!(self, EventParams::Close { .. })
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EventParams::Text(_) => "text",
            EventParams::Binary(_) => "binary",
            EventParams::Close { .. } => "close",
            EventParams::Error(_) => "error",
        }
    }
}

/// How a single dispatch settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    Ok,
    /// Handler failed, panicked or timed out.
    Exception,
}

/// Custom event delivered to the execution engine for one socket frame.
pub struct HibernatableSocketEvent<E: ExecutionEngine> {
    type_id: u16,
    socket: SocketId,
    params: EventParams,
    manager: WeakActorRef<HibernationManager<E>>,
}

impl<E: ExecutionEngine> fmt::Debug for HibernatableSocketEvent<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HibernatableSocketEvent")
            .field("type_id", &self.type_id)
            .field("socket", &self.socket)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutionEngine> HibernatableSocketEvent<E> {
    pub(crate) fn new(
        type_id: u16,
        socket: SocketId,
        params: EventParams,
        manager: WeakActorRef<HibernationManager<E>>,
    ) -> Self {
        Self {
            type_id,
            socket,
            params,
            manager,
        }
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub fn socket(&self) -> SocketId {
        self.socket
    }

    pub fn params(&self) -> &EventParams {
        &self.params
    }

    pub fn into_params(self) -> EventParams {
        self.params
    }

    /// Live handle of the socket this event was raised for, waking it if it hibernated
    /// since the frame arrived.
    pub async fn web_socket(&self) -> HibernationResult<E::Handle> {
        let manager = self
            .manager
            .upgrade()
            .ok_or(HibernationError::ManagerUnavailable)?;
        HibernationClient::new(manager)
            .get_active_or_unhibernate(self.socket)
            .await
    }
}
