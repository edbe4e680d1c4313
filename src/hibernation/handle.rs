//! Boundary to the execution engine.
//!
//! The manager never interprets handler state: it snapshots a live handle into bytes plus
//! upgrade metadata before eviction and rebuilds one around the same writer afterwards.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use super::event::HibernatableSocketEvent;
use super::writer::SocketSender;
use crate::core::{
    Attachment, AttachmentError, EngineError, SocketId, SocketMetadata, TransportError,
    deserialize_attachment, serialize_attachment,
};

/// Future returned by [`ExecutionEngine::dispatch`].
pub type EngineFuture = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send>>;

/// Execution-facing view of a socket. Dropped on hibernation, rebuilt on wake-up.
pub trait ExecutionHandle: Clone + Send + Sync + 'static {
    fn attachment(&self) -> Option<Attachment>;

    fn snapshot_for_hibernation(&self) -> SocketMetadata;
}

/// Everything needed to (re)build an execution handle for a socket.
#[derive(Debug)]
pub struct HandleParts {
    pub socket: SocketId,
    pub sender: SocketSender,
    pub attachment: Option<Attachment>,
    pub metadata: SocketMetadata,
}

/// The execution engine, reached through its loopback.
pub trait ExecutionEngine: Send + Sync + Sized + 'static {
    type Handle: ExecutionHandle;

    fn build_handle(&self, parts: HandleParts) -> Self::Handle;

    /// Run the handler for one event. The returned future is driven on its own task.
    fn dispatch(&self, event: HibernatableSocketEvent<Self>) -> EngineFuture;

    fn serialize_attachment(&self, value: &Attachment) -> Result<Bytes, AttachmentError> {
        serialize_attachment(value)
    }

    fn deserialize_attachment(&self, buf: &[u8]) -> Result<Option<Attachment>, AttachmentError> {
        deserialize_attachment(buf)
    }
}

#[derive(Debug)]
struct HandleInner {
    sender: SocketSender,
    attachment: Mutex<Option<Attachment>>,
    metadata: SocketMetadata,
}

/// Ready-made [`ExecutionHandle`] for engines that don't need their own handle type.
#[derive(Clone, Debug)]
pub struct WebSocketHandle {
    inner: Arc<HandleInner>,
}

impl WebSocketHandle {
    pub fn new(parts: HandleParts) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                sender: parts.sender,
                attachment: Mutex::new(parts.attachment),
                metadata: parts.metadata,
            }),
        }
    }

    pub fn socket(&self) -> SocketId {
        self.inner.sender.socket()
    }

    pub fn url(&self) -> Option<&str> {
        self.inner.metadata.url.as_deref()
    }

    pub fn protocol(&self) -> Option<&str> {
        self.inner.metadata.protocol.as_deref()
    }

    pub fn extensions(&self) -> Option<&str> {
        self.inner.metadata.extensions.as_deref()
    }

    /// Pin a value to the socket; it survives hibernation.
    pub fn set_attachment(&self, value: Option<Attachment>) {
        *self
            .inner
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.inner.sender.send_text(text).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        self.inner.sender.send_binary(data).await
    }

    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), TransportError> {
        self.inner.sender.close(code, reason).await
    }

    /// Two handles are the same socket incarnation when they share state.
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ExecutionHandle for WebSocketHandle {
    fn attachment(&self) -> Option<Attachment> {
        self.inner
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn snapshot_for_hibernation(&self) -> SocketMetadata {
        self.inner.metadata.clone()
    }
}
