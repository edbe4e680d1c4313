//! Reusable test utilities for exercising the hibernation manager without a real socket.
//!
//! [`MockTransport::channel_pair`] yields a transport for the manager plus a [`MockPeer`] that
//! plays the remote end: it pushes inbound frames, injects read failures, drops the socket and
//! receives whatever the handlers wrote. [`RecordingEngine`] is an execution engine that
//! records every dispatched event.

use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, Stream};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::{
    Attachment, AttachmentError, EngineError, SocketId, SocketMetadata, TransportError, WsFrame,
    deserialize_attachment, serialize_attachment,
};
use crate::hibernation::{
    EngineFuture, EventParams, ExecutionEngine, HandleParts, HibernatableSocketEvent,
    WebSocketHandle,
};
use crate::transport::SocketTransport;

type Inbound = Result<WsFrame, TransportError>;

/// In-memory transport backed by unbounded channels.
pub struct MockTransport {
    metadata: SocketMetadata,
    reader: MockReader,
    writer: MockWriter,
}

impl MockTransport {
    /// Build a transport + remote peer pair.
    pub fn channel_pair() -> (Self, MockPeer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Inbound>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<WsFrame>();
        (
            Self {
                metadata: SocketMetadata::default(),
                reader: MockReader { rx: inbound_rx },
                writer: MockWriter {
                    tx: outbound_tx,
                    stalled: false,
                },
            },
            MockPeer {
                inbound_tx: Some(inbound_tx),
                outbound_rx,
            },
        )
    }

    /// Pretend the upgrade negotiated `metadata`.
    pub fn with_metadata(mut self, metadata: SocketMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Make the writer never ready, like a peer that stopped reading.
    pub fn stall_writes(mut self) -> Self {
        self.writer.stalled = true;
        self
    }
}

impl SocketTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn metadata(&self) -> SocketMetadata {
        self.metadata.clone()
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

/// Error surface for operations on [`MockPeer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum MockPeerError {
    #[error("mock socket already dropped")]
    SocketDropped,
    #[error("mock read loop is no longer receiving")]
    ChannelClosed,
}

/// Remote end of a [`MockTransport`].
pub struct MockPeer {
    inbound_tx: Option<mpsc::UnboundedSender<Inbound>>,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl MockPeer {
    fn push(&self, item: Inbound) -> Result<(), MockPeerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockPeerError::SocketDropped);
        };
        tx.send(item).map_err(|_| MockPeerError::ChannelClosed)
    }

    pub fn send_frame(&self, frame: WsFrame) -> Result<(), MockPeerError> {
        self.push(Ok(frame))
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockPeerError> {
        self.send_frame(WsFrame::text(text))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), MockPeerError> {
        self.send_frame(WsFrame::binary(data))
    }

    pub fn send_close(&self, code: u16, reason: impl Into<String>) -> Result<(), MockPeerError> {
        self.send_frame(WsFrame::close(code, reason))
    }

    /// Make the next read fail with `err`.
    pub fn fail(&self, err: TransportError) -> Result<(), MockPeerError> {
        self.push(Err(err))
    }

    /// Drop the connection without a close frame; the reader ends cleanly.
    pub fn disconnect(&mut self) {
        self.inbound_tx = None;
    }

    /// Receive a frame written by a handler.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl Stream for MockReader {
    type Item = Inbound;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    tx: mpsc::UnboundedSender<WsFrame>,
    stalled: bool,
}

impl Sink<WsFrame> for MockWriter {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.stalled {
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .tx
            .send(item)
            .map_err(|_| TransportError::disconnected("mock_transport_write", "peer dropped"))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// One event as seen by [`RecordingEngine`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub type_id: u16,
    pub socket: SocketId,
    pub params: EventParams,
}

/// Receiving end of a [`RecordingEngine`].
pub struct RecordedEvents {
    rx: mpsc::UnboundedReceiver<RecordedEvent>,
}

impl RecordedEvents {
    pub async fn recv(&mut self) -> Option<RecordedEvent> {
        self.rx.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<RecordedEvent> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .unwrap_or_default()
    }

    pub fn try_recv(&mut self) -> Option<RecordedEvent> {
        self.rx.try_recv().ok()
    }
}

#[derive(Clone, Debug, Default)]
struct Behavior {
    delay: Option<Duration>,
    failure: Option<EngineError>,
    echo_text: bool,
    unserializable: Option<Attachment>,
    unrestorable: Option<Attachment>,
}

/// Execution engine that records events and optionally misbehaves.
///
/// Events are recorded when dispatch starts, so a timed-out dispatch is still observed.
pub struct RecordingEngine {
    events: mpsc::UnboundedSender<RecordedEvent>,
    behavior: Mutex<Behavior>,
}

impl RecordingEngine {
    pub fn new() -> (Self, RecordedEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                events: tx,
                behavior: Mutex::new(Behavior::default()),
            },
            RecordedEvents { rx },
        )
    }

    fn behavior(&self) -> std::sync::MutexGuard<'_, Behavior> {
        self.behavior.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep this long inside every dispatch.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.behavior().delay = delay;
    }

    /// Fail every dispatch with `failure`.
    pub fn set_failure(&self, failure: Option<EngineError>) {
        self.behavior().failure = failure;
    }

    /// Send every text message back through the socket's live handle.
    pub fn set_echo_text(&self, echo: bool) {
        self.behavior().echo_text = echo;
    }

    /// Refuse to serialize attachments equal to `value`.
    pub fn set_unserializable(&self, value: Option<Attachment>) {
        self.behavior().unserializable = value;
    }

    /// Refuse to restore hibernated attachments equal to `value`.
    pub fn set_unrestorable(&self, value: Option<Attachment>) {
        self.behavior().unrestorable = value;
    }
}

impl ExecutionEngine for RecordingEngine {
    type Handle = WebSocketHandle;

    fn build_handle(&self, parts: HandleParts) -> Self::Handle {
        WebSocketHandle::new(parts)
    }

    fn serialize_attachment(&self, value: &Attachment) -> Result<Bytes, AttachmentError> {
        if self.behavior().unserializable.as_ref() == Some(value) {
            return Err(AttachmentError::Encode("attachment refused by engine".into()));
        }
        serialize_attachment(value)
    }

    fn deserialize_attachment(&self, buf: &[u8]) -> Result<Option<Attachment>, AttachmentError> {
        let value = deserialize_attachment(buf)?;
        if value.is_some() && self.behavior().unrestorable == value {
            return Err(AttachmentError::Decode("attachment refused by engine".into()));
        }
        Ok(value)
    }

    fn dispatch(&self, event: HibernatableSocketEvent<Self>) -> EngineFuture {
        let _ = self.events.send(RecordedEvent {
            type_id: event.type_id(),
            socket: event.socket(),
            params: event.params().clone(),
        });
        let behavior = self.behavior().clone();
        Box::pin(async move {
            if let Some(delay) = behavior.delay {
                tokio::time::sleep(delay).await;
            }
            if behavior.echo_text {
                if let EventParams::Text(text) = event.params() {
                    let socket = event
                        .web_socket()
                        .await
                        .map_err(|e| EngineError::new(e.to_string()))?;
                    socket
                        .send_text(text.clone())
                        .await
                        .map_err(|e| EngineError::new(e.to_string()))?;
                }
            }
            match behavior.failure {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }
}
