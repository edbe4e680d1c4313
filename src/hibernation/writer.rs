use bytes::Bytes;
use futures_util::SinkExt;
use kameo::error::SendError;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage};
use tracing::debug;

use crate::core::{SocketId, TransportError, WsFrame};
use crate::transport::FrameWriter;

/// Writer actor that owns the transport writer of one socket and serializes writes.
///
/// It lives as long as the socket stays registered, independently of whether the socket is
/// hibernating, so outbound frames never race a state transition.
pub struct SocketWriterActor {
    socket: SocketId,
    writer: FrameWriter,
}

impl SocketWriterActor {
    pub fn new(socket: SocketId, writer: FrameWriter) -> Self {
        Self { socket, writer }
    }
}

impl Actor for SocketWriterActor {
    type Args = Self;
    type Error = TransportError;

    fn name() -> &'static str {
        "SocketWriterActor"
    }

    async fn on_start(args: Self::Args, _ctx: ActorRef<Self>) -> Result<Self, Self::Error> {
        Ok(args)
    }

    fn on_panic(
        &mut self,
        _actor_ref: kameo::actor::WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        let socket = self.socket;
        async move {
            tracing::error!(socket = %socket, error = ?err, "SocketWriterActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

#[derive(Clone, Debug)]
pub struct WriteFrame {
    pub frame: WsFrame,
}

impl KameoMessage<WriteFrame> for SocketWriterActor {
    type Reply = Result<(), TransportError>;

    async fn handle(
        &mut self,
        msg: WriteFrame,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        debug!(
            target: "hibernate-ws-writer",
            socket = %self.socket,
            "sending websocket frame to wire"
        );
        self.writer.send(msg.frame).await
    }
}

/// Cloneable handle to a socket's writer actor.
#[derive(Clone)]
pub struct SocketSender {
    socket: SocketId,
    writer: ActorRef<SocketWriterActor>,
}

impl std::fmt::Debug for SocketSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketSender")
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

impl SocketSender {
    /// Spawn the writer actor for a freshly accepted socket.
    pub fn spawn(socket: SocketId, writer: FrameWriter) -> Self {
        Self {
            socket,
            writer: SocketWriterActor::spawn(SocketWriterActor::new(socket, writer)),
        }
    }

    pub fn socket(&self) -> SocketId {
        self.socket
    }

    pub async fn send(&self, frame: WsFrame) -> Result<(), TransportError> {
        match self.writer.ask(WriteFrame { frame }).await {
            Ok(()) => Ok(()),
            Err(SendError::HandlerError(err)) => Err(err),
            Err(_) => Err(TransportError::disconnected(
                "write",
                "socket writer is no longer running",
            )),
        }
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(WsFrame::text(text)).await
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        self.send(WsFrame::binary(data)).await
    }

    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), TransportError> {
        self.send(WsFrame::close(code, reason)).await
    }

    /// Abort the writer actor without waiting on its mailbox. Queued frames are discarded and
    /// any clone still held by a handler starts failing sends.
    pub(crate) fn shutdown(&self) {
        self.writer.kill();
    }
}
