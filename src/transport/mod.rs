use futures_util::stream::BoxStream;
use futures_util::{Sink, Stream};
use std::pin::Pin;

use crate::core::{SocketMetadata, TransportError, WsFrame};

pub mod tungstenite;

/// Transport boundary for an already-upgraded server-side websocket.
///
/// The manager splits every accepted socket: the reader moves into the socket's read loop and
/// the writer into its writer actor. Neither half is touched by hibernation, which is what
/// keeps the connection alive while the execution-facing handle is torn down and rebuilt.
pub trait SocketTransport: Send + 'static {
    type Reader: Stream<Item = Result<WsFrame, TransportError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = TransportError> + Send + Sync + Unpin + 'static;

    /// Properties negotiated during the upgrade handshake.
    fn metadata(&self) -> SocketMetadata;

    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Type-erased reader half owned by a read loop.
pub type FrameReader = BoxStream<'static, Result<WsFrame, TransportError>>;

/// Type-erased writer half owned by a writer actor.
pub type FrameWriter = Pin<Box<dyn Sink<WsFrame, Error = TransportError> + Send + Sync>>;

/// Split a transport and erase both halves so the manager stays transport-agnostic.
pub fn into_boxed_halves<T: SocketTransport>(
    transport: T,
) -> (SocketMetadata, FrameReader, FrameWriter) {
    let metadata = transport.metadata();
    let (reader, writer) = transport.split();
    let reader: FrameReader = Box::pin(reader);
    let writer: FrameWriter = Box::pin(writer);
    (metadata, reader, writer)
}
