use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async,
    tungstenite::{
        self, Message as TungsteniteMessage,
        error::ProtocolError,
        handshake::server::{ErrorResponse, Request, Response},
        http::HeaderValue,
        protocol::CloseFrame as TungCloseFrame,
    },
};
use tracing::debug;

use crate::core::{SocketMetadata, TransportError, WsCloseFrame, WsFrame};
use crate::transport::SocketTransport;

/// Sort tungstenite failures into "peer vanished" and everything else.
fn classify_error(context: &'static str, err: tungstenite::Error) -> TransportError {
    let disconnected = match &err {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        tungstenite::Error::Io(io) => matches!(
            io.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
        ),
        _ => false,
    };
    if disconnected {
        TransportError::disconnected(context, err)
    } else {
        TransportError::failed(context, err)
    }
}

fn close_to_core(frame: Option<TungCloseFrame>) -> Option<WsCloseFrame> {
    frame.map(|f| WsCloseFrame {
        code: u16::from(f.code),
        reason: AsRef::<Bytes>::as_ref(&f.reason).clone(),
    })
}

fn core_to_close(frame: WsCloseFrame) -> TungCloseFrame {
    TungCloseFrame {
        code: frame.code.into(),
        reason: frame.reason_lossy().into(),
    }
}

fn msg_to_frame(msg: TungsteniteMessage) -> WsFrame {
    match msg {
        TungsteniteMessage::Text(text) => WsFrame::Text(AsRef::<Bytes>::as_ref(&text).clone()),
        TungsteniteMessage::Binary(bytes) => WsFrame::Binary(bytes),
        TungsteniteMessage::Ping(bytes) => WsFrame::Ping(bytes),
        TungsteniteMessage::Pong(bytes) => WsFrame::Pong(bytes),
        TungsteniteMessage::Close(frame) => WsFrame::Close(close_to_core(frame)),
        TungsteniteMessage::Frame(_) => WsFrame::Binary(Bytes::new()),
    }
}

fn frame_to_msg(frame: WsFrame) -> TungsteniteMessage {
    match frame {
        WsFrame::Text(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => TungsteniteMessage::Text(text.into()),
            Err(_) => TungsteniteMessage::Binary(bytes),
        },
        WsFrame::Binary(bytes) => TungsteniteMessage::Binary(bytes),
        WsFrame::Ping(bytes) => TungsteniteMessage::Ping(bytes),
        WsFrame::Pong(bytes) => TungsteniteMessage::Pong(bytes),
        WsFrame::Close(frame) => TungsteniteMessage::Close(frame.map(core_to_close)),
    }
}

/// Server-side websocket accepted through tokio-tungstenite.
pub struct TungsteniteSocket<S> {
    stream: WebSocketStream<S>,
    metadata: SocketMetadata,
}

impl<S> TungsteniteSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a stream that was upgraded elsewhere (e.g. by an HTTP framework).
    pub fn from_stream(stream: WebSocketStream<S>, metadata: SocketMetadata) -> Self {
        Self { stream, metadata }
    }
}

/// Run the server handshake on `stream`, recording the request url and negotiating the first
/// offered subprotocol.
pub async fn accept<S>(stream: S) -> Result<TungsteniteSocket<S>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut metadata = SocketMetadata::default();
    let callback = |request: &Request, mut response: Response| {
        let path = request.uri().to_string();
        metadata.url = Some(
            match request.headers().get("host").and_then(|h| h.to_str().ok()) {
                Some(host) => format!("ws://{host}{path}"),
                None => path,
            },
        );
        let offered = request
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|h| h.to_str().ok())
            .and_then(|list| list.split(',').map(str::trim).find(|p| !p.is_empty()))
            .map(str::to_string);
        if let Some(protocol) = offered {
            if let Ok(value) = HeaderValue::from_str(&protocol) {
                response.headers_mut().insert("sec-websocket-protocol", value);
                metadata.protocol = Some(protocol);
            }
        }
        Ok::<Response, ErrorResponse>(response)
    };
    let stream = accept_hdr_async(stream, callback)
        .await
        .map_err(|e| TransportError::failed("accept", e))?;
    debug!(url = ?metadata.url, protocol = ?metadata.protocol, "accepted websocket upgrade");
    Ok(TungsteniteSocket { stream, metadata })
}

impl<S> SocketTransport for TungsteniteSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Reader = TungsteniteReader<S>;
    type Writer = TungsteniteWriter<S>;

    fn metadata(&self) -> SocketMetadata {
        self.metadata.clone()
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (write, read) = self.stream.split();
        (
            TungsteniteReader { inner: read },
            TungsteniteWriter { inner: write },
        )
    }
}

pub struct TungsteniteReader<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

impl<S> Stream for TungsteniteReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<WsFrame, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(msg))) => Poll::Ready(Some(Ok(msg_to_frame(msg)))),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(classify_error("read", err)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct TungsteniteWriter<S> {
    inner: SplitSink<WebSocketStream<S>, TungsteniteMessage>,
}

impl<S> Sink<WsFrame> for TungsteniteWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|e| classify_error("write", e))
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(frame_to_msg(item))
            .map_err(|e| classify_error("write", e))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|e| classify_error("write", e))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|e| classify_error("write", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_without_close_is_a_disconnect() {
        let err = classify_error(
            "read",
            tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake),
        );
        assert!(err.is_disconnect());
        let err = classify_error(
            "read",
            tungstenite::Error::Io(std::io::Error::from(ErrorKind::ConnectionReset)),
        );
        assert!(err.is_disconnect());
    }

    #[test]
    fn other_failures_are_not_disconnects() {
        let err = classify_error(
            "read",
            tungstenite::Error::Io(std::io::Error::other("tls alert")),
        );
        assert!(!err.is_disconnect());
    }

    #[test]
    fn close_frames_round_trip_through_tungstenite_types() {
        let msg = frame_to_msg(WsFrame::close(4000, "done"));
        assert_eq!(msg_to_frame(msg), WsFrame::close(4000, "done"));
        let msg = frame_to_msg(WsFrame::text("hi"));
        assert!(matches!(msg, TungsteniteMessage::Text(_)));
    }
}
