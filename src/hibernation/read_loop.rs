use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use kameo::actor::WeakActorRef;
use tokio::sync::watch;
use tracing::{debug, info};

use super::HibernationMetricsHook;
use super::dispatch::dispatch_event;
use super::event::{EventOutcome, EventParams, HibernatableSocketEvent};
use super::handle::ExecutionEngine;
use super::manager::{DropSocket, HibernationManager};
use crate::core::{CLOSE_ABNORMAL, CLOSE_NO_STATUS, SocketId, TransportError, WsFrame};
use crate::transport::FrameReader;

pub(crate) const ABNORMAL_CLOSE_REASON: &str =
    "WebSocket disconnected without sending Close frame.";

/// Per-socket reader task. Owns the transport reader for the socket's whole life.
pub(crate) struct ReadLoop<E: ExecutionEngine> {
    pub(crate) socket: SocketId,
    pub(crate) reader: FrameReader,
    pub(crate) engine: Arc<E>,
    pub(crate) manager: WeakActorRef<HibernationManager<E>>,
    pub(crate) close_dispatched: Arc<AtomicBool>,
    pub(crate) event_timeout: watch::Receiver<Option<Duration>>,
    pub(crate) type_id: u16,
    pub(crate) metrics: Option<HibernationMetricsHook>,
}

impl<E: ExecutionEngine> ReadLoop<E> {
    pub(crate) async fn run(mut self) {
        let failure = loop {
            let params = match self.reader.next().await {
                Some(Ok(WsFrame::Text(payload))) => match String::from_utf8(payload.to_vec()) {
                    Ok(text) => EventParams::Text(text),
                    Err(err) => break TransportError::failed("read", err),
                },
                Some(Ok(WsFrame::Binary(payload))) => EventParams::Binary(payload),
                Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => continue,
                Some(Ok(WsFrame::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (frame.code, frame.reason_lossy()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    EventParams::Close {
                        code,
                        reason,
                        was_clean: true,
                    }
                }
                Some(Err(err)) => break err,
                None => {
                    break TransportError::disconnected(
                        "read",
                        "stream ended without a close frame",
                    );
                }
            };

            if params.is_close() {
                self.close_dispatched.store(true, Ordering::SeqCst);
                self.dispatch(params).await;
                info!(socket = %self.socket, "websocket closed by peer");
                self.finish().await;
                return;
            }
            self.dispatch(params).await;
        };

        if failure.is_disconnect() && !self.close_dispatched.load(Ordering::SeqCst) {
            info!(
                socket = %self.socket,
                error = %failure,
                "websocket disconnected without close frame"
            );
            self.dispatch(EventParams::Close {
                code: CLOSE_ABNORMAL,
                reason: ABNORMAL_CLOSE_REASON.to_string(),
                was_clean: false,
            })
            .await;
            self.close_dispatched.store(true, Ordering::SeqCst);
        } else {
            info!(socket = %self.socket, error = %failure, "websocket read failed");
            self.dispatch(EventParams::Error(failure)).await;
        }
        self.finish().await;
    }

    /// Build the event now; the returned future does not borrow the loop.
    fn dispatch(
        &self,
        params: EventParams,
    ) -> impl Future<Output = EventOutcome> + Send + 'static {
        let socket = self.socket;
        let kind = params.kind();
        debug!(socket = %socket, kind, "dispatching websocket event");
        let timeout = *self.event_timeout.borrow();
        let event =
            HibernatableSocketEvent::new(self.type_id, socket, params, self.manager.clone());
        let future = self.engine.dispatch(event);
        let metrics = self.metrics.clone();
        async move { dispatch_event(socket, kind, future, timeout, metrics.as_ref()).await }
    }

    async fn finish(self) {
        if let Some(manager) = self.manager.upgrade() {
            let _ = manager
                .tell(DropSocket {
                    socket: self.socket,
                })
                .send()
                .await;
        }
    }
}
