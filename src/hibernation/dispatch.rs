use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::HibernationMetricsHook;
use super::event::EventOutcome;
use super::handle::EngineFuture;
use crate::core::SocketId;

/// Drive one engine dispatch to an [`EventOutcome`].
///
/// The engine future always runs on its own task. When `timeout` elapses first the task is
/// detached: it keeps running and its result is discarded.
pub(crate) async fn dispatch_event(
    socket: SocketId,
    kind: &'static str,
    dispatch: EngineFuture,
    timeout: Option<Duration>,
    metrics: Option<&HibernationMetricsHook>,
) -> EventOutcome {
    let started = Instant::now();
    let mut task = tokio::spawn(dispatch);

    let settled = match timeout {
        None => Some((&mut task).await),
        Some(limit) => tokio::select! {
            result = &mut task => Some(result),
            _ = tokio::time::sleep(limit) => None,
        },
    };

    let outcome = match settled {
        Some(Ok(Ok(()))) => {
            debug!(socket = %socket, kind, "websocket event dispatched");
            EventOutcome::Ok
        }
        Some(Ok(Err(err))) => {
            if !err.expected {
                warn!(socket = %socket, kind, error = %err, "websocket event handler failed");
            }
            EventOutcome::Exception
        }
        Some(Err(join)) => {
            error!(socket = %socket, kind, error = %join, "websocket event handler panicked");
            EventOutcome::Exception
        }
        None => {
            warn!(socket = %socket, kind, timeout = ?timeout, "websocket event handler timed out");
            EventOutcome::Exception
        }
    };

    if let Some(metrics) = metrics {
        metrics.observe_event_outcome(socket, kind, outcome, started.elapsed());
    }
    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::core::{Arena, EngineError};
    use crate::hibernation::HibernationMetricsReporter;

    fn socket() -> SocketId {
        SocketId(Arena::new().insert(()))
    }

    #[derive(Default)]
    struct CountingMetrics {
        exceptions: AtomicUsize,
    }

    impl HibernationMetricsReporter for CountingMetrics {
        fn observe_event_outcome(
            &self,
            _socket: SocketId,
            _kind: &'static str,
            outcome: EventOutcome,
            _elapsed: Duration,
        ) {
            if outcome == EventOutcome::Exception {
                self.exceptions.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn successful_dispatch_is_ok() {
        let outcome = dispatch_event(
            socket(),
            "text",
            Box::pin(async { Ok::<(), EngineError>(()) }),
            None,
            None,
        )
        .await;
        assert_eq!(outcome, EventOutcome::Ok);
    }

    #[tokio::test]
    async fn handler_error_and_panic_are_exceptions() {
        let outcome = dispatch_event(
            socket(),
            "text",
            Box::pin(async { Err::<(), _>(EngineError::expected("tunneled")) }),
            None,
            None,
        )
        .await;
        assert_eq!(outcome, EventOutcome::Exception);

        let outcome = dispatch_event(
            socket(),
            "text",
            Box::pin(async {
                if true {
                    panic!("handler blew up");
                }
                Ok::<(), EngineError>(())
            }),
            None,
            None,
        )
        .await;
        assert_eq!(outcome, EventOutcome::Exception);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_exception_and_detaches_handler() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let metrics = Arc::new(CountingMetrics::default());
        let hook: HibernationMetricsHook = metrics.clone();

        let outcome = dispatch_event(
            socket(),
            "text",
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<(), EngineError>(())
            }),
            Some(Duration::from_millis(50)),
            Some(&hook),
        )
        .await;

        assert_eq!(outcome, EventOutcome::Exception);
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(metrics.exceptions.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_handler_beats_timeout() {
        let outcome = dispatch_event(
            socket(),
            "binary",
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<(), EngineError>(())
            }),
            Some(Duration::from_millis(50)),
            None,
        )
        .await;
        assert_eq!(outcome, EventOutcome::Ok);
    }
}
