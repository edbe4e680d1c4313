#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hibernate_ws::core::{HibernationConfig, HibernationStats, SocketId};
use hibernate_ws::hibernation::{
    EventOutcome, HibernationClient, HibernationManagerArgs, HibernationMetricsReporter,
};
use hibernate_ws::testing::{RecordedEvents, RecordingEngine};

pub type TestClient = HibernationClient<RecordingEngine>;

#[derive(Default)]
pub struct OutcomeLog {
    outcomes: Mutex<Vec<(&'static str, EventOutcome)>>,
    dropped: Mutex<Vec<SocketId>>,
}

impl OutcomeLog {
    pub fn outcomes(&self) -> Vec<(&'static str, EventOutcome)> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn dropped(&self) -> Vec<SocketId> {
        self.dropped.lock().unwrap().clone()
    }
}

impl HibernationMetricsReporter for OutcomeLog {
    fn observe_event_outcome(
        &self,
        _socket: SocketId,
        kind: &'static str,
        outcome: EventOutcome,
        _elapsed: Duration,
    ) {
        self.outcomes.lock().unwrap().push((kind, outcome));
    }

    fn track_socket_dropped(&self, socket: SocketId) {
        self.dropped.lock().unwrap().push(socket);
    }
}

pub struct Harness {
    pub client: TestClient,
    pub engine: Arc<RecordingEngine>,
    pub events: RecordedEvents,
    pub log: Arc<OutcomeLog>,
}

pub fn spawn_manager(config: HibernationConfig) -> Harness {
    let (engine, events) = RecordingEngine::new();
    let engine = Arc::new(engine);
    let log = Arc::new(OutcomeLog::default());
    let client = HibernationClient::spawn(
        HibernationManagerArgs::new(Arc::clone(&engine))
            .with_config(config)
            .with_metrics(log.clone()),
    );
    Harness {
        client,
        engine,
        events,
        log,
    }
}

pub async fn wait_for_stats(
    client: &TestClient,
    timeout: Duration,
    done: impl Fn(&HibernationStats) -> bool,
) -> HibernationStats {
    let deadline = Instant::now() + timeout;
    loop {
        let stats = client.stats().await.expect("stats");
        if done(&stats) {
            return stats;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for manager stats, last seen {stats:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_outcomes(log: &OutcomeLog, count: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while log.outcomes().len() < count {
        if Instant::now() > deadline {
            panic!("timed out waiting for {count} outcomes, got {:?}", log.outcomes());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
