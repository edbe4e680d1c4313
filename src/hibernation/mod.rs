//! Hibernatable websocket management.
//!
//! A [`HibernationManager`] owns every accepted socket of one actor instance. Each socket keeps
//! its transport (writer actor plus read loop) for its whole life, while the execution-facing
//! handle can be dropped with [`HibernateAll`] and rebuilt on demand.

use std::sync::Arc;
use std::time::Duration;

use crate::core::SocketId;

pub mod client;
mod dispatch;
pub mod event;
pub mod handle;
pub mod manager;
mod read_loop;
mod socket;
pub mod tags;
pub mod writer;

/// Metrics hook for hibernation managers.
pub trait HibernationMetricsReporter: Send + Sync + 'static {
    /// Called once per dispatched event, after it settled or timed out.
    fn observe_event_outcome(
        &self,
        socket: SocketId,
        kind: &'static str,
        outcome: EventOutcome,
        elapsed: Duration,
    );

    #[inline]
    fn track_socket_dropped(&self, _socket: SocketId) {}
}

/// Convenient alias for passing around boxed metric hooks.
pub type HibernationMetricsHook = Arc<dyn HibernationMetricsReporter>;

pub use client::*;
pub use event::*;
pub use handle::*;
pub use manager::*;
pub use socket::HibernationPackage;
pub use tags::*;
pub use writer::SocketSender;
