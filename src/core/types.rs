use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::arena::ArenaKey;

/// Convenience result alias for hibernation operations.
pub type HibernationResult<T> = Result<T, HibernationError>;

/// Identity of a socket registered with a hibernation manager.
///
/// Backed by a generation-checked arena key, so an id outlives its socket safely: once the
/// socket is dropped the id simply stops resolving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SocketId(pub(crate) ArenaKey);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}.{}", self.0.index(), self.0.generation())
    }
}

/// Canonical error surface of the hibernation manager.
#[derive(Debug, Error)]
pub enum HibernationError {
    #[error("only {limit} websockets can be accepted on a single actor instance")]
    TooManySockets { limit: usize },

    #[error("too many hibernatable websocket tags provided (limit {limit})")]
    TooManyTags { limit: usize },

    #[error("a websocket can carry at most {limit} tags, got {provided}")]
    TooManyTagsForSocket { limit: usize, provided: usize },

    #[error("websocket tag exceeds {limit} bytes (got {len})")]
    TagTooLong { limit: usize, len: usize },

    #[error("unknown websocket: {0}")]
    UnknownSocket(SocketId),

    #[error("attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("hibernation manager is no longer running")]
    ManagerUnavailable,
}

/// How a transport failure should be treated by the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The peer went away without a close handshake.
    Disconnected,
    /// Any other transport failure.
    Failed,
}

/// Failure surfaced by a transport reader or writer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Transport error ({context}): {error}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub context: &'static str,
    pub error: String,
}

impl TransportError {
    pub fn disconnected(context: &'static str, error: impl ToString) -> Self {
        Self {
            kind: TransportErrorKind::Disconnected,
            context,
            error: error.to_string(),
        }
    }

    pub fn failed(context: &'static str, error: impl ToString) -> Self {
        Self {
            kind: TransportErrorKind::Failed,
            context,
            error: error.to_string(),
        }
    }

    pub fn is_disconnect(&self) -> bool {
        self.kind == TransportErrorKind::Disconnected
    }
}

/// Errors from the versioned attachment codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachmentError {
    #[error("serialized attachment is missing its header")]
    MissingHeader,

    #[error("unsupported attachment format version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },

    #[error("failed to encode attachment: {0}")]
    Encode(String),

    #[error("failed to decode attachment: {0}")]
    Decode(String),
}

/// Failure reported by the execution engine while running an event handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    /// Expected failures (tunneled user exceptions and the like) are not logged.
    pub expected: bool,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expected: false,
        }
    }

    pub fn expected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expected: true,
        }
    }
}

/// Properties negotiated during the websocket upgrade that must survive hibernation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SocketMetadata {
    pub url: Option<String>,
    pub protocol: Option<String>,
    pub extensions: Option<String>,
}

/// Resource limits enforced by a manager instance.
///
/// These are part of the public contract rather than internal tuning: a request that would
/// exceed any of them is rejected and leaves the manager untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HibernationLimits {
    pub max_sockets: usize,
    pub max_tags: usize,
    pub max_tags_per_socket: usize,
    pub max_tag_bytes: usize,
}

impl Default for HibernationLimits {
    fn default() -> Self {
        Self {
            max_sockets: 1024,
            max_tags: 4096,
            max_tags_per_socket: 10,
            max_tag_bytes: 256,
        }
    }
}

/// Manager configuration.
#[derive(Clone, Copy, Debug)]
pub struct HibernationConfig {
    pub limits: HibernationLimits,
    /// Upper bound on a single event dispatch; `None` lets handlers run unbounded.
    pub event_timeout: Option<Duration>,
    /// Custom event type id stamped onto every dispatched event.
    pub event_type_id: u16,
}

impl Default for HibernationConfig {
    fn default() -> Self {
        Self {
            limits: HibernationLimits::default(),
            event_timeout: None,
            event_type_id: 0,
        }
    }
}

impl HibernationConfig {
    pub fn with_limits(mut self, limits: HibernationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = Some(timeout);
        self
    }

    pub fn with_event_type_id(mut self, type_id: u16) -> Self {
        self.event_type_id = type_id;
        self
    }
}

/// Snapshot of manager occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HibernationStats {
    pub sockets: usize,
    pub hibernating: usize,
    pub tags: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_contract() {
        let limits = HibernationLimits::default();
        assert_eq!(limits.max_sockets, 1024);
        assert_eq!(limits.max_tags, 4096);
    }

    #[test]
    fn transport_error_classification() {
        assert!(TransportError::disconnected("read", "eof").is_disconnect());
        assert!(!TransportError::failed("read", "bad frame").is_disconnect());
    }

    #[test]
    fn config_builders_compose() {
        let config = HibernationConfig::default()
            .with_event_timeout(Duration::from_millis(50))
            .with_event_type_id(7);
        assert_eq!(config.event_timeout, Some(Duration::from_millis(50)));
        assert_eq!(config.event_type_id, 7);
        assert_eq!(config.limits, HibernationLimits::default());
    }
}
