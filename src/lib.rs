//! Kameo-based hibernatable WebSocket management.

pub mod core;
pub mod hibernation;
pub mod testing;
pub mod transport;

pub use hibernation::{
    Accepted, ExecutionEngine, ExecutionHandle, HibernationClient, HibernationManager,
    HibernationManagerArgs, WebSocketHandle,
};
