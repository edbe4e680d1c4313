pub mod arena;
pub mod attachment;
pub mod frame;
pub mod types;

pub use arena::*;
pub use attachment::*;
pub use frame::*;
pub use types::*;
