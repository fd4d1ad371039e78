//! Control-flow and frame analysis over method bodies.

mod analyzer;
mod frame;
mod jump_encoding;

pub use analyzer::*;
pub use frame::*;
pub use jump_encoding::*;
