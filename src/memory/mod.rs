//! Capacity-checked storage owned by a single engine run.

pub mod frames;
pub mod globals;
pub mod stack;

pub use frames::{CallStack, Frame};
pub use globals::Globals;
pub use stack::OperandStack;
