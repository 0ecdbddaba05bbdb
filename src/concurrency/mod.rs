//! Cross-thread primitives shared by the engine and its controllers.

pub mod channel;
pub mod control;

pub use channel::WaitQueue;
pub use control::ControlChannel;
