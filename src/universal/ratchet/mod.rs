//! Ratcheting take-profit / stop-loss exit state machine.

pub mod engine;
pub mod ladder;

pub use engine::*;
pub use ladder::*;
