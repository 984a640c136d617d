//! HTTP handlers.

pub mod blur;
pub mod health;

pub use blur::*;
pub use health::*;
