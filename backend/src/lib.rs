//! ReorgDB Server Library
//!
//! This library exposes the node lifecycle and logging setup for integration
//! testing.

pub mod lifecycle;
pub mod logging;
