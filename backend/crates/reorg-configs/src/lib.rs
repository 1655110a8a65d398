//! reorg-configs
//!
//! Server configuration types and loader for ReorgDB.

pub mod config;

pub use config::*;
pub use config::defaults;
