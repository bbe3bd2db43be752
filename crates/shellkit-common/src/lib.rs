//! # ShellKit Common
//!
//! Shared plumbing for the ShellKit crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - An injectable wall clock so cache timestamps are testable

pub mod clock;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};
