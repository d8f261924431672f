//! # quarry-utils
//!
//! Shared utilities for the quarry workspace. Currently this is the
//! `tracing` bootstrap used by examples, integration tests and embedding
//! tools; the core crate only *emits* diagnostics and never installs a
//! subscriber itself.

pub mod logging;

pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError};
