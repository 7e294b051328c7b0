//! Error catalog for Lumin.
//!
//! Stable error codes shared by the daemon's HTTP responses, the ingestion
//! history and operator-facing log lines. See [`catalog`] for the code ranges.

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
