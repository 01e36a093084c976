//! Utility functions and helpers for genvault.
//!
//! This module provides cross-cutting concerns like structured logging,
//! secret sanitization, and retry logic with backoff.
//!
//! # Submodules
//!
//! - `logging`: Tracing initialization and log redaction helpers.
//! - `retry`: Retry mechanisms that respect upstream delay hints.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod logging;
pub mod retry;
