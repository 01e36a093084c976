//! Structured logging and security-focused trace utilities.
//!
//! This module configures the `tracing` ecosystem for the service,
//! supporting multiple output formats and providing utilities to keep
//! secrets (HMAC keys, master secrets, bearer tokens) out of log sinks.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::LoggingConfig;
use crate::error::Result;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static HEX_SECRET: OnceLock<Regex> = OnceLock::new();
static BEARER: OnceLock<Regex> = OnceLock::new();
static SANITIZE: AtomicBool = AtomicBool::new(true);

/// Initializes the global tracing subscriber.
///
/// Supports two output formats:
/// - `json`: Structured JSON logs for production ingestion.
/// - `pretty` (default): Human-readable, colorized output for development.
///
/// Log levels are controlled via the `RUST_LOG` environment variable or
/// the provided `LoggingConfig`. Calling this twice is harmless.
pub fn init(config: &LoggingConfig) -> Result<()> {
    set_sanitize(config.sanitize_tokens);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}

/// Redacts secret material from a string before it is logged.
///
/// Two patterns are replaced:
/// - hex runs of 32 or more characters (HMAC and master secrets are
///   configured as hex), replaced by `[REDACTED_SECRET]`
/// - `Bearer <token>` credentials, replaced by `Bearer [REDACTED_TOKEN]`
///
/// Fingerprints are 64 hex characters too, so log lines that must show a
/// key use [`crate::integrity::short`] instead of the full value.
pub fn sanitize(input: &str) -> String {
    let hex = HEX_SECRET.get_or_init(|| Regex::new(r"\b[0-9a-fA-F]{32,}\b").expect("static regex"));
    let bearer = BEARER.get_or_init(|| Regex::new(r"Bearer\s+[^\s'\x22]+").expect("static regex"));

    let result = bearer.replace_all(input, "Bearer [REDACTED_TOKEN]");
    hex.replace_all(&result, "[REDACTED_SECRET]").into_owned()
}

/// Turn [`redact`] on or off process-wide. On by default.
pub fn set_sanitize(enabled: bool) {
    SANITIZE.store(enabled, Ordering::Relaxed);
}

/// [`sanitize`] when `logging.sanitize_tokens` is set, otherwise a copy.
///
/// Used on anything that came from outside the process (upstream bodies,
/// error messages) before it reaches a log line or a response.
pub fn redact(input: &str) -> String {
    if SANITIZE.load(Ordering::Relaxed) {
        sanitize(input)
    } else {
        input.to_string()
    }
}

/// Shortens `input` to at most `max` characters, marking the cut.
pub fn truncate(input: &str, max: usize) -> String {
    match input.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &input[..idx]),
        None => input.to_string(),
    }
}
