//! Configuration data structures for genvault.
//!
//! This module defines the schema for the application settings: the HTTP
//! surface, secrets, every cache tier, admission control, audit rotation,
//! template loading and the generation pipeline upstream.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// HTTP server settings (host, port).
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Signing and encryption secrets.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Multi-tier response cache settings.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Token bucket and resource quota settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Audit log rotation and retention.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Template cache settings.
    #[serde(default)]
    pub templates: TemplateConfig,

    /// Batch orchestrator settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Upstream generation pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Settings for the built-in HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The IP address or hostname the server should bind to.
    /// Default: `127.0.0.1`
    #[serde(default = "default_host")]
    pub host: String,

    /// The port number the server should listen on.
    /// Default: `8787`
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body in bytes.
    /// Default: `4 MiB`
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to mask secrets and key material in logs.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub sanitize_tokens: bool,
}

/// Per-deployment secrets. Both secrets are hex encoded.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Secret for the HMAC integrity tag on cache entries and audit events.
    #[serde(default)]
    pub hmac_secret: String,

    /// Master secret the per-owner persistent-tier keys are derived from.
    #[serde(default)]
    pub master_secret: String,

    /// Deployment-wide salt mixed into every per-owner salt.
    /// Default: `genvault`
    #[serde(default = "default_salt")]
    pub deployment_salt: String,

    /// PBKDF2 iteration count for per-owner key derivation.
    /// Default: `100000`
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("hmac_secret", &"[REDACTED]")
            .field("master_secret", &"[REDACTED]")
            .field("deployment_salt", &self.deployment_salt)
            .field("kdf_iterations", &self.kdf_iterations)
            .finish()
    }
}

/// Settings for all three cache tiers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    #[serde(default)]
    pub fast: FastTierConfig,

    #[serde(default)]
    pub similarity: SimilarityTierConfig,

    #[serde(default)]
    pub persistent: PersistentTierConfig,
}

/// Eviction tuning shared by the fast tier and the template cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EvictionConfig {
    /// Weight of access frequency against recency when picking a victim.
    /// `0.0` is pure LRU, `1.0` is pure LFU within the sample window.
    /// Default: `0.0`
    #[serde(default)]
    pub frequency_weight: f64,

    /// How many of the least-recent entries are considered as victims.
    /// Default: `8`
    #[serde(default = "default_eviction_sample")]
    pub sample: usize,
}

/// In-memory exact-match tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastTierConfig {
    /// Number of independently locked shards.
    /// Default: `16`
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Total entry capacity across all shards.
    /// Default: `4096`
    #[serde(default = "default_fast_capacity")]
    pub capacity: usize,

    /// Entry time-to-live in seconds.
    /// Default: `900`
    #[serde(default = "default_fast_ttl")]
    pub ttl_seconds: u64,

    /// Restart the TTL clock on every hit.
    /// Default: `false`
    #[serde(default)]
    pub extend_ttl_on_hit: bool,

    #[serde(default)]
    pub eviction: EvictionConfig,
}

/// Near-duplicate matching tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityTierConfig {
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum normalized Levenshtein distance (0.0..=1.0) between two
    /// canonical request texts for one to answer the other. Only requests
    /// for the same template are compared; `0.0` limits the tier to exact
    /// matches.
    /// Default: `0.08`
    #[serde(default = "default_similarity_threshold")]
    pub threshold: f64,

    /// Entries kept per owner and template.
    /// Default: `256`
    #[serde(default = "default_similarity_capacity")]
    pub capacity_per_owner: usize,

    /// Entry time-to-live in seconds.
    /// Default: `900`
    #[serde(default = "default_fast_ttl")]
    pub ttl_seconds: u64,
}

/// Encrypted on-disk tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentTierConfig {
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Root directory for sealed entries.
    /// Default: `~/.genvault/cache`
    #[serde(default = "default_cache_dir")]
    pub directory: String,

    /// Disk budget in bytes.
    /// Default: `256 MiB`
    #[serde(default = "default_disk_quota")]
    pub disk_quota_bytes: u64,

    /// Entry time-to-live in seconds.
    /// Default: `86400`
    #[serde(default = "default_persistent_ttl")]
    pub ttl_seconds: u64,

    /// Interval of the background expiry sweep.
    /// Default: `300`
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

/// Deployment mode selects which quota profile applies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// One tenant owns the deployment.
    #[default]
    Single,
    /// Many tenants share the deployment; stricter ceilings.
    Shared,
}

/// Resource ceilings for one deployment mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaProfile {
    pub max_in_flight_per_owner: u32,
    pub max_memory_bytes_per_owner: u64,
    pub max_cpu_units_per_owner: u64,
    pub max_in_flight_total: u32,
    pub max_memory_bytes_total: u64,
    pub max_cpu_units_total: u64,
}

/// Token bucket and quota settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket size per owner.
    /// Default: `60`
    #[serde(default = "default_bucket_capacity")]
    pub capacity: u32,

    /// Tokens added per second.
    /// Default: `1.0`
    #[serde(default = "default_refill_rate")]
    pub refill_per_second: f64,

    /// Default: `single`
    #[serde(default)]
    pub mode: DeploymentMode,

    #[serde(default = "default_single_profile")]
    pub single: QuotaProfile,

    #[serde(default = "default_shared_profile")]
    pub shared: QuotaProfile,

    /// Retry hint returned when a resource ceiling (not tokens) denies.
    /// Default: `250`
    #[serde(default = "default_quota_retry")]
    pub quota_retry_after_ms: u64,
}

impl RateLimitConfig {
    /// The quota profile of the active deployment mode.
    pub fn profile(&self) -> &QuotaProfile {
        match self.mode {
            DeploymentMode::Single => &self.single,
            DeploymentMode::Shared => &self.shared,
        }
    }
}

/// Audit log rotation and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Default: `1024`
    #[serde(default = "default_segment_events")]
    pub max_events_per_segment: usize,

    /// Default: `3600`
    #[serde(default = "default_segment_age")]
    pub max_segment_age_seconds: u64,

    /// Closed segments retained in memory.
    /// Default: `32`
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,

    /// Where closed segments are written. Unset keeps them in memory only.
    #[serde(default)]
    pub directory: Option<String>,
}

/// Template cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Directory of `<template_id>.j2` files.
    /// Default: `~/.genvault/templates`
    #[serde(default = "default_template_dir")]
    pub directory: String,

    /// Default: `512`
    #[serde(default = "default_template_capacity")]
    pub capacity: usize,

    /// Default: `3600`
    #[serde(default = "default_segment_age")]
    pub ttl_seconds: u64,

    /// Template ids compiled at startup.
    #[serde(default)]
    pub preload: Vec<String>,

    #[serde(default)]
    pub eviction: EvictionConfig,
}

/// Batch orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Concurrency limit used when a batch does not specify one.
    /// Default: Number of logical CPU cores.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,

    /// Deadline for one generation call in milliseconds.
    /// Default: `60000`
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_ms: u64,

    /// Longest an item waits for rate-limiter tokens before failing.
    /// Default: `5000`
    #[serde(default = "default_admission_wait")]
    pub max_admission_wait_ms: u64,
}

/// Settings for the upstream generation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Endpoint accepting rendered prompts.
    /// Default: `http://127.0.0.1:8080/v1/generate`
    #[serde(default = "default_pipeline_endpoint")]
    pub endpoint: String,

    /// Connection and request timeout in seconds.
    /// Default: `120`
    #[serde(default = "default_pipeline_timeout")]
    pub timeout_seconds: u64,

    /// Retries after the first attempt for retryable upstream errors.
    /// Default: `3`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl FastTierConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl SimilarityTierConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl PersistentTierConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

// Default trait implementations linking to custom logic

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            sanitize_tokens: true,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            hmac_secret: String::new(),
            master_secret: String::new(),
            deployment_salt: default_salt(),
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            frequency_weight: 0.0,
            sample: default_eviction_sample(),
        }
    }
}

impl Default for FastTierConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            capacity: default_fast_capacity(),
            ttl_seconds: default_fast_ttl(),
            extend_ttl_on_hit: false,
            eviction: EvictionConfig::default(),
        }
    }
}

impl Default for SimilarityTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_similarity_threshold(),
            capacity_per_owner: default_similarity_capacity(),
            ttl_seconds: default_fast_ttl(),
        }
    }
}

impl Default for PersistentTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_cache_dir(),
            disk_quota_bytes: default_disk_quota(),
            ttl_seconds: default_persistent_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_bucket_capacity(),
            refill_per_second: default_refill_rate(),
            mode: DeploymentMode::default(),
            single: default_single_profile(),
            shared: default_shared_profile(),
            quota_retry_after_ms: default_quota_retry(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_events_per_segment: default_segment_events(),
            max_segment_age_seconds: default_segment_age(),
            max_segments: default_max_segments(),
            directory: None,
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            directory: default_template_dir(),
            capacity: default_template_capacity(),
            ttl_seconds: default_segment_age(),
            preload: Vec::new(),
            eviction: EvictionConfig::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            generation_timeout_ms: default_generation_timeout(),
            max_admission_wait_ms: default_admission_wait(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: default_pipeline_endpoint(),
            timeout_seconds: default_pipeline_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

// Helper functions for serde defaults and shared constants
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_body_limit() -> usize {
    4 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_salt() -> String {
    "genvault".to_string()
}

fn default_kdf_iterations() -> u32 {
    100_000
}

fn default_eviction_sample() -> usize {
    8
}

fn default_shards() -> usize {
    16
}

fn default_fast_capacity() -> usize {
    4096
}

fn default_fast_ttl() -> u64 {
    900 // 15 minutes
}

fn default_similarity_threshold() -> f64 {
    0.08
}

fn default_similarity_capacity() -> usize {
    256
}

fn genvault_home() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".genvault")
}

fn default_cache_dir() -> String {
    genvault_home().join("cache").to_string_lossy().to_string()
}

fn default_template_dir() -> String {
    genvault_home().join("templates").to_string_lossy().to_string()
}

fn default_disk_quota() -> u64 {
    256 * 1024 * 1024
}

fn default_persistent_ttl() -> u64 {
    86_400 // 1 day
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_bucket_capacity() -> u32 {
    60
}

fn default_refill_rate() -> f64 {
    1.0
}

fn default_single_profile() -> QuotaProfile {
    QuotaProfile {
        max_in_flight_per_owner: 64,
        max_memory_bytes_per_owner: 512 * 1024 * 1024,
        max_cpu_units_per_owner: 1_000,
        max_in_flight_total: 256,
        max_memory_bytes_total: 2 * 1024 * 1024 * 1024,
        max_cpu_units_total: 4_000,
    }
}

fn default_shared_profile() -> QuotaProfile {
    QuotaProfile {
        max_in_flight_per_owner: 8,
        max_memory_bytes_per_owner: 64 * 1024 * 1024,
        max_cpu_units_per_owner: 100,
        max_in_flight_total: 128,
        max_memory_bytes_total: 1024 * 1024 * 1024,
        max_cpu_units_total: 2_000,
    }
}

fn default_quota_retry() -> u64 {
    250
}

fn default_segment_events() -> usize {
    1024
}

fn default_segment_age() -> u64 {
    3600
}

fn default_max_segments() -> usize {
    32
}

fn default_template_capacity() -> usize {
    512
}

fn default_concurrency() -> usize {
    num_cpus::get()
}

fn default_generation_timeout() -> u64 {
    60_000
}

fn default_admission_wait() -> u64 {
    5_000
}

fn default_pipeline_endpoint() -> String {
    "http://127.0.0.1:8080/v1/generate".to_string()
}

fn default_pipeline_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}
