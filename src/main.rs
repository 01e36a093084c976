// genvault - secure multi-tier response cache and batch orchestrator
// Author: kelexine (https://github.com/kelexine)

use anyhow::{bail, Context, Result};
use clap::Parser;
use genvault::audit::{load_segments, verify_segment, AuditLog, AuditSegment};
use genvault::cache::MultiTierCache;
use genvault::cli::{Args, Command};
use genvault::config::AppConfig;
use genvault::integrity::{Sealer, Signer};
use genvault::orchestrator::Orchestrator;
use genvault::pipeline::HttpPipeline;
use genvault::ratelimit::RateLimiter;
use genvault::server::create_router;
use genvault::templates::TemplateCache;
use genvault::utils::logging;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let config = AppConfig::load(args.config_path())?;

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;

    match args.command() {
        Command::Serve => serve(config).await,
        Command::VerifyAudit { path } => verify_audit(&config, &path),
        Command::PrintConfig => print_config(&config),
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("Starting genvault v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Secrets and the audit trail
    let sealer = Arc::new(
        Sealer::from_config(&config.security)
            .context("security.hmac_secret and security.master_secret must be set (hex)")?,
    );
    let audit = Arc::new(AuditLog::new(sealer.signer().clone(), config.audit.clone()));

    // Phase 4: Cache tiers
    let cache = Arc::new(MultiTierCache::new(&config.cache, Arc::clone(&sealer), Arc::clone(&audit)).await?);
    let _maintenance = cache.spawn_maintenance();
    info!(
        "Cache ready (fast: {} entries in {} shards, similarity: {}, persistent: {})",
        config.cache.fast.capacity,
        config.cache.fast.shards,
        config.cache.similarity.enabled,
        config.cache.persistent.enabled
    );

    // Phase 5: Admission control, templates, pipeline
    let limiter = RateLimiter::new(&config.rate_limit);
    let _pruner = spawn_limiter_pruner(limiter.clone());
    info!("Rate limiter in {:?} mode", config.rate_limit.mode);

    let templates = Arc::new(TemplateCache::from_config(&config.templates));
    templates.preload(&config.templates.preload);

    let pipeline = Arc::new(HttpPipeline::new(&config.pipeline)?);
    info!("Generation pipeline at {}", pipeline.endpoint());

    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        cache,
        limiter,
        templates,
        pipeline,
        Arc::clone(&audit),
    );

    // Phase 6: Build and start HTTP server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = create_router(config, orchestrator, Arc::clone(&audit));

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Phase 7: Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Seal and persist the open audit segment
    if let Some(segment) = audit.rotate() {
        info!("Sealed audit segment {} ({} events)", segment.index, segment.events.len());
    }

    info!("Server shut down gracefully");
    Ok(())
}

fn spawn_limiter_pruner(limiter: RateLimiter) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let pruned = limiter.prune_idle();
            if pruned > 0 {
                debug!("Pruned {} idle rate limiter owners", pruned);
            }
        }
    })
}

fn verify_audit(config: &AppConfig, path: &Path) -> Result<()> {
    let signer = Signer::from_hex(&config.security.hmac_secret)
        .context("security.hmac_secret is required to verify audit segments")?;

    let segments = read_segments(path)?;
    if segments.is_empty() {
        bail!("no audit segments found at {}", path.display());
    }

    let mut failures = 0;
    for segment in &segments {
        match verify_segment(segment, &signer) {
            Ok(()) => println!(
                "segment {} ({}): ok, {} events",
                segment.index,
                segment.segment_id,
                segment.events.len()
            ),
            Err(e) => {
                failures += 1;
                println!("segment {} ({}): FAILED: {}", segment.index, segment.segment_id, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} segments failed verification", failures, segments.len());
    }
    info!("Verified {} audit segments", segments.len());
    Ok(())
}

fn read_segments(path: &Path) -> Result<Vec<AuditSegment>> {
    if path.is_dir() {
        return Ok(load_segments(path)?);
    }
    let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    match serde_json::from_slice::<Vec<AuditSegment>>(&raw) {
        Ok(segments) => Ok(segments),
        Err(_) => Ok(vec![serde_json::from_slice::<AuditSegment>(&raw)
            .with_context(|| format!("{} is not an audit export or segment", path.display()))?]),
    }
}

fn print_config(config: &AppConfig) -> Result<()> {
    let mut redacted = config.clone();
    for secret in [
        &mut redacted.security.hmac_secret,
        &mut redacted.security.master_secret,
    ] {
        if !secret.is_empty() {
            *secret = "<redacted>".to_string();
        }
    }
    print!("{}", toml::to_string_pretty(&redacted)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
