//! `credential-issuer`: worker binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 3. Connect the Redis store, or build the in-memory [`MemoryStore`] and
//!    spawn its sweeper when no `REDIS_URL` is set.
//! 4. Build the [`CredentialIssuer`] with the production collaborators.
//! 5. Serve NDJSON requests from stdin until EOF or Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use credential_issuer::{
    cache::sweep_task, config::Config, telemetry, worker, CredentialIssuer, HashStore,
    MemoryStore, RedisStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        ttl_minutes = cfg.jwt_expired,
        rsa_key_bits = cfg.rsa_key_bits,
        "credential-issuer starting"
    );

    let shutdown = CancellationToken::new();

    // -----------------------------------------------------------------------
    // 3. Cache store
    // -----------------------------------------------------------------------
    let (store, sweeper) = match &cfg.redis_url {
        Some(url) => {
            let store: Arc<dyn HashStore> = Arc::new(
                RedisStore::connect(url)
                    .await
                    .context("failed to connect to REDIS_URL")?,
            );
            (store, None)
        }
        None => {
            info!("REDIS_URL not set; using in-process store");
            let memory = MemoryStore::new();
            let sweeper = sweep_task(memory.clone(), cfg.store_sweep_interval(), shutdown.clone());
            let store: Arc<dyn HashStore> = Arc::new(memory);
            (store, Some(sweeper))
        }
    };

    // -----------------------------------------------------------------------
    // 4. Issuer
    // -----------------------------------------------------------------------
    let issuer = Arc::new(CredentialIssuer::with_store(
        cfg.issuer_settings(),
        store,
        cfg.rsa_key_bits,
    ));

    // -----------------------------------------------------------------------
    // 5. Worker loop
    // -----------------------------------------------------------------------
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received; shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "failed to listen for interrupt"),
            }
        });
    }

    let result = worker::run(
        issuer,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        cfg.issue_timeout(),
        cfg.worker_concurrency,
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            warn!(error = %e, "store sweeper exited abnormally");
        }
    }
    telemetry::shutdown_telemetry();
    result
}
