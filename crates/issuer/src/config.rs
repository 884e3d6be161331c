//! Configuration loading and validation for the credential issuer.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::crypto::MasterKey;
use crate::issuer::IssuerSettings;

/// RSA modulus sizes accepted for `RSA_KEY_BITS`.
const SUPPORTED_KEY_BITS: [usize; 3] = [2048, 3072, 4096];

/// Validated issuer configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Master secret every per-prefix cipher key is derived from. **Required.**
    pub jwt_secret_key: String,

    /// Lifetime in minutes of every cached tier and of the issued token.
    #[serde(default = "default_jwt_expired")]
    pub jwt_expired: u64,

    /// RSA modulus size for newly generated key pairs.
    #[serde(default = "default_rsa_key_bits")]
    pub rsa_key_bits: usize,

    /// Per-request deadline in the worker loop.
    #[serde(default = "default_issue_timeout")]
    pub issue_timeout_secs: u64,

    /// Maximum number of requests the worker processes at once.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Redis server URL. When unset, tiers live in an in-process store.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// How often (seconds) the in-memory store drops expired entries.
    #[serde(default = "default_store_sweep_interval")]
    pub store_sweep_interval_secs: u64,

    /// OTLP collector endpoint. Spans are exported only when set.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("jwt_secret_key", &"[REDACTED]")
            .field("jwt_expired", &self.jwt_expired)
            .field("rsa_key_bits", &self.rsa_key_bits)
            .field("issue_timeout_secs", &self.issue_timeout_secs)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("store_sweep_interval_secs", &self.store_sweep_interval_secs)
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .field("log_level", &self.log_level)
            .finish()
    }
}

fn default_jwt_expired() -> u64 {
    15
}
fn default_rsa_key_bits() -> usize {
    2048
}
fn default_issue_timeout() -> u64 {
    30
}
fn default_worker_concurrency() -> usize {
    64
}
fn default_store_sweep_interval() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Settings handed to the issuer; hashes the master secret.
    pub fn issuer_settings(&self) -> IssuerSettings {
        IssuerSettings {
            master_key: MasterKey::from_secret(&self.jwt_secret_key),
            ttl_minutes: self.jwt_expired,
        }
    }

    pub fn issue_timeout(&self) -> Duration {
        Duration::from_secs(self.issue_timeout_secs)
    }

    pub fn store_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.store_sweep_interval_secs)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.jwt_secret_key, "JWT_SECRET_KEY")?;
        if let Some(endpoint) = &self.otel_exporter_otlp_endpoint {
            ensure_non_empty(endpoint, "OTEL_EXPORTER_OTLP_ENDPOINT")?;
        }
        if let Some(url) = &self.redis_url {
            ensure_non_empty(url, "REDIS_URL")?;
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                anyhow::bail!("REDIS_URL must use the redis:// or rediss:// scheme");
            }
        }

        if self.jwt_expired == 0 {
            anyhow::bail!("JWT_EXPIRED must be > 0");
        }
        // Keeps `now ± ttl` comfortably inside chrono's range.
        if self.jwt_expired > 60 * 24 * 365 {
            anyhow::bail!("JWT_EXPIRED must be at most one year of minutes");
        }
        if !SUPPORTED_KEY_BITS.contains(&self.rsa_key_bits) {
            anyhow::bail!(
                "RSA_KEY_BITS must be one of {SUPPORTED_KEY_BITS:?}, got {}",
                self.rsa_key_bits
            );
        }
        if self.issue_timeout_secs == 0 {
            anyhow::bail!("ISSUE_TIMEOUT_SECS must be > 0");
        }
        if self.worker_concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be > 0");
        }
        if self.store_sweep_interval_secs == 0 {
            anyhow::bail!("STORE_SWEEP_INTERVAL_SECS must be > 0");
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
