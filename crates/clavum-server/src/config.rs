//! Server configuration for Clavum.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `CLAVUM_*` environment variables.

use std::net::SocketAddr;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Request-signature freshness window in milliseconds.
    pub signature_max_age_ms: i64,
    /// Default approval timeout in milliseconds.
    pub approval_timeout_ms: i64,
    /// Reclaim expired nonces on every Nth insert.
    pub nonce_gc_stride: u64,
    /// Tenant private-key cache TTL in seconds.
    pub key_cache_ttl_secs: u64,
    /// Whether to skip `mlock` (for development without `CAP_IPC_LOCK`).
    pub disable_mlock: bool,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// PostgreSQL persistent storage.
    Postgres { url: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (binds to `0.0.0.0`)
    /// - `CLAVUM_BIND_ADDR` — full bind address (overrides `PORT`, default: `127.0.0.1:8300`)
    /// - `CLAVUM_STORAGE` — `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL` — PostgreSQL connection string (required when `CLAVUM_STORAGE=postgres`)
    /// - `CLAVUM_LOG_LEVEL` — log filter (default: `info`)
    /// - `CLAVUM_SIGNATURE_MAX_AGE_MS` — signature window (default: `60000`)
    /// - `CLAVUM_APPROVAL_TIMEOUT_MS` — default approval timeout (default: `300000`)
    /// - `CLAVUM_NONCE_GC_STRIDE` — nonce GC every Nth insert (default: `50`)
    /// - `CLAVUM_KEY_CACHE_TTL_SECS` — tenant key cache TTL (default: `60`)
    /// - `CLAVUM_DISABLE_MLOCK` — skip `mlockall` for dev environments (default: `false`)
    #[must_use]
    pub fn from_env() -> Self {
        let bind_addr = if let Ok(addr) = std::env::var("CLAVUM_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8300)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8300);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8300))
        };

        let storage_backend = match std::env::var("CLAVUM_STORAGE")
            .unwrap_or_else(|_| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => {
                let url = std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/clavum".to_owned());
                StorageBackendType::Postgres { url }
            }
            _ => StorageBackendType::Memory,
        };

        let log_level = std::env::var("CLAVUM_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let signature_max_age_ms = env_i64("CLAVUM_SIGNATURE_MAX_AGE_MS", 60_000);
        let approval_timeout_ms = env_i64("CLAVUM_APPROVAL_TIMEOUT_MS", 300_000);

        let nonce_gc_stride = std::env::var("CLAVUM_NONCE_GC_STRIDE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &u64| n > 0)
            .unwrap_or(50);

        let key_cache_ttl_secs = std::env::var("CLAVUM_KEY_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let disable_mlock = std::env::var("CLAVUM_DISABLE_MLOCK")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            bind_addr,
            storage_backend,
            log_level,
            signature_max_age_ms,
            approval_timeout_ms,
            nonce_gc_stride,
            key_cache_ttl_secs,
            disable_mlock,
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(default)
}
