//! Configuration types shared by the session, relay and front ends

use crate::error::{MuxError, Result};
use chunkmux_protocol::constants::MAX_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// TLS configuration for tunnel connections
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Enable TLS
    pub enabled: bool,
    /// CA certificate used to verify the relay (client side)
    pub ca_cert_path: Option<PathBuf>,
    /// Certificate chain presented by the relay
    pub cert_path: Option<PathBuf>,
    /// Private key matching `cert_path`
    pub key_path: Option<PathBuf>,
    /// Server name for SNI (client side)
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn validate_server(&self) -> Result<()> {
        if self.enabled && (self.cert_path.is_none() || self.key_path.is_none()) {
            return Err(MuxError::Config(
                "TLS requires both a certificate and a private key".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-session multiplexer limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum concurrently tracked streams
    pub max_streams: usize,
    /// Maximum chunk payload accepted or produced on a tunnel (default: 16MB)
    pub max_chunk_size: usize,
    /// How long a close waits for a pending open handshake before going out anyway
    pub close_deferral_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_streams: 1024,
            max_chunk_size: MAX_CHUNK_SIZE,
            close_deferral_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_streams == 0 {
            return Err(MuxError::Config("max_streams must be positive".to_string()));
        }
        if self.max_chunk_size < 64 {
            return Err(MuxError::Config(format!(
                "max_chunk_size of {} bytes is too small",
                self.max_chunk_size
            )));
        }
        if self.close_deferral_timeout.is_zero() {
            return Err(MuxError::Config(
                "close_deferral_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reconnection backoff for redialing tunnels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Base delay for reconnection backoff
    pub base: Duration,
    /// Maximum delay for reconnection backoff
    pub max: Duration,
    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
    /// Give up after this many consecutive failures (0 = never)
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter_factor: 0.3,
            max_attempts: 0,
        }
    }
}
