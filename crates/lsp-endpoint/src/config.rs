//! Endpoint configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{EndpointError, Result};

/// Settings consumed when an endpoint is started
///
/// ```toml
/// timeout_ms = 5000
/// thread_name = "rust-analyzer-reader"
/// max_message_size_mb = 64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// How long `call` waits for a response (in milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Name of the dispatcher thread
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Largest frame body the framed transport accepts, in MB
    #[serde(default = "default_max_message_size")]
    pub max_message_size_mb: usize,
}

fn default_timeout_ms() -> u64 { 2000 }
fn default_thread_name() -> String { "lsp-endpoint-dispatcher".to_string() }
fn default_max_message_size() -> usize { 32 }

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            thread_name: default_thread_name(),
            max_message_size_mb: default_max_message_size(),
        }
    }
}

impl EndpointConfig {
    /// Set the call timeout. Sub-millisecond durations round up to 1 ms.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout
            .as_nanos()
            .div_ceil(1_000_000)
            .try_into()
            .unwrap_or(u64::MAX);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_size_mb.saturating_mul(1024 * 1024)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(EndpointError::InvalidConfig(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(EndpointError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        if self.max_message_size_mb == 0 {
            return Err(EndpointError::InvalidConfig(
                "max_message_size_mb must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
