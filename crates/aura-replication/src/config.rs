//! Replication configuration.
//!
//! Loaded from TOML or JSON, then overridden from `AURA_REPLICATION_*`
//! environment variables.

use crate::errors::ReplicationError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "AURA_REPLICATION_";

/// Tunables of one replicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Attempts per state pull
    pub pull_attempts: u32,
    /// Longest wait for one stream chunk, in milliseconds
    pub io_timeout_ms: u64,
    /// Call timeout used when a method declares none, in milliseconds
    pub default_call_timeout_ms: u64,
    /// Bytes per `buildState` chunk
    pub chunk_size: usize,
    /// Chunks buffered per inbound stream
    pub stream_buffer_chunks: usize,
    /// State loads running at once
    pub max_concurrent_state_loads: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            pull_attempts: 3,
            io_timeout_ms: 15_000,
            default_call_timeout_ms: 30_000,
            chunk_size: 32 * 1024,
            stream_buffer_chunks: 16,
            max_concurrent_state_loads: 8,
        }
    }
}

impl ReplicationConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn load_from_file(path: &Path) -> Result<Self, ReplicationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| ReplicationError::config(format!("Invalid TOML: {}", e))),
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| ReplicationError::config(format!("Invalid JSON: {}", e))),
            other => Err(ReplicationError::config(format!(
                "Unsupported config format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    /// Override fields from `AURA_REPLICATION_<FIELD>` variables.
    pub fn merge_with_env(&mut self) -> Result<(), ReplicationError> {
        self.merge_with_vars(std::env::vars())
    }

    fn merge_with_vars(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), ReplicationError> {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match field.to_ascii_lowercase().as_str() {
                "pull_attempts" => self.pull_attempts = parse_var(&key, &value)?,
                "io_timeout_ms" => self.io_timeout_ms = parse_var(&key, &value)?,
                "default_call_timeout_ms" => {
                    self.default_call_timeout_ms = parse_var(&key, &value)?
                }
                "chunk_size" => self.chunk_size = parse_var(&key, &value)?,
                "stream_buffer_chunks" => self.stream_buffer_chunks = parse_var(&key, &value)?,
                "max_concurrent_state_loads" => {
                    self.max_concurrent_state_loads = parse_var(&key, &value)?
                }
                _ => tracing::warn!(variable = %key, "ignoring unknown replication setting"),
            }
        }
        Ok(())
    }

    /// Reject zero values.
    pub fn validate(&self) -> Result<(), ReplicationError> {
        let checks = [
            ("pull_attempts", self.pull_attempts == 0),
            ("io_timeout_ms", self.io_timeout_ms == 0),
            ("default_call_timeout_ms", self.default_call_timeout_ms == 0),
            ("chunk_size", self.chunk_size == 0),
            ("stream_buffer_chunks", self.stream_buffer_chunks == 0),
            (
                "max_concurrent_state_loads",
                self.max_concurrent_state_loads == 0,
            ),
        ];
        match checks.iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(ReplicationError::config(format!(
                "{} must be greater than zero",
                field
            ))),
            None => Ok(()),
        }
    }

    /// Per-chunk stream wait
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Call timeout when a method declares none
    pub fn default_call_timeout(&self) -> Duration {
        Duration::from_millis(self.default_call_timeout_ms)
    }

    /// Set the attempts per pull
    pub fn with_pull_attempts(mut self, attempts: u32) -> Self {
        self.pull_attempts = attempts;
        self
    }

    /// Set the per-chunk stream wait
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the fallback call timeout
    pub fn with_default_call_timeout(mut self, timeout: Duration) -> Self {
        self.default_call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the chunk size in bytes
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set the inbound buffer depth
    pub fn with_stream_buffer_chunks(mut self, chunks: usize) -> Self {
        self.stream_buffer_chunks = chunks;
        self
    }

    /// Bound concurrent state loads
    pub fn with_max_concurrent_state_loads(mut self, loads: usize) -> Self {
        self.max_concurrent_state_loads = loads;
        self
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ReplicationError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ReplicationError::config(format!("{}={}: {}", key, value, e)))
}
