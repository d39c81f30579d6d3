//! Relay configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a config file is given, deep-merge its JSON over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! CLI flags are applied by the binary on top of the result.

use std::path::Path;
use std::time::Duration;

use ember_core::effect::DEFAULT_MAX_PARTICLE_COUNT;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Port used when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 8765;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Configuration for the relay server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind. `0` lets the OS pick one.
    pub port: u16,
    /// Seconds between liveness reports.
    pub stats_interval_secs: u64,
    /// Outbound messages buffered per connection before sends are dropped.
    pub max_send_queue: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Largest `particleCount` a render request may ask for.
    pub max_particle_count: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            stats_interval_secs: 30,
            max_send_queue: 1024,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            max_particle_count: DEFAULT_MAX_PARTICLE_COUNT,
        }
    }
}

impl ServerConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue("host must not be empty".into()));
        }
        if self.max_send_queue == 0 {
            return Err(ConfigError::InvalidValue(
                "max_send_queue must be at least 1".into(),
            ));
        }
        if self.max_particle_count == 0 {
            return Err(ConfigError::InvalidValue(
                "max_particle_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from defaults, an optional file, and the environment.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let mut config = load_config_file(path)?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Defaults merged with an optional JSON file, without env overrides.
pub fn load_config_file(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = match path {
        Some(path) => {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        None => defaults,
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides. Invalid values are ignored with a warning.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    if let Some(v) = read_env_u16("PORT", 0, 65535) {
        config.port = v;
    }
    if let Some(v) = read_env_string("RELAY_HOST") {
        config.host = v;
    }
    if let Some(v) = read_env_u64("RELAY_STATS_INTERVAL_SECS", 1, 86_400) {
        config.stats_interval_secs = v;
    }
    if let Some(v) = read_env_usize("RELAY_MAX_SEND_QUEUE", 1, 1_000_000) {
        config.max_send_queue = v;
    }
    if let Some(v) = read_env_usize("RELAY_MAX_MESSAGE_SIZE", 1024, 1 << 30) {
        config.max_message_size = v;
    }
    if let Some(v) = read_env_u64("RELAY_MAX_PARTICLES", 1, 10_000_000) {
        config.max_particle_count = u32::try_from(v).unwrap_or(u32::MAX);
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ──────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = read_env_string(name)?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = read_env_string(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = read_env_string(name)?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
