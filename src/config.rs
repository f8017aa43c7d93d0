use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TICK_MS: u64 = 50;
pub const DEFAULT_DRAIN_MS: u64 = 2000;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_MS: u64 = 1000;
pub const DEFAULT_SUBPROTOCOL: &str = "simboard";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("frequency must be a positive integer, got '{0}'")]
    InvalidFrequency(String),
    #[error("{0} must be greater than 0")]
    ZeroDuration(&'static str),
    #[error("failed to read token file {}: {source}", .path.display())]
    TokenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("token file {} is empty", .0.display())]
    EmptyToken(PathBuf),
}

/// Timing knobs for the publisher loop and its transport. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound on a single transport service call.
    pub tick_ms: u64,
    /// How long the publisher keeps draining after the simulation has ended.
    pub drain_ms: u64,
    pub write_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_ms: u64,
    /// Sent as `Sec-WebSocket-Protocol` when connecting. `None` sends no header.
    pub subprotocol: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            drain_ms: DEFAULT_DRAIN_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_ms: DEFAULT_RECONNECT_MS,
            subprotocol: Some(DEFAULT_SUBPROTOCOL.to_string()),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("tick_ms", self.tick_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("reconnect_ms", self.reconnect_ms),
        ];
        match fields.into_iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::ZeroDuration(name)),
            // A zero drain window is allowed: it means "do not wait for the peer".
            None => Ok(()),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

/// Parse a clock frequency in Hz. Zero, negative and non-numeric input are rejected.
pub fn parse_frequency(input: &str) -> Result<u32, ConfigError> {
    match input.trim().parse::<u32>() {
        Ok(frequency) if frequency > 0 => Ok(frequency),
        _ => Err(ConfigError::InvalidFrequency(input.to_string())),
    }
}

/// Read a bearer token from a file, ignoring surrounding whitespace.
pub fn read_token(path: impl AsRef<Path>) -> Result<String, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::TokenFile {
        path: path.to_path_buf(),
        source,
    })?;

    let token = contents.trim();
    if token.is_empty() {
        return Err(ConfigError::EmptyToken(path.to_path_buf()));
    }
    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frequency() {
        assert_eq!(parse_frequency("16000000").unwrap(), 16_000_000);
        assert_eq!(parse_frequency(" 8000000 ").unwrap(), 8_000_000);
        assert!(matches!(parse_frequency("0"), Err(ConfigError::InvalidFrequency(_))));
        assert!(matches!(parse_frequency("-1"), Err(ConfigError::InvalidFrequency(_))));
        assert!(matches!(parse_frequency("fast"), Err(ConfigError::InvalidFrequency(_))));
    }

    #[test]
    fn test_zero_tick_rejected() {
        let config = BridgeConfig {
            tick_ms: 0,
            ..BridgeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDuration("tick_ms"))));

        let config = BridgeConfig {
            drain_ms: 0,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: BridgeConfig = serde_json::from_str(r#"{"tick_ms": 10}"#).unwrap();
        assert_eq!(config.tick_ms, 10);
        assert_eq!(config.drain_ms, DEFAULT_DRAIN_MS);
        assert_eq!(config.subprotocol.as_deref(), Some(DEFAULT_SUBPROTOCOL));

        let config: BridgeConfig = serde_json::from_str(r#"{"subprotocol": null}"#).unwrap();
        assert_eq!(config.subprotocol, None);
    }

    #[test]
    fn test_read_token_trims_and_rejects_empty() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("simboard-token-{}", std::process::id()));
        let empty = dir.join(format!("simboard-token-empty-{}", std::process::id()));
        fs::write(&good, "  s3cret\n").unwrap();
        fs::write(&empty, "\n").unwrap();

        assert_eq!(read_token(&good).unwrap(), "s3cret");
        assert!(matches!(read_token(&empty), Err(ConfigError::EmptyToken(_))));
        assert!(matches!(
            read_token(dir.join("simboard-no-such-token")),
            Err(ConfigError::TokenFile { .. })
        ));

        fs::remove_file(good).unwrap();
        fs::remove_file(empty).unwrap();
    }
}
