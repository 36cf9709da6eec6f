//! Bus configuration

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BusError, Result};
use crate::scanner::LineFilter;

/// Default maximum line length in bytes (1 MiB)
pub const DEFAULT_LINE_BUFFER_SIZE: usize = 1024 * 1024;

/// Default number of lines a connection may have queued for writing
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// What happens when a line is enqueued on a connection whose queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait for queue space, stalling the source's read loop
    BlockSource,
    /// Discard the line for this consumer only
    DropLine,
    /// Mark the consumer not-writable and drop its write side
    #[default]
    DisconnectConsumer,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::BlockSource => "block-source",
            OverflowPolicy::DropLine => "drop-line",
            OverflowPolicy::DisconnectConsumer => "disconnect-consumer",
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverflowPolicy {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "block-source" | "block" => Ok(Self::BlockSource),
            "drop-line" | "drop" => Ok(Self::DropLine),
            "disconnect-consumer" | "disconnect" => Ok(Self::DisconnectConsumer),
            other => Err(BusError::Config(format!(
                "unknown overflow policy '{}' (expected block-source, drop-line or disconnect-consumer)",
                other
            ))),
        }
    }
}

/// Bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Deliver lines back to the connection that produced them
    pub echo: bool,

    /// Maximum line length in bytes, terminator excluded
    pub line_buffer_size: usize,

    /// Drop lines that are not valid JSON
    pub require_well_formed: bool,

    /// File replayed to every newly admitted writable connection
    pub readout_file: Option<PathBuf>,

    /// Outbound queue capacity per connection
    pub queue_capacity: usize,

    /// Policy applied when an outbound queue is full
    pub on_overflow: OverflowPolicy,

    /// Permission bits applied to bound socket files (e.g. 0o600)
    pub socket_mode: Option<u32>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            echo: false,
            line_buffer_size: DEFAULT_LINE_BUFFER_SIZE,
            require_well_formed: false,
            readout_file: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            on_overflow: OverflowPolicy::default(),
            socket_mode: None,
        }
    }
}

impl BusConfig {
    /// Reject settings the bus cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.line_buffer_size == 0 {
            return Err(BusError::Config("line_buffer_size must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(BusError::Config("queue_capacity must be at least 1".to_string()));
        }
        if let Some(mode) = self.socket_mode {
            if mode > 0o7777 {
                return Err(BusError::Config(format!("socket_mode {:o} is not a valid mode", mode)));
            }
        }
        Ok(())
    }

    /// Scanner settings shared by read loops and backlog replay
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            max_line: self.line_buffer_size,
            filter: if self.require_well_formed {
                LineFilter::Json
            } else {
                LineFilter::Any
            },
        }
    }
}

/// Parameters for a [`LineScanner`](crate::scanner::LineScanner)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub max_line: usize,
    pub filter: LineFilter,
}

impl Default for ScanOptions {
    fn default() -> Self {
        BusConfig::default().scan_options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert!(!config.echo);
        assert_eq!(config.line_buffer_size, 1024 * 1024);
        assert_eq!(config.on_overflow, OverflowPolicy::DisconnectConsumer);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overflow_policy_parsing() {
        assert_eq!("drop-line".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::DropLine);
        assert_eq!("Block".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::BlockSource);
        assert!("sometimes".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn test_overflow_policy_serde_names() {
        let json = serde_json::to_string(&OverflowPolicy::DisconnectConsumer).unwrap();
        assert_eq!(json, "\"disconnect-consumer\"");
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = BusConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BusError::Config(_))));

        let config = BusConfig {
            line_buffer_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scan_options_follow_filter_flag() {
        let config = BusConfig {
            require_well_formed: true,
            line_buffer_size: 64,
            ..Default::default()
        };
        let opts = config.scan_options();
        assert_eq!(opts.max_line, 64);
        assert_eq!(opts.filter, LineFilter::Json);
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: BusConfig = serde_json::from_str(r#"{"echo": true, "on_overflow": "drop-line"}"#).unwrap();
        assert!(config.echo);
        assert_eq!(config.on_overflow, OverflowPolicy::DropLine);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
