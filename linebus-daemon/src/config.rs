//! Configuration management
//!
//! Settings come from an optional TOML file and are then overridden by
//! command-line flags.

use anyhow::{Context, Result};
use linebus_broadcaster::BusConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::Cli;

/// Daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// File the configuration was loaded from, if any
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// Attach stdin as a read side
    pub stdin: bool,

    /// Attach stdout as a write side
    pub stdout: bool,

    /// Keep running after stdin reaches end of input
    pub run_forever: bool,

    /// Unix socket paths to listen on
    pub listen: Vec<PathBuf>,

    /// Bus settings
    #[serde(flatten)]
    pub bus: BusConfig,
}

impl DaemonConfig {
    /// Load the file named by `--config` (or the default file if present),
    /// then apply command-line overrides
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_cli(cli);
        config.bus.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: DaemonConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Flags switch options on; valued flags replace; sockets are appended
    pub fn apply_cli(&mut self, cli: &Cli) {
        self.stdin |= cli.stdin;
        self.stdout |= cli.stdout;
        self.run_forever |= cli.forever;
        self.bus.echo |= cli.echo;
        self.bus.require_well_formed |= cli.json;

        if let Some(size) = cli.line_buffer_size {
            self.bus.line_buffer_size = size;
        }
        if let Some(path) = &cli.readout_file {
            self.bus.readout_file = Some(path.clone());
        }
        if let Some(capacity) = cli.queue_capacity {
            self.bus.queue_capacity = capacity;
        }
        if let Some(policy) = cli.on_overflow {
            self.bus.on_overflow = policy;
        }
        if let Some(mode) = cli.socket_mode {
            self.bus.socket_mode = Some(mode);
        }

        for socket in &cli.sockets {
            if !self.listen.contains(socket) {
                self.listen.push(socket.clone());
            }
        }
    }

    /// `<config dir>/linebus/config.toml`
    fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("linebus").join("config.toml"))
    }
}
