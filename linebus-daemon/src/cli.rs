//! Command-line interface

use std::path::PathBuf;

use clap::Parser;
use linebus_broadcaster::OverflowPolicy;

/// Rebroadcast newline-delimited messages between stdio and Unix socket clients
#[derive(Debug, Clone, Parser)]
#[command(name = "linebus", version, about)]
pub struct Cli {
    /// Echo lines back to sender
    #[arg(long)]
    pub echo: bool,

    /// Read lines from stdin
    #[arg(short = 'i', long = "stdin")]
    pub stdin: bool,

    /// Output all lines on stdout
    #[arg(short = 'o', long = "stdout")]
    pub stdout: bool,

    /// Line buffer size in bytes
    #[arg(long = "linebuf", value_name = "BYTES")]
    pub line_buffer_size: Option<usize>,

    /// Verify every line to be valid JSON
    #[arg(long)]
    pub json: bool,

    /// Do not end program when stdin is closed
    #[arg(long)]
    pub forever: bool,

    /// Read out file on connection
    #[arg(long = "file", value_name = "PATH")]
    pub readout_file: Option<PathBuf>,

    /// Lines queued per connection before the overflow policy applies
    #[arg(long, value_name = "LINES")]
    pub queue_capacity: Option<usize>,

    /// block-source, drop-line or disconnect-consumer
    #[arg(long, value_name = "POLICY")]
    pub on_overflow: Option<OverflowPolicy>,

    /// Octal permissions for socket files, e.g. 600
    #[arg(long, value_name = "MODE", value_parser = parse_mode)]
    pub socket_mode: Option<u32>,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Log warnings and errors only
    #[arg(short, long)]
    pub quiet: bool,

    /// Unix socket paths to listen on
    #[arg(value_name = "SOCKET")]
    pub sockets: Vec<PathBuf>,
}

impl Cli {
    /// Default log filter when RUST_LOG is unset
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

fn parse_mode(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0o");
    u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_flag_names() {
        let cli = Cli::try_parse_from([
            "linebus", "-i", "-o", "--echo", "--json", "--forever", "--linebuf", "4096", "--file",
            "/var/log/bus.log", "/tmp/a.sock", "/tmp/b.sock",
        ])
        .unwrap();

        assert!(cli.stdin && cli.stdout && cli.echo && cli.json && cli.forever);
        assert_eq!(cli.line_buffer_size, Some(4096));
        assert_eq!(cli.readout_file, Some(PathBuf::from("/var/log/bus.log")));
        assert_eq!(cli.sockets, vec![PathBuf::from("/tmp/a.sock"), PathBuf::from("/tmp/b.sock")]);
    }

    #[test]
    fn test_queue_options() {
        let cli = Cli::try_parse_from([
            "linebus",
            "--queue-capacity",
            "16",
            "--on-overflow",
            "drop-line",
            "--socket-mode",
            "0o660",
        ])
        .unwrap();

        assert_eq!(cli.queue_capacity, Some(16));
        assert_eq!(cli.on_overflow, Some(OverflowPolicy::DropLine));
        assert_eq!(cli.socket_mode, Some(0o660));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["linebus", "--on-overflow", "explode"]).is_err());
        assert!(Cli::try_parse_from(["linebus", "--socket-mode", "999"]).is_err());
        assert!(Cli::try_parse_from(["linebus", "-v", "-q"]).is_err());
    }

    #[test]
    fn test_log_level() {
        let cli = Cli::try_parse_from(["linebus", "-v"]).unwrap();
        assert_eq!(cli.log_level(), "debug");
        let cli = Cli::try_parse_from(["linebus"]).unwrap();
        assert_eq!(cli.log_level(), "info");
    }
}
