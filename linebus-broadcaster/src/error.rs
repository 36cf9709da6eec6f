use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line exceeds buffer size of {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("Malformed line ({len} bytes) is not valid JSON")]
    MalformedLine { len: usize },

    #[error("Write error: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to remove stale socket {path:?}: {source}")]
    StaleSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind {path:?}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept on {path:?}: {source}")]
    Accept {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open readout file {path:?}: {source}")]
    Readout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BusError {
    /// Whether a scanner item carrying this error terminates the scan.
    ///
    /// Only a rejected line is recoverable; everything else ends the read side.
    pub fn ends_scan(&self) -> bool {
        !matches!(self, BusError::MalformedLine { .. })
    }
}

pub type Result<T> = std::result::Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_malformed_lines_are_recoverable() {
        assert!(!BusError::MalformedLine { len: 3 }.ends_scan());
        assert!(BusError::LineTooLong { limit: 8 }.ends_scan());
        assert!(BusError::Io(std::io::Error::other("boom")).ends_scan());
    }

    #[test]
    fn test_error_messages_name_the_path() {
        let err = BusError::Bind {
            path: PathBuf::from("/tmp/bus.sock"),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("/tmp/bus.sock"));
    }
}
