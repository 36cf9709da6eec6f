//! Newline-delimited fan-out bus
//!
//! This crate rebroadcasts every line received on any connection to every
//! other connected writer. A connection may be the process's own stdio pair,
//! a client accepted on a Unix socket, or any `AsyncRead`/`AsyncWrite` pair.
//! Every connection is both a potential publisher and a potential subscriber.
//!
//! # Features
//!
//! - Unix domain socket listeners (stale socket files are replaced)
//! - Newline-delimited protocol, optional JSON validity filter
//! - Bounded per-connection write queues with a configurable overflow policy
//! - Per-connection ordering, independent delivery across connections
//! - Backlog file replayed to each new writer before live traffic
//!
//! # Example Usage
//!
//! ```no_run
//! use linebus_broadcaster::{BusConfig, LineBus};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = LineBus::new(BusConfig {
//!         require_well_formed: true,
//!         ..Default::default()
//!     })?;
//!
//!     // Mirror the bus on stdout
//!     let _stdout = bus.admit_stdio(false, true);
//!
//!     // Accept clients until accepting fails
//!     let server = bus.bind("/tmp/linebus.sock")?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod bus;
pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod readout;
pub mod registry;
pub mod scanner;

// Re-exports
pub use broadcaster::Broadcaster;
pub use bus::LineBus;
pub use config::{BusConfig, OverflowPolicy, ScanOptions};
pub use connection::{Connection, ConnectionHandle};
pub use error::{BusError, Result};
pub use listener::ListenServer;
pub use registry::{ConnectionId, ConnectionRegistry};
pub use scanner::{LineFilter, LineScanner};
