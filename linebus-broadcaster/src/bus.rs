use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};

use crate::broadcaster::Broadcaster;
use crate::config::{BusConfig, ScanOptions};
use crate::connection::{self, ConnectionHandle};
use crate::error::Result;
use crate::listener::ListenServer;
use crate::registry::ConnectionRegistry;

/// State shared by every connection task
pub(crate) struct BusContext {
    pub(crate) config: BusConfig,
    pub(crate) scan: ScanOptions,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) broadcaster: Broadcaster,
}

/// Line bus: admits connections and fans their lines out to each other
///
/// Cloning is cheap; clones share one registry.
#[derive(Clone)]
pub struct LineBus {
    ctx: Arc<BusContext>,
}

impl LineBus {
    /// Create a bus with an empty registry
    pub fn new(config: BusConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        Ok(Self {
            ctx: Arc::new(BusContext {
                scan: config.scan_options(),
                config,
                registry,
                broadcaster,
            }),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.ctx.registry
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Admit a connection with an optional read side and an optional write side.
    ///
    /// With `echo`, lines read from this connection are also written back to it.
    pub fn admit<R, W>(&self, reader: Option<R>, writer: Option<W>, echo: bool) -> ConnectionHandle
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        connection::admit(&self.ctx, reader, writer, echo)
    }

    /// Admit a full-duplex stream as one connection, echoing per the bus config
    pub fn admit_stream<S>(&self, stream: S) -> ConnectionHandle
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.admit(Some(reader), Some(writer), self.ctx.config.echo)
    }

    /// Admit the process's standard streams. Returns `None` if neither is used.
    pub fn admit_stdio(&self, stdin: bool, stdout: bool) -> Option<ConnectionHandle> {
        let reader = stdin.then(tokio::io::stdin);
        let writer = stdout.then(tokio::io::stdout);
        if reader.is_none() && writer.is_none() {
            return None;
        }
        Some(self.admit::<Stdin, Stdout>(reader, writer, self.ctx.config.echo))
    }

    /// Bind a Unix socket listener whose connections join this bus.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(&self, path: impl AsRef<Path>) -> Result<ListenServer> {
        ListenServer::bind(self.clone(), path.as_ref())
    }
}
