//! Unix socket listener feeding accepted connections into a [`LineBus`]

use std::path::{Path, PathBuf};

use tokio::net::UnixListener;

use crate::bus::LineBus;
use crate::error::{BusError, Result};

/// Accepts Unix socket clients and admits each as a full-duplex connection.
///
/// The socket file is removed when the listener is dropped.
pub struct ListenServer {
    path: PathBuf,
    listener: UnixListener,
    bus: LineBus,
}

impl ListenServer {
    pub(crate) fn bind(bus: LineBus, path: &Path) -> Result<Self> {
        remove_stale_socket(path)?;

        let listener = UnixListener::bind(path).map_err(|source| BusError::Bind {
            path: path.to_path_buf(),
            source,
        })?;

        // Restrict access to the socket file if requested
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = bus.config().socket_mode {
                let permissions = std::fs::Permissions::from_mode(mode);
                std::fs::set_permissions(path, permissions).map_err(|source| BusError::Bind {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }

        tracing::info!("Listening on {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            listener,
            bus,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept clients until accepting fails
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let (reader, writer) = stream.into_split();
                    let handle = self.bus.admit(Some(reader), Some(writer), self.bus.config().echo);
                    tracing::info!(
                        "Client {} connected on {:?}. Total connections: {}",
                        handle.id(),
                        self.path,
                        self.bus.connection_count()
                    );
                }
                Err(source) => {
                    tracing::error!("Accept failed on {:?}: {}", self.path, source);
                    return Err(BusError::Accept {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }
    }
}

impl Drop for ListenServer {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!("Failed to remove socket {:?} on shutdown: {}", self.path, e);
            }
        }
    }
}

/// Remove whatever occupies `path` so a socket can be bound there.
///
/// Directories are removed recursively. A missing path is fine.
pub fn remove_stale_socket(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(BusError::StaleSocket {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let removed = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    removed.map_err(|source| BusError::StaleSocket {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!("Removed stale socket path {:?}", path);
    Ok(())
}
