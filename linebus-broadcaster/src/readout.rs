//! Backlog replay for newly admitted writers

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncWrite;

use crate::config::ScanOptions;
use crate::connection::write_line;
use crate::error::{BusError, Result};
use crate::scanner::LineScanner;

/// Write every line of `path` to `writer`, returning how many were written.
///
/// Fails with [`BusError::Readout`] if the file cannot be opened and with
/// [`BusError::Write`] if the writer fails. Scan problems inside the file are
/// logged: malformed lines are skipped, a terminal scan error ends the replay.
pub async fn replay_file<W>(path: &Path, writer: &mut W, options: ScanOptions) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let file = File::open(path).await.map_err(|source| BusError::Readout {
        path: path.to_path_buf(),
        source,
    })?;

    let mut scanner = LineScanner::new(file, options);
    let mut replayed = 0;

    while let Some(item) = scanner.next_line().await {
        match item {
            Ok(line) => {
                write_line(writer, &line).await?;
                replayed += 1;
            }
            Err(e) if e.ends_scan() => {
                tracing::warn!("Readout of {:?} stopped early: {}", path, e);
                break;
            }
            Err(e) => {
                tracing::warn!("Readout of {:?} skipped line: {}", path, e);
            }
        }
    }

    Ok(replayed)
}
