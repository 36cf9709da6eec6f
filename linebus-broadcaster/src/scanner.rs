//! Newline-delimited line scanner
//!
//! Turns any `AsyncRead` into a finite sequence of line results. Each item is
//! either a line payload (terminator stripped) or an error; consumers drive it
//! with an explicit loop:
//!
//! ```no_run
//! # use linebus_broadcaster::{LineScanner, ScanOptions};
//! # async fn demo(reader: tokio::io::Stdin) {
//! let mut scanner = LineScanner::new(reader, ScanOptions::default());
//! while let Some(item) = scanner.next_line().await {
//!     match item {
//!         Ok(line) => println!("{} bytes", line.len()),
//!         Err(e) if e.ends_scan() => break,
//!         Err(e) => eprintln!("skipped: {}", e),
//!     }
//! }
//! # }
//! ```

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::config::ScanOptions;
use crate::error::{BusError, Result};

/// Well-formedness predicate applied to every scanned line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineFilter {
    /// Every line passes
    #[default]
    Any,
    /// Only syntactically valid JSON passes
    Json,
}

impl LineFilter {
    pub fn accepts(&self, line: &[u8]) -> bool {
        match self {
            LineFilter::Any => true,
            LineFilter::Json => serde_json::from_slice::<serde::de::IgnoredAny>(line).is_ok(),
        }
    }
}

/// Lazy line reader with a length bound and an optional filter
pub struct LineScanner<R> {
    reader: BufReader<R>,
    options: ScanOptions,
    line: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> LineScanner<R> {
    pub fn new(reader: R, options: ScanOptions) -> Self {
        Self {
            reader: BufReader::new(reader),
            options,
            line: Vec::new(),
            finished: false,
        }
    }

    /// Next line, a recoverable `MalformedLine`, or a terminal error.
    ///
    /// Returns `None` at end of stream and after any terminal error.
    pub async fn next_line(&mut self) -> Option<Result<Bytes>> {
        if self.finished {
            return None;
        }

        match self.read_raw_line().await {
            Ok(Some(line)) => {
                if self.options.filter.accepts(&line) {
                    Some(Ok(line))
                } else {
                    Some(Err(BusError::MalformedLine { len: line.len() }))
                }
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    async fn read_raw_line(&mut self) -> Result<Option<Bytes>> {
        let limit = self.options.max_line;
        self.line.clear();

        loop {
            let available = match self.reader.fill_buf().await {
                Ok(buf) => buf,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(BusError::Io(e)),
            };

            if available.is_empty() {
                // A trailing unterminated line still counts
                if self.line.is_empty() {
                    return Ok(None);
                }
                break;
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    if self.line.len() + pos > limit {
                        return Err(BusError::LineTooLong { limit });
                    }
                    self.line.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    break;
                }
                None => {
                    let n = available.len();
                    if self.line.len() + n > limit {
                        return Err(BusError::LineTooLong { limit });
                    }
                    self.line.extend_from_slice(available);
                    self.reader.consume(n);
                }
            }
        }

        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        Ok(Some(Bytes::copy_from_slice(&self.line)))
    }
}
