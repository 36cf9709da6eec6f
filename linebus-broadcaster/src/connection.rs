//! Connection lifecycle: admission, read loop, write loop and cleanup
//!
//! A connection owns up to two tasks. The read loop scans its input and hands
//! each line to the [`Broadcaster`](crate::Broadcaster); the write loop drains
//! the connection's bounded queue into its output, one flushed line at a time.
//! Whichever side finishes last removes the connection from the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{AbortHandle, JoinHandle};

use crate::bus::BusContext;
use crate::config::OverflowPolicy;
use crate::error::{BusError, Result};
use crate::readout;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::scanner::LineScanner;

/// Upper bound for the per-connection write buffer
const MAX_WRITE_BUFFER: usize = 64 * 1024;

#[derive(Default)]
struct Tasks {
    reader: Option<AbortHandle>,
    writer: Option<AbortHandle>,
}

/// One endpoint of the bus
pub struct Connection {
    id: ConnectionId,
    readable: AtomicBool,
    writable: AtomicBool,
    closed: AtomicBool,
    removed: AtomicBool,
    on_overflow: OverflowPolicy,
    echo: bool,
    queue: Mutex<Option<mpsc::Sender<Bytes>>>,
    tasks: Mutex<Tasks>,
    registry: Weak<ConnectionRegistry>,
}

impl Connection {
    /// Create a writable, not-yet-readable connection and its queue receiver
    pub(crate) fn new(
        id: ConnectionId,
        queue_capacity: usize,
        on_overflow: OverflowPolicy,
        echo: bool,
        registry: Weak<ConnectionRegistry>,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let connection = Arc::new(Self {
            id,
            readable: AtomicBool::new(false),
            writable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            on_overflow,
            echo,
            queue: Mutex::new(Some(tx)),
            tasks: Mutex::new(Tasks::default()),
            registry,
        });
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_readable(&self) -> bool {
        self.readable.load(Ordering::SeqCst)
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    /// Whether this connection's own lines are delivered back to it
    pub fn echoes(&self) -> bool {
        self.echo
    }

    /// Queue a line for this connection's write loop.
    ///
    /// Returns whether the line was queued. A connection that is not writable
    /// ignores the line. A full queue is handled per [`OverflowPolicy`].
    pub async fn enqueue_line(&self, line: Bytes) -> bool {
        if !self.is_writable() {
            return false;
        }
        let Some(tx) = self.sender() else {
            return false;
        };

        match tx.try_send(line) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => false,
            Err(TrySendError::Full(line)) => match self.on_overflow {
                OverflowPolicy::BlockSource => tx.send(line).await.is_ok(),
                OverflowPolicy::DropLine => {
                    tracing::debug!("Queue full on connection {}, dropping line", self.id);
                    false
                }
                OverflowPolicy::DisconnectConsumer => {
                    tracing::warn!("Queue full on connection {}, disconnecting consumer", self.id);
                    self.disconnect_writer();
                    self.evaluate_cleanup();
                    false
                }
            },
        }
    }

    /// Stop both directions. Safe to call any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.readable.store(false, Ordering::SeqCst);
        if let Some(reader) = self.tasks().reader.take() {
            reader.abort();
        }
        self.disconnect_writer();
        self.evaluate_cleanup();
    }

    /// Stop accepting new lines but let the write loop drain what is queued
    pub(crate) fn finish_writes(&self) {
        self.lock_queue().take();
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.lock_queue().clone()
    }

    fn mark_readable(&self) {
        self.readable.store(true, Ordering::SeqCst);
    }

    fn stop_reading(&self) {
        self.readable.store(false, Ordering::SeqCst);
    }

    fn stop_writing(&self) {
        self.writable.store(false, Ordering::SeqCst);
        self.lock_queue().take();
    }

    fn disconnect_writer(&self) {
        self.stop_writing();
        if let Some(writer) = self.tasks().writer.take() {
            writer.abort();
        }
    }

    fn set_tasks(&self, reader: Option<AbortHandle>, writer: Option<AbortHandle>) {
        {
            let mut tasks = self.tasks();
            tasks.reader = reader;
            tasks.writer = writer;
        }
        // close() may have run before the handles were stored
        if self.closed.load(Ordering::SeqCst) {
            let mut tasks = self.tasks();
            if let Some(reader) = tasks.reader.take() {
                reader.abort();
            }
            if let Some(writer) = tasks.writer.take() {
                writer.abort();
            }
        }
    }

    /// Remove from the registry once both sides are gone, exactly once
    fn evaluate_cleanup(&self) {
        if self.is_readable() || self.is_writable() {
            return;
        }
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        tracing::debug!("Connection {} cleaned up", self.id);
    }

    fn lock_queue(&self) -> MutexGuard<'_, Option<mpsc::Sender<Bytes>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by admission, used to wait for a connection to finish
pub struct ConnectionHandle {
    connection: Arc<Connection>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Wait for the read side to reach end of input, then for every line
    /// already queued for this connection to be written.
    ///
    /// Lines broadcast after the read side ends are no longer accepted.
    pub async fn wait(self) {
        if let Some(reader) = self.reader {
            if let Err(e) = reader.await {
                if e.is_panic() {
                    tracing::error!("Read loop of connection {} panicked", self.connection.id());
                }
            }
        }

        self.connection.finish_writes();

        if let Some(writer) = self.writer {
            if let Err(e) = writer.await {
                if e.is_panic() {
                    tracing::error!("Write loop of connection {} panicked", self.connection.id());
                }
            }
        }
    }
}

/// Register a connection for the given sides and start its loops
pub(crate) fn admit<R, W>(ctx: &Arc<BusContext>, reader: Option<R>, writer: Option<W>, echo: bool) -> ConnectionHandle
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let id = ctx.registry.next_id();
    let (connection, queue) = Connection::new(
        id,
        ctx.config.queue_capacity,
        ctx.config.on_overflow,
        echo,
        Arc::downgrade(&ctx.registry),
    );

    if reader.is_some() {
        connection.mark_readable();
    }
    let queue = if writer.is_some() {
        Some(queue)
    } else {
        connection.stop_writing();
        None
    };

    if reader.is_none() && writer.is_none() {
        connection.removed.store(true, Ordering::SeqCst);
        tracing::debug!("Connection {} has neither side, not registered", id);
        return ConnectionHandle {
            connection,
            reader: None,
            writer: None,
        };
    }

    // Both sides are initialized before anyone can see the connection
    ctx.registry.add(Arc::clone(&connection));

    let writer_task = writer
        .zip(queue)
        .map(|(writer, queue)| tokio::spawn(write_loop(Arc::clone(&connection), queue, writer, Arc::clone(ctx))));
    let reader_task = reader.map(|reader| tokio::spawn(read_loop(Arc::clone(&connection), reader, Arc::clone(ctx))));

    connection.set_tasks(
        reader_task.as_ref().map(JoinHandle::abort_handle),
        writer_task.as_ref().map(JoinHandle::abort_handle),
    );

    tracing::debug!(
        "Connection {} admitted (read: {}, write: {})",
        id,
        reader_task.is_some(),
        writer_task.is_some()
    );

    ConnectionHandle {
        connection,
        reader: reader_task,
        writer: writer_task,
    }
}

async fn read_loop<R>(connection: Arc<Connection>, reader: R, ctx: Arc<BusContext>)
where
    R: AsyncRead + Unpin,
{
    let id = connection.id();
    let mut scanner = LineScanner::new(reader, ctx.scan);

    while let Some(item) = scanner.next_line().await {
        match item {
            Ok(line) => {
                ctx.broadcaster.broadcast(&connection, line).await;
            }
            Err(e) if e.ends_scan() => {
                tracing::warn!("Read error on connection {}: {}", id, e);
                break;
            }
            Err(e) => {
                tracing::warn!("Dropped line from connection {}: {}", id, e);
            }
        }
    }

    tracing::debug!("Connection {} reached end of input", id);
    connection.stop_reading();
    connection.evaluate_cleanup();
}

async fn write_loop<W>(
    connection: Arc<Connection>,
    mut queue: mpsc::Receiver<Bytes>,
    writer: W,
    ctx: Arc<BusContext>,
) where
    W: AsyncWrite + Unpin,
{
    let id = connection.id();
    let capacity = ctx.config.line_buffer_size.saturating_add(1).min(MAX_WRITE_BUFFER);
    let mut writer = BufWriter::with_capacity(capacity, writer);

    // Backlog goes out before anything from the live queue
    if let Some(path) = ctx.config.readout_file.as_deref() {
        match readout::replay_file(path, &mut writer, ctx.scan).await {
            Ok(count) => tracing::debug!("Replayed {} lines from {:?} to connection {}", count, path, id),
            Err(e @ BusError::Readout { .. }) => tracing::warn!("{}", e),
            Err(e) => {
                tracing::warn!("Write error on connection {} during readout: {}", id, e);
                connection.stop_writing();
                connection.evaluate_cleanup();
                return;
            }
        }
    }

    while let Some(line) = queue.recv().await {
        if let Err(e) = write_line(&mut writer, &line).await {
            tracing::warn!("Write error on connection {}: {}", id, e);
            break;
        }
    }

    connection.stop_writing();
    connection.evaluate_cleanup();
}

/// Write one line plus its terminator and flush
pub(crate) async fn write_line<W>(writer: &mut W, line: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line).await.map_err(BusError::Write)?;
    writer.write_all(b"\n").await.map_err(BusError::Write)?;
    writer.flush().await.map_err(BusError::Write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::io::Builder;

    fn registered(
        registry: &Arc<ConnectionRegistry>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> (Arc<Connection>, mpsc::Receiver<Bytes>) {
        let (connection, rx) = Connection::new(registry.next_id(), capacity, policy, false, Arc::downgrade(registry));
        registry.add(Arc::clone(&connection));
        (connection, rx)
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (connection, mut rx) = registered(&registry, 8, OverflowPolicy::DisconnectConsumer);

        for line in ["a", "b", "c"] {
            assert!(connection.enqueue_line(Bytes::from(line)).await);
        }
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("a"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("b"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("c"));
    }

    #[tokio::test]
    async fn test_enqueue_on_unwritable_is_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (connection, mut rx) = registered(&registry, 8, OverflowPolicy::BlockSource);

        connection.stop_writing();
        assert!(!connection.enqueue_line(Bytes::from("ignored")).await);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_line_policy() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (connection, mut rx) = registered(&registry, 1, OverflowPolicy::DropLine);

        assert!(connection.enqueue_line(Bytes::from("kept")).await);
        assert!(!connection.enqueue_line(Bytes::from("dropped")).await);
        assert!(connection.is_writable());

        assert_eq!(rx.recv().await.unwrap(), Bytes::from("kept"));
        assert!(connection.enqueue_line(Bytes::from("after")).await);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("after"));
    }

    #[tokio::test]
    async fn test_disconnect_consumer_policy_removes_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (connection, mut rx) = registered(&registry, 1, OverflowPolicy::DisconnectConsumer);

        assert!(connection.enqueue_line(Bytes::from("first")).await);
        assert!(!connection.enqueue_line(Bytes::from("overflow")).await);

        assert!(!connection.is_writable());
        assert!(!registry.contains(connection.id()));

        // Queued line is still there, then the queue is closed for good
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("first"));
        assert!(rx.recv().await.is_none());
        assert!(!connection.enqueue_line(Bytes::from("late")).await);
    }

    #[tokio::test]
    async fn test_block_source_policy_waits_for_space() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (connection, mut rx) = registered(&registry, 1, OverflowPolicy::BlockSource);

        assert!(connection.enqueue_line(Bytes::from("one")).await);
        let blocked = tokio::time::timeout(Duration::from_millis(50), connection.enqueue_line(Bytes::from("two"))).await;
        assert!(blocked.is_err(), "enqueue should wait while the queue is full");

        let pending = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.enqueue_line(Bytes::from("three")).await })
        };
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("one"));
        assert!(pending.await.unwrap());
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("three"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (connection, _rx) = registered(&registry, 4, OverflowPolicy::DropLine);
        connection.mark_readable();

        connection.close();
        connection.close();

        assert!(!connection.is_readable());
        assert!(!connection.is_writable());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_waits_for_both_sides() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (connection, _rx) = registered(&registry, 4, OverflowPolicy::DropLine);
        connection.mark_readable();

        connection.stop_writing();
        connection.evaluate_cleanup();
        assert!(registry.contains(connection.id()));

        connection.stop_reading();
        connection.evaluate_cleanup();
        assert!(!registry.contains(connection.id()));
    }

    #[tokio::test]
    async fn test_write_line_appends_newline() {
        let mut writer = Builder::new().write(b"hello").write(b"\n").build();
        write_line(&mut writer, b"hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_line_reports_write_error() {
        let mut writer = Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let err = write_line(&mut writer, b"hello").await.unwrap_err();
        assert!(matches!(err, BusError::Write(_)));
    }
}
