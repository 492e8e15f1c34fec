//! Module E: the Unix-socket acceptor, hand-off queue, and fixed worker
//! pool (spec §4.E).
//!
//! Grounded on the channel-fed worker pool in the wider example pack's
//! `doorway` crate (`WorkerPool`/`worker_task`): an acceptor hands
//! accepted connections to a bounded `mpsc` channel; a fixed number of
//! worker tasks pull from it and own a connection for its full lifetime.
//! Unlike `doorway`'s pool (which ships one outbound payload per request
//! through a shared connection), here each worker owns one *inbound*
//! connection end to end, since a cmdretry client issues several
//! request/response pairs over the same socket.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "tracing")]
use tracing::{info, warn};

use crate::config::CoordinatorConfig;
use crate::service::ConnectionHandler;

/// Socket file mode required by spec §6.
const SOCKET_MODE: u32 = 0o600;

/// Live counters exposed for observability/testing.
#[derive(Default)]
pub struct TransportMetrics {
    /// Connections currently owned by a worker.
    pub active_connections: AtomicUsize,
    /// Connections rejected because the hand-off queue was full.
    pub rejected_connections: AtomicUsize,
}

/// Removes a stale socket file (if present), binds a fresh
/// [`UnixListener`] at `path`, and sets its permissions to `0600`.
pub async fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        tokio::fs::remove_file(path).await?;
    }
    let listener = UnixListener::bind(path)?;
    let permissions = std::fs::Permissions::from_mode(SOCKET_MODE);
    std::fs::set_permissions(path, permissions)?;
    Ok(listener)
}

/// Runs the acceptor loop until `shutdown` is cancelled: accepts
/// connections, hands each to the bounded queue, and dispatches `queue_len`
/// workers to drain it. Connections arriving when the queue is full are
/// closed immediately with no response (spec §4.E's load-shedding
/// behavior).
pub async fn serve(
    listener: UnixListener,
    handler: Arc<ConnectionHandler>,
    config: &CoordinatorConfig,
    shutdown: CancellationToken,
) {
    let (tx, rx) = mpsc::channel::<UnixStream>(config.queue_capacity);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let metrics = Arc::new(TransportMetrics::default());

    let mut worker_handles = Vec::with_capacity(config.worker_count);
    for worker_id in 0..config.worker_count {
        let rx = Arc::clone(&rx);
        let handler = Arc::clone(&handler);
        let metrics = Arc::clone(&metrics);
        let connection_timeout = config.connection_timeout;
        let shutdown = shutdown.clone();
        worker_handles.push(tokio::spawn(async move {
            worker_loop(worker_id, rx, handler, metrics, connection_timeout, shutdown).await;
        }));
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        match tx.try_send(stream) {
                            Ok(()) => {}
                            Err(_) => {
                                metrics.rejected_connections.fetch_add(1, Ordering::Relaxed);
                                #[cfg(feature = "tracing")]
                                warn!("hand-off queue full, rejecting connection");
                            }
                        }
                    }
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        warn!(error = %_err, "accept failed");
                    }
                }
            }
        }
    }

    drop(tx);
    for handle in worker_handles {
        let _ = handle.await;
    }

    #[cfg(feature = "tracing")]
    info!("transport shut down");
}

async fn worker_loop(
    _worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<UnixStream>>>,
    handler: Arc<ConnectionHandler>,
    metrics: Arc<TransportMetrics>,
    connection_timeout: std::time::Duration,
    shutdown: CancellationToken,
) {
    loop {
        let stream = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => return,
                next = rx.recv() => match next {
                    Some(stream) => stream,
                    None => return,
                },
            }
        };

        metrics.active_connections.fetch_add(1, Ordering::Relaxed);
        handler
            .handle_connection(stream, connection_timeout, shutdown.clone())
            .await;
        metrics.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_sets_socket_mode_0600() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = bind(&path).await.unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        drop(listener);
    }

    #[tokio::test]
    async fn bind_removes_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"not a socket").unwrap();
        let listener = bind(&path).await;
        assert!(listener.is_ok());
    }
}
