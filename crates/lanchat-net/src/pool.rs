//! Bounded worker pool shared by the TCP listeners.
//!
//! Each accepted connection runs to completion on its own task. A semaphore
//! caps how many run at once; when the cap is reached the accept loop waits
//! for a slot instead of spawning more.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::NetError;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tasks: Arc<Mutex<JoinSet<()>>>,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
            max_workers,
        }
    }

    /// Workers currently running.
    pub fn active(&self) -> usize {
        self.max_workers - self.permits.available_permits()
    }

    /// Run `job` on a worker, waiting for a free slot first.
    ///
    /// Fails with [`NetError::PoolClosed`] once the pool is shut down.
    pub async fn spawn<F>(&self, job: F) -> Result<(), NetError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| NetError::PoolClosed)?;

        let mut tasks = self.tasks.lock().await;
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                if e.is_panic() {
                    warn!(error = %e, "Worker panicked");
                }
            }
        }
        tasks.spawn(async move {
            job.await;
            drop(permit);
        });
        Ok(())
    }

    /// Refuse new work and abort whatever is still running.
    pub async fn shutdown(&self) {
        self.permits.close();
        let mut tasks = self.tasks.lock().await;
        let in_flight = tasks.len();
        tasks.shutdown().await;
        debug!(in_flight, "Worker pool shut down");
    }
}

/// Accept connections until `shutdown` flips, handing each one to `pool`.
///
/// Accept errors are logged and retried. The listener is dropped (and the
/// port closed) when the loop returns.
pub async fn run_accept_loop<H, Fut>(
    service: &'static str,
    listener: TcpListener,
    pool: WorkerPool,
    mut shutdown: watch::Receiver<bool>,
    handler: H,
) where
    H: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    match listener.local_addr() {
        Ok(addr) => info!(service, %addr, "Listening"),
        Err(e) => warn!(service, error = %e, "Listening on unknown address"),
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(service, %peer, "Accepted connection");
                    if pool.spawn(handler(stream, peer)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(service, error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    info!(service, "Listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_pool_caps_concurrency() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        while pool.active() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = WorkerPool::new(1);
        pool.shutdown().await;
        assert!(matches!(
            pool.spawn(async {}).await,
            Err(NetError::PoolClosed)
        ));
    }

    #[tokio::test]
    async fn test_accept_loop_serves_and_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_accept_loop(
            "echo",
            listener,
            WorkerPool::new(4),
            shutdown_rx,
            |mut stream: TcpStream, _peer| async move {
                let mut buf = [0u8; 4];
                if stream.read_exact(&mut buf).await.is_ok() {
                    let _ = stream.write_all(&buf).await;
                }
            },
        ));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("accept loop did not stop")
            .unwrap();
    }
}
