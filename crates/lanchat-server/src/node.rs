//! Lifecycle of one chat participant.
//!
//! [`Node::start`] brings the services up in dependency order (storage,
//! group channel, file transfer, HTTP gateway), each loop on its own task.
//! [`Node::shutdown`] tears them down again and may be called any number
//! of times from any task.

use std::net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lanchat_net::{GroupChannel, GroupNotification, TransferServer, WorkerPool};
use lanchat_shared::constants::APP_NAME;
use lanchat_shared::{FileId, FileRecord, TranscriptEntry};
use lanchat_store::{SessionRegistry, Transcript};

use crate::api::Gateway;
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::events::NodeEvent;
use crate::session::Session;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Addresses the running services actually bound.
#[derive(Debug, Clone, Copy)]
pub struct BoundAddrs {
    pub group: SocketAddr,
    pub transfer: SocketAddr,
    pub http: SocketAddr,
}

pub struct Node {
    session: Arc<Session>,
    pool: WorkerPool,
    addrs: BoundAddrs,
    connected: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    /// Service loops, awaited on shutdown.
    loops: Mutex<Vec<JoinHandle<()>>>,
    /// Callback forwarders, aborted on shutdown.
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub async fn start(config: NodeConfig) -> Result<Self> {
        if config.max_workers == 0 {
            return Err(NodeError::Config("max_workers must be at least 1".into()));
        }
        if config.display_name.contains(':') {
            return Err(NodeError::Config(format!(
                "display name {:?} may not contain ':'",
                config.display_name
            )));
        }

        let registry = Arc::new(
            SessionRegistry::open(&config.session_dir, config.max_file_size).await?,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::new(config.max_workers);

        let group = Arc::new(GroupChannel::bind(config.group_addr, config.interface)?);
        let transfer = TransferServer::bind(config.transfer_addr, registry.clone()).await?;
        let transfer_addr = transfer.local_addr()?;

        let session = Arc::new(Session::new(
            config.display_name.clone(),
            registry.clone(),
            group.clone(),
            transfer_addr.port(),
        ));

        let mut loops = Vec::with_capacity(4);

        let (notifications, receiver) = group.spawn_receiver(shutdown_rx.clone());
        loops.push(receiver);
        loops.push(tokio::spawn(dispatch(session.clone(), notifications)));

        loops.push(tokio::spawn(
            transfer.serve(pool.clone(), shutdown_rx.clone()),
        ));

        let gateway = Gateway::bind(config.http_addr, session.clone()).await?;
        let http_addr = gateway.local_addr()?;
        loops.push(tokio::spawn(gateway.serve(pool.clone(), shutdown_rx)));

        let node = Self {
            session,
            pool,
            addrs: BoundAddrs {
                group: group.target(),
                transfer: transfer_addr,
                http: http_addr,
            },
            connected: AtomicBool::new(true),
            shutdown_tx,
            loops: Mutex::new(loops),
            listeners: Mutex::new(Vec::new()),
        };

        node.announce_join(&config).await;
        Ok(node)
    }

    async fn announce_join(&self, config: &NodeConfig) {
        let name = self.session.display_name();
        if let Err(e) = self
            .session
            .broadcast_system(format!("{name} joined the chat"))
            .await
        {
            warn!(error = %e, "Failed to announce join");
        }

        let host = advertised_ip(self.addrs.http.ip());
        let banner = [
            format!("=== {APP_NAME} ==="),
            format!("Connected as: {name}"),
            format!("Multicast Address: {}", self.addrs.group),
            format!("File Server: {}:{}", host, self.addrs.transfer.port()),
            format!("Web UI: http://{}:{}", host, self.addrs.http.port()),
            format!("Max file size: {}", format_size(config.max_file_size)),
            format!("Session ID: {}", self.session.session_id()),
            "=".repeat(APP_NAME.len() + 8),
        ];
        for line in banner {
            self.session.append(TranscriptEntry::notice(line)).await;
        }

        info!(
            name,
            session = %self.session.session_id(),
            group = %self.addrs.group,
            transfer = %self.addrs.transfer,
            http = %self.addrs.http,
            "Node started"
        );
    }

    pub fn display_name(&self) -> &str {
        self.session.display_name()
    }

    pub fn addrs(&self) -> BoundAddrs {
        self.addrs
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn transcript(&self) -> &Arc<Transcript> {
        self.session.transcript()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.session.registry()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.session.subscribe()
    }

    pub async fn send_local_message(&self, text: &str) -> Result<TranscriptEntry> {
        self.session.send_local_message(text).await
    }

    pub async fn share_local_file(&self, path: &Path) -> Result<FileRecord> {
        self.session.share_local_file(path).await
    }

    pub async fn clear_local_session(&self) -> Result<usize> {
        self.session.clear_local_session().await
    }

    pub async fn download_remote_file(&self, file_id: &FileId, dest_dir: &Path) -> Result<PathBuf> {
        self.session.download_file(file_id, dest_dir).await
    }

    /// Call `callback` for every transcript line appended from now on.
    pub async fn on_transcript_appended<F>(&self, callback: F)
    where
        F: Fn(TranscriptEntry) + Send + 'static,
    {
        self.forward(move |event| {
            if let NodeEvent::TranscriptAppended(entry) = event {
                callback(entry);
            }
        })
        .await;
    }

    /// Call `callback` for every file announced by another participant.
    pub async fn on_file_announced<F>(&self, callback: F)
    where
        F: Fn(FileRecord) + Send + 'static,
    {
        self.forward(move |event| {
            if let NodeEvent::FileAnnounced(record) = event {
                callback(record);
            }
        })
        .await;
    }

    async fn forward<F>(&self, handler: F)
    where
        F: Fn(NodeEvent) + Send + 'static,
    {
        let mut events = self.session.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Event listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.listeners.lock().await.push(handle);
    }

    /// Stop every service. Only the first call does anything.
    pub async fn shutdown(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down");

        let name = self.session.display_name();
        if let Err(e) = self
            .session
            .broadcast_system(format!("{name} left the chat"))
            .await
        {
            debug!(error = %e, "Failed to announce leave");
        }

        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.session.group().leave() {
            warn!(error = %e, "Failed to leave group");
        }
        self.pool.shutdown().await;

        let loops = std::mem::take(&mut *self.loops.lock().await);
        for handle in loops {
            let abort = handle.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("Service loop did not stop in time, aborting");
                abort.abort();
            }
        }
        for handle in std::mem::take(&mut *self.listeners.lock().await) {
            handle.abort();
        }

        info!("Node stopped");
    }
}

async fn dispatch(session: Arc<Session>, mut notifications: mpsc::Receiver<GroupNotification>) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            GroupNotification::FrameReceived { source, frame } => {
                session.handle_frame(source, frame).await;
            }
        }
    }
    debug!("Dispatcher stopped");
}

/// Address other hosts can reach us on, for display only.
fn advertised_ip(bound: IpAddr) -> IpAddr {
    if !bound.is_unspecified() {
        return bound;
    }
    // Connecting a UDP socket sends nothing; it only selects a route.
    StdUdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(bound)
}

fn format_size(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= GIB && bytes % GIB == 0 {
        format!("{}GB", bytes / GIB)
    } else if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{bytes} bytes")
    }
}
