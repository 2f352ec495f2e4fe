//! Multicast group channel.
//!
//! Every participant binds the same group port and joins the same group, so
//! one `send_to` reaches every process, including the sender's own (loopback
//! stays enabled and duplicates are filtered further up).
//!
//! The receive loop runs in its own tokio task and forwards decoded frames
//! through an mpsc channel, leaving all state changes to the caller.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lanchat_shared::constants::MAX_DATAGRAM_SIZE;
use lanchat_shared::Frame;

use crate::error::NetError;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Notifications sent *from* the receive task to the application.
#[derive(Debug, Clone)]
pub enum GroupNotification {
    /// A well-formed frame arrived from `source`.
    FrameReceived { source: SocketAddr, frame: Frame },
}

#[derive(Debug, Clone, Copy)]
struct Membership {
    group: Ipv4Addr,
    interface: Ipv4Addr,
}

/// Send/receive endpoint on the group.
#[derive(Debug)]
pub struct GroupChannel {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    membership: Option<Membership>,
}

impl GroupChannel {
    /// Bind the group port and join `group` on `interface`.
    ///
    /// A non-multicast `group` (e.g. `127.0.0.1:0`) binds that address
    /// directly and sends to itself, which keeps the loopback path usable
    /// on hosts without multicast routing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(group: SocketAddrV4, interface: Ipv4Addr) -> Result<Self, NetError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;

        let multicast = group.ip().is_multicast();
        let bind_addr = if multicast {
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port())
        } else {
            group
        };
        socket.bind(&SocketAddr::V4(bind_addr).into())?;

        let membership = if multicast {
            socket.join_multicast_v4(group.ip(), &interface)?;
            socket.set_multicast_loop_v4(true)?;
            Some(Membership {
                group: *group.ip(),
                interface,
            })
        } else {
            None
        };

        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;
        let local = socket.local_addr()?;

        // Port 0 means "pick one", so the real port is only known now.
        let target = SocketAddr::V4(SocketAddrV4::new(*group.ip(), local.port()));

        info!(
            group = %target,
            local = %local,
            multicast,
            "Joined group channel"
        );

        Ok(Self {
            socket: Arc::new(socket),
            target,
            membership,
        })
    }

    /// Group address frames are sent to.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Transmit one frame as one datagram. No fragmentation, no retry.
    pub async fn send(&self, frame: &Frame) -> Result<usize, NetError> {
        let bytes = frame.encode()?;
        let sent = self.socket.send_to(&bytes, self.target).await?;
        debug!(kind = frame.kind(), len = sent, "Sent group frame");
        Ok(sent)
    }

    /// Spawn the receive loop.
    ///
    /// The loop exits once `shutdown` flips to `true` (or its sender is
    /// dropped), or when the returned receiver is dropped. Malformed frames
    /// are dropped; receive errors are logged and the loop keeps going.
    pub fn spawn_receiver(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<GroupNotification>, JoinHandle<()>) {
        let (notif_tx, notif_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let socket = self.socket.clone();

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

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

                    received = socket.recv_from(&mut buf) => match received {
                        Ok((len, source)) => match Frame::decode(&buf[..len]) {
                            Ok(frame) => {
                                debug!(kind = frame.kind(), %source, "Group frame received");
                                let notification = GroupNotification::FrameReceived { source, frame };
                                if notif_tx.send(notification).await.is_err() {
                                    debug!("Notification receiver dropped");
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(%source, len, error = %e, "Dropping malformed frame");
                            }
                        },
                        Err(e) => {
                            if *shutdown.borrow() {
                                break;
                            }
                            warn!(error = %e, "Group receive failed");
                            tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                        }
                    },
                }
            }

            info!("Group receive loop stopped");
        });

        (notif_rx, handle)
    }

    /// Leave the multicast group. A no-op for loopback channels.
    pub fn leave(&self) -> Result<(), NetError> {
        if let Some(m) = self.membership {
            self.socket.leave_multicast_v4(m.group, m.interface)?;
            info!(group = %m.group, "Left group channel");
        }
        Ok(())
    }
}
