//! Chat session state shared by the node, the gateway and the dispatcher.
//!
//! Every local action (chat, share, clear) and every frame from the group
//! goes through [`Session`], which keeps the registry, the transcript and
//! the presentation events consistent with what was put on the wire.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lanchat_net::{fetch_file, GroupChannel};
use lanchat_shared::constants::REMOTE_OWNER;
use lanchat_shared::protocol::chat_sender;
use lanchat_shared::types::now_stamp;
use lanchat_shared::{ChatLine, FileAnnouncement, FileId, FileRecord, Frame, FrameError, TranscriptEntry};
use lanchat_store::registry::sanitize_file_name;
use lanchat_store::{SessionRegistry, Transcript};

use crate::error::{NodeError, Result};
use crate::events::NodeEvent;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct Session {
    display_name: String,
    session_id: Uuid,
    registry: Arc<SessionRegistry>,
    transcript: Arc<Transcript>,
    group: Arc<GroupChannel>,
    /// Port peers run their transfer server on.
    peer_transfer_port: u16,
    events: broadcast::Sender<NodeEvent>,
}

impl Session {
    pub fn new(
        display_name: impl Into<String>,
        registry: Arc<SessionRegistry>,
        group: Arc<GroupChannel>,
        peer_transfer_port: u16,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            display_name: display_name.into(),
            session_id: Uuid::new_v4(),
            registry,
            transcript: Arc::new(Transcript::new()),
            group,
            peer_transfer_port,
            events,
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn transcript(&self) -> &Arc<Transcript> {
        &self.transcript
    }

    pub fn group(&self) -> &Arc<GroupChannel> {
        &self.group
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Append to the transcript and tell the presentation layer.
    pub async fn append(&self, entry: TranscriptEntry) {
        self.transcript.append(entry.clone()).await;
        let _ = self.events.send(NodeEvent::TranscriptAppended(entry));
    }

    /// Stamp, transmit and record a chat line on behalf of `sender`.
    ///
    /// `text` is sent as given; surrounding whitespace only matters for the
    /// emptiness check. The line is transmitted first; if the send fails
    /// nothing is appended.
    pub async fn send_chat(&self, sender: &str, text: &str) -> Result<TranscriptEntry> {
        if text.trim().is_empty() {
            return Err(NodeError::EmptyMessage);
        }

        let line = ChatLine::new(now_stamp(), sender, text);
        self.group.send(&Frame::Chat(line.render())).await?;

        let entry = TranscriptEntry::chat(line.sender, line.body, line.time);
        self.append(entry.clone()).await;
        Ok(entry)
    }

    /// Chat as the local participant.
    pub async fn send_local_message(&self, text: &str) -> Result<TranscriptEntry> {
        self.send_chat(&self.display_name, text).await
    }

    /// Broadcast a `SYS:` notice. Other members append it verbatim; the
    /// local copy arrives back through loopback.
    pub async fn broadcast_system(&self, body: impl Into<String>) -> Result<()> {
        self.group.send(&Frame::System(body.into())).await?;
        Ok(())
    }

    /// Copy a local file into session storage and announce it.
    pub async fn share_local_file(&self, path: &Path) -> Result<FileRecord> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| NodeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a file path: {}", path.display()),
            )))?;
        let file_name = announceable_name(file_name)?;

        let record = self
            .registry
            .register(&file_name, &self.display_name, path)
            .await?;
        self.announce_or_withdraw(record).await
    }

    /// Store `len` bytes from `reader` as a local file and announce it.
    pub async fn share_stream<R>(&self, file_name: &str, reader: R, len: u64) -> Result<FileRecord>
    where
        R: AsyncRead + Unpin,
    {
        let file_name = announceable_name(file_name)?;
        let record = self
            .registry
            .register_stream(&file_name, &self.display_name, reader, len)
            .await?;
        self.announce_or_withdraw(record).await
    }

    /// A share that could not be announced is removed again, so nothing is
    /// offered locally that the group never heard about.
    async fn announce_or_withdraw(&self, record: FileRecord) -> Result<FileRecord> {
        if let Err(e) = self.announce(&record).await {
            warn!(id = %record.file_id, error = %e, "Announcement failed, withdrawing file");
            if let Err(rm) = self.registry.remove(&record.file_id).await {
                warn!(id = %record.file_id, error = %rm, "Failed to withdraw file");
            }
            return Err(e);
        }
        Ok(record)
    }

    async fn announce(&self, record: &FileRecord) -> Result<()> {
        info!(id = %record.file_id, name = %record.file_name, size = record.size_bytes, "Sharing file");

        self.broadcast_system(format!(
            "[{}] {} shared a file: {}",
            record.stamp(),
            record.owner,
            record.file_name
        ))
        .await?;

        let announcement = FileAnnouncement {
            file_id: record.file_id,
            file_name: record.file_name.clone(),
            size_bytes: record.size_bytes,
        };
        self.group.send(&Frame::FileAnnounce(announcement)).await?;
        Ok(())
    }

    /// Remove this participant's files, tell the group and note it locally.
    ///
    /// Returns how many records were removed. Remote records stay.
    pub async fn clear_local_session(&self) -> Result<usize> {
        let removed = self.registry.clear_owned_by(&self.display_name).await;
        self.broadcast_system(format!("{} cleared the session", self.display_name))
            .await?;
        self.append(TranscriptEntry::notice("Session cleared - all files removed"))
            .await;
        Ok(removed)
    }

    /// Apply one frame received from the group.
    pub async fn handle_frame(&self, source: SocketAddr, frame: Frame) {
        match frame {
            Frame::Chat(line) => {
                if chat_sender(&line).as_deref() == Some(self.display_name.as_str()) {
                    debug!(%source, "Suppressing own chat line");
                    return;
                }
                let entry = match ChatLine::parse(&line) {
                    Some(chat) => TranscriptEntry::chat(chat.sender, chat.body, chat.time),
                    None => TranscriptEntry::notice(line),
                };
                self.append(entry).await;
            }

            Frame::FileAnnounce(announcement) => {
                let (record, inserted) = self
                    .registry
                    .register_remote(
                        announcement.file_id,
                        &announcement.file_name,
                        REMOTE_OWNER,
                        announcement.size_bytes,
                        Some(source.ip()),
                    )
                    .await;
                if !inserted {
                    debug!(id = %record.file_id, "Ignoring known file announcement");
                    return;
                }
                self.append(TranscriptEntry::file_shared(&record.file_name))
                    .await;
                let _ = self.events.send(NodeEvent::FileAnnounced(record));
            }

            Frame::System(body) => self.append(TranscriptEntry::system(body)).await,
        }
    }

    /// Fetch a file into `dest_dir` and return where it landed.
    ///
    /// Remote records are pulled from the transfer server of the peer that
    /// announced them; local records are copied out of session storage.
    pub async fn download_file(&self, file_id: &FileId, dest_dir: &Path) -> Result<PathBuf> {
        let record = self.registry.get(file_id).await?;
        let dest = dest_dir.join(sanitize_file_name(&record.file_name)?);

        if let Some(source) = &record.storage_path {
            tokio::fs::copy(source, &dest).await?;
            return Ok(dest);
        }

        let origin = record.origin.ok_or(NodeError::UnknownPeer(*file_id))?;
        let peer = SocketAddr::new(origin, self.peer_transfer_port);
        match fetch_file(peer, file_id, &dest).await {
            Ok(bytes) => {
                info!(%peer, id = %file_id, bytes, "Downloaded file");
                Ok(dest)
            }
            Err(e) => {
                warn!(%peer, id = %file_id, error = %e, "Download failed");
                Err(e.into())
            }
        }
    }
}

/// Names with a colon cannot be announced, so refuse them before any
/// bytes are stored.
fn announceable_name(raw: &str) -> Result<String> {
    let name = sanitize_file_name(raw)?;
    if name.contains(':') {
        return Err(FrameError::ColonInFileName(name).into());
    }
    Ok(name)
}
