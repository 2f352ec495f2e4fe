use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveTime, Timelike};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::constants::STAMP_FORMAT;

// File identifier = random 128-bit UUID, shared across processes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for FileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Metadata of a file shared during this session.
///
/// `storage_path` is `Some` only when the bytes live in local session
/// storage. Records announced by other participants carry `None` and are
/// fetched from `origin` on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: FileId,
    pub file_name: String,
    pub storage_path: Option<PathBuf>,
    pub owner: String,
    pub size_bytes: u64,
    pub announced_at: DateTime<Local>,
    /// Address the announcement came from (remote records only).
    pub origin: Option<IpAddr>,
}

impl FileRecord {
    pub fn is_local(&self) -> bool {
        self.storage_path.is_some()
    }

    /// `HH:MM:SS` of the announcement, as shown to web clients.
    pub fn stamp(&self) -> String {
        self.announced_at.format(STAMP_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Chat line from a participant.
    Chat,
    /// System notice received over the group channel.
    System,
    /// A remote participant announced a file.
    FileShared,
    /// Informational line that never left this process.
    Notice,
}

/// One line of the session transcript, kept structured until rendered.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub kind: EntryKind,
    pub sender: Option<String>,
    pub body: String,
    #[serde(serialize_with = "serialize_stamp")]
    pub time: NaiveTime,
}

impl TranscriptEntry {
    pub fn chat(sender: impl Into<String>, body: impl Into<String>, time: NaiveTime) -> Self {
        Self {
            kind: EntryKind::Chat,
            sender: Some(sender.into()),
            body: body.into(),
            time,
        }
    }

    pub fn system(body: impl Into<String>) -> Self {
        Self::unattributed(EntryKind::System, body.into())
    }

    pub fn notice(body: impl Into<String>) -> Self {
        Self::unattributed(EntryKind::Notice, body.into())
    }

    pub fn file_shared(file_name: &str) -> Self {
        Self::unattributed(EntryKind::FileShared, file_name.to_string())
    }

    fn unattributed(kind: EntryKind, body: String) -> Self {
        Self {
            kind,
            sender: None,
            body,
            time: now_stamp(),
        }
    }

    /// Human-readable line, exactly as the desktop transcript shows it.
    pub fn render(&self) -> String {
        match self.kind {
            EntryKind::Chat => format!(
                "[{}] {}: {}",
                self.time.format(STAMP_FORMAT),
                self.sender.as_deref().unwrap_or_default(),
                self.body
            ),
            EntryKind::FileShared => format!("File received: {}", self.body),
            EntryKind::System | EntryKind::Notice => self.body.clone(),
        }
    }
}

impl std::fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Current local time truncated to whole seconds.
pub fn now_stamp() -> NaiveTime {
    let now = Local::now().time();
    now.with_nanosecond(0).unwrap_or(now)
}

fn serialize_stamp<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.format(STAMP_FORMAT).to_string())
}
