//! Group Channel wire framing.
//!
//! Each datagram carries exactly one frame: an ASCII prefix followed by a
//! UTF-8 payload. There is no length header and no escaping.
//!
//! ```text
//! MSG:[HH:MM:SS] <name>: <body>
//! FILE:<fileId>:<fileName>:<sizeBytes>
//! SYS:<body>
//! ```

use chrono::NaiveTime;

use crate::constants::{MAX_DATAGRAM_SIZE, STAMP_FORMAT};
use crate::error::FrameError;
use crate::types::FileId;

pub const MESSAGE_PREFIX: &str = "MSG:";
pub const FILE_PREFIX: &str = "FILE:";
pub const SYSTEM_PREFIX: &str = "SYS:";

/// A decoded Group Channel datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Fully rendered chat line.
    Chat(String),
    /// Announcement of a file available from the sender's transfer server.
    FileAnnounce(FileAnnouncement),
    /// Join/leave/clear notices, forwarded verbatim.
    System(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAnnouncement {
    pub file_id: FileId,
    pub file_name: String,
    pub size_bytes: u64,
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Chat(_) => "MSG",
            Frame::FileAnnounce(_) => "FILE",
            Frame::System(_) => "SYS",
        }
    }

    /// Serialize to datagram bytes, refusing anything that does not fit one
    /// datagram or that the colon-delimited `FILE` layout cannot carry.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let text = match self {
            Frame::Chat(line) => format!("{MESSAGE_PREFIX}{line}"),
            Frame::System(body) => format!("{SYSTEM_PREFIX}{body}"),
            Frame::FileAnnounce(ann) => {
                if ann.file_name.contains(':') {
                    return Err(FrameError::ColonInFileName(ann.file_name.clone()));
                }
                format!(
                    "{FILE_PREFIX}{}:{}:{}",
                    ann.file_id, ann.file_name, ann.size_bytes
                )
            }
        };

        if text.len() > MAX_DATAGRAM_SIZE {
            return Err(FrameError::TooLarge {
                size: text.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        Ok(text.into_bytes())
    }

    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(data).map_err(|_| FrameError::InvalidUtf8)?;

        if let Some(line) = text.strip_prefix(MESSAGE_PREFIX) {
            return Ok(Frame::Chat(line.to_string()));
        }
        if let Some(body) = text.strip_prefix(SYSTEM_PREFIX) {
            return Ok(Frame::System(body.to_string()));
        }
        if let Some(fields) = text.strip_prefix(FILE_PREFIX) {
            return decode_announcement(fields).map(Frame::FileAnnounce);
        }
        Err(FrameError::UnknownPrefix)
    }
}

fn decode_announcement(fields: &str) -> Result<FileAnnouncement, FrameError> {
    let malformed = |reason: &str| FrameError::Malformed {
        kind: "FILE",
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = fields.split(':').collect();
    let [id, name, size] = parts.as_slice() else {
        return Err(malformed("expected <fileId>:<fileName>:<sizeBytes>"));
    };

    let file_id = id.parse::<FileId>().map_err(|_| malformed("bad file id"))?;
    if name.is_empty() {
        return Err(malformed("empty file name"));
    }
    let size_bytes = size.trim().parse::<u64>().map_err(|_| malformed("bad size"))?;

    Ok(FileAnnouncement {
        file_id,
        file_name: name.to_string(),
        size_bytes,
    })
}

/// A chat line split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub time: NaiveTime,
    pub sender: String,
    pub body: String,
}

impl ChatLine {
    pub fn new(time: NaiveTime, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            time,
            sender: sender.into(),
            body: body.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.time.format(STAMP_FORMAT),
            self.sender,
            self.body
        )
    }

    /// Parse `[HH:MM:SS] <name>: <body>`. The name ends at the first colon
    /// after the stamp.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (stamp, rest) = rest.split_once("] ")?;
        let time = NaiveTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
        let (sender, body) = rest.split_once(':')?;
        let body = body.strip_prefix(' ').unwrap_or(body);
        Some(Self::new(time, sender.trim(), body))
    }
}

/// Display name a chat line claims to come from.
///
/// Falls back to the text before the first colon when the line carries no
/// stamp. This is only a heuristic: two participants may share a name.
pub fn chat_sender(line: &str) -> Option<String> {
    if let Some(parsed) = ChatLine::parse(line) {
        return Some(parsed.sender);
    }
    line.split_once(':').map(|(name, _)| name.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_encode_chat() {
        let line = ChatLine::new(stamp(10, 2, 3), "alice", "hello").render();
        let bytes = Frame::Chat(line).encode().unwrap();
        assert_eq!(bytes, b"MSG:[10:02:03] alice: hello");
    }

    #[test]
    fn test_decode_file_announcement() {
        let id = FileId::new();
        let raw = format!("FILE:{id}:report.pdf:1048576");
        let frame = Frame::decode(raw.as_bytes()).unwrap();
        assert_eq!(
            frame,
            Frame::FileAnnounce(FileAnnouncement {
                file_id: id,
                file_name: "report.pdf".into(),
                size_bytes: 1_048_576,
            })
        );
    }

    #[test]
    fn test_decode_system() {
        let frame = Frame::decode(b"SYS:bob joined the chat").unwrap();
        assert_eq!(frame, Frame::System("bob joined the chat".into()));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(Frame::decode(b"HELLO"), Err(FrameError::UnknownPrefix));
        assert_eq!(Frame::decode(&[0xff, 0xfe]), Err(FrameError::InvalidUtf8));
        assert!(Frame::decode(b"FILE:not-an-id:x:1").is_err());
        assert!(Frame::decode(b"FILE:only-two:fields").is_err());
    }

    #[test]
    fn test_colon_in_file_name_is_rejected() {
        let id = FileId::new();
        let raw = format!("FILE:{id}:a:b.txt:12");
        assert!(Frame::decode(raw.as_bytes()).is_err());

        let frame = Frame::FileAnnounce(FileAnnouncement {
            file_id: id,
            file_name: "a:b.txt".into(),
            size_bytes: 12,
        });
        assert!(matches!(frame.encode(), Err(FrameError::ColonInFileName(_))));
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let frame = Frame::System("x".repeat(MAX_DATAGRAM_SIZE));
        assert!(matches!(frame.encode(), Err(FrameError::TooLarge { .. })));

        let fits = Frame::System("x".repeat(MAX_DATAGRAM_SIZE - SYSTEM_PREFIX.len()));
        assert_eq!(fits.encode().unwrap().len(), MAX_DATAGRAM_SIZE);
    }

    #[test]
    fn test_chat_line_parse() {
        let parsed = ChatLine::parse("[23:59:58] dave: ratio: 3:1").unwrap();
        assert_eq!(parsed.time, stamp(23, 59, 58));
        assert_eq!(parsed.sender, "dave");
        assert_eq!(parsed.body, "ratio: 3:1");
        assert_eq!(parsed.render(), "[23:59:58] dave: ratio: 3:1");
    }

    #[test]
    fn test_chat_sender_heuristic() {
        assert_eq!(chat_sender("[01:02:03] erin: hi").as_deref(), Some("erin"));
        assert_eq!(chat_sender("frank: no stamp").as_deref(), Some("frank"));
        assert_eq!(chat_sender("no colon at all"), None);
    }
}
