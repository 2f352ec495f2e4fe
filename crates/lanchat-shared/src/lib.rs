//! Types and wire framing shared by every lanchat crate.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::FrameError;
pub use protocol::{ChatLine, FileAnnouncement, Frame};
pub use types::{EntryKind, FileId, FileRecord, TranscriptEntry};
