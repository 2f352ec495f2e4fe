use lanchat_shared::{FileRecord, TranscriptEntry};

/// Events published to whoever presents the session (terminal, GUI).
///
/// Delivered over a `tokio::sync::broadcast` channel; a slow consumer may
/// miss events and should re-read the transcript when it lags.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A line was added to the local transcript.
    TranscriptAppended(TranscriptEntry),

    /// Another participant announced a file not seen before.
    FileAnnounced(FileRecord),
}
