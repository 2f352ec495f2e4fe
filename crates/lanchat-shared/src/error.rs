use thiserror::Error;

/// Errors raised while encoding or decoding Group Channel frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unknown frame prefix")]
    UnknownPrefix,

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Malformed {kind} frame: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// `FILE:` fields are colon-delimited with no escaping.
    #[error("File name cannot be announced, it contains a colon: {0}")]
    ColonInFileName(String),
}
