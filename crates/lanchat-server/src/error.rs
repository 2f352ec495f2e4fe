use thiserror::Error;

use lanchat_net::NetError;
use lanchat_shared::{FileId, FrameError};
use lanchat_store::StoreError;

use crate::http::{HttpError, Response, Status};

/// Errors surfaced by node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A remote record has no origin address to fetch it from.
    #[error("No known peer holds file {0}")]
    UnknownPeer(FileId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// Failures of a gateway request, each mapping to one HTTP response.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found")]
    NotFound,

    #[error("Invalid JSON body")]
    InvalidJson,

    #[error("Message is required")]
    MessageRequired,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Failed to send message")]
    SendFailed(#[source] NodeError),

    #[error("Failed to clear session")]
    ClearFailed(#[source] NodeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub const NOT_FOUND_PAGE: &str = "<html><body><h1>404 Not Found</h1></body></html>";

impl ApiError {
    pub fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound => return Response::html(Status::NOT_FOUND, NOT_FOUND_PAGE),
            ApiError::InvalidJson | ApiError::MessageRequired | ApiError::BadRequest(_) => {
                (Status::BAD_REQUEST, self.to_string())
            }
            ApiError::TooLarge { .. } => (Status::PAYLOAD_TOO_LARGE, self.to_string()),
            ApiError::SendFailed(_) | ApiError::ClearFailed(_) => {
                (Status::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::Internal(_) => (
                Status::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
        });

        Response::json(status, &body)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) | StoreError::MissingBytes(_) => ApiError::NotFound,
            StoreError::FileTooLarge { size, max } => ApiError::TooLarge { size, max },
            StoreError::InvalidFileName(name) => {
                ApiError::BadRequest(format!("invalid file name {name:?}"))
            }
            StoreError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<NodeError> for ApiError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Store(e) => e.into(),
            NodeError::Frame(FrameError::ColonInFileName(name)) => {
                ApiError::BadRequest(format!("file name may not contain ':' ({name:?})"))
            }
            NodeError::EmptyMessage => ApiError::MessageRequired,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<HttpError> for ApiError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Io(e) => ApiError::Internal(e.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}
