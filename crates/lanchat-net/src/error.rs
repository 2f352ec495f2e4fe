use lanchat_shared::FrameError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The remote transfer server answered with an `ERROR:` line.
    #[error("Remote peer refused: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Worker pool is shut down")]
    PoolClosed,
}
