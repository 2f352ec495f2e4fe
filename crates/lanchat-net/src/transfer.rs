//! Point-to-point file transfer over TCP.
//!
//! One request per connection:
//!
//! ```text
//! client: GET_FILE:<fileId>\n
//! server: OK\n<raw bytes until close>
//!     or: ERROR: <reason>\n
//! ```
//!
//! The end of the file is the end of the connection; there is no length
//! header. Transfers have no timeout, so a stalled peer holds its worker
//! until it goes away.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lanchat_shared::FileId;
use lanchat_store::{SessionRegistry, StoreError};

use crate::error::NetError;
use crate::pool::{run_accept_loop, WorkerPool};

pub const GET_FILE_PREFIX: &str = "GET_FILE:";
pub const OK_LINE: &str = "OK";
pub const ERROR_PREFIX: &str = "ERROR:";

pub const ERR_UNKNOWN_ID: &str = "File ID not found";
pub const ERR_MISSING_BYTES: &str = "File not found";
pub const ERR_BAD_REQUEST: &str = "Bad request";

// Request and status lines are tiny; anything longer is not ours.
const MAX_LINE_LEN: u64 = 256;

/// Serves bytes of locally registered files.
pub struct TransferServer {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
}

impl TransferServer {
    pub async fn bind(addr: SocketAddr, registry: Arc<SessionRegistry>) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop until `shutdown` flips.
    pub async fn serve(self, pool: WorkerPool, shutdown: watch::Receiver<bool>) {
        let registry = self.registry;
        run_accept_loop("file-transfer", self.listener, pool, shutdown, move |stream, peer| {
            let registry = registry.clone();
            async move {
                match handle_request(stream, &registry).await {
                    Ok(sent) => debug!(%peer, bytes = sent, "File request served"),
                    Err(e) => warn!(%peer, error = %e, "File request failed"),
                }
            }
        })
        .await;
    }
}

/// Answer a single request, then close the connection.
///
/// Returns the number of file bytes streamed (0 for error replies).
pub async fn handle_request(
    stream: TcpStream,
    registry: &SessionRegistry,
) -> Result<u64, NetError> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    (&mut reader).take(MAX_LINE_LEN).read_line(&mut line).await?;
    let request = line.trim_end_matches(['\r', '\n']);

    let Some(id_text) = request.strip_prefix(GET_FILE_PREFIX) else {
        write_error(&mut writer, ERR_BAD_REQUEST).await?;
        return Err(NetError::Protocol(format!("unexpected request {request:?}")));
    };

    let resolved = match id_text.parse::<FileId>() {
        Ok(file_id) => registry.local_path(&file_id).await,
        Err(_) => {
            write_error(&mut writer, ERR_UNKNOWN_ID).await?;
            return Ok(0);
        }
    };

    let (record, path) = match resolved {
        Ok(found) => found,
        Err(StoreError::MissingBytes(_)) => {
            write_error(&mut writer, ERR_MISSING_BYTES).await?;
            return Ok(0);
        }
        Err(_) => {
            write_error(&mut writer, ERR_UNKNOWN_ID).await?;
            return Ok(0);
        }
    };

    let mut file = match File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            debug!(id = %record.file_id, error = %e, "Backing file vanished");
            write_error(&mut writer, ERR_MISSING_BYTES).await?;
            return Ok(0);
        }
    };

    writer.write_all(format!("{OK_LINE}\n").as_bytes()).await?;
    let sent = tokio::io::copy(&mut file, &mut writer).await?;
    writer.shutdown().await?;

    info!(id = %record.file_id, name = %record.file_name, bytes = sent, "Sent file");
    Ok(sent)
}

async fn write_error<W>(writer: &mut W, reason: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{ERROR_PREFIX} {reason}\n").as_bytes())
        .await?;
    writer.shutdown().await
}

/// Fetch `file_id` from the transfer server at `peer` into `dest`.
///
/// Returns the number of bytes written. An `ERROR:` reply becomes
/// [`NetError::Remote`]; a partial file is removed on failure.
pub async fn fetch_file(peer: SocketAddr, file_id: &FileId, dest: &Path) -> Result<u64, NetError> {
    let mut stream = TcpStream::connect(peer).await?;
    stream
        .write_all(format!("{GET_FILE_PREFIX}{file_id}\n").as_bytes())
        .await?;

    let mut reader = BufReader::new(stream);
    let mut status = String::new();
    (&mut reader).take(MAX_LINE_LEN).read_line(&mut status).await?;
    let status = status.trim_end_matches(['\r', '\n']);

    if let Some(reason) = status.strip_prefix(ERROR_PREFIX) {
        return Err(NetError::Remote(reason.trim().to_string()));
    }
    if status != OK_LINE {
        return Err(NetError::Protocol(format!("unexpected status line {status:?}")));
    }

    let result = async {
        let mut file = File::create(dest).await?;
        let received = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok::<u64, std::io::Error>(received)
    }
    .await;

    match result {
        Ok(received) => {
            debug!(%peer, id = %file_id, bytes = received, "Fetched file");
            Ok(received)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(dest).await;
            Err(e.into())
        }
    }
}
