use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, warn};

use lanchat_net::{run_accept_loop, NetError, WorkerPool};
use lanchat_shared::constants::DEFAULT_DISPLAY_NAME;
use lanchat_shared::FileId;

use crate::error::ApiError;
use crate::http::{read_body, read_request, Request, Response, Status, MAX_JSON_BODY};
use crate::session::Session;

const INDEX_HTML: &str = include_str!("../static/index.html");

const DOWNLOAD_PREFIX: &str = "/api/download/";

/// HTTP gateway in front of the chat session.
pub struct Gateway {
    listener: TcpListener,
    session: Arc<Session>,
}

impl Gateway {
    pub async fn bind(addr: SocketAddr, session: Arc<Session>) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, session })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop until `shutdown` flips.
    pub async fn serve(self, pool: WorkerPool, shutdown: watch::Receiver<bool>) {
        let session = self.session;
        run_accept_loop("http-gateway", self.listener, pool, shutdown, move |stream, peer| {
            handle_connection(stream, peer, session.clone())
        })
        .await;
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, session: Arc<Session>) {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (label, response) = match read_request(&mut reader).await {
        Ok(Some(request)) => {
            let label = format!("{} {}", request.method, request.path());
            let response = match route(&request, &mut reader, &session).await {
                Ok(response) => response,
                Err(e) => {
                    if matches!(
                        e,
                        ApiError::Internal(_) | ApiError::SendFailed(_) | ApiError::ClearFailed(_)
                    ) {
                        warn!(%peer, error = %e, "Request failed");
                    }
                    e.into_response()
                }
            };
            (label, response)
        }
        Ok(None) => return,
        Err(e) => {
            debug!(%peer, error = %e, "Unreadable request");
            ("-".to_string(), ApiError::from(e).into_response())
        }
    };

    let status = response.status().code;
    match response.write_to(&mut writer).await {
        Ok(bytes) => debug!(%peer, request = %label, status, bytes, "Handled request"),
        Err(e) => debug!(%peer, request = %label, error = %e, "Failed to write response"),
    }
    let _ = writer.shutdown().await;
}

/// Dispatch one request. `body` is positioned right after the head.
pub async fn route<R>(request: &Request, body: &mut R, session: &Session) -> Result<Response, ApiError>
where
    R: AsyncRead + Unpin,
{
    if request.method == "OPTIONS" {
        return Ok(Response::preflight());
    }

    match (request.method.as_str(), request.path()) {
        ("GET", "/" | "/index.html") => Ok(Response::html(Status::OK, INDEX_HTML)),
        ("GET", "/api/messages") => Ok(Response::text(
            Status::OK,
            session.transcript().render().await,
        )),
        ("GET", "/api/transcript") => Ok(Response::json(
            Status::OK,
            &session.transcript().snapshot().await,
        )),
        ("GET", "/api/files") => list_files(session).await,
        ("GET", path) if path.starts_with(DOWNLOAD_PREFIX) => {
            download(session, &path[DOWNLOAD_PREFIX.len()..]).await
        }
        ("POST", "/api/messages") => post_message(request, body, session).await,
        ("POST", "/api/upload") => upload(request, body, session).await,
        ("POST", "/api/clear-session") => clear_session(session).await,
        _ => Err(ApiError::NotFound),
    }
}

#[derive(Serialize)]
struct FileSummary {
    id: String,
    name: String,
    sender: String,
    size: u64,
    timestamp: String,
}

#[derive(Deserialize)]
struct PostMessageRequest {
    username: Option<String>,
    message: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

impl StatusResponse {
    fn success() -> Self {
        Self {
            status: "success",
            id: None,
        }
    }
}

async fn list_files(session: &Session) -> Result<Response, ApiError> {
    let files: Vec<FileSummary> = session
        .registry()
        .list()
        .await
        .into_iter()
        .map(|record| FileSummary {
            id: record.file_id.to_string(),
            timestamp: record.stamp(),
            name: record.file_name,
            sender: record.owner,
            size: record.size_bytes,
        })
        .collect();
    Ok(Response::json(Status::OK, &files))
}

async fn download(session: &Session, id: &str) -> Result<Response, ApiError> {
    let file_id: FileId = id.parse().map_err(|_| ApiError::NotFound)?;
    let (record, path) = session.registry().local_path(&file_id).await?;

    let file = File::open(&path).await.map_err(|e| {
        debug!(id = %file_id, error = %e, "Download source vanished");
        ApiError::NotFound
    })?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .len();

    Ok(Response::attachment(file, len, &record.file_name))
}

async fn post_message<R>(request: &Request, body: &mut R, session: &Session) -> Result<Response, ApiError>
where
    R: AsyncRead + Unpin,
{
    let len = request.content_length()?.unwrap_or(0);
    let raw = read_body(body, len, MAX_JSON_BODY).await?;
    let payload: PostMessageRequest =
        serde_json::from_slice(&raw).map_err(|_| ApiError::InvalidJson)?;

    let message = payload.message.as_deref().unwrap_or_default();
    if message.trim().is_empty() {
        return Err(ApiError::MessageRequired);
    }
    let username = match payload.username.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => DEFAULT_DISPLAY_NAME,
    };

    session
        .send_chat(username, message)
        .await
        .map_err(ApiError::SendFailed)?;

    Ok(Response::json(Status::OK, &StatusResponse::success()))
}

async fn upload<R>(request: &Request, body: &mut R, session: &Session) -> Result<Response, ApiError>
where
    R: AsyncRead + Unpin,
{
    let raw_name = request
        .header("x-file-name")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("X-File-Name header is required".into()))?;
    let file_name = urlencoding::decode(raw_name)
        .map_err(|_| ApiError::BadRequest("X-File-Name is not valid UTF-8".into()))?;

    let len = request
        .content_length()?
        .ok_or_else(|| ApiError::BadRequest("Content-Length is required".into()))?;
    let max = session.registry().max_file_size();
    if len > max {
        return Err(ApiError::TooLarge { size: len, max });
    }

    let record = session.share_stream(&file_name, body, len).await?;

    Ok(Response::json(
        Status::OK,
        &StatusResponse {
            status: "success",
            id: Some(record.file_id.to_string()),
        },
    ))
}

async fn clear_session(session: &Session) -> Result<Response, ApiError> {
    session
        .clear_local_session()
        .await
        .map_err(ApiError::ClearFailed)?;
    Ok(Response::json(Status::OK, &StatusResponse::success()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::Duration;

    use lanchat_net::{GroupChannel, GroupNotification};
    use lanchat_shared::{ChatLine, Frame};
    use lanchat_store::SessionRegistry;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;

    struct Fixture {
        addr: SocketAddr,
        session: Arc<Session>,
        frames: mpsc::Receiver<GroupNotification>,
        _dir: TempDir,
        _shutdown: watch::Sender<bool>,
    }

    async fn start_gateway(max_file_size: u64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(
            SessionRegistry::open(dir.path().join("session"), max_file_size)
                .await
                .unwrap(),
        );
        let group = Arc::new(
            GroupChannel::bind(
                SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
                Ipv4Addr::UNSPECIFIED,
            )
            .unwrap(),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (frames, _handle) = group.spawn_receiver(shutdown_rx.clone());
        let session = Arc::new(Session::new("host", registry, group, 0));

        let gateway = Gateway::bind("127.0.0.1:0".parse().unwrap(), session.clone())
            .await
            .unwrap();
        let addr = gateway.local_addr().unwrap();
        tokio::spawn(gateway.serve(WorkerPool::new(4), shutdown_rx));

        Fixture {
            addr,
            session,
            frames,
            _dir: dir,
            _shutdown: shutdown,
        }
    }

    struct Reply {
        status: u16,
        head: String,
        body: Vec<u8>,
    }

    impl Reply {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    async fn send(addr: SocketAddr, raw: &[u8]) -> Reply {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();

        let split = out
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("no end of head");
        let head = String::from_utf8(out[..split].to_vec()).unwrap();
        let status = head.split(' ').nth(1).unwrap().parse().unwrap();
        Reply {
            status,
            head,
            body: out[split + 4..].to_vec(),
        }
    }

    async fn post_json(addr: SocketAddr, path: &str, json: &str) -> Reply {
        let raw = format!(
            "POST {path} HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{json}",
            json.len()
        );
        send(addr, raw.as_bytes()).await
    }

    #[tokio::test]
    async fn test_post_message() {
        let mut fx = start_gateway(1024).await;

        let reply = post_json(
            fx.addr,
            "/api/messages",
            r#"{"username":"alice","message":"hi"}"#,
        )
        .await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.text(), r#"{"status":"success"}"#);
        assert!(reply.head.contains("Access-Control-Allow-Origin: *"));

        let rendered = fx.session.transcript().render().await;
        let line = ChatLine::parse(rendered.trim_end()).expect("stamped chat line");
        assert_eq!(line.sender, "alice");
        assert_eq!(line.body, "hi");

        match fx.frames.recv().await.unwrap() {
            GroupNotification::FrameReceived { frame, .. } => {
                assert_eq!(frame, Frame::Chat(rendered.trim_end().to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_message_body_is_kept_verbatim() {
        let fx = start_gateway(1024).await;

        let reply = post_json(
            fx.addr,
            "/api/messages",
            r#"{"username":"alice","message":"  hi  "}"#,
        )
        .await;
        assert_eq!(reply.status, 200);

        let entries = fx.session.transcript().snapshot().await;
        assert_eq!(entries.last().unwrap().body, "  hi  ");
        assert!(fx
            .session
            .transcript()
            .render()
            .await
            .ends_with("] alice:   hi  \n"));
    }

    #[tokio::test]
    async fn test_missing_username_is_anonymous() {
        let fx = start_gateway(1024).await;
        let reply = post_json(fx.addr, "/api/messages", r#"{"message":"hey"}"#).await;
        assert_eq!(reply.status, 200);
        assert!(fx
            .session
            .transcript()
            .render()
            .await
            .ends_with("] Anonymous: hey\n"));
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let mut fx = start_gateway(1024).await;

        let reply = post_json(
            fx.addr,
            "/api/messages",
            r#"{"username":"alice","message":"   "}"#,
        )
        .await;
        assert_eq!(reply.status, 400);
        assert_eq!(reply.text(), r#"{"error":"Message is required"}"#);
        assert!(fx.session.transcript().is_empty().await);

        let nothing = tokio::time::timeout(Duration::from_millis(300), fx.frames.recv()).await;
        assert!(nothing.is_err(), "a frame was transmitted");
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let fx = start_gateway(1024).await;
        let reply = post_json(fx.addr, "/api/messages", "message=hi").await;
        assert_eq!(reply.status, 400);
        assert_eq!(reply.text(), r#"{"error":"Invalid JSON body"}"#);
    }

    #[tokio::test]
    async fn test_files_empty_and_unknown_download() {
        let fx = start_gateway(1024).await;

        let reply = send(fx.addr, b"GET /api/files HTTP/1.1\r\n\r\n").await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.text(), "[]");

        let raw = format!("GET /api/download/{} HTTP/1.1\r\n\r\n", FileId::new());
        let reply = send(fx.addr, raw.as_bytes()).await;
        assert_eq!(reply.status, 404);

        let reply = send(fx.addr, b"GET /api/download/not-a-uuid HTTP/1.1\r\n\r\n").await;
        assert_eq!(reply.status, 404);
    }

    #[tokio::test]
    async fn test_upload_list_and_download() {
        let fx = start_gateway(1024).await;

        let raw = b"POST /api/upload HTTP/1.1\r\nX-File-Name: my%20notes.txt\r\nContent-Length: 5\r\n\r\nhello";
        let reply = send(fx.addr, raw).await;
        assert_eq!(reply.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["status"], "success");
        let id = body["id"].as_str().unwrap().to_string();

        let reply = send(fx.addr, b"GET /api/files HTTP/1.1\r\n\r\n").await;
        let files: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(files[0]["id"], id.as_str());
        assert_eq!(files[0]["name"], "my notes.txt");
        assert_eq!(files[0]["sender"], "host");
        assert_eq!(files[0]["size"], 5);

        let raw = format!("GET /api/download/{id}?dl=1 HTTP/1.1\r\n\r\n");
        let reply = send(fx.addr, raw.as_bytes()).await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, b"hello");
        assert!(reply.head.contains("Content-Type: application/octet-stream"));
        assert!(reply
            .head
            .contains("Content-Disposition: attachment; filename=\"my notes.txt\""));
    }

    #[tokio::test]
    async fn test_upload_limits() {
        let fx = start_gateway(4).await;

        let raw = b"POST /api/upload HTTP/1.1\r\nX-File-Name: big.bin\r\nContent-Length: 10\r\n\r\n";
        let reply = send(fx.addr, raw).await;
        assert_eq!(reply.status, 413);

        let raw = b"POST /api/upload HTTP/1.1\r\nContent-Length: 0\r\n\r\n";
        let reply = send(fx.addr, raw).await;
        assert_eq!(reply.status, 400);

        assert!(fx.session.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_clear_session() {
        let mut fx = start_gateway(1024).await;
        fx.session
            .share_stream("a.txt", &b"abc"[..], 3)
            .await
            .unwrap();

        let reply = post_json(fx.addr, "/api/clear-session", "").await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.text(), r#"{"status":"success"}"#);
        assert!(fx.session.registry().is_empty().await);

        // Share notice, announcement, then the clear notice.
        let mut last = None;
        for _ in 0..3 {
            let GroupNotification::FrameReceived { frame, .. } = fx.frames.recv().await.unwrap();
            last = Some(frame);
        }
        assert_eq!(last, Some(Frame::System("host cleared the session".into())));
        assert!(fx
            .session
            .transcript()
            .render()
            .await
            .ends_with("Session cleared - all files removed\n"));
    }

    #[tokio::test]
    async fn test_preflight_unknown_route_and_index() {
        let fx = start_gateway(1024).await;

        let reply = send(fx.addr, b"OPTIONS /api/messages HTTP/1.1\r\n\r\n").await;
        assert_eq!(reply.status, 200);
        assert!(reply.body.is_empty());
        assert!(reply
            .head
            .contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));

        let reply = send(fx.addr, b"GET /nope HTTP/1.1\r\n\r\n").await;
        assert_eq!(reply.status, 404);
        assert_eq!(reply.text(), crate::error::NOT_FOUND_PAGE);
        assert!(reply.head.contains("Content-Type: text/html"));

        let reply = send(fx.addr, b"GET / HTTP/1.1\r\n\r\n").await;
        assert_eq!(reply.status, 200);
        assert!(reply.text().contains("/api/messages"));
    }

    #[tokio::test]
    async fn test_messages_and_transcript_views() {
        let fx = start_gateway(1024).await;
        fx.session
            .append(lanchat_shared::TranscriptEntry::system("bob joined the chat"))
            .await;

        let reply = send(fx.addr, b"GET /api/messages HTTP/1.1\r\n\r\n").await;
        assert_eq!(reply.text(), "bob joined the chat\n");
        assert!(reply.head.contains("Content-Type: text/plain"));

        let reply = send(fx.addr, b"GET /api/transcript HTTP/1.1\r\n\r\n").await;
        let entries: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(entries[0]["kind"], "system");
        assert_eq!(entries[0]["body"], "bob joined the chat");
    }

    #[tokio::test]
    async fn test_garbage_request_is_400() {
        let fx = start_gateway(1024).await;
        let reply = send(fx.addr, b"NONSENSE\r\n\r\n").await;
        assert_eq!(reply.status, 400);
    }
}
