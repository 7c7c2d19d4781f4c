//! Request servicing on the origin
//!
//! Each REQUEST frame is serviced by an independent task: normalize the path,
//! refuse anything that resolves outside the share root, then stream back a
//! file, a rendered directory listing, or a ZIP of a subtree as
//! RESPONSE / DATA* / END frames. Per-request failures become error responses;
//! they never touch the session.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::origin::agent::{OriginObserver, TransferStats};
use crate::origin::{archive, listing};
use crate::protocol::{encode_chunk, Frame, MAX_CHUNK_SIZE};

/// Reserved name that turns a directory request into a streaming ZIP
pub(crate) const DOWNLOAD_ZIP_NAME: &str = "__download__.zip";

/// Transfer counters shared by all request tasks of a session
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    requests: AtomicU64,
    bytes: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn add_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TransferStats {
        TransferStats {
            requests_served: self.requests.load(Ordering::Relaxed),
            bytes_sent: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Everything a request task needs, shared across the session
pub(crate) struct ServeContext {
    /// Canonicalized share root; the containment boundary
    pub root: PathBuf,
    /// Session id, threaded into listing links
    pub session_id: String,
    /// Outbound frames toward the relay (serialized by the agent's writer)
    pub out: mpsc::Sender<Frame>,
    /// Exclude patterns for listings and archives
    pub exclude: Vec<String>,
    /// Per-file size cap, if configured
    pub max_file_size: Option<u64>,
    /// Cap on total bytes sent over the session's lifetime, if configured
    pub max_total_size: Option<u64>,
    /// Transfer counters for observer reporting
    pub stats: Arc<StatsCounters>,
    /// Observer notified after each serviced request
    pub observer: Arc<dyn OriginObserver>,
}

impl ServeContext {
    /// Remaining bytes under `max_total_size`, or `None` when unlimited
    pub(crate) fn total_budget(&self) -> Option<u64> {
        self.max_total_size
            .map(|limit| limit.saturating_sub(self.stats.snapshot().bytes_sent))
    }
}

/// Entry point of one request task
pub(crate) async fn serve_request(
    ctx: Arc<ServeContext>,
    id: String,
    method: String,
    raw_path: String,
) {
    match service(&ctx, &id, &method, &raw_path).await {
        Ok(()) => {
            ctx.stats.add_request();
            ctx.observer.on_stats(ctx.stats.snapshot());
        }
        Err(e) => {
            // Only the duplex channel going away lands here; I/O problems
            // were already answered with an error response.
            tracing::debug!(request_id = %id, error = %e, "request task ended early");
        }
    }
}

async fn service(ctx: &ServeContext, id: &str, method: &str, raw_path: &str) -> Result<()> {
    let rel = normalize_path(raw_path);
    tracing::debug!(request_id = %id, method, path = %rel, "serving request");

    if ctx.total_budget() == Some(0) {
        return respond_error(ctx, id, method, 403, "Share transfer limit reached").await;
    }

    if rel == DOWNLOAD_ZIP_NAME || rel.ends_with(&format!("/{DOWNLOAD_ZIP_NAME}")) {
        let dir_rel = rel
            .strip_suffix(DOWNLOAD_ZIP_NAME)
            .unwrap_or("")
            .trim_end_matches('/');
        return serve_zip(ctx, id, method, dir_rel).await;
    }

    match resolve(ctx, &rel).await {
        Resolved::Escape => respond_error(ctx, id, method, 403, "Forbidden").await,
        Resolved::Missing => respond_error(ctx, id, method, 404, "Not Found").await,
        Resolved::Failed(e) => {
            tracing::warn!(request_id = %id, error = %e, "stat failed");
            respond_error(ctx, id, method, 500, "Internal Server Error").await
        }
        Resolved::Dir(path) => serve_dir(ctx, id, method, &rel, &path).await,
        Resolved::File(path, size) => serve_file(ctx, id, method, &path, size).await,
    }
}

/// URI-decode and strip surrounding slashes
fn normalize_path(raw: &str) -> String {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map(|text| text.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    decoded.trim_matches('/').to_string()
}

enum Resolved {
    File(PathBuf, u64),
    Dir(PathBuf),
    Missing,
    Escape,
    Failed(std::io::Error),
}

/// Join a normalized relative path against the share root and reject
/// anything that resolves outside it. This is the sole traversal defense.
async fn resolve(ctx: &ServeContext, rel: &str) -> Resolved {
    let candidate = Path::new(rel);
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            // ParentDir, RootDir, or a prefix can only point outward
            _ => return Resolved::Escape,
        }
    }

    let joined = if rel.is_empty() {
        ctx.root.clone()
    } else {
        ctx.root.join(candidate)
    };

    // Canonicalize so symlinks cannot smuggle the path out of the root
    let real = match tokio::fs::canonicalize(&joined).await {
        Ok(real) => real,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Resolved::Missing,
        Err(e) => return Resolved::Failed(e),
    };

    if !real.starts_with(&ctx.root) {
        return Resolved::Escape;
    }

    match tokio::fs::metadata(&real).await {
        Ok(meta) if meta.is_dir() => Resolved::Dir(real),
        Ok(meta) => Resolved::File(real, meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Resolved::Missing,
        Err(e) => Resolved::Failed(e),
    }
}

async fn send(ctx: &ServeContext, frame: Frame) -> Result<()> {
    ctx.out
        .send(frame)
        .await
        .map_err(|_| Error::session("duplex channel closed"))
}

fn base_headers(content_type: &str) -> HashMap<String, String> {
    HashMap::from([("Content-Type".to_string(), content_type.to_string())])
}

async fn respond_error(
    ctx: &ServeContext,
    id: &str,
    method: &str,
    status: u16,
    message: &str,
) -> Result<()> {
    let body = listing::error_page(status, message);
    respond_bytes(
        ctx,
        id,
        method,
        status,
        "text/html; charset=utf-8",
        body.as_bytes(),
    )
    .await
}

/// Send a complete in-memory response as RESPONSE / DATA* / END
async fn respond_bytes(
    ctx: &ServeContext,
    id: &str,
    method: &str,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let mut headers = base_headers(content_type);
    headers.insert("Content-Length".to_string(), body.len().to_string());
    send(
        ctx,
        Frame::Response {
            id: id.to_string(),
            status,
            headers,
        },
    )
    .await?;

    if method != "HEAD" {
        for chunk in body.chunks(MAX_CHUNK_SIZE) {
            send(
                ctx,
                Frame::Data {
                    id: id.to_string(),
                    chunk: encode_chunk(chunk),
                },
            )
            .await?;
            ctx.stats.add_bytes(chunk.len() as u64);
        }
    }

    send(
        ctx,
        Frame::End {
            id: id.to_string(),
        },
    )
    .await
}

async fn serve_dir(
    ctx: &ServeContext,
    id: &str,
    method: &str,
    rel: &str,
    path: &Path,
) -> Result<()> {
    match listing::scan_dir(path, rel, &ctx.exclude).await {
        Ok(entries) => {
            let html = listing::render_directory(&entries, rel, &ctx.session_id);
            respond_bytes(
                ctx,
                id,
                method,
                200,
                "text/html; charset=utf-8",
                html.as_bytes(),
            )
            .await
        }
        Err(e) => {
            tracing::warn!(request_id = %id, error = %e, "listing failed");
            respond_error(ctx, id, method, 500, "Internal Server Error").await
        }
    }
}

async fn serve_file(
    ctx: &ServeContext,
    id: &str,
    method: &str,
    path: &Path,
    size: u64,
) -> Result<()> {
    if let Some(limit) = ctx.max_file_size {
        if size > limit {
            return respond_error(ctx, id, method, 403, "File exceeds the share's size limit")
                .await;
        }
    }
    if let Some(budget) = ctx.total_budget() {
        if size > budget {
            return respond_error(ctx, id, method, 403, "Share transfer limit reached").await;
        }
    }

    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return respond_error(ctx, id, method, 404, "Not Found").await;
        }
        Err(e) => {
            tracing::warn!(request_id = %id, error = %e, "open failed");
            return respond_error(ctx, id, method, 500, "Internal Server Error").await;
        }
    };

    let content_type = mime_guess::from_path(path).first_or_octet_stream();
    let mut headers = base_headers(content_type.as_ref());
    headers.insert("Content-Length".to_string(), size.to_string());
    send(
        ctx,
        Frame::Response {
            id: id.to_string(),
            status: 200,
            headers,
        },
    )
    .await?;

    if method != "HEAD" {
        let mut buf = vec![0u8; MAX_CHUNK_SIZE];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    send(
                        ctx,
                        Frame::Data {
                            id: id.to_string(),
                            chunk: encode_chunk(&buf[..n]),
                        },
                    )
                    .await?;
                    ctx.stats.add_bytes(n as u64);
                }
                Err(e) => {
                    // Status is already on the wire; end the stream short
                    tracing::warn!(request_id = %id, error = %e, "read failed mid-stream");
                    break;
                }
            }
        }
    }

    send(
        ctx,
        Frame::End {
            id: id.to_string(),
        },
    )
    .await
}

async fn serve_zip(ctx: &ServeContext, id: &str, method: &str, dir_rel: &str) -> Result<()> {
    let dir = match resolve(ctx, dir_rel).await {
        Resolved::Dir(path) => path,
        Resolved::Escape => return respond_error(ctx, id, method, 403, "Forbidden").await,
        Resolved::Missing | Resolved::File(..) => {
            return respond_error(ctx, id, method, 404, "Not Found").await;
        }
        Resolved::Failed(e) => {
            tracing::warn!(request_id = %id, error = %e, "stat failed");
            return respond_error(ctx, id, method, 500, "Internal Server Error").await;
        }
    };

    let archive_name = dir
        .file_name()
        .map_or_else(|| "share".to_string(), |n| n.to_string_lossy().into_owned());

    // Size is unknown up front, so no Content-Length; the relay streams the
    // body chunked.
    let mut headers = base_headers("application/zip");
    headers.insert(
        "Content-Disposition".to_string(),
        format!("attachment; filename=\"{archive_name}.zip\""),
    );
    send(
        ctx,
        Frame::Response {
            id: id.to_string(),
            status: 200,
            headers,
        },
    )
    .await?;

    if method != "HEAD" {
        let mut writer = ChunkWriter::new(id, ctx.out.clone());
        match archive::write_zip(
            &mut writer,
            &dir,
            &ctx.exclude,
            ctx.max_file_size,
            ctx.total_budget(),
        )
        .await
        {
            Ok(()) => writer.flush().await?,
            Err(Error::Session { .. }) => return Err(Error::session("duplex channel closed")),
            Err(e) => {
                // The viewer gets a truncated archive; nothing else to do
                tracing::warn!(request_id = %id, error = %e, "archive stream failed");
            }
        }
        ctx.stats.add_bytes(writer.written);
    }

    send(
        ctx,
        Frame::End {
            id: id.to_string(),
        },
    )
    .await
}

/// Buffers outgoing bytes into DATA frames of at most [`MAX_CHUNK_SIZE`]
/// raw bytes each
pub(crate) struct ChunkWriter {
    id: String,
    out: mpsc::Sender<Frame>,
    buf: Vec<u8>,
    /// Total raw bytes accepted so far; also the ZIP stream offset
    pub(crate) written: u64,
}

impl ChunkWriter {
    pub(crate) fn new(id: impl Into<String>, out: mpsc::Sender<Frame>) -> Self {
        Self {
            id: id.into(),
            out,
            buf: Vec::with_capacity(MAX_CHUNK_SIZE),
            written: 0,
        }
    }

    /// Append bytes, emitting full DATA frames as the buffer fills
    pub(crate) async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        self.written += data.len() as u64;
        while !data.is_empty() {
            let room = MAX_CHUNK_SIZE - self.buf.len();
            let take = room.min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buf.len() == MAX_CHUNK_SIZE {
                self.emit().await?;
            }
        }
        Ok(())
    }

    /// Emit any buffered remainder as a final short DATA frame
    pub(crate) async fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.emit().await
    }

    async fn emit(&mut self) -> Result<()> {
        let chunk = encode_chunk(&self.buf);
        self.buf.clear();
        self.out
            .send(Frame::Data {
                id: self.id.clone(),
                chunk,
            })
            .await
            .map_err(|_| Error::session("duplex channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::agent::NullObserver;
    use crate::protocol::decode_chunk;
    use std::path::Path;

    fn context(root: &Path, out: mpsc::Sender<Frame>) -> Arc<ServeContext> {
        Arc::new(ServeContext {
            root: root.canonicalize().unwrap(),
            session_id: "abc123".to_string(),
            out,
            exclude: Vec::new(),
            max_file_size: None,
            max_total_size: None,
            stats: Arc::new(StatsCounters::default()),
            observer: Arc::new(NullObserver),
        })
    }

    /// Run one request and collect its full frame sequence
    async fn run(ctx: Arc<ServeContext>, mut rx: mpsc::Receiver<Frame>, method: &str, path: &str) -> Vec<Frame> {
        let task = tokio::spawn(serve_request(
            ctx,
            "r1".to_string(),
            method.to_string(),
            path.to_string(),
        ));
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            let is_end = matches!(frame, Frame::End { .. });
            frames.push(frame);
            if is_end {
                break;
            }
        }
        task.await.unwrap();
        frames
    }

    fn body_of(frames: &[Frame]) -> Vec<u8> {
        frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Data { chunk, .. } => Some(decode_chunk(chunk).unwrap()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn head_of(frames: &[Frame]) -> (u16, HashMap<String, String>) {
        match &frames[0] {
            Frame::Response {
                status, headers, ..
            } => (*status, headers.clone()),
            other => panic!("expected RESPONSE first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_text_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello.txt"), b"Hello, fwdcast!").unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx, rx, "GET", "/hello.txt").await;

        let (status, headers) = head_of(&frames);
        assert_eq!(status, 200);
        assert!(headers["Content-Type"].starts_with("text/plain"));
        assert_eq!(headers["Content-Length"], "15");
        assert_eq!(body_of(&frames), b"Hello, fwdcast!");
        assert!(matches!(frames.last(), Some(Frame::End { .. })));
    }

    #[tokio::test]
    async fn test_binary_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0u8..=255).collect();
        std::fs::write(tmp.path().join("bin.dat"), &payload).unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx, rx, "GET", "/bin.dat").await;

        let body = body_of(&frames);
        assert_eq!(body.len(), 256);
        for (i, byte) in body.iter().enumerate() {
            assert_eq!(*byte as usize, i);
        }
    }

    #[tokio::test]
    async fn test_chunking_respects_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let payload = vec![0xA5u8; MAX_CHUNK_SIZE * 2 + 1000];
        std::fs::write(tmp.path().join("big.bin"), &payload).unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx, rx, "GET", "/big.bin").await;

        let data_frames: Vec<usize> = frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Data { chunk, .. } => Some(decode_chunk(chunk).unwrap().len()),
                _ => None,
            })
            .collect();
        assert_eq!(data_frames, vec![MAX_CHUNK_SIZE, MAX_CHUNK_SIZE, 1000]);
        assert_eq!(body_of(&frames), payload);
    }

    #[tokio::test]
    async fn test_head_sends_no_data() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello.txt"), b"Hello").unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx, rx, "HEAD", "/hello.txt").await;

        assert_eq!(frames.len(), 2, "RESPONSE + END only");
        let (status, headers) = head_of(&frames);
        assert_eq!(status, 200);
        assert_eq!(headers["Content-Length"], "5");
    }

    #[tokio::test]
    async fn test_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("empty"), b"").unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx, rx, "GET", "/empty").await;

        let (status, headers) = head_of(&frames);
        assert_eq!(status, 200);
        assert_eq!(headers["Content-Length"], "0");
        assert!(body_of(&frames).is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_404() {
        let tmp = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx, rx, "GET", "/nope.txt").await;
        assert_eq!(head_of(&frames).0, 404);
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("inside.txt"), b"in").unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx.clone(), rx, "GET", "/../../../etc/passwd").await;
        assert_eq!(head_of(&frames).0, 403);

        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);
        let frames = run(ctx, rx, "GET", "/%2e%2e/secret").await;
        assert_eq!(head_of(&frames).0, 403);
    }

    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"s").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), tmp.path().join("link"))
            .unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx, rx, "GET", "/link").await;
        assert_eq!(head_of(&frames).0, 403);
    }

    #[tokio::test]
    async fn test_directory_listing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(tmp.path().join("docs")).unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx, rx, "GET", "/").await;

        let (status, headers) = head_of(&frames);
        assert_eq!(status, 200);
        assert!(headers["Content-Type"].starts_with("text/html"));
        let html = String::from_utf8(body_of(&frames)).unwrap();
        assert!(html.contains("/abc123/a.txt"));
        assert!(html.contains("/abc123/docs/"));
    }

    #[tokio::test]
    async fn test_percent_decoded_names() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello world.txt"), b"spaced").unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx, rx, "GET", "/hello%20world.txt").await;
        assert_eq!(head_of(&frames).0, 200);
        assert_eq!(body_of(&frames), b"spaced");
    }

    #[tokio::test]
    async fn test_file_size_limit() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("big.bin"), vec![0u8; 1024]).unwrap();
        let (tx, rx) = mpsc::channel(64);
        let mut ctx = context(tmp.path(), tx);
        Arc::get_mut(&mut ctx).unwrap().max_file_size = Some(512);

        let frames = run(ctx, rx, "GET", "/big.bin").await;
        assert_eq!(head_of(&frames).0, 403);
    }

    #[tokio::test]
    async fn test_total_transfer_limit() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("file.bin"), vec![0u8; 100]).unwrap();

        let (tx, rx) = mpsc::channel(64);
        let mut ctx = context(tmp.path(), tx);
        Arc::get_mut(&mut ctx).unwrap().max_total_size = Some(150);

        // First request fits the budget
        let frames = run(ctx.clone(), rx, "GET", "/file.bin").await;
        assert_eq!(head_of(&frames).0, 200);
        assert_eq!(ctx.stats.snapshot().bytes_sent, 100);

        // A second copy would push the session past the cap
        let (tx, rx) = mpsc::channel(64);
        let mut second = context(tmp.path(), tx);
        let ctx_mut = Arc::get_mut(&mut second).unwrap();
        ctx_mut.max_total_size = Some(150);
        ctx_mut.stats = Arc::clone(&ctx.stats);
        let frames = run(second, rx, "GET", "/file.bin").await;
        assert_eq!(head_of(&frames).0, 403);
    }

    #[tokio::test]
    async fn test_exhausted_budget_refuses_all_requests() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("file.bin"), vec![0u8; 64]).unwrap();

        let (tx, rx) = mpsc::channel(64);
        let mut ctx = context(tmp.path(), tx);
        Arc::get_mut(&mut ctx).unwrap().max_total_size = Some(64);

        let frames = run(ctx.clone(), rx, "GET", "/file.bin").await;
        assert_eq!(head_of(&frames).0, 200);
        assert_eq!(ctx.total_budget(), Some(0));

        // Budget spent: even a listing is refused now
        let (tx, rx) = mpsc::channel(64);
        let mut drained = context(tmp.path(), tx);
        let ctx_mut = Arc::get_mut(&mut drained).unwrap();
        ctx_mut.max_total_size = Some(64);
        ctx_mut.stats = Arc::clone(&ctx.stats);
        let frames = run(drained, rx, "GET", "/").await;
        assert_eq!(head_of(&frames).0, 403);
    }

    #[tokio::test]
    async fn test_zip_request_for_subtree() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("docs")).unwrap();
        std::fs::write(tmp.path().join("docs/a.txt"), b"zipme").unwrap();
        let (tx, rx) = mpsc::channel(256);
        let ctx = context(tmp.path(), tx);

        let frames = run(ctx, rx, "GET", "/docs/__download__.zip").await;

        let (status, headers) = head_of(&frames);
        assert_eq!(status, 200);
        assert_eq!(headers["Content-Type"], "application/zip");
        assert!(headers["Content-Disposition"].contains("docs.zip"));
        assert!(!headers.contains_key("Content-Length"));

        let body = body_of(&frames);
        assert_eq!(&body[0..4], b"PK\x03\x04");
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("hello.txt"), b"12345").unwrap();
        let (tx, rx) = mpsc::channel(64);
        let ctx = context(tmp.path(), tx);

        let _ = run(ctx.clone(), rx, "GET", "/hello.txt").await;

        let stats = ctx.stats.snapshot();
        assert_eq!(stats.requests_served, 1);
        assert_eq!(stats.bytes_sent, 5);
    }

    #[tokio::test]
    async fn test_chunk_writer_splits() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut writer = ChunkWriter::new("r1", tx);

        writer.write(&vec![1u8; MAX_CHUNK_SIZE + 10]).await.unwrap();
        writer.write(&[2u8; 5]).await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        let mut sizes = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            match frame {
                Frame::Data { chunk, .. } => sizes.push(decode_chunk(&chunk).unwrap().len()),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(sizes, vec![MAX_CHUNK_SIZE, 15]);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/b/"), "a/b");
        assert_eq!(normalize_path("/%41%20b"), "A b");
        assert_eq!(normalize_path("/"), "");
    }
}
