//! In-process HTTP fixture for transfer and coordinator tests
//!
//! Serves one artifact at `/artifact` and an optional manifest at
//! `/version.json`, with switches for the failure modes an update server
//! exhibits in the field.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::FetcherConfig;
use crate::core::types::{Digest, DigestAlgorithm};

const CHUNK: usize = 16 * 1024;

/// How a failing response misbehaves
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    /// Send `after` body bytes, then reset the connection
    Abort { after: usize },
    /// Send `after` body bytes, then go silent
    Stall { after: usize },
}

#[derive(Debug, Clone)]
pub struct FixtureOptions {
    /// Honour `Range: bytes=N-`
    pub ranges: bool,
    /// Answer every artifact request with this status and no body
    pub status: Option<u16>,
    /// Answer ranged requests with 206 but a `Content-Range` starting at 0
    pub misreport_range: bool,
    /// Applied to the first `failing_responses` artifact responses
    pub failure: Option<Failure>,
    pub failing_responses: u32,
    /// Wait before sending response headers
    pub delay: Option<Duration>,
    /// Body served at `/version.json`
    pub manifest: Option<String>,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            ranges: true,
            status: None,
            misreport_range: false,
            failure: None,
            failing_responses: 0,
            delay: None,
            manifest: None,
        }
    }
}

/// One request as the server saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub range: Option<String>,
    pub cache_control: Option<String>,
}

struct FixtureState {
    content: Bytes,
    options: FixtureOptions,
    artifact_hits: AtomicU32,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FixtureState {
    fn record(&self, path: &str, headers: &HeaderMap) -> Option<String> {
        let text = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let range = text(header::RANGE);
        self.requests.lock().push(RecordedRequest {
            path: path.to_string(),
            range: range.clone(),
            cache_control: text(header::CACHE_CONTROL),
        });
        range
    }
}

pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<FixtureState>,
    handle: tokio::task::JoinHandle<()>,
}

impl FixtureServer {
    pub async fn start(content: Vec<u8>, options: FixtureOptions) -> Self {
        let state = Arc::new(FixtureState {
            content: Bytes::from(content),
            options,
            artifact_hits: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/artifact", get(serve_artifact))
            .route("/version.json", get(serve_manifest))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/artifact", self.addr)
    }

    pub fn manifest_url(&self) -> String {
        format!("http://{}/version.json", self.addr)
    }

    /// Artifact requests received so far
    pub fn hits(&self) -> u32 {
        self.state.artifact_hits.load(Ordering::SeqCst)
    }

    /// `Range` header of each artifact request, in arrival order
    pub fn range_headers(&self) -> Vec<Option<String>> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|r| r.path == "/artifact")
            .map(|r| r.range.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_artifact(State(state): State<Arc<FixtureState>>, headers: HeaderMap) -> Response {
    let range = state.record("/artifact", &headers);
    let hit = state.artifact_hits.fetch_add(1, Ordering::SeqCst);
    let options = &state.options;

    if let Some(delay) = options.delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(code) = options.status {
        return StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }

    let len = state.content.len();
    let requested = range.as_deref().and_then(parse_range_start);
    let (status, start, reported_start) = match requested {
        Some(_) if options.misreport_range => (StatusCode::PARTIAL_CONTENT, 0, 0),
        Some(start) if options.ranges => {
            if start >= len {
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{}", len))],
                )
                    .into_response();
            }
            (StatusCode::PARTIAL_CONTENT, start, start)
        }
        _ => (StatusCode::OK, 0, 0),
    };

    let body = state.content.slice(start..);
    let failure = if hit < options.failing_responses {
        options.failure
    } else {
        None
    };

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, body.len());
    if status == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", reported_start, len.saturating_sub(1), len),
        );
    }
    response
        .body(body_stream(body, failure))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn serve_manifest(State(state): State<Arc<FixtureState>>, headers: HeaderMap) -> Response {
    state.record("/version.json", &headers);
    match &state.options.manifest {
        Some(body) => (
            [(header::CONTENT_TYPE, "application/json")],
            body.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn body_stream(body: Bytes, failure: Option<Failure>) -> Body {
    let sent = match failure {
        Some(Failure::Abort { after }) | Some(Failure::Stall { after }) => {
            body.slice(..after.min(body.len()))
        }
        None => body,
    };

    let chunks: Vec<Result<Bytes, std::io::Error>> = sent
        .chunks(CHUNK)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let head = stream::iter(chunks);

    match failure {
        None => Body::from_stream(head),
        Some(Failure::Abort { .. }) => Body::from_stream(head.chain(stream::once(async {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "fixture abort",
            ))
        }))),
        Some(Failure::Stall { .. }) => {
            Body::from_stream(head.chain(stream::pending::<Result<Bytes, std::io::Error>>()))
        }
    }
}

fn parse_range_start(value: &str) -> Option<usize> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (start, _) = spec.split_once('-')?;
    start.trim().parse().ok()
}

/// Deterministic non-repeating test content
pub fn test_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 251) as u8).collect()
}

pub fn sha256_of(content: &[u8]) -> Digest {
    Digest::of_bytes(DigestAlgorithm::Sha256, content)
}

/// Configuration pointing at `cache_dir` with short timeouts and no backoff
pub fn test_config(cache_dir: &std::path::Path) -> FetcherConfig {
    let mut config = FetcherConfig::with_cache_dir(cache_dir);
    config.http.idle_timeout_secs = 1;
    config.http.connect_timeout_secs = 2;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config.retry.jitter = false;
    config.progress_interval_ms = 0;
    config
}
