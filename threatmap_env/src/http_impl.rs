//! Production transport: REST polling + server-sent events over reqwest.

use crate::error::EnvError;
use crate::network::{FeedSource, IconFetcher};
use crate::types::{FeedQuery, IconBytes, LocateResponse, PushSignal, RawPayload};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Request timeout for `/data`, `/locate` and icon downloads.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered push messages before the SSE reader applies backpressure.
const PUSH_BUFFER: usize = 64;

/// Reconnect backoff bounds for the SSE reader.
const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Per-request timeout of the long-lived `/stream` connection.
const STREAM_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// HTTP implementation of [`FeedSource`] and [`IconFetcher`].
pub struct HttpFeedSource {
    client: reqwest::Client,

    /// Backend origin without trailing slash, e.g. `https://example.org`
    base_url: String,

    /// Timeout applied to `/data`, `/locate` and icon requests
    timeout: Duration,

    push_tx: mpsc::Sender<PushSignal>,
    push_rx: Mutex<mpsc::Receiver<PushSignal>>,
}

impl HttpFeedSource {
    /// Creates a transport for the given backend origin.
    pub fn new(base_url: impl Into<String>) -> Result<Self, EnvError> {
        Self::with_timeout(base_url, REQUEST_TIMEOUT)
    }

    /// Creates a transport with a custom request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EnvError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnvError::from_reqwest(e, timeout))?;
        let (push_tx, push_rx) = mpsc::channel(PUSH_BUFFER);
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            push_tx,
            push_rx: Mutex::new(push_rx),
        })
    }

    /// Resolves a path or absolute URL against the backend origin.
    pub fn url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else if path_or_url.starts_with('/') {
            format!("{}{}", self.base_url, path_or_url)
        } else {
            format!("{}/{}", self.base_url, path_or_url)
        }
    }

    fn error(&self, err: reqwest::Error) -> EnvError {
        EnvError::from_reqwest(err, self.timeout)
    }

    /// Starts the SSE reader for `GET /stream`.
    ///
    /// The reader reconnects with exponential backoff until the returned
    /// handle is aborted or the transport is dropped.
    pub fn subscribe(&self) -> tokio::task::JoinHandle<()> {
        let reader = StreamReader {
            client: self.client.clone(),
            url: self.url("/stream"),
            push_tx: self.push_tx.clone(),
        };
        tokio::spawn(reader.run())
    }
}

/// Background SSE reader.
///
/// Holds only a sender, so dropping the transport (and with it the
/// receiver) closes the channel and ends the reader.
struct StreamReader {
    client: reqwest::Client,
    url: String,
    push_tx: mpsc::Sender<PushSignal>,
}

impl StreamReader {
    async fn run(self) {
        let mut backoff = RECONNECT_MIN;
        loop {
            match self.read_stream().await {
                Ok(()) => {
                    info!("push stream ended, reconnecting");
                    backoff = RECONNECT_MIN;
                }
                Err(EnvError::Closed) => {
                    debug!("push receiver dropped, stopping stream reader");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "push stream failed");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.push_tx.closed() => {
                    debug!("push receiver dropped, stopping stream reader");
                    return;
                }
            }
            backoff = (backoff * 2).min(RECONNECT_MAX);
        }
    }

    async fn read_stream(&self) -> Result<(), EnvError> {
        let response = tokio::select! {
            response = self
                .client
                .get(&self.url)
                .header("Accept", "text/event-stream")
                .timeout(STREAM_TIMEOUT)
                .send() => response,
            _ = self.push_tx.closed() => return Err(EnvError::Closed),
        };
        let response = response
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| EnvError::from_reqwest(e, STREAM_TIMEOUT))?;
        info!(url = %self.url, "push stream connected");

        let mut decoder = SseDecoder::default();
        let mut body = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                _ = self.push_tx.closed() => return Err(EnvError::Closed),
            };
            let Some(chunk) = chunk else {
                return Ok(());
            };
            let chunk = chunk.map_err(|e| EnvError::from_reqwest(e, STREAM_TIMEOUT))?;
            for data in decoder.feed(&chunk) {
                match serde_json::from_str::<serde_json::Value>(&data) {
                    Ok(value) => self
                        .push_tx
                        .send(PushSignal::from_payload(value))
                        .await
                        .map_err(|_| EnvError::Closed)?,
                    Err(e) => debug!(error = %e, "ignoring non-JSON push payload"),
                }
            }
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, query: &FeedQuery) -> Result<RawPayload, EnvError> {
        let url = self.url("/data");
        let response = self
            .client
            .get(&url)
            .query(&query.to_params())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| self.error(e))?;
        let body: serde_json::Value = response.json().await.map_err(|e| self.error(e))?;
        Ok(RawPayload::new(body))
    }

    async fn next_push(&self) -> Option<PushSignal> {
        let mut rx = self.push_rx.lock().await;
        rx.recv().await
    }

    async fn locate(&self, query: &str) -> Result<LocateResponse, EnvError> {
        let url = self.url("/locate");
        let response = self
            .client
            .get(&url)
            .query(&[("q", query)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| self.error(e))?;
        response.json().await.map_err(|e| self.error(e))
    }
}

#[async_trait]
impl IconFetcher for HttpFeedSource {
    async fn fetch_icon(&self, url: &str) -> Result<IconBytes, EnvError> {
        let url = self.url(url);
        let response = self.client.get(&url).send().await.map_err(|e| self.error(e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EnvError::NotFound(url));
        }
        let response = response.error_for_status().map_err(|e| self.error(e))?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response.bytes().await.map_err(|e| self.error(e))?.to_vec();
        if data.is_empty() {
            return Err(EnvError::decode(format!("empty icon body from {url}")));
        }
        Ok(IconBytes { data, content_type })
    }
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Only the `data:` field matters to the client; `event:`, `id:` and
/// comment lines are skipped. Multi-line data fields are joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current incomplete line
    pending: Vec<u8>,

    /// Data lines of the event being assembled
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Feeds a chunk and returns the data payloads of completed events.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut completed = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                self.pending.push(byte);
                continue;
            }
            let mut line = std::mem::take(&mut self.pending);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    completed.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines
                    .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        completed
    }
}
