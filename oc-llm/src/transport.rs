use crate::error::{LlmError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest silence between two reads. Streams may run far longer in total.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One outbound POST. Headers are already provider-specific.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

/// HTTP seam. The client only ever POSTs JSON and reads either the whole
/// body or the body line by line.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the response body. A non-2xx status is an error.
    async fn post(&self, request: TransportRequest) -> Result<String>;

    /// Returns the response body split into lines without terminators.
    async fn post_lines(&self, request: TransportRequest) -> Result<LineStream>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_read_timeout(READ_TIMEOUT)
    }

    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self { http }
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn send(&self, request: TransportRequest) -> Result<reqwest::Response> {
        let mut builder = self.http.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.json(&request.body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Transport(format!(
                "post {} status={status} body={body}",
                request.url
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn post(&self, request: TransportRequest) -> Result<String> {
        let response = self.send(request).await?;
        Ok(response.text().await?)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn post_lines(&self, request: TransportRequest) -> Result<LineStream> {
        let response = self.send(request).await?;
        Ok(Box::pin(decode_lines(response.bytes_stream())))
    }
}

/// Split a byte stream into text lines. A trailing partial line is flushed
/// at end of stream.
pub(crate) fn decode_lines<S, E>(bytes_stream: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display,
{
    futures_util::stream::unfold(
        (bytes_stream, Vec::<u8>::new(), false),
        |(mut stream, mut buffer, mut finished)| async move {
            loop {
                if let Some(idx) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=idx).collect();
                    return Some((Ok(to_line(&raw)), (stream, buffer, finished)));
                }
                if finished {
                    if buffer.is_empty() {
                        return None;
                    }
                    let raw = std::mem::take(&mut buffer);
                    return Some((Ok(to_line(&raw)), (stream, buffer, finished)));
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Some((
                            Err(LlmError::Transport(e.to_string())),
                            (stream, Vec::new(), true),
                        ));
                    }
                    None => finished = true,
                }
            }
        },
    )
}

fn to_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}
