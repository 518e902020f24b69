//! Transport over HTTPS using `reqwest`.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use reportlink_protocol::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use reportlink_transfer::TransferDescriptor;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use tracing::debug;

use crate::error::UploadError;
use crate::transport::{ProgressFn, RawResponse, Request, Transport, TransportFuture};

/// Sends requests with a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    chunk_size: usize,
}

impl HttpTransport {
    /// Creates a transport with the default timeouts.
    pub fn new() -> Result<Self, UploadError> {
        Self::with_timeouts(DEFAULT_REQUEST_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Creates a transport with explicit timeouts.
    ///
    /// A request that exceeds either timeout fails as a transport failure.
    pub fn with_timeouts(request: Duration, connect: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(request)
            .connect_timeout(connect)
            .build()
            .map_err(|e| UploadError::Transport(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            chunk_size: reportlink_transfer::DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the size of streamed body chunks (one progress tick per chunk).
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn build(
        &self,
        request: Request,
        on_progress: Option<ProgressFn>,
    ) -> Result<reqwest::RequestBuilder, UploadError> {
        let url = request.url().to_string();
        let token = request.access_token().to_string();

        let builder = match request {
            Request::CreateReport { body, .. } => self.client.post(&url).json(&body),
            Request::Probe { .. } => self.client.head(&url),
            Request::Finalize { body, .. } => self.client.post(&url).json(&body),
            Request::Transfer { descriptor } => {
                let content_range = descriptor.content_range();
                let len = descriptor.len();
                let body = body_stream(descriptor, self.chunk_size, on_progress);

                self.client
                    .put(&url)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .header(CONTENT_RANGE, content_range)
                    .header(CONTENT_LENGTH, len)
                    .body(reqwest::Body::wrap_stream(body))
            }
        };
        Ok(builder.bearer_auth(token))
    }
}

/// Splits the payload into chunks, reporting the running total as each
/// chunk is pulled by the connection.
fn body_stream(
    descriptor: TransferDescriptor,
    chunk_size: usize,
    on_progress: Option<ProgressFn>,
) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
    let mut sent = 0u64;
    stream::iter(descriptor.into_chunks(chunk_size)).map(move |chunk| {
        sent += chunk.len() as u64;
        if let Some(cb) = &on_progress {
            cb(sent);
        }
        Ok::<_, std::io::Error>(chunk)
    })
}

impl Transport for HttpTransport {
    fn execute(&self, request: Request, on_progress: Option<ProgressFn>) -> TransportFuture<'_> {
        Box::pin(async move {
            let operation = request.operation();
            let builder = self.build(request, on_progress)?;
            let resp = builder
                .send()
                .await
                .map_err(|e| UploadError::Transport(e.to_string()))?;

            let status = resp.status().as_u16();
            let headers: HashMap<String, String> = resp
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect();
            let body = resp
                .bytes()
                .await
                .map_err(|e| UploadError::Transport(e.to_string()))?
                .to_vec();

            debug!(%operation, status, bytes = body.len(), "response received");
            Ok(RawResponse {
                status: Some(status),
                headers,
                body,
            })
        })
    }
}
