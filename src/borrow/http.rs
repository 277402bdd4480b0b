//! HTTP collaborator used by subtasks
//!
//! Subtasks talk to circulation servers through the [`HttpClient`] trait so
//! tests can substitute mock servers or fakes. [`ReqwestHttpClient`] is the
//! production implementation.

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::mime::{self, MimeType};
use crate::storage::temp_sibling;
use crate::types::Cookie;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Authorization sent with a request
#[derive(Clone, PartialEq, Eq)]
pub enum Authorization {
    /// HTTP basic authentication
    Basic {
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// Bearer token
    Bearer(String),
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authorization::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Authorization::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

/// A GET request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    /// Target
    pub url: Url,
    /// Authorization header
    pub authorization: Option<Authorization>,
    /// Cookies to send
    pub cookies: Vec<Cookie>,
}

impl HttpRequest {
    /// Unauthenticated request
    pub fn new(url: Url) -> Self {
        Self {
            url,
            authorization: None,
            cookies: Vec::new(),
        }
    }
}

/// A fully-read response
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Parsed `Content-Type`, if present and well-formed
    pub content_type: Option<MimeType>,
    /// Body
    pub body: Vec<u8>,
    /// URL after redirects
    pub final_url: Url,
}

#[derive(Deserialize)]
struct ProblemDocument {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl HttpResponse {
    /// True for 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Human-readable detail of a problem-report body
    pub fn problem_detail(&self) -> Option<String> {
        problem_detail(self.content_type.as_ref(), &self.body)
    }
}

fn problem_detail(content_type: Option<&MimeType>, body: &[u8]) -> Option<String> {
    let is_problem = content_type.is_some_and(|t| t.is(mime::PROBLEM_REPORT) || t.is("application/json"));
    if !is_problem {
        return None;
    }
    let doc: ProblemDocument = serde_json::from_slice(body).ok()?;
    doc.detail.or(doc.title)
}

/// Result of executing a request
#[derive(Debug)]
pub enum HttpResult {
    /// The server answered with 2xx
    Ok(HttpResponse),
    /// The server answered with an error status
    Error(HttpResponse),
    /// The request never produced a response
    Failed(Error),
}

impl HttpResult {
    pub(crate) fn from_response(response: HttpResponse) -> Self {
        if response.is_success() {
            HttpResult::Ok(response)
        } else {
            HttpResult::Error(response)
        }
    }
}

/// Result of streaming a response body to a file
#[derive(Debug)]
pub enum DownloadOutcome {
    /// The body landed at the destination
    Succeeded {
        /// Parsed `Content-Type`, if present
        content_type: Option<MimeType>,
        /// Bytes written
        bytes: u64,
        /// URL after redirects
        final_url: Url,
    },
    /// Cancelled; nothing was left at the destination
    Cancelled,
    /// The server answered with an error status
    ServerFailed {
        /// Status code
        status: u16,
        /// Problem-report detail, if the body carried one
        detail: Option<String>,
    },
    /// The transfer failed before completing
    Failed(Error),
}

/// Progress callback: bytes received so far and expected total
pub type ProgressFn<'a> = &'a mut (dyn FnMut(u64, Option<u64>) + Send);

/// HTTP operations subtasks need
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Fetch a small document into memory
    async fn execute(&self, request: &HttpRequest) -> HttpResult;

    /// Stream a response body to `destination`
    ///
    /// The body is written to a `.tmp` sibling and renamed into place only
    /// once complete. On cancellation or failure the temporary file is removed.
    async fn download(
        &self,
        request: &HttpRequest,
        destination: &Path,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> DownloadOutcome;
}

/// [`HttpClient`] over `reqwest`
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Build a client from configuration
    ///
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialized
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn build(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(request.url.clone());
        match &request.authorization {
            Some(Authorization::Basic { username, password }) => {
                builder = builder.basic_auth(username, Some(password));
            }
            Some(Authorization::Bearer(token)) => {
                builder = builder.bearer_auth(token);
            }
            None => {}
        }
        if !request.cookies.is_empty() {
            let header = request
                .cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, header);
        }
        builder
    }

    async fn stream_to_file(
        response: reqwest::Response,
        path: &Path,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<Option<u64>> {
        let expected = response.content_length();
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut received = 0u64;
        progress(received, expected);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        file.write_all(&bytes).await?;
                        received += bytes.len() as u64;
                        progress(received, expected);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(Some(received))
    }
}

fn content_type_of(response: &reqwest::Response) -> Option<MimeType> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| MimeType::parse(v).ok())
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: &HttpRequest) -> HttpResult {
        let response = match self.build(request).send().await {
            Ok(response) => response,
            Err(e) => return HttpResult::Failed(e.into()),
        };
        let status = response.status().as_u16();
        let content_type = content_type_of(&response);
        let final_url = response.url().clone();
        match response.bytes().await {
            Ok(body) => HttpResult::from_response(HttpResponse {
                status,
                content_type,
                body: body.to_vec(),
                final_url,
            }),
            Err(e) => HttpResult::Failed(e.into()),
        }
    }

    async fn download(
        &self,
        request: &HttpRequest,
        destination: &Path,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> DownloadOutcome {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return DownloadOutcome::Cancelled,
            sent = self.build(request).send() => match sent {
                Ok(response) => response,
                Err(e) => return DownloadOutcome::Failed(e.into()),
            },
        };

        let status = response.status();
        let content_type = content_type_of(&response);
        if !status.is_success() {
            let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            return DownloadOutcome::ServerFailed {
                status: status.as_u16(),
                detail: problem_detail(content_type.as_ref(), &body),
            };
        }

        let final_url = response.url().clone();
        let tmp = temp_sibling(destination);
        let streamed = Self::stream_to_file(response, &tmp, cancel, progress).await;
        let finished = match streamed {
            Ok(Some(bytes)) => tokio::fs::rename(&tmp, destination)
                .await
                .map(|()| Some(bytes))
                .map_err(Error::from),
            other => other,
        };

        match finished {
            Ok(Some(bytes)) => DownloadOutcome::Succeeded {
                content_type,
                bytes,
                final_url,
            },
            Ok(None) => {
                remove_quietly(&tmp).await;
                DownloadOutcome::Cancelled
            }
            Err(e) => {
                remove_quietly(&tmp).await;
                DownloadOutcome::Failed(e)
            }
        }
    }
}

/// Remove a file, ignoring absence and logging other failures
pub(crate) async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove temporary file"),
    }
}
