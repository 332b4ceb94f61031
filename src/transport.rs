use std::future::Future;

use reqwest::header::{HeaderMap, ACCEPT, LOCATION};
use reqwest::StatusCode;
use tracing::debug;

use crate::{
    correlation::{CorrelationId, REQUEST_ID_HEADER},
    proxy::ProxyDescriptor,
    request::RequestDescriptor,
    EyesError,
};

/// Response of a completed network call, whatever its status.
#[derive(Clone, Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    /// `Location` header, if present and valid UTF-8.
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    /// Body decoded as lossy UTF-8 and cut to `limit` characters, for messages.
    pub fn body_excerpt(&self, limit: usize) -> String {
        truncate(&String::from_utf8_lossy(&self.body), limit)
    }

    /// Canonical reason phrase, falling back to the numeric code.
    pub fn status_text(&self) -> String {
        self.status
            .canonical_reason()
            .map(str::to_owned)
            .unwrap_or_else(|| self.status.as_str().to_owned())
    }
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Class of a failed network call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    /// Connection refused or DNS resolution failure.
    Connect,
    /// Connection reset or aborted while sending.
    Request,
    /// Failure while reading the response body.
    Body,
    /// Body larger than the descriptor's content-size cap.
    TooLarge,
    /// The request could not be built, e.g. a malformed URL.
    InvalidRequest,
}

/// A network call that did not produce a response.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Transient faults worth resending the same request for.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Timeout
                | TransportErrorKind::Connect
                | TransportErrorKind::Request
                | TransportErrorKind::Body
        )
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else if err.is_builder() {
            TransportErrorKind::InvalidRequest
        } else {
            TransportErrorKind::Request
        };
        Self::new(kind, err.to_string())
    }
}

/// Client construction failure; only blamed on the proxy when one is set.
fn build_error(message: String, proxied: bool) -> EyesError {
    if proxied {
        EyesError::InvalidProxy(message)
    } else {
        TransportError::new(TransportErrorKind::InvalidRequest, message).into()
    }
}

/// Performs exactly one network call per invocation.
///
/// Implementations never retry and never interpret status codes.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &RequestDescriptor,
        request_id: &CorrelationId,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Builds a transport, routing traffic through `proxy` when given.
    pub fn new(proxy: Option<&ProxyDescriptor>) -> crate::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = proxy {
            debug!(
                host = %proxy.host,
                port = ?proxy.port,
                tunnel = proxy.http_only,
                "using proxy"
            );
            builder = builder.proxy(proxy.to_reqwest()?);
        }
        let http = builder
            .build()
            .map_err(|err| build_error(err.to_string(), proxy.is_some()))?;
        Ok(Self { http })
    }

    async fn perform(
        &self,
        request: &RequestDescriptor,
        request_id: &CorrelationId,
    ) -> Result<Response, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .timeout(request.timeout)
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .query(&request.query);
        if let Some(accept) = request.accept() {
            builder = builder.header(ACCEPT, accept);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status();
        let headers = response.headers().clone();

        let too_large = || {
            TransportError::new(
                TransportErrorKind::TooLarge,
                format!(
                    "response body exceeds {} bytes",
                    request.max_content_length
                ),
            )
        };
        if response
            .content_length()
            .is_some_and(|length| length > request.max_content_length as u64)
        {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(TransportError::from_reqwest)? {
            if body.len() + chunk.len() > request.max_content_length {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        request_id: &CorrelationId,
    ) -> Result<Response, TransportError> {
        let outcome = self.perform(request, request_id).await;
        match &outcome {
            Ok(response) => debug!(
                request_id = %request_id,
                status = response.status.as_u16(),
                url = %request.url,
                "request completed"
            ),
            Err(err) => debug!(
                request_id = %request_id,
                kind = ?err.kind,
                url = %request.url,
                "request failed: {err}"
            ),
        }
        outcome
    }
}
