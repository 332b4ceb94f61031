use std::path::PathBuf;

use crate::transport::TransportError;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum EyesError {
    /// Network failure that is not worth retrying (invalid request, oversized body).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Every attempt allowed by the retry budget failed.
    #[error("{method} {url} failed after {attempts} attempt(s): {reason}")]
    RetriesExhausted {
        method: String,
        url: String,
        /// Number of requests sent, including the first one.
        attempts: u32,
        /// Network error message or HTTP status text of the last attempt.
        reason: String,
    },
    /// Non-success HTTP status code for a plain (non long-running) request.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// The server task expired before it completed.
    #[error("the server task has gone: {url}")]
    Gone { url: String },
    /// A long-running request answered with a status outside the protocol.
    #[error("unknown status {status} during long request: {body}")]
    UnexpectedStatus { status: u16, body: String },
    /// A 201/202 response did not carry a `Location` header to follow.
    #[error("long request response with status {status} has no location header")]
    MissingLocation { status: u16 },
    /// The optional overall poll deadline passed before a terminal status.
    #[error("long request still running after {elapsed_ms} ms")]
    PollDeadlineExceeded { elapsed_ms: u64 },
    /// Response decoding or shape validation error.
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid server url: {0}")]
    InvalidServerUrl(String),
    #[error("invalid proxy: {0}")]
    InvalidProxy(String),
    /// Image type other than `baseline`, `current` or `diff`.
    #[error("must set a valid image type, got '{0}' (valid types: baseline, current, diff)")]
    InvalidImageType(String),
    /// No step has an image of the requested kind.
    #[error("no {kind} images were found")]
    NoImages { kind: String },
    #[error("could not download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: Box<EyesError>,
    },
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
