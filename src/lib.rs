//! `eyes-results` fetches Applitools Eyes visual test results, classifies
//! every step and downloads its baseline, current or diff images.
//!
//! Image endpoints speak the Eyes long-running request protocol, which
//! [`EyesResultsClient::send_long_request`] follows to completion:
//! - [`EyesResultsClient::step_results`]
//! - [`EyesResultsClient::step_statuses`]
//! - [`EyesResultsClient::download_images`]

mod client;
mod correlation;
mod download;
mod error;
mod options;
mod poll;
mod proxy;
mod request;
mod results;
mod retry;
mod transport;

pub use client::EyesResultsClient;
pub use correlation::{CorrelationId, REQUEST_ID_HEADER};
pub use download::{ensure_image_directory, image_directory, plan_images, PlannedImage};
pub use error::EyesError;
pub use options::ClientOptions;
pub use poll::{LongRequestState, PollSchedule};
pub use proxy::{ProxyAuth, ProxyDescriptor};
pub use request::{RequestDescriptor, ResponseEncoding};
pub use results::{
    image_ids, step_results, AppOutput, AppUrls, DisplaySize, ImageKind, ImageRef,
    SessionDetails, SessionUrls, StepInfo, StepResult, StepStatus, TestResults,
};
pub use retry::{is_retryable_status, RetryBudget, RetryPolicy};
pub use transport::{HttpTransport, Response, Transport, TransportError, TransportErrorKind};

pub type Result<T> = std::result::Result<T, EyesError>;
