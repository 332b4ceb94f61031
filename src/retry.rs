use std::time::Duration;

use reqwest::StatusCode;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    correlation::CorrelationId,
    request::{RequestDescriptor, API_KEY_PARAM},
    transport::{truncate, Response, Transport},
    ClientOptions, EyesError, Result,
};

/// Characters of the outgoing parameters echoed in failure logs.
const LOGGED_PARAMS_LIMIT: usize = 100;
const LOGGED_BODY_LIMIT: usize = 1024;

/// Statuses treated like transient network faults.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NOT_FOUND
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Attempts left for one logical operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
    delay_before_retry: bool,
}

impl RetryBudget {
    pub fn new(remaining: u32, delay_before_retry: bool) -> Self {
        Self {
            remaining,
            delay_before_retry,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn delay_before_retry(&self) -> bool {
        self.delay_before_retry
    }

    /// Takes one attempt from the budget, returning `false` once it is spent.
    fn consume(&mut self) -> bool {
        match self.remaining.checked_sub(1) {
            Some(left) => {
                self.remaining = left;
                true
            }
            None => false,
        }
    }
}

/// Resends failed requests while the budget allows it.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    delay_before_retry: bool,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay_before_retry: bool, interval: Duration) -> Self {
        Self {
            max_retries,
            delay_before_retry,
            interval,
        }
    }

    pub fn from_options(options: &ClientOptions) -> Self {
        Self::new(
            options.max_retries,
            options.delay_before_retry,
            options.retry_interval(),
        )
    }

    /// Fresh budget for a new operation.
    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.max_retries, self.delay_before_retry)
    }

    /// Sends `request` with a fresh budget.
    pub async fn send<T: Transport>(
        &self,
        transport: &T,
        request: &RequestDescriptor,
    ) -> Result<Response> {
        self.execute(transport, request, self.budget()).await
    }

    /// Sends `request` until the network call completes with a non-retryable
    /// status or `budget` runs out.
    ///
    /// Any completed call whose status is outside the retryable set is
    /// returned as is; interpreting it is the caller's job.
    pub async fn execute<T: Transport>(
        &self,
        transport: &T,
        request: &RequestDescriptor,
        mut budget: RetryBudget,
    ) -> Result<Response> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let request_id = CorrelationId::next();

            let reason = match transport.send(request, &request_id).await {
                Ok(response) if !is_retryable_status(response.status) => {
                    info!(
                        request_id = %request_id,
                        url = %request.url,
                        "result {}, status code {}",
                        response.status_text(),
                        response.status.as_u16()
                    );
                    return Ok(response);
                }
                Ok(response) => {
                    let reason = response.status_text();
                    warn!(
                        request_id = %request_id,
                        method = %request.method,
                        url = %request.url,
                        status = response.status.as_u16(),
                        params = %logged_params(request),
                        "request failed. reason={reason}"
                    );
                    if !response.body.is_empty() {
                        warn!(
                            request_id = %request_id,
                            "failure body:\n{}",
                            response.body_excerpt(LOGGED_BODY_LIMIT)
                        );
                    }
                    reason
                }
                Err(err) => {
                    warn!(
                        request_id = %request_id,
                        method = %request.method,
                        url = %request.url,
                        params = %logged_params(request),
                        "request failed. reason={err}"
                    );
                    if !err.is_retryable() {
                        return Err(EyesError::Transport(err));
                    }
                    err.message
                }
            };

            if !budget.consume() {
                return Err(EyesError::RetriesExhausted {
                    method: request.method.to_string(),
                    url: request.url.clone(),
                    attempts,
                    reason,
                });
            }

            info!(
                delay_before_retry = budget.delay_before_retry,
                remaining = budget.remaining,
                "retrying request"
            );
            if budget.delay_before_retry {
                sleep(self.interval).await;
            }
        }
    }
}

/// Outgoing query parameters as JSON with the API key masked, cut for logging.
fn logged_params(request: &RequestDescriptor) -> String {
    let mut params = request.query.clone();
    for (name, value) in params.iter_mut() {
        if name.eq_ignore_ascii_case(API_KEY_PARAM) {
            *value = "<redacted>".to_owned();
        }
    }
    let rendered = serde_json::to_string(&params).unwrap_or_default();
    truncate(&rendered, LOGGED_PARAMS_LIMIT)
}
