//! Long-running request protocol.
//!
//! The server answers slow requests with `202 Accepted` and a location to
//! poll. Polling continues with a growing delay until the server reports
//! completion (`200`), asks for the finished task to be released (`201`) or
//! reports that the task expired (`410`).

use std::time::Duration;

use reqwest::{Method, StatusCode};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::{
    request::{RequestDescriptor, RequestFactory},
    retry::RetryPolicy,
    transport::{Response, Transport},
    ClientOptions, EyesError, Result,
};

const UNEXPECTED_BODY_LIMIT: usize = 512;

/// What a long-request response means for the operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LongRequestState {
    /// `200`: the response carries the result.
    Complete,
    /// `202`: still running, poll the location.
    Pending { location: Option<String> },
    /// `201`: finished, the location must be deleted.
    Cleanup { location: Option<String> },
    /// `410`: the server task expired.
    Expired,
    /// Any other status: the operation fails with it.
    Unexpected(StatusCode),
}

impl LongRequestState {
    /// Pure transition from a response to the next state.
    pub fn from_response(response: &Response) -> Self {
        let location = || response.location().map(str::to_owned);
        match response.status {
            StatusCode::OK => Self::Complete,
            StatusCode::ACCEPTED => Self::Pending {
                location: location(),
            },
            StatusCode::CREATED => Self::Cleanup {
                location: location(),
            },
            StatusCode::GONE => Self::Expired,
            status => Self::Unexpected(status),
        }
    }
}

/// Delay growth of the poll loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PollSchedule {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl PollSchedule {
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            base: Duration::from_millis(options.poll_delay_ms),
            max: Duration::from_millis(options.max_poll_delay_ms),
            factor: options.poll_delay_factor,
        }
    }

    /// First delay of an operation, clamped to the cap.
    pub fn initial(&self) -> Duration {
        self.base.min(self.max)
    }

    /// `min(max, floor(current * factor))`, never below `current`.
    pub fn next(&self, current: Duration) -> Duration {
        let current_ms = current.as_millis() as f64;
        let grown = Duration::from_millis((current_ms * self.factor).floor() as u64);
        grown.min(self.max).max(current.min(self.max))
    }
}

/// State of one poll loop: the delay reached so far and the request being polled.
#[derive(Debug)]
struct PollState {
    delay: Duration,
    request: Option<RequestDescriptor>,
}

impl PollState {
    /// Returns the follow-up request for `location`, reusing the in-flight
    /// descriptor while the location is unchanged.
    fn follow(&mut self, factory: &RequestFactory, location: String) -> &RequestDescriptor {
        let request = match self.request.take() {
            Some(request) if request.url == location => request,
            _ => factory.long_request(Method::GET, location),
        };
        self.request.insert(request)
    }
}

/// Drives a long request from its first response to a terminal status.
pub(crate) struct LongRequest<'a, T> {
    transport: &'a T,
    retry: &'a RetryPolicy,
    factory: &'a RequestFactory,
    schedule: PollSchedule,
    deadline: Option<Duration>,
}

impl<'a, T: Transport> LongRequest<'a, T> {
    pub(crate) fn new(
        transport: &'a T,
        retry: &'a RetryPolicy,
        factory: &'a RequestFactory,
    ) -> Self {
        let options = factory.options();
        Self {
            transport,
            retry,
            factory,
            schedule: PollSchedule::from_options(options),
            deadline: options.poll_deadline(),
        }
    }

    /// Sends `method url` and follows the protocol until a terminal status.
    pub(crate) async fn send(&self, method: Method, url: &str) -> Result<Response> {
        let request = self.factory.long_request(method, url);
        let response = self.retry.send(self.transport, &request).await?;
        self.resolve(&request.url, response).await
    }

    /// Follows the protocol starting from the response already received for `url`.
    pub(crate) async fn resolve(&self, url: &str, mut response: Response) -> Result<Response> {
        let started = Instant::now();
        let mut state = PollState {
            delay: self.schedule.initial(),
            request: None,
        };

        loop {
            match LongRequestState::from_response(&response) {
                LongRequestState::Complete => return Ok(response),
                LongRequestState::Pending { location } => {
                    let location = location.ok_or(EyesError::MissingLocation {
                        status: response.status.as_u16(),
                    })?;
                    state.delay = self.schedule.next(state.delay);
                    if let Some(deadline) = self.deadline {
                        let elapsed = started.elapsed();
                        if elapsed + state.delay > deadline {
                            return Err(EyesError::PollDeadlineExceeded {
                                elapsed_ms: elapsed.as_millis() as u64,
                            });
                        }
                    }
                    info!(
                        "still running... retrying in {} ms",
                        state.delay.as_millis()
                    );
                    sleep(state.delay).await;

                    let request = state.follow(self.factory, location);
                    response = self.retry.send(self.transport, request).await?;
                }
                LongRequestState::Cleanup { location } => {
                    let location = location.ok_or(EyesError::MissingLocation {
                        status: response.status.as_u16(),
                    })?;
                    debug!(url = %location, "releasing finished server task");
                    let request = self.factory.long_request(Method::DELETE, location);
                    return self.retry.send(self.transport, &request).await;
                }
                LongRequestState::Expired => {
                    return Err(EyesError::Gone {
                        url: state
                            .request
                            .map_or_else(|| url.to_owned(), |request| request.url),
                    })
                }
                LongRequestState::Unexpected(status) => {
                    return Err(EyesError::UnexpectedStatus {
                        status: status.as_u16(),
                        body: response.body_excerpt(UNEXPECTED_BODY_LIMIT),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::{Method, StatusCode};

    use super::{LongRequest, LongRequestState, PollSchedule};
    use crate::{
        request::RequestFactory,
        retry::RetryPolicy,
        transport::testing::{redirect, reset, response, ScriptedTransport},
        ClientOptions, EyesError,
    };

    fn fast_options() -> ClientOptions {
        ClientOptions {
            poll_delay_ms: 1,
            max_poll_delay_ms: 4,
            retry_interval_ms: 1,
            ..ClientOptions::default()
        }
    }

    fn parts(options: ClientOptions) -> (RetryPolicy, RequestFactory) {
        (
            RetryPolicy::from_options(&options),
            RequestFactory::new("key", options),
        )
    }

    #[test]
    fn transition_table() {
        assert_eq!(
            LongRequestState::from_response(&response(200, b"")),
            LongRequestState::Complete
        );
        assert_eq!(
            LongRequestState::from_response(&redirect(202, "https://eyes.local/t")),
            LongRequestState::Pending {
                location: Some("https://eyes.local/t".to_owned())
            }
        );
        assert_eq!(
            LongRequestState::from_response(&redirect(201, "https://eyes.local/t")),
            LongRequestState::Cleanup {
                location: Some("https://eyes.local/t".to_owned())
            }
        );
        assert_eq!(
            LongRequestState::from_response(&response(410, b"")),
            LongRequestState::Expired
        );
        assert_eq!(
            LongRequestState::from_response(&response(418, b"")),
            LongRequestState::Unexpected(StatusCode::IM_A_TEAPOT)
        );
    }

    #[test]
    fn delay_grows_by_factor_and_stops_at_cap() {
        let schedule = PollSchedule::from_options(&ClientOptions::default());
        let mut delay = schedule.initial();
        let mut sequence = Vec::new();
        for _ in 0..6 {
            delay = schedule.next(delay);
            sequence.push(delay.as_millis());
        }
        assert_eq!(sequence, [3_000, 4_500, 6_750, 10_000, 10_000, 10_000]);
    }

    #[test]
    fn delay_is_non_decreasing_and_bounded() {
        let schedule = PollSchedule {
            base: Duration::from_millis(7),
            max: Duration::from_millis(50),
            factor: 1.3,
        };
        let mut delay = schedule.initial();
        for _ in 0..40 {
            let next = schedule.next(delay);
            let expected = ((delay.as_millis() as f64) * 1.3).floor() as u128;
            assert!(next >= delay);
            assert!(next <= schedule.max);
            assert_eq!(next.as_millis(), expected.min(50).max(delay.as_millis()));
            delay = next;
        }
    }

    #[test]
    fn base_above_cap_is_clamped() {
        let schedule = PollSchedule {
            base: Duration::from_millis(20),
            max: Duration::from_millis(10),
            factor: 1.5,
        };
        assert_eq!(schedule.initial(), Duration::from_millis(10));
        assert_eq!(schedule.next(schedule.initial()), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn accepted_polls_location_until_complete() {
        let transport = ScriptedTransport::new(vec![
            Ok(redirect(202, "https://eyes.local/task/7")),
            Ok(redirect(202, "https://eyes.local/task/7")),
            Ok(response(200, b"image")),
        ]);
        let (retry, factory) = parts(fast_options());

        let result = LongRequest::new(&transport, &retry, &factory)
            .send(Method::GET, "https://eyes.local/api/images/7")
            .await
            .expect("must complete");

        assert_eq!(result.body, b"image");
        assert_eq!(
            transport.calls(),
            vec![
                (Method::GET, "https://eyes.local/api/images/7".to_owned()),
                (Method::GET, "https://eyes.local/task/7".to_owned()),
                (Method::GET, "https://eyes.local/task/7".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn gone_while_polling_stops_without_further_requests() {
        let transport = ScriptedTransport::new(vec![
            Ok(redirect(202, "https://eyes.local/task/8")),
            Ok(response(410, b"")),
            Ok(response(200, b"never reached")),
        ]);
        let (retry, factory) = parts(fast_options());

        let err = LongRequest::new(&transport, &retry, &factory)
            .send(Method::GET, "https://eyes.local/api/images/8")
            .await
            .expect_err("must fail");

        assert!(matches!(err, EyesError::Gone { ref url } if url == "https://eyes.local/task/8"));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn created_releases_task_with_delete() {
        let transport = ScriptedTransport::new(vec![
            Ok(redirect(202, "https://eyes.local/task/9")),
            Ok(redirect(201, "https://eyes.local/result/9")),
            Ok(response(200, b"released")),
        ]);
        let (retry, factory) = parts(fast_options());

        let result = LongRequest::new(&transport, &retry, &factory)
            .send(Method::GET, "https://eyes.local/api/images/9")
            .await
            .expect("must complete");

        assert_eq!(result.body, b"released");
        assert_eq!(
            transport.calls().last(),
            Some(&(Method::DELETE, "https://eyes.local/result/9".to_owned()))
        );
    }

    #[tokio::test]
    async fn delete_response_is_terminal() {
        let transport = ScriptedTransport::new(vec![
            Ok(redirect(201, "https://eyes.local/result/3")),
            Ok(redirect(202, "https://eyes.local/task/3")),
        ]);
        let (retry, factory) = parts(fast_options());

        let result = LongRequest::new(&transport, &retry, &factory)
            .send(Method::POST, "https://eyes.local/api/render")
            .await
            .expect("delete response is returned as is");

        assert_eq!(result.status, StatusCode::ACCEPTED);
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn poll_follows_new_location() {
        let transport = ScriptedTransport::new(vec![
            Ok(redirect(202, "https://eyes.local/task/a")),
            Ok(redirect(202, "https://eyes.local/task/b")),
            Ok(response(200, b"")),
        ]);
        let (retry, factory) = parts(fast_options());

        LongRequest::new(&transport, &retry, &factory)
            .send(Method::GET, "https://eyes.local/api/images/1")
            .await
            .expect("must complete");

        let urls: Vec<String> = transport.calls().into_iter().map(|(_, url)| url).collect();
        assert_eq!(urls[1], "https://eyes.local/task/a");
        assert_eq!(urls[2], "https://eyes.local/task/b");
    }

    #[tokio::test]
    async fn poll_requests_are_retried() {
        let transport = ScriptedTransport::new(vec![
            Ok(redirect(202, "https://eyes.local/task/r")),
            Err(reset()),
            Ok(response(200, b"ok")),
        ]);
        let (retry, factory) = parts(fast_options());

        let result = LongRequest::new(&transport, &retry, &factory)
            .send(Method::GET, "https://eyes.local/api/images/r")
            .await
            .expect("must complete after retry");

        assert_eq!(result.body, b"ok");
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn accepted_without_location_fails() {
        let transport = ScriptedTransport::new(vec![Ok(response(202, b""))]);
        let (retry, factory) = parts(fast_options());

        let err = LongRequest::new(&transport, &retry, &factory)
            .send(Method::GET, "https://eyes.local/api/images/2")
            .await
            .expect_err("must fail");

        assert!(matches!(err, EyesError::MissingLocation { status: 202 }));
    }

    #[tokio::test]
    async fn unexpected_status_is_terminal() {
        let transport = ScriptedTransport::new(vec![Ok(response(403, b"forbidden"))]);
        let (retry, factory) = parts(fast_options());

        let err = LongRequest::new(&transport, &retry, &factory)
            .send(Method::GET, "https://eyes.local/api/images/4")
            .await
            .expect_err("must fail");

        assert!(
            matches!(err, EyesError::UnexpectedStatus { status: 403, ref body } if body == "forbidden")
        );
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn deadline_stops_polling() {
        let transport = ScriptedTransport::new(vec![Ok(redirect(202, "https://eyes.local/task/d"))]);
        let (retry, factory) = parts(ClientOptions {
            poll_delay_ms: 100,
            max_poll_delay_ms: 1_000,
            poll_deadline_ms: Some(50),
            ..ClientOptions::default()
        });

        let err = LongRequest::new(&transport, &retry, &factory)
            .send(Method::GET, "https://eyes.local/api/images/d")
            .await
            .expect_err("must hit deadline");

        assert!(matches!(err, EyesError::PollDeadlineExceeded { .. }));
        assert_eq!(transport.calls().len(), 1);
    }
}
