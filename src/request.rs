use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use reqwest::Method;

use crate::ClientOptions;

pub const EYES_EXPECT_HEADER: &str = "Eyes-Expect";
pub const EYES_DATE_HEADER: &str = "Eyes-Date";
/// Asks the server to answer slow requests with `202 Accepted` and a location to poll.
pub const EYES_EXPECT_LONG_REQUEST: &str = "202+location";
pub const API_KEY_PARAM: &str = "apiKey";

const RFC_1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// How the caller intends to consume the response body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseEncoding {
    /// Raw bytes, e.g. images.
    Binary,
    /// JSON document.
    Structured,
}

/// One outbound request. The same descriptor is resent on retry.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Largest accepted response body in bytes.
    pub max_content_length: usize,
    pub encoding: ResponseEncoding,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>, options: &ClientOptions) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            timeout: options.timeout(),
            max_content_length: options.max_content_length,
            encoding: ResponseEncoding::Binary,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Marks the response as a JSON document.
    pub fn structured(mut self) -> Self {
        self.encoding = ResponseEncoding::Structured;
        self
    }

    /// `Accept` header the transport sends for this descriptor's encoding.
    pub fn accept(&self) -> Option<&'static str> {
        match self.encoding {
            ResponseEncoding::Binary => None,
            ResponseEncoding::Structured => Some("application/json"),
        }
    }
}

/// Builds descriptors for the long-running request protocol.
#[derive(Clone)]
pub(crate) struct RequestFactory {
    api_key: String,
    options: ClientOptions,
}

impl RequestFactory {
    pub(crate) fn new(api_key: impl Into<String>, options: ClientOptions) -> Self {
        Self {
            api_key: api_key.into(),
            options,
        }
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Decorates `method`/`url` with the long-request headers and the API key.
    pub(crate) fn long_request(&self, method: Method, url: impl Into<String>) -> RequestDescriptor {
        RequestDescriptor::new(method, url, &self.options)
            .header(EYES_EXPECT_HEADER, EYES_EXPECT_LONG_REQUEST)
            .header(EYES_DATE_HEADER, rfc_1123_now())
            .query(API_KEY_PARAM, self.api_key.as_str())
    }
}

fn rfc_1123_now() -> String {
    Utc::now().format(RFC_1123_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDateTime, TimeZone, Utc};
    use reqwest::Method;

    use super::{RequestFactory, ResponseEncoding, RFC_1123_FORMAT};
    use crate::ClientOptions;

    #[test]
    fn long_request_carries_protocol_headers_and_api_key() {
        let factory = RequestFactory::new("view-key", ClientOptions::default());
        let request = factory.long_request(Method::GET, "https://eyes.local/api/images/1");

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url, "https://eyes.local/api/images/1");
        assert_eq!(
            request.headers.get("Eyes-Expect").map(String::as_str),
            Some("202+location")
        );
        assert!(request.headers.contains_key("Eyes-Date"));
        assert_eq!(
            request.query.get("apiKey").map(String::as_str),
            Some("view-key")
        );
        assert_eq!(request.max_content_length, 20 * 1024 * 1024);
        assert_eq!(request.encoding, ResponseEncoding::Binary);
        assert_eq!(request.accept(), None);
    }

    #[test]
    fn date_header_uses_rfc_1123() {
        let instant = Utc.with_ymd_and_hms(2026, 10, 19, 8, 5, 9).unwrap();
        assert_eq!(
            instant.format(RFC_1123_FORMAT).to_string(),
            "Mon, 19 Oct 2026 08:05:09 GMT"
        );

        let factory = RequestFactory::new("k", ClientOptions::default());
        let request = factory.long_request(Method::DELETE, "https://eyes.local/task");
        let date = request.headers.get("Eyes-Date").expect("must carry date");
        let trimmed = date.split_once(", ").map(|(_, rest)| rest).unwrap_or(date);
        assert!(NaiveDateTime::parse_from_str(trimmed, "%d %b %Y %H:%M:%S GMT").is_ok());
    }

    #[test]
    fn structured_requests_accept_json() {
        let factory = RequestFactory::new("k", ClientOptions::default());
        let request = factory
            .long_request(Method::GET, "https://eyes.local/api/sessions")
            .structured();
        assert_eq!(request.encoding, ResponseEncoding::Structured);
        assert_eq!(request.accept(), Some("application/json"));
    }
}
