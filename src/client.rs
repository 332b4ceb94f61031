use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::{Method, StatusCode};
use tracing::info;

use crate::{
    download::{self, PlannedImage},
    poll::LongRequest,
    proxy::ProxyDescriptor,
    request::{RequestDescriptor, RequestFactory},
    results::{self, ImageKind, SessionDetails, SessionUrls, StepResult, StepStatus, TestResults},
    retry::RetryPolicy,
    transport::{HttpTransport, Response, Transport},
    ClientOptions, EyesError, Result,
};

const SESSION_API_KEY_PARAM: &str = "ApiKey";
const ERROR_BODY_LIMIT: usize = 1024;

/// Fetches the results of one Eyes test session and downloads its images.
pub struct EyesResultsClient<T = HttpTransport> {
    transport: T,
    results: TestResults,
    urls: SessionUrls,
    factory: RequestFactory,
    retry: RetryPolicy,
}

impl<T> fmt::Debug for EyesResultsClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EyesResultsClient")
            .field("server_url", &self.urls.server_url())
            .field("test", &self.results.name)
            .field("view_key", &"<redacted>")
            .field("options", self.factory.options())
            .finish()
    }
}

impl EyesResultsClient<HttpTransport> {
    /// Creates a client for `results`, authenticating with a view key.
    pub fn new(results: TestResults, view_key: impl Into<String>) -> Result<Self> {
        let transport = HttpTransport::new(None)?;
        Self::with_parts(transport, results, view_key.into(), ClientOptions::default())
    }

    /// Routes every request through `proxy`.
    pub fn with_proxy(self, proxy: ProxyDescriptor) -> Result<Self> {
        let transport = HttpTransport::new(Some(&proxy))?;
        Ok(self.with_transport(transport))
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `APPLITOOLS_VIEW_KEY` — view key of the account (required)
    /// - `APPLITOOLS_PROXY_URL` — proxy host or URL (optional)
    /// - `APPLITOOLS_PROXY_PORT`, `APPLITOOLS_PROXY_USERNAME`,
    ///   `APPLITOOLS_PROXY_PASSWORD` — proxy details (optional)
    /// - `APPLITOOLS_PROXY_HTTP_ONLY` — `true` to tunnel through `CONNECT`
    pub fn from_env(results: TestResults) -> std::result::Result<Self, String> {
        let view_key = std::env::var("APPLITOOLS_VIEW_KEY")
            .map_err(|_| "missing APPLITOOLS_VIEW_KEY environment variable".to_owned())?;
        if view_key.trim().is_empty() {
            return Err("APPLITOOLS_VIEW_KEY is set but empty".to_owned());
        }
        let client = Self::new(results, view_key).map_err(|err| err.to_string())?;

        let proxy_url = match std::env::var("APPLITOOLS_PROXY_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => return Ok(client),
        };
        let port = std::env::var("APPLITOOLS_PROXY_PORT")
            .ok()
            .map(|port| {
                port.trim()
                    .parse::<u16>()
                    .map_err(|err| format!("invalid APPLITOOLS_PROXY_PORT '{port}': {err}"))
            })
            .transpose()?;
        let username = std::env::var("APPLITOOLS_PROXY_USERNAME").ok();
        let password = std::env::var("APPLITOOLS_PROXY_PASSWORD").ok();
        let http_only = std::env::var("APPLITOOLS_PROXY_HTTP_ONLY")
            .is_ok_and(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "yes"));

        let proxy = ProxyDescriptor::new(
            &proxy_url,
            port,
            username.as_deref(),
            password.as_deref(),
            http_only,
        )
        .map_err(|err| err.to_string())?;
        client.with_proxy(proxy).map_err(|err| err.to_string())
    }
}

impl<T: Transport> EyesResultsClient<T> {
    fn with_parts(
        transport: T,
        results: TestResults,
        view_key: String,
        options: ClientOptions,
    ) -> Result<Self> {
        let urls = SessionUrls::new(&results)?;
        Ok(Self {
            transport,
            results,
            urls,
            retry: RetryPolicy::from_options(&options),
            factory: RequestFactory::new(view_key, options),
        })
    }

    /// Replaces the transport, e.g. with a recording or scripted one.
    pub fn with_transport<U: Transport>(self, transport: U) -> EyesResultsClient<U> {
        EyesResultsClient {
            transport,
            results: self.results,
            urls: self.urls,
            factory: self.factory,
            retry: self.retry,
        }
    }

    /// Applies client options such as timeouts, retry and polling behavior.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.retry = RetryPolicy::from_options(&opts);
        self.factory = RequestFactory::new(self.factory.api_key().to_owned(), opts);
        self
    }

    pub fn results(&self) -> &TestResults {
        &self.results
    }

    pub fn urls(&self) -> &SessionUrls {
        &self.urls
    }

    /// Sends a long-running request and follows it to a terminal status.
    pub async fn send_long_request(&self, method: Method, url: &str) -> Result<Response> {
        LongRequest::new(&self.transport, &self.retry, &self.factory)
            .send(method, url)
            .await
    }

    /// Fetches the image metadata of the session.
    pub async fn session_details(&self) -> Result<SessionDetails> {
        let request = RequestDescriptor::new(
            Method::GET,
            self.urls.session_details(),
            self.factory.options(),
        )
        .query(SESSION_API_KEY_PARAM, self.factory.api_key())
        .structured();

        let response = self.retry.send(&self.transport, &request).await?;
        if response.status != StatusCode::OK {
            return Err(EyesError::Http {
                status: response.status.as_u16(),
                body: response.body_excerpt(ERROR_BODY_LIMIT),
            });
        }

        serde_json::from_slice(&response.body).map_err(|err| {
            EyesError::Decode(format!(
                "invalid session details JSON: {err}; body: {}",
                response.body_excerpt(ERROR_BODY_LIMIT)
            ))
        })
    }

    /// Classifies every step and resolves its image URLs.
    pub async fn step_results(&self) -> Result<Vec<StepResult>> {
        let details = self.session_details().await?;
        Ok(results::step_results(&self.results, &self.urls, &details))
    }

    /// Status of every step, in step order.
    pub async fn step_statuses(&self) -> Result<Vec<StepStatus>> {
        Ok(self
            .step_results()
            .await?
            .into_iter()
            .map(|step| step.status)
            .collect())
    }

    /// File names and URLs of every image of `kind`.
    ///
    /// Returns [`EyesError::NoImages`] when no step has such an image.
    pub async fn image_urls(&self, kind: ImageKind) -> Result<Vec<PlannedImage>> {
        let steps = self.step_results().await?;
        download::plan_images(&steps, kind)
    }

    /// Downloads every image of `kind` below `dir` and returns the written paths.
    ///
    /// Falls back to the working directory when `dir` is `None` or missing.
    /// Images are fetched one at a time, each written before the next starts.
    pub async fn download_images(
        &self,
        dir: Option<&Path>,
        kind: ImageKind,
    ) -> Result<Vec<PathBuf>> {
        let root = download::resolve_root(dir).await?;
        let images_dir = download::ensure_image_directory(&root, &self.results).await?;
        let images = self.image_urls(kind).await?;

        let mut written = Vec::with_capacity(images.len());
        for image in images {
            let path = images_dir.join(&image.file_name);
            self.download_image(&path, &image.url).await?;
            info!("image has been saved to: {}", path.display());
            written.push(path);
        }
        Ok(written)
    }

    async fn download_image(&self, path: &Path, url: &str) -> Result<()> {
        let response = self
            .send_long_request(Method::GET, url)
            .await
            .map_err(|source| EyesError::Download {
                url: url.to_owned(),
                source: Box::new(source),
            })?;
        download::write_image(path, &response.body).await
    }
}
