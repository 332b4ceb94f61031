//! Test-result data shapes and step classification.

use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::Deserialize;
use tracing::info;

use crate::{download::safe_segment, EyesError, Result};

/// Test result reported by the Eyes SDK when a test is closed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub name: String,
    pub app_name: String,
    pub host_display_size: DisplaySize,
    #[serde(rename = "hostOS")]
    pub host_os: String,
    pub host_app: String,
    pub app_urls: AppUrls,
    pub batch_id: String,
    /// Session id.
    pub id: String,
    /// Step count; absent means every entry of `steps_info`.
    #[serde(default)]
    pub steps: Option<usize>,
    #[serde(default)]
    pub steps_info: Vec<StepInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for DisplaySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AppUrls {
    pub session: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInfo {
    pub name: String,
    pub is_different: bool,
    pub has_baseline_image: bool,
    pub has_current_image: bool,
}

impl StepInfo {
    pub fn status(&self) -> StepStatus {
        StepStatus::classify(
            self.is_different,
            self.has_baseline_image,
            self.has_current_image,
        )
    }
}

impl TestResults {
    /// Server root: scheme, host, port and any path before the `app` segment.
    pub fn server_url(&self) -> Result<String> {
        let session = self.app_urls.session.as_str();
        let invalid =
            |reason: String| EyesError::InvalidServerUrl(format!("session url '{session}' {reason}"));

        let url = Url::parse(session).map_err(|err| invalid(format!("is not a url: {err}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| invalid("has no host".to_owned()))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.collect())
            .unwrap_or_default();
        let app = segments
            .iter()
            .position(|segment| *segment == "app")
            .ok_or_else(|| invalid("has no /app path".to_owned()))?;

        let mut server = format!("{}://{host}", url.scheme());
        if let Some(port) = url.port() {
            server.push_str(&format!(":{port}"));
        }
        for segment in &segments[..app] {
            server.push('/');
            server.push_str(segment);
        }
        Ok(server)
    }

    /// Number of steps to report, bounded by the step details available.
    pub fn step_count(&self) -> usize {
        self.steps
            .unwrap_or(self.steps_info.len())
            .min(self.steps_info.len())
    }
}

/// Outcome of a single step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepStatus {
    Pass,
    Missing,
    New,
    Unresolved,
    /// Flag combination outside the known outcomes.
    Unclassified,
}

impl StepStatus {
    /// Maps `(is_different, has_baseline, has_current)` to a status.
    pub fn classify(is_different: bool, has_baseline: bool, has_current: bool) -> Self {
        match (is_different, has_baseline, has_current) {
            (false, true, true) => Self::Pass,
            (false, true, false) => Self::Missing,
            (false, false, true) => Self::New,
            (true, true, true) => Self::Unresolved,
            _ => Self::Unclassified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Missing => "MISSING",
            Self::New => "NEW",
            Self::Unresolved => "UNRESOLVED",
            Self::Unclassified => "UNCLASSIFIED",
        }
    }

    /// Whether the server renders a diff image for this status.
    pub fn has_diff(&self) -> bool {
        matches!(self, Self::Unresolved | Self::New)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image rendering of a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Baseline,
    Current,
    Diff,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Current => "current",
            Self::Diff => "diff",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageKind {
    type Err = EyesError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "baseline" => Ok(Self::Baseline),
            "current" => Ok(Self::Current),
            "diff" => Ok(Self::Diff),
            other => Err(EyesError::InvalidImageType(other.to_owned())),
        }
    }
}

/// Session details document, reduced to the image metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetails {
    #[serde(default)]
    pub expected_app_output: Vec<Option<AppOutput>>,
    #[serde(default)]
    pub actual_app_output: Vec<Option<AppOutput>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AppOutput {
    #[serde(default)]
    pub image: Option<ImageRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ImageRef {
    pub id: String,
}

/// Image ids per step; a null entry stays `None` at its index.
pub fn image_ids(metadata: &[Option<AppOutput>]) -> Vec<Option<&str>> {
    metadata
        .iter()
        .map(|entry| {
            entry
                .as_ref()
                .and_then(|output| output.image.as_ref())
                .map(|image| image.id.as_str())
        })
        .collect()
}

/// Endpoint builder for one test session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionUrls {
    server_url: String,
    batch_id: String,
    session_id: String,
}

impl SessionUrls {
    pub fn new(results: &TestResults) -> Result<Self> {
        Ok(Self {
            server_url: results.server_url()?,
            batch_id: results.batch_id.clone(),
            session_id: results.id.clone(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Session details document; the API key is passed as `ApiKey`.
    pub fn session_details(&self) -> String {
        format!(
            "{}/api/sessions/batches/{}/{}/",
            self.server_url, self.batch_id, self.session_id
        )
    }

    pub fn image(&self, image_id: &str) -> String {
        format!("{}/api/images/{image_id}", self.server_url)
    }

    /// Diff image of a 1-based step.
    pub fn diff(&self, step: usize) -> String {
        format!(
            "{}/api/sessions/batches/{}/{}/steps/{step}/diff",
            self.server_url, self.batch_id, self.session_id
        )
    }

    /// Image URLs per index of `metadata`.
    pub fn image_urls(&self, metadata: &[Option<AppOutput>]) -> Vec<Option<String>> {
        image_ids(metadata)
            .into_iter()
            .map(|id| id.map(|id| self.image(id)))
            .collect()
    }

    /// Diff URL for a step, present only when the status has a diff.
    pub fn diff_url(&self, status: StepStatus, step: usize) -> Option<String> {
        if status.has_diff() {
            Some(self.diff(step))
        } else {
            info!(step, %status, "no unresolved or new tests found");
            None
        }
    }
}

/// Classified step with the URLs of its images.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepResult {
    /// 1-based step number.
    pub step: usize,
    pub status: StepStatus,
    pub name: String,
    pub baseline_image_url: Option<String>,
    pub current_image_url: Option<String>,
    pub diff_image_url: Option<String>,
}

impl StepResult {
    pub fn image_url(&self, kind: ImageKind) -> Option<&str> {
        match kind {
            ImageKind::Baseline => self.baseline_image_url.as_deref(),
            ImageKind::Current => self.current_image_url.as_deref(),
            ImageKind::Diff => self.diff_image_url.as_deref(),
        }
    }

    /// `{step}-{name}-{kind}.png`, with path separators in the name replaced.
    pub fn file_name(&self, kind: ImageKind) -> String {
        format!("{}-{}-{kind}.png", self.step, safe_segment(&self.name))
    }
}

/// Classifies every step and attaches its image URLs.
pub fn step_results(
    results: &TestResults,
    urls: &SessionUrls,
    details: &SessionDetails,
) -> Vec<StepResult> {
    let baseline = urls.image_urls(&details.expected_app_output);
    let current = urls.image_urls(&details.actual_app_output);

    results
        .steps_info
        .iter()
        .take(results.step_count())
        .enumerate()
        .map(|(index, info)| {
            let step = index + 1;
            let status = info.status();
            StepResult {
                step,
                status,
                name: info.name.clone(),
                baseline_image_url: baseline.get(index).cloned().flatten(),
                current_image_url: current.get(index).cloned().flatten(),
                diff_image_url: urls.diff_url(status, step),
            }
        })
        .collect()
}
