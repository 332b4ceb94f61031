use std::path::{Path, PathBuf};

use tracing::info;

use crate::{
    results::{ImageKind, StepResult, TestResults},
    EyesError, Result,
};

/// Image scheduled for download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedImage {
    pub file_name: String,
    pub url: String,
}

/// Makes `value` usable as a single path component.
///
/// Path separators and control characters become `_`, as do leading dots.
pub(crate) fn safe_segment(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| {
            if matches!(c, '/' | '\\') || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let rest = replaced.trim_start_matches('.');
    let mut segment = "_".repeat(replaced.len() - rest.len());
    segment.push_str(rest);
    if segment.is_empty() {
        segment.push('_');
    }
    segment
}

/// `{root}/{test}/{app}/{viewport}/{host os}/{host app}/{batch}/{session}`
///
/// Each segment goes through [`safe_segment`], so the result stays below `root`.
pub fn image_directory(root: &Path, results: &TestResults) -> PathBuf {
    let viewport = results.host_display_size.to_string();
    [
        results.name.as_str(),
        results.app_name.as_str(),
        viewport.as_str(),
        results.host_os.as_str(),
        results.host_app.as_str(),
        results.batch_id.as_str(),
        results.id.as_str(),
    ]
    .iter()
    .fold(root.to_path_buf(), |path, segment| path.join(safe_segment(segment)))
}

/// Creates the image directory (and its parents) if missing.
pub async fn ensure_image_directory(root: &Path, results: &TestResults) -> Result<PathBuf> {
    let dir = image_directory(root, results);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| EyesError::Io {
            path: dir.clone(),
            source,
        })?;
    Ok(dir)
}

/// Uses `dir` when it exists, otherwise the working directory.
pub(crate) async fn resolve_root(dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = dir {
        if tokio::fs::metadata(dir)
            .await
            .is_ok_and(|metadata| metadata.is_dir())
        {
            info!("saving images to: {}", dir.display());
            return Ok(dir.to_path_buf());
        }
    }

    let cwd = std::env::current_dir().map_err(|source| EyesError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    info!(
        "directory was undefined or non-existent, saving images to: {}",
        cwd.display()
    );
    Ok(cwd)
}

/// Steps that have an image of `kind`, in step order.
pub fn plan_images(steps: &[StepResult], kind: ImageKind) -> Result<Vec<PlannedImage>> {
    let planned: Vec<PlannedImage> = steps
        .iter()
        .filter_map(|step| {
            step.image_url(kind).map(|url| PlannedImage {
                file_name: step.file_name(kind),
                url: url.to_owned(),
            })
        })
        .collect();

    if planned.is_empty() {
        return Err(EyesError::NoImages {
            kind: kind.to_string(),
        });
    }
    Ok(planned)
}

pub(crate) async fn write_image(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| EyesError::Io {
            path: path.to_path_buf(),
            source,
        })
}
