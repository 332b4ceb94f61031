//! Downloads the images of a finished Eyes test.
//!
//! ```text
//! APPLITOOLS_VIEW_KEY=... cargo run --example download -- results.json diff ./images
//! ```

use std::path::PathBuf;

use eyes_results::{EyesResultsClient, ImageKind, TestResults};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let results_path = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: download <results.json> [kind] [dir]"))?;
    let kind: ImageKind = args.next().as_deref().unwrap_or("diff").parse()?;
    let dir = args.next().map(PathBuf::from);

    let results: TestResults = serde_json::from_str(&std::fs::read_to_string(results_path)?)?;
    let client = EyesResultsClient::from_env(results).map_err(anyhow::Error::msg)?;

    let statuses = client.step_statuses().await?;
    let rendered: Vec<&str> = statuses.iter().map(|status| status.as_str()).collect();
    println!("step statuses: {}", rendered.join(","));

    for path in client.download_images(dir.as_deref(), kind).await? {
        println!("{}", path.display());
    }

    Ok(())
}
