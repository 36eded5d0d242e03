//! Feed serialization.
//!
//! # Submodules
//!
//! - [`rss`]: RSS 2.0 document for feed readers
//! - [`json`]: the [`FeedEnvelope`] as JSON, for scripts and debugging
//!
//! # Output Structure
//!
//! With an output directory each route writes one file, replaced on every
//! run; without one the feed goes to stdout.
//!
//! ```text
//! output_dir/
//! ├── zodgame.xml
//! └── javdb.json
//! ```

pub mod json;
pub mod rss;

use crate::cli::OutputFormat;
use crate::error::Result;
use crate::models::FeedEnvelope;
use tokio::fs;
use tokio::io::{self, AsyncWriteExt};
use tracing::{info, instrument};

pub fn render(feed: &FeedEnvelope, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Rss => rss::to_rss(feed),
        OutputFormat::Json => json::to_json(feed),
    }
}

/// Path of a route's feed file inside `output_dir`.
pub fn output_path(output_dir: &str, route: &str, format: OutputFormat) -> String {
    format!(
        "{}/{route}.{}",
        output_dir.trim_end_matches('/'),
        format.extension()
    )
}

/// Write `feed` to `{output_dir}/{route}.{ext}`, or to stdout without a
/// directory.
#[instrument(level = "info", skip_all, fields(%route, ?format))]
pub async fn write_feed(
    feed: &FeedEnvelope,
    route: &str,
    format: OutputFormat,
    output_dir: Option<&str>,
) -> Result<()> {
    let body = render(feed, format)?;
    match output_dir {
        Some(dir) => {
            let path = output_path(dir, route, format);
            fs::write(&path, body).await?;
            info!(%path, items = feed.item.len(), "Wrote feed");
        }
        None => {
            let mut stdout = io::stdout();
            stdout.write_all(body.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
