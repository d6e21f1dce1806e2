mod fetcher;
mod staging;
mod ytdlp;

pub use fetcher::{Fetcher, ProgressFn};
pub use staging::{sweep_stale, StagingDir};
pub use ytdlp::YtDlpFetcher;

use anyhow::Result;
use tracing::info;

/// Check that the configured fetcher can actually run on this machine.
pub async fn test_setup(fetcher: &dyn Fetcher) -> Result<()> {
    info!("Testing media fetcher setup...");

    if fetcher.test_availability().await {
        info!("✅ {} is ready", fetcher.name());
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} is not available. Please install yt-dlp (and ffmpeg for merged formats).",
            fetcher.name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct Unavailable;

    #[async_trait]
    impl Fetcher for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        async fn fetch(&self, _url: &str, _dest: &Path, _on_progress: ProgressFn) -> Result<PathBuf> {
            Err(anyhow::anyhow!("not installed"))
        }

        async fn test_availability(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_setup_reports_missing_fetcher() {
        let err = test_setup(&Unavailable).await.unwrap_err();
        assert!(err.to_string().contains("unavailable is not available"));
    }

    #[tokio::test]
    async fn test_setup_with_missing_binary() {
        let fetcher = YtDlpFetcher::new("definitely-not-yt-dlp-binary");
        assert!(test_setup(&fetcher).await.is_err());
    }
}
