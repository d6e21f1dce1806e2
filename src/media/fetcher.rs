use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Progress callback handed to a fetcher. Receives the completed fraction in `0.0..=1.0`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Human-readable name of the fetcher
    fn name(&self) -> &'static str;

    /// Retrieve the media behind `url` into `dest` and return the path of the finished file.
    ///
    /// `on_progress` may be called any number of times, including zero, before the
    /// future resolves. The returned path must live in the same directory as `dest`.
    /// Dropping the future must stop the underlying work.
    async fn fetch(&self, url: &str, dest: &Path, on_progress: ProgressFn) -> Result<PathBuf>;

    /// Test if this fetcher is usable on the system
    async fn test_availability(&self) -> bool;
}
