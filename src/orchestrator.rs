use crate::error::DownloadError;
use crate::media::{Fetcher, StagingDir};
use crate::session::{DownloadSession, SessionRegistry, SessionState};
use crate::utils::{format_number, source_host};
use axum::body::Bytes;
use futures::Stream;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

/// Extension given to the destination path the fetcher is asked to fill.
const DEFAULT_EXTENSION: &str = "mp4";

pub struct DownloadOrchestrator {
    fetcher: Arc<dyn Fetcher>,
    registry: Arc<SessionRegistry>,
    staging_root: PathBuf,
    fetch_timeout: Duration,
    require_session_id: bool,
}

impl DownloadOrchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        registry: Arc<SessionRegistry>,
        staging_root: PathBuf,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            registry,
            staging_root,
            fetch_timeout,
            require_session_id: false,
        }
    }

    /// Reject requests that come without a session id.
    pub fn require_session_id(mut self, required: bool) -> Self {
        self.require_session_id = required;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Fetch `source_url` into fresh staging storage and hand back the finished file.
    ///
    /// Progress is relayed to whichever connection joined `session_id`. The
    /// staged files live exactly as long as the returned [`StagedDownload`] (or
    /// until this future is dropped, if that comes first).
    pub async fn start_download(
        &self,
        source_url: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<StagedDownload, DownloadError> {
        let source_url = source_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| DownloadError::InvalidRequest("No URL provided".to_string()))?;
        let session_id = session_id.map(str::trim).filter(|id| !id.is_empty());
        let host = source_host(source_url);
        if session_id.is_none() && self.require_session_id {
            return Err(DownloadError::InvalidRequest(
                "No session_id provided".to_string(),
            ));
        }

        let claim = session_id
            .map(|id| self.registry.claim(id))
            .transpose()?;
        let staging = StagingDir::create(&self.staging_root)?;
        let mut session =
            DownloadSession::new(source_url, claim, Arc::clone(&self.registry), staging);
        let dest = session.staging().file_path(DEFAULT_EXTENSION);

        session.transition(SessionState::Fetching);
        let outcome = tokio::time::timeout(
            self.fetch_timeout,
            self.fetcher
                .fetch(source_url, &dest, session.reporter().callback()),
        )
        .await;

        let path = match outcome {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                warn!(host = %host, "{} failed: {:#}", self.fetcher.name(), e);
                session.transition(SessionState::Failed);
                return Err(DownloadError::FetchFailed(e));
            }
            Err(_) => {
                warn!(
                    host = %host,
                    "{} timed out after {}s",
                    self.fetcher.name(),
                    self.fetch_timeout.as_secs()
                );
                session.transition(SessionState::Failed);
                return Err(DownloadError::FetchFailed(anyhow::anyhow!(
                    "Timed out after {} seconds",
                    self.fetch_timeout.as_secs()
                )));
            }
        };

        if !session.staging().contains(&path) {
            session.transition(SessionState::Failed);
            return Err(DownloadError::FetchFailed(anyhow::anyhow!(
                "{} produced {} outside its staging directory",
                self.fetcher.name(),
                path.display()
            )));
        }

        let (file, len) = match open_staged(&path).await {
            Ok(opened) => opened,
            Err(e) => {
                session.transition(SessionState::Failed);
                return Err(DownloadError::StorageError(e));
            }
        };

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("download.{}", DEFAULT_EXTENSION));

        info!(
            host = %host,
            "Fetched {} ({} bytes)",
            file_name,
            format_number(len)
        );
        session.transition(SessionState::Completed);

        Ok(StagedDownload {
            file_name,
            len,
            body: FileBody {
                inner: ReaderStream::new(file),
                sent: 0,
                len,
                session,
            },
        })
    }
}

async fn open_staged(path: &std::path::Path) -> io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();
    Ok((file, len))
}

/// A finished download waiting to be sent.
pub struct StagedDownload {
    pub file_name: String,
    pub len: u64,
    body: FileBody,
}

impl StagedDownload {
    pub fn into_body(self) -> FileBody {
        self.body
    }
}

/// Streams the staged file and owns its session.
///
/// The staging directory is removed when the body is dropped, which the
/// transport does after the last chunk or as soon as the client goes away.
pub struct FileBody {
    // Declared before `session` so the file is closed before its directory goes.
    inner: ReaderStream<File>,
    sent: u64,
    len: u64,
    session: DownloadSession,
}

impl Stream for FileBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let next = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &next {
            this.sent += chunk.len() as u64;
        }
        next
    }
}

impl Drop for FileBody {
    fn drop(&mut self) {
        if self.sent < self.len {
            warn!(
                session_id = self.session.session_id().unwrap_or("-"),
                host = %self.session.host(),
                "Response aborted after {} of {} bytes",
                self.sent,
                self.len
            );
        } else {
            info!(
                session_id = self.session.session_id().unwrap_or("-"),
                "Delivered {} bytes",
                format_number(self.sent)
            );
        }
    }
}
