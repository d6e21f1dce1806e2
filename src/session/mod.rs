mod progress;
mod registry;

pub use progress::{ProgressEvent, ProgressReporter};
pub use registry::{ConnectionId, Delivery, DeliveryTarget, SessionClaim, SessionRegistry};

use crate::media::StagingDir;
use crate::utils::source_host;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Fetching,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// One download attempt, from request arrival until its response is gone.
///
/// Owns the staging directory and the session claim, so dropping the session
/// removes the staged files and frees the session id for the next download.
pub struct DownloadSession {
    session_id: Option<String>,
    /// Host of the source URL; full URLs are kept out of the logs.
    host: String,
    state: SessionState,
    created_at: SystemTime,
    reporter: Arc<ProgressReporter>,
    staging: StagingDir,
    _claim: Option<SessionClaim>,
}

impl DownloadSession {
    pub fn new(
        source_url: &str,
        claim: Option<SessionClaim>,
        registry: Arc<SessionRegistry>,
        staging: StagingDir,
    ) -> Self {
        let session_id = claim.as_ref().map(|c| c.session_id().to_string());
        let reporter = ProgressReporter::new(registry, session_id.clone());
        Self {
            session_id,
            host: source_host(source_url),
            state: SessionState::Pending,
            created_at: SystemTime::now(),
            reporter,
            staging,
            _claim: claim,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn elapsed_ms(&self) -> u64 {
        self.created_at
            .elapsed()
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    }

    pub fn staging(&self) -> &StagingDir {
        &self.staging
    }

    pub fn reporter(&self) -> &Arc<ProgressReporter> {
        &self.reporter
    }

    pub fn transition(&mut self, next: SessionState) {
        info!(
            session_id = self.session_id().unwrap_or("-"),
            host = %self.host,
            elapsed_ms = self.elapsed_ms(),
            "Download session {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
        if next.is_terminal() {
            self.reporter.close();
        }
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        self.reporter.close();
        if !self.state.is_terminal() {
            warn!(
                session_id = self.session_id().unwrap_or("-"),
                host = %self.host,
                "Download abandoned while {:?}, discarding staged files",
                self.state
            );
            self.state = SessionState::Failed;
        }
        info!(
            session_id = self.session_id().unwrap_or("-"),
            elapsed_ms = self.elapsed_ms(),
            "Download session closed ({:?})",
            self.state
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn session_with_target(
        registry: &Arc<SessionRegistry>,
        root: &std::path::Path,
    ) -> (DownloadSession, mpsc::UnboundedReceiver<ProgressEvent>, mpsc::UnboundedSender<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.join("abc", DeliveryTarget::new(ConnectionId::new_v4(), &tx));
        let claim = registry.claim("abc").unwrap();
        let staging = StagingDir::create(root).unwrap();
        let session = DownloadSession::new(
            "https://example.com/video",
            Some(claim),
            Arc::clone(registry),
            staging,
        );
        (session, rx, tx)
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Pending.is_terminal());
        assert!(!SessionState::Fetching.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
    }

    #[test]
    fn test_drop_releases_claim_and_staging() {
        let registry = SessionRegistry::new();
        let root = tempfile::tempdir().unwrap();
        let (mut session, _rx, _tx) = session_with_target(&registry, root.path());
        session.transition(SessionState::Fetching);
        assert_eq!(session.session_id(), Some("abc"));
        assert_eq!(session.state(), SessionState::Fetching);
        assert_eq!(session.host(), "example.com");
        assert!(registry.claim("abc").is_err());

        let staged = session.staging().path().to_path_buf();
        drop(session);

        assert!(!staged.exists());
        assert!(registry.claim("abc").is_ok());
    }

    #[test]
    fn test_terminal_transition_silences_progress() {
        let registry = SessionRegistry::new();
        let root = tempfile::tempdir().unwrap();
        let (mut session, mut rx, _tx) = session_with_target(&registry, root.path());
        session.transition(SessionState::Fetching);

        assert_eq!(session.reporter().report(0.5), Delivery::Delivered);
        session.transition(SessionState::Completed);
        assert_eq!(session.reporter().report(0.9), Delivery::Dropped);

        assert_eq!(rx.try_recv().unwrap().fraction, 0.5);
        assert!(rx.try_recv().is_err());
    }
}
