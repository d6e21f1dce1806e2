use super::registry::{Delivery, SessionRegistry};
use crate::media::ProgressFn;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub session_id: String,
    /// Completed fraction in `0.0..=1.0`.
    pub fraction: f64,
    pub timestamp: SystemTime,
}

impl ProgressEvent {
    pub fn new(session_id: &str, fraction: f64) -> Self {
        Self {
            session_id: session_id.to_string(),
            fraction: fraction.clamp(0.0, 1.0),
            timestamp: SystemTime::now(),
        }
    }

    /// Display form sent to clients, e.g. `"42.5%"`.
    pub fn percentage(&self) -> String {
        format!("{:.1}%", self.fraction * 100.0)
    }
}

#[derive(Default)]
struct RelayState {
    /// Last relayed value in tenths of a percent.
    last: Option<u32>,
    closed: bool,
}

/// Relays one download's progress into the registry.
///
/// Updates are dropped once the session is closed, and anything that would not
/// move the displayed percentage forward is skipped. yt-dlp restarts at 0% for
/// the audio stream of a merged format; those restarts never reach the client.
pub struct ProgressReporter {
    registry: Arc<SessionRegistry>,
    session_id: Option<String>,
    state: Mutex<RelayState>,
}

impl ProgressReporter {
    pub fn new(registry: Arc<SessionRegistry>, session_id: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            session_id,
            state: Mutex::new(RelayState::default()),
        })
    }

    pub fn report(&self, fraction: f64) -> Delivery {
        if !fraction.is_finite() {
            return Delivery::Dropped;
        }

        let mut state = self.state.lock();
        if state.closed {
            return Delivery::Dropped;
        }

        let fraction = fraction.clamp(0.0, 1.0);
        let tenths = (fraction * 1000.0).round() as u32;
        if state.last.is_some_and(|last| tenths <= last) {
            return Delivery::Dropped;
        }
        state.last = Some(tenths);

        let Some(session_id) = self.session_id.as_deref() else {
            return Delivery::Dropped;
        };

        // Published under the lock so events leave in the order they were reported.
        self.registry.publish(ProgressEvent::new(session_id, fraction))
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// The callback form handed to a fetcher.
    pub fn callback(self: &Arc<Self>) -> ProgressFn {
        let reporter = Arc::clone(self);
        Arc::new(move |fraction| {
            reporter.report(fraction);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ConnectionId, DeliveryTarget};
    use tokio::sync::mpsc;

    fn joined(
        session_id: &str,
    ) -> (
        Arc<SessionRegistry>,
        mpsc::UnboundedSender<ProgressEvent>,
        mpsc::UnboundedReceiver<ProgressEvent>,
    ) {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.join(session_id, DeliveryTarget::new(ConnectionId::new_v4(), &tx));
        (registry, tx, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event.percentage());
        }
        out
    }

    #[test]
    fn test_percentage_format() {
        assert_eq!(ProgressEvent::new("abc", 0.425).percentage(), "42.5%");
        assert_eq!(ProgressEvent::new("abc", 1.0).percentage(), "100.0%");
        assert_eq!(ProgressEvent::new("abc", 7.0).percentage(), "100.0%");
        assert_eq!(ProgressEvent::new("abc", 0.0).percentage(), "0.0%");
    }

    #[test]
    fn test_relay_is_non_decreasing_and_deduplicated() {
        let (registry, _tx, mut rx) = joined("abc");
        let reporter = ProgressReporter::new(registry, Some("abc".into()));
        let on_progress = reporter.callback();

        for fraction in [0.1, 0.1, 0.5, 1.0, 0.0, 0.3, 1.0] {
            on_progress(fraction);
        }

        assert_eq!(drain(&mut rx), vec!["10.0%", "50.0%", "100.0%"]);
    }

    #[test]
    fn test_closed_reporter_ignores_late_updates() {
        let (registry, _tx, mut rx) = joined("abc");
        let reporter = ProgressReporter::new(registry, Some("abc".into()));

        assert_eq!(reporter.report(0.2), Delivery::Delivered);
        reporter.close();
        assert_eq!(reporter.report(0.9), Delivery::Dropped);

        assert_eq!(drain(&mut rx), vec!["20.0%"]);
    }

    #[test]
    fn test_reporter_without_session_drops_everything() {
        let (registry, _tx, mut rx) = joined("abc");
        let reporter = ProgressReporter::new(registry, None);
        assert_eq!(reporter.report(0.5), Delivery::Dropped);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_non_finite_updates_are_ignored() {
        let (registry, _tx, mut rx) = joined("abc");
        let reporter = ProgressReporter::new(registry, Some("abc".into()));
        assert_eq!(reporter.report(f64::NAN), Delivery::Dropped);
        assert_eq!(reporter.report(0.4), Delivery::Delivered);
        assert_eq!(drain(&mut rx), vec!["40.0%"]);
    }
}
