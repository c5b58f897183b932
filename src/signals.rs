//! Small façade for graceful shutdown/reload/pause coordination.
//!
//! Replaces the source tool's module-scope globals (`exit`, `skip_next_portrait`-style booleans
//! poked from a debugger) with a single shared value threaded through every component.
//! Built on [`tokio_util::sync::CancellationToken`] for the one-way "exit" signal and
//! [`tokio::sync::watch`] channels for level-triggered state (pause, duration, the enable/
//! not-serving latches) that readers need to observe changes to, not just a single edge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Process-wide signal set shared by every long-lived activity.
#[derive(Clone)]
pub struct Signals {
    inner: Arc<Inner>,
}

struct Inner {
    exit: CancellationToken,
    reload_requested: AtomicBool,
    paused: AtomicBool,
    duration_tx: watch::Sender<f64>,
    /// Set by the Device Session Supervisor, read by the Playlist Server: "you may serve".
    enable_serving_tx: watch::Sender<bool>,
    /// Set by the Playlist Server, read by the Supervisor's idle-watcher: "I'm not serving".
    not_serving_tx: watch::Sender<bool>,
}

impl Signals {
    /// Build a new signal set. `initial_duration` seeds the duration watch channel so the
    /// Playlist Server's wait loop has a baseline to diff `duration_update` commands against.
    #[must_use]
    pub fn new(initial_duration: f64) -> Self {
        let (duration_tx, _) = watch::channel(initial_duration);
        let (enable_serving_tx, _) = watch::channel(false);
        let (not_serving_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                exit: CancellationToken::new(),
                reload_requested: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                duration_tx,
                enable_serving_tx,
                not_serving_tx,
            }),
        }
    }

    /// Request a graceful shutdown of every activity.
    pub fn request_exit(&self) {
        self.inner.exit.cancel();
    }

    /// Request that the top-level supervisor reinitialise once the current shutdown completes.
    /// Order matters: this sets the reload flag *before* cancelling, per the documented contract.
    pub fn request_reload(&self) {
        self.inner.reload_requested.store(true, Ordering::SeqCst);
        self.inner.exit.cancel();
    }

    #[must_use]
    pub fn reload_requested(&self) -> bool {
        self.inner.reload_requested.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn exit_requested(&self) -> bool {
        self.inner.exit.is_cancelled()
    }

    /// Await the exit signal. Cooperates with `tokio::select!` at every blocking/looping point.
    pub async fn wait_for_exit(&self) {
        self.inner.exit.cancelled().await;
    }

    pub fn exit_token(&self) -> CancellationToken {
        self.inner.exit.clone()
    }

    /// Toggle pause, returning the new state.
    pub fn toggle_pause(&self) -> bool {
        let was = self.inner.paused.fetch_xor(true, Ordering::SeqCst);
        !was
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Update the configured slideshow duration. Subscribers see the new value on their next poll.
    pub fn set_duration(&self, seconds: f64) {
        let _ = self.inner.duration_tx.send(seconds);
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        *self.inner.duration_tx.borrow()
    }

    pub fn subscribe_duration(&self) -> watch::Receiver<f64> {
        self.inner.duration_tx.subscribe()
    }

    /// Arm the Playlist Server: it may begin serving images.
    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.inner.enable_serving_tx.send(enabled);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        *self.inner.enable_serving_tx.borrow()
    }

    pub fn subscribe_enabled(&self) -> watch::Receiver<bool> {
        self.inner.enable_serving_tx.subscribe()
    }

    /// Called by the Playlist Server when it has exited its serving loop and relinquished
    /// the temp-manifest file handle.
    pub fn set_not_serving(&self, idle: bool) {
        let _ = self.inner.not_serving_tx.send(idle);
    }

    #[must_use]
    pub fn is_not_serving(&self) -> bool {
        *self.inner.not_serving_tx.borrow()
    }

    pub fn subscribe_not_serving(&self) -> watch::Receiver<bool> {
        self.inner.not_serving_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_sets_flag_before_exit() {
        let signals = Signals::new(5.0);
        assert!(!signals.exit_requested());
        signals.request_reload();
        assert!(signals.reload_requested());
        assert!(signals.exit_requested());
    }

    #[test]
    fn pause_toggles() {
        let signals = Signals::new(5.0);
        assert!(!signals.is_paused());
        assert!(signals.toggle_pause());
        assert!(signals.is_paused());
        assert!(!signals.toggle_pause());
    }

    #[tokio::test]
    async fn duration_watch_reports_latest() {
        let signals = Signals::new(5.0);
        let mut rx = signals.subscribe_duration();
        signals.set_duration(20.0);
        rx.changed().await.unwrap();
        assert!((*rx.borrow() - 20.0).abs() < f64::EPSILON);
    }
}
