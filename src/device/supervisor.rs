//! Maintains at most one connected session with the named device and decides when the
//! Playlist Server may serve, per §4.F.
//!
//! The session lock would be re-entrant in the source tool (`try_to_play_media` calls
//! `canCast`, which itself takes the lock); `tokio::sync::Mutex` is not re-entrant, so
//! `can_cast` takes the lock and delegates to `can_cast_locked`, which `try_to_play_media`
//! calls directly while already holding its own guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::signals::Signals;

use super::{evaluate_can_cast, CanCastResult, DeviceClient, DeviceConnector, DiscoveryEvent};

const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);
const PLAY_ACTIVE_BLOCK: Duration = Duration::from_secs(1);
const LAUNCH_ACTIVE_WAIT: Duration = Duration::from_secs(10);
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Drives one device session and the idle-watcher that arms the Playlist Server.
pub struct Supervisor {
    connector: Arc<dyn DeviceConnector>,
    chromecast_name: String,
    session: Arc<Mutex<Option<Box<dyn DeviceClient>>>>,
    signals: Signals,
    interruption_idle: Duration,
    /// Set once the watcher has successfully armed the server; cleared on the next idle
    /// transition so the following re-arbitration pauses for `interruption_idle` first.
    was_active: AtomicBool,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        connector: Arc<dyn DeviceConnector>,
        chromecast_name: String,
        signals: Signals,
        interruption_idle: Duration,
    ) -> Self {
        Self {
            connector,
            chromecast_name,
            session: Arc::new(Mutex::new(None)),
            signals,
            interruption_idle,
            was_active: AtomicBool::new(false),
        }
    }

    /// Handle a discovery-added event for `friendly_name`. No-op if it doesn't match this
    /// device's configured name. Tears down any lingering session first.
    pub async fn handle_discovery_event(&self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Added { friendly_name } if friendly_name == self.chromecast_name => {
                let mut guard = self.session.lock().await;
                if guard.is_some() {
                    info!(device = %friendly_name, "replacing lingering session before reconnect");
                }
                self.signals.set_enabled(false);
                let client = self.connector.connect(&friendly_name).await;
                *guard = Some(client);
                info!(device = %friendly_name, "connected");
            }
            DiscoveryEvent::Removed { friendly_name } if friendly_name == self.chromecast_name => {
                let mut guard = self.session.lock().await;
                self.signals.set_enabled(false);
                *guard = None;
                info!(device = %friendly_name, "session removed");
            }
            _ => {}
        }
    }

    /// Public entry point: takes the session lock itself, then delegates to
    /// [`Self::can_cast_locked`].
    pub async fn can_cast(&self, must_be_active: bool) -> CanCastResult {
        let guard = self.session.lock().await;
        Self::can_cast_locked(&guard, must_be_active)
    }

    /// Assumes the caller already holds `self.session`'s guard.
    fn can_cast_locked(
        guard: &MutexGuard<'_, Option<Box<dyn DeviceClient>>>,
        must_be_active: bool,
    ) -> CanCastResult {
        match guard.as_ref() {
            None => CanCastResult::FailNotConnected,
            Some(client) => {
                evaluate_can_cast(client.is_connected(), client.status().as_ref(), must_be_active)
            }
        }
    }

    /// Attempt to play `url`. Acquires the session lock with a 1s timeout (so a concurrent
    /// discovery-removed teardown can't deadlock this call), verifies `canCast(mustBeActive=
    /// true)`, and issues the play call with a 1s active-block. Never panics; every failure
    /// mode collapses to `false`.
    pub async fn try_to_play_media(&self, url: &str) -> bool {
        let guard = match timeout(LOCK_ACQUIRE_TIMEOUT, self.session.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!("timed out acquiring device session lock");
                return false;
            }
        };

        if Self::can_cast_locked(&guard, true) != CanCastResult::Success {
            return false;
        }

        let Some(client) = guard.as_ref() else {
            return false;
        };
        client.play_media(url, PLAY_ACTIVE_BLOCK).await
    }

    /// Long-lived activity: polls every 5s while the Playlist Server reports idle, arming it
    /// once the device is available. Runs until the exit signal fires.
    pub async fn run_idle_watcher(&self) {
        loop {
            tokio::select! {
                () = self.signals.wait_for_exit() => return,
                () = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
            }

            if !self.signals.is_not_serving() {
                continue;
            }

            if self.was_active.swap(false, Ordering::SeqCst) {
                tokio::select! {
                    () = self.signals.wait_for_exit() => return,
                    () = tokio::time::sleep(self.interruption_idle) => {}
                }
            }

            match self.can_cast(false).await {
                CanCastResult::Success => {
                    let guard = self.session.lock().await;
                    if let Some(client) = guard.as_ref() {
                        client.launch_receiver().await;
                        let became_active = client.wait_until_active(LAUNCH_ACTIVE_WAIT).await;
                        drop(guard);
                        if became_active {
                            self.signals.set_enabled(true);
                            self.was_active.store(true, Ordering::SeqCst);
                        }
                    }
                }
                other => {
                    tracing::debug!(?other, "device not available for casting");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::{FakeDeviceConnector, FakeDeviceState};
    use crate::device::MEDIA_RECEIVER_APP_ID;

    fn supervisor(state: Arc<FakeDeviceState>, signals: Signals) -> Supervisor {
        Supervisor::new(
            Arc::new(FakeDeviceConnector::new(state)),
            "Family Room TV".to_string(),
            signals,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn discovery_added_connects_and_can_cast_succeeds() {
        let state = FakeDeviceState::new();
        state.set_app_id(Some(MEDIA_RECEIVER_APP_ID)).await;
        let signals = Signals::new(5.0);
        let sup = supervisor(state, signals);

        sup.handle_discovery_event(DiscoveryEvent::Added {
            friendly_name: "Family Room TV".to_string(),
        })
        .await;

        assert_eq!(sup.can_cast(true).await, CanCastResult::Success);
    }

    #[tokio::test]
    async fn discovery_for_other_device_is_ignored() {
        let state = FakeDeviceState::new();
        let signals = Signals::new(5.0);
        let sup = supervisor(state, signals);

        sup.handle_discovery_event(DiscoveryEvent::Added {
            friendly_name: "Some Other TV".to_string(),
        })
        .await;

        assert_eq!(sup.can_cast(false).await, CanCastResult::FailNotConnected);
    }

    #[tokio::test]
    async fn try_to_play_media_fails_without_connection() {
        let state = FakeDeviceState::new();
        let signals = Signals::new(5.0);
        let sup = supervisor(state, signals);

        assert!(!sup.try_to_play_media("http://example/x.jpg").await);
    }

    #[tokio::test]
    async fn try_to_play_media_succeeds_once_receiver_is_active() {
        let state = FakeDeviceState::new();
        state.set_app_id(Some(MEDIA_RECEIVER_APP_ID)).await;
        let signals = Signals::new(5.0);
        let sup = supervisor(state, signals);

        sup.handle_discovery_event(DiscoveryEvent::Added {
            friendly_name: "Family Room TV".to_string(),
        })
        .await;

        assert!(sup.try_to_play_media("http://example/x.jpg").await);
    }

    #[tokio::test]
    async fn discovery_removed_clears_session_and_enable_latch() {
        let state = FakeDeviceState::new();
        state.set_app_id(Some(MEDIA_RECEIVER_APP_ID)).await;
        let signals = Signals::new(5.0);
        signals.set_enabled(true);
        let sup = supervisor(state, signals.clone());

        sup.handle_discovery_event(DiscoveryEvent::Added {
            friendly_name: "Family Room TV".to_string(),
        })
        .await;
        sup.handle_discovery_event(DiscoveryEvent::Removed {
            friendly_name: "Family Room TV".to_string(),
        })
        .await;

        assert!(!signals.is_enabled());
        assert_eq!(sup.can_cast(false).await, CanCastResult::FailNotConnected);
    }
}
