//! In-memory [`DeviceClient`]/[`DeviceConnector`] used to exercise the Supervisor without a real
//! Chromecast on the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{DeviceClient, DeviceConnector, DeviceStatus, MEDIA_RECEIVER_APP_ID};

/// Shared knobs a test flips to simulate device behaviour, read by [`FakeDeviceClient`].
pub struct FakeDeviceState {
    connected: AtomicBool,
    status: Mutex<Option<DeviceStatus>>,
    play_should_succeed: AtomicBool,
    activate_after_launch: AtomicBool,
}

impl FakeDeviceState {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            status: Mutex::new(Some(DeviceStatus { app_id: None })),
            play_should_succeed: AtomicBool::new(true),
            activate_after_launch: AtomicBool::new(true),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub async fn set_app_id(&self, app_id: Option<&str>) {
        let mut status = self.status.lock().await;
        *status = Some(DeviceStatus {
            app_id: app_id.map(str::to_string),
        });
    }

    pub async fn clear_status(&self) {
        *self.status.lock().await = None;
    }

    pub fn set_play_should_succeed(&self, succeed: bool) {
        self.play_should_succeed.store(succeed, Ordering::SeqCst);
    }

    pub fn set_activate_after_launch(&self, activates: bool) {
        self.activate_after_launch.store(activates, Ordering::SeqCst);
    }
}

/// A [`DeviceClient`] backed by a [`FakeDeviceState`] shared with the test driving it.
pub struct FakeDeviceClient {
    state: Arc<FakeDeviceState>,
}

impl FakeDeviceClient {
    #[must_use]
    pub fn new(state: Arc<FakeDeviceState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl DeviceClient for FakeDeviceClient {
    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn status(&self) -> Option<DeviceStatus> {
        self.state.status.try_lock().ok().and_then(|s| s.clone())
    }

    async fn launch_receiver(&self) {
        if self.state.activate_after_launch.load(Ordering::SeqCst) {
            self.state.set_app_id(Some(MEDIA_RECEIVER_APP_ID)).await;
        }
    }

    async fn wait_until_active(&self, _timeout: Duration) -> bool {
        let status = self.state.status.lock().await;
        matches!(
            status.as_ref().and_then(|s| s.app_id.as_deref()),
            Some(MEDIA_RECEIVER_APP_ID)
        )
    }

    async fn play_media(&self, _url: &str, _active_block: Duration) -> bool {
        self.state.connected.load(Ordering::SeqCst)
            && self.state.play_should_succeed.load(Ordering::SeqCst)
    }
}

/// Hands out [`FakeDeviceClient`]s all backed by the same [`FakeDeviceState`], so a test can
/// mutate device behaviour after the Supervisor has already connected.
pub struct FakeDeviceConnector {
    pub state: Arc<FakeDeviceState>,
}

impl FakeDeviceConnector {
    #[must_use]
    pub fn new(state: Arc<FakeDeviceState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl DeviceConnector for FakeDeviceConnector {
    async fn connect(&self, _friendly_name: &str) -> Box<dyn DeviceClient> {
        Box::new(FakeDeviceClient::new(self.state.clone()))
    }
}
