//! Abstraction over a single cast-capable media receiver, shaped after `pychromecast`'s surface
//! (discovery callbacks, a connected client with `media_controller`/`status`, a `wait()`)
//! so the [`supervisor`](crate::device::supervisor) can be driven against a fake in tests. No
//! real mDNS discovery or CAST wire protocol lives here; a production backend plugs in by
//! implementing [`DeviceClient`] and [`Discovery`].

pub mod fake;
pub mod supervisor;

use std::time::Duration;

use async_trait::async_trait;

/// Status snapshot of a connected session, mirroring the fields the Supervisor's `canCast`
/// table actually inspects.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatus {
    pub app_id: Option<String>,
}

/// Outcome of the Supervisor's availability check, per §4.F's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanCastResult {
    Success,
    FailNotConnected,
    FailNoStatus,
    FailExpectedActive,
    FailInUse,
}

/// The receiver app id this crate's slideshow launches and expects to find active.
pub const MEDIA_RECEIVER_APP_ID: &str = "pycastblaster-default-media-receiver";

/// A connected session with one device. Implementations must never panic; every device-library
/// failure is reported as `Ok(false)`/`None` rather than propagated.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Whether the underlying socket is still connected.
    fn is_connected(&self) -> bool;

    /// Current status, or `None` if the device hasn't reported one yet.
    fn status(&self) -> Option<DeviceStatus>;

    /// Launch the slideshow's media receiver app on the device.
    async fn launch_receiver(&self);

    /// Block until the receiver app is the active app, or `timeout` elapses. Returns whether it
    /// became active.
    async fn wait_until_active(&self, timeout: Duration) -> bool;

    /// Ask the device to load and play `url`, blocking up to `active_block` for acknowledgement.
    /// Returns whether playback was acknowledged.
    async fn play_media(&self, url: &str, active_block: Duration) -> bool;
}

/// One discovery event from the device library's own background thread.
#[derive(Debug)]
pub enum DiscoveryEvent {
    Added { friendly_name: String },
    Removed { friendly_name: String },
}

/// Connects a named device once its discovery-added event has been observed.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, friendly_name: &str) -> Box<dyn DeviceClient>;
}

/// Evaluate the §4.F `canCast` table against a status snapshot. Pure function so the
/// Supervisor's re-entrancy split (`can_cast` / `can_cast_locked`) only has to thread the lock,
/// not re-derive this logic.
#[must_use]
pub fn evaluate_can_cast(
    connected: bool,
    status: Option<&DeviceStatus>,
    must_be_active: bool,
) -> CanCastResult {
    if !connected {
        return CanCastResult::FailNotConnected;
    }
    let Some(status) = status else {
        return CanCastResult::FailNoStatus;
    };
    match &status.app_id {
        Some(app_id) if app_id == MEDIA_RECEIVER_APP_ID => CanCastResult::Success,
        Some(_) => {
            if must_be_active {
                CanCastResult::FailExpectedActive
            } else {
                CanCastResult::FailInUse
            }
        }
        None => {
            if must_be_active {
                CanCastResult::FailExpectedActive
            } else {
                CanCastResult::Success
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_fails_first() {
        assert_eq!(
            evaluate_can_cast(false, None, false),
            CanCastResult::FailNotConnected
        );
    }

    #[test]
    fn no_status_fails() {
        assert_eq!(
            evaluate_can_cast(true, None, false),
            CanCastResult::FailNoStatus
        );
    }

    #[test]
    fn other_app_active_fails_in_use_when_not_requiring_active() {
        let status = DeviceStatus {
            app_id: Some("some-other-app".to_string()),
        };
        assert_eq!(
            evaluate_can_cast(true, Some(&status), false),
            CanCastResult::FailInUse
        );
    }

    #[test]
    fn must_be_active_fails_expected_active_when_idle() {
        let status = DeviceStatus { app_id: None };
        assert_eq!(
            evaluate_can_cast(true, Some(&status), true),
            CanCastResult::FailExpectedActive
        );
    }

    #[test]
    fn our_receiver_active_succeeds_either_way() {
        let status = DeviceStatus {
            app_id: Some(MEDIA_RECEIVER_APP_ID.to_string()),
        };
        assert_eq!(
            evaluate_can_cast(true, Some(&status), true),
            CanCastResult::Success
        );
        assert_eq!(
            evaluate_can_cast(true, Some(&status), false),
            CanCastResult::Success
        );
    }
}
