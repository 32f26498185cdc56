//! Device discovery
//!
//! [`DiscoverySession`] keeps the found list of the current (or last)
//! discovery round and works out which previously found devices did not show
//! up again.

use crate::domain::device::{BluetoothDevice, DeviceInfo};
use crate::domain::errors::{BridgeError, NativeError, NativeResult};
use crate::infrastructure::bluetooth::native::DiscoveryState;
use crate::infrastructure::bluetooth::service::{already_in_progress, BluetoothAdapter};
use crate::infrastructure::bluetooth::slots::{OperationKind, PendingRequest};
use crate::script::{DiscoveryCallbacks, VoidCallback};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryPhase {
    #[default]
    Idle,
    Discovering,
}

/// What a successfully finished round reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub disappeared: Vec<String>,
    pub found: Vec<BluetoothDevice>,
}

#[derive(Debug, Default)]
pub struct DiscoverySession {
    phase: DiscoveryPhase,
    found: Vec<BluetoothDevice>,
    disappeared_candidates: Vec<String>,
}

impl DiscoverySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> DiscoveryPhase {
        self.phase
    }

    /// Begin a round: everything found last time is a disappearance candidate.
    pub fn start(&mut self) {
        self.disappeared_candidates = self
            .found
            .iter()
            .map(|device| device.address().to_string())
            .collect();
        self.found.clear();
        self.phase = DiscoveryPhase::Discovering;
    }

    pub fn record_found(&mut self, device: BluetoothDevice) {
        self.disappeared_candidates
            .retain(|address| !device.has_address(address));
        self.found.push(device);
    }

    pub fn finish(&mut self) -> DiscoverySummary {
        self.phase = DiscoveryPhase::Idle;
        DiscoverySummary {
            disappeared: std::mem::take(&mut self.disappeared_candidates),
            found: self.found.clone(),
        }
    }

    pub fn abort(&mut self) {
        self.phase = DiscoveryPhase::Idle;
        self.disappeared_candidates.clear();
    }

    pub fn found_devices(&self) -> &[BluetoothDevice] {
        &self.found
    }

    pub fn find(&self, address: &str) -> Option<&BluetoothDevice> {
        self.found.iter().find(|device| device.has_address(address))
    }
}

impl BluetoothAdapter {
    pub fn discover_devices(&mut self, callbacks: DiscoveryCallbacks) {
        let kind = OperationKind::DiscoverDevices;
        if self.slots.is_claimed(kind) {
            warn!("{} is already requested", kind);
            self.tasks
                .push(move |_| callbacks.fail(already_in_progress(kind)));
            return;
        }
        if !self.enabled {
            self.tasks
                .push(move |_| callbacks.fail(BridgeError::powered_off()));
            return;
        }
        if !self.claim(PendingRequest::DiscoverDevices { callbacks }) {
            return;
        }

        info!("Starting device discovery");
        if let Err(e) = self.native.start_discovery() {
            error!("Failed to start discovery: {}", e);
            self.abort_request(kind, BridgeError::from_native(e, "device discovery could not start"));
        }
    }

    pub fn stop_discovery(&mut self, callback: VoidCallback) {
        if !self.enabled {
            self.tasks.defer_error(callback, BridgeError::powered_off());
            return;
        }
        match self.native.is_discovering() {
            Ok(true) => {}
            Ok(false) => {
                debug!("Discovery is not running, nothing to stop");
                self.tasks.defer_success(callback, ());
                return;
            }
            Err(e) => {
                error!("Failed to query discovery state: {}", e);
                self.tasks
                    .defer_error(callback, BridgeError::from_native(e, "discovery state query failed"));
                return;
            }
        }
        if !self.claim(PendingRequest::StopDiscovery { callback }) {
            return;
        }

        info!("Stopping device discovery");
        if let Err(e) = self.native.stop_discovery() {
            error!("Failed to stop discovery: {}", e);
            self.abort_request(
                OperationKind::StopDiscovery,
                BridgeError::from_native(e, "device discovery could not stop"),
            );
        }
    }

    pub(super) fn on_discovery_state_changed(
        &mut self,
        result: NativeResult,
        state: DiscoveryState,
        device: Option<DeviceInfo>,
    ) {
        match state {
            DiscoveryState::Started => self.on_discovery_started(result),
            DiscoveryState::Found => self.on_device_found(result, device),
            DiscoveryState::Finished => self.on_discovery_finished(result),
        }
    }

    fn on_discovery_started(&mut self, result: NativeResult) {
        let kind = OperationKind::DiscoverDevices;
        if !self.slots.is_claimed(kind) {
            warn!("Discovery started without a pending request");
            return;
        }
        if let Err(e) = result {
            error!("Discovery failed to start: {}", e);
            self.discovery.abort();
            if let Some(request) = self.slots.release(kind) {
                request.fail(BridgeError::from_native(e, "device discovery failed"));
            }
            return;
        }

        self.discovery.start();
        if let Some(PendingRequest::DiscoverDevices { callbacks }) = self.slots.get_mut(kind) {
            callbacks.started();
        }
    }

    fn on_device_found(&mut self, result: NativeResult, device: Option<DeviceInfo>) {
        let Some(info) = device else {
            warn!("Device found event without device info");
            return;
        };
        if let Err(e) = result {
            warn!("Device found event for {} reported {}", info.address, e);
            return;
        }
        let Some(PendingRequest::DiscoverDevices { callbacks }) =
            self.slots.get_mut(OperationKind::DiscoverDevices)
        else {
            warn!("Device {} found without a pending discovery", info.address);
            return;
        };

        debug!("Found device {} ({})", info.address, info.name);
        let device = BluetoothDevice::from(&info);
        self.discovery.record_found(device.clone());
        callbacks.device_found(device);
    }

    fn on_discovery_finished(&mut self, result: NativeResult) {
        // Cancellation through stop_discovery is a normal end of the round
        let outcome = match result {
            Ok(()) | Err(NativeError::Cancelled) => Ok(()),
            Err(e) => Err(e),
        };

        let stop = self.slots.release(OperationKind::StopDiscovery);
        let had_stop = stop.is_some();
        if let Some(request) = stop {
            match outcome {
                Ok(()) => {
                    if let PendingRequest::StopDiscovery { callback } = request {
                        callback.succeed(());
                    }
                }
                Err(e) => request.fail(BridgeError::from_native(e, "device discovery failed")),
            }
        }

        let Some(PendingRequest::DiscoverDevices { mut callbacks }) =
            self.slots.release(OperationKind::DiscoverDevices)
        else {
            if !had_stop {
                warn!("Discovery finished without a pending request");
            }
            self.discovery.abort();
            return;
        };

        match outcome {
            Ok(()) => {
                let summary = self.discovery.finish();
                info!(
                    "Discovery finished: {} found, {} disappeared",
                    summary.found.len(),
                    summary.disappeared.len()
                );
                for address in summary.disappeared {
                    callbacks.device_disappeared(address);
                }
                callbacks.finished(summary.found);
            }
            Err(e) => {
                error!("Discovery finished with {}", e);
                self.discovery.abort();
                callbacks.fail(BridgeError::from_native(e, "device discovery failed"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(address: &str) -> BluetoothDevice {
        BluetoothDevice::with_address(address)
    }

    #[test]
    fn test_first_round_has_no_disappeared() {
        let mut session = DiscoverySession::new();
        session.start();
        assert_eq!(session.phase(), DiscoveryPhase::Discovering);
        session.record_found(device("00:00:00:00:00:0A"));
        session.record_found(device("00:00:00:00:00:0B"));

        let summary = session.finish();
        assert!(summary.disappeared.is_empty());
        assert_eq!(summary.found.len(), 2);
        assert_eq!(session.phase(), DiscoveryPhase::Idle);
    }

    #[test]
    fn test_second_round_reports_missing_devices() {
        let mut session = DiscoverySession::new();
        session.start();
        session.record_found(device("00:00:00:00:00:0A"));
        session.record_found(device("00:00:00:00:00:0B"));
        session.finish();

        session.start();
        session.record_found(device("00:00:00:00:00:0b"));
        session.record_found(device("00:00:00:00:00:0C"));
        let summary = session.finish();

        assert_eq!(summary.disappeared, vec!["00:00:00:00:00:0A".to_string()]);
        let addresses: Vec<&str> = summary.found.iter().map(|d| d.address()).collect();
        assert_eq!(addresses, vec!["00:00:00:00:00:0b", "00:00:00:00:00:0C"]);
        assert!(session.find("00:00:00:00:00:0c").is_some());
    }
}
