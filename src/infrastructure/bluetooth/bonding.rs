//! Bonding
//!
//! Bond events are subscribed only while a create or destroy request is
//! pending, and the request is resolved only by an event for its address.

use crate::domain::device::{BluetoothDevice, DeviceInfo};
use crate::domain::errors::{BridgeError, NativeError, NativeResult};
use crate::domain::validation::is_valid_address;
use crate::infrastructure::bluetooth::native::{NativeStack, Subscription};
use crate::infrastructure::bluetooth::service::{already_in_progress, BluetoothAdapter};
use crate::infrastructure::bluetooth::slots::{OperationKind, PendingRequest};
use crate::script::{DeviceCallback, VoidCallback};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondDirection {
    Create,
    Destroy,
}

impl BondDirection {
    pub fn subscription(self) -> Subscription {
        match self {
            BondDirection::Create => Subscription::BondCreated,
            BondDirection::Destroy => Subscription::BondDestroyed,
        }
    }
}

/// Tracks the bond-event subscriptions.
#[derive(Debug, Default)]
pub struct BondingCoordinator {
    watching_create: bool,
    watching_destroy: bool,
}

impl BondingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_watching(&self, direction: BondDirection) -> bool {
        match direction {
            BondDirection::Create => self.watching_create,
            BondDirection::Destroy => self.watching_destroy,
        }
    }

    fn flag(&mut self, direction: BondDirection) -> &mut bool {
        match direction {
            BondDirection::Create => &mut self.watching_create,
            BondDirection::Destroy => &mut self.watching_destroy,
        }
    }

    pub fn watch(&mut self, direction: BondDirection, native: &dyn NativeStack) -> NativeResult {
        if self.is_watching(direction) {
            return Ok(());
        }
        native.subscribe(direction.subscription())?;
        *self.flag(direction) = true;
        Ok(())
    }

    pub fn unwatch(&mut self, direction: BondDirection, native: &dyn NativeStack) {
        if !self.is_watching(direction) {
            return;
        }
        *self.flag(direction) = false;
        if let Err(e) = native.unsubscribe(direction.subscription()) {
            error!("Failed to unsubscribe {:?}: {}", direction.subscription(), e);
        }
    }
}

impl BluetoothAdapter {
    pub fn create_bonding(&mut self, address: &str, callback: DeviceCallback) {
        let kind = OperationKind::CreateBonding;
        if !is_valid_address(address) {
            self.tasks
                .defer_error(callback, BridgeError::InvalidValues("Wrong address".to_string()));
            return;
        }
        if self.slots.is_claimed(kind) {
            warn!("{} is already requested", kind);
            self.tasks.defer_error(callback, already_in_progress(kind));
            return;
        }
        if !self.enabled {
            self.tasks.defer_error(callback, BridgeError::powered_off());
            return;
        }
        if let Err(e) = self.bonding.watch(BondDirection::Create, self.native.as_ref()) {
            error!("Failed to subscribe bond creation events: {}", e);
            self.tasks
                .defer_error(callback, BridgeError::from_native(e, "bond event registration failed"));
            return;
        }
        if !self.claim(PendingRequest::CreateBonding {
            address: address.to_string(),
            callback,
        }) {
            return;
        }

        info!("Creating bond with {}", address);
        if let Err(e) = self.native.create_bond(address) {
            error!("Failed to create bond with {}: {}", address, e);
            self.abort_request(kind, BridgeError::from_native(e, "bond creation failed"));
            self.bonding.unwatch(BondDirection::Create, self.native.as_ref());
        }
    }

    pub fn destroy_bonding(&mut self, address: &str, callback: VoidCallback) {
        let kind = OperationKind::DestroyBonding;
        if !is_valid_address(address) {
            self.tasks
                .defer_error(callback, BridgeError::InvalidValues("Wrong address".to_string()));
            return;
        }
        if !self.enabled {
            self.tasks.defer_error(callback, BridgeError::powered_off());
            return;
        }
        if self.slots.is_claimed(kind) {
            warn!("{} is already requested", kind);
            self.tasks.defer_error(callback, already_in_progress(kind));
            return;
        }
        match self.native.bonded_device(address) {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                debug!("No bonding with {}", address);
                self.tasks
                    .defer_error(callback, BridgeError::NotFound("Not found".to_string()));
                return;
            }
        }
        if let Err(e) = self.bonding.watch(BondDirection::Destroy, self.native.as_ref()) {
            error!("Failed to subscribe bond destruction events: {}", e);
            self.tasks
                .defer_error(callback, BridgeError::from_native(e, "bond event registration failed"));
            return;
        }
        if !self.claim(PendingRequest::DestroyBonding {
            address: address.to_string(),
            callback,
        }) {
            return;
        }

        info!("Destroying bond with {}", address);
        if let Err(e) = self.native.destroy_bond(address) {
            error!("Failed to destroy bond with {}: {}", address, e);
            let error = match e {
                NativeError::InvalidParameter => BridgeError::NotFound("Not found".to_string()),
                other => BridgeError::from_native(other, "bond destruction failed"),
            };
            self.abort_request(kind, error);
            self.bonding.unwatch(BondDirection::Destroy, self.native.as_ref());
        }
    }

    pub(super) fn on_bond_created(&mut self, result: NativeResult, device: Option<DeviceInfo>) {
        let Some(info) = device else {
            warn!("Bond created event without device info");
            return;
        };
        let expected = match self.slots.get(OperationKind::CreateBonding) {
            Some(PendingRequest::CreateBonding { address, .. }) => address.clone(),
            _ => {
                warn!("A bonding with {} is created unexpectedly", info.address);
                return;
            }
        };
        if !expected.eq_ignore_ascii_case(&info.address) {
            warn!(
                "A bonding is created unexpectedly: expected {}, got {}",
                expected, info.address
            );
            return;
        }

        if let Some(PendingRequest::CreateBonding { callback, .. }) =
            self.slots.release(OperationKind::CreateBonding)
        {
            match result {
                Ok(()) => {
                    info!("Bond created with {}", info.address);
                    callback.succeed(BluetoothDevice::from(&info));
                }
                Err(e) => {
                    error!("Bond creation with {} failed: {}", info.address, e);
                    callback.fail(BridgeError::from_native(e, "bond creation failed"));
                }
            }
        }
        self.bonding.unwatch(BondDirection::Create, self.native.as_ref());
    }

    pub(super) fn on_bond_destroyed(&mut self, result: NativeResult, address: &str) {
        let expected = match self.slots.get(OperationKind::DestroyBonding) {
            Some(PendingRequest::DestroyBonding { address, .. }) => address.clone(),
            _ => {
                warn!("A bonding with {} is destroyed unexpectedly", address);
                return;
            }
        };
        if !expected.eq_ignore_ascii_case(address) {
            warn!(
                "A bonding is destroyed unexpectedly: expected {}, got {}",
                expected, address
            );
            return;
        }

        if let Some(PendingRequest::DestroyBonding { callback, .. }) =
            self.slots.release(OperationKind::DestroyBonding)
        {
            match result {
                Ok(()) => {
                    info!("Bond destroyed with {}", address);
                    callback.succeed(());
                }
                Err(e) => {
                    error!("Bond destruction with {} failed: {}", address, e);
                    callback.fail(BridgeError::from_native(e, "bond destruction failed"));
                }
            }
        }
        self.bonding.unwatch(BondDirection::Destroy, self.native.as_ref());
    }
}
