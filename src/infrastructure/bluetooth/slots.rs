//! Operation slots
//!
//! At most one request per [`OperationKind`] is in flight. The pending
//! request owns its callback together with whatever the matching native
//! event will be correlated against.

use crate::domain::errors::BridgeError;
use crate::infrastructure::bluetooth::native::VisibilityMode;
use crate::script::{ContextId, DeviceCallback, DiscoveryCallbacks, VoidCallback};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    SetPowered,
    SetName,
    SetVisible,
    DiscoverDevices,
    StopDiscovery,
    CreateBonding,
    DestroyBonding,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::SetPowered => "setPowered",
            OperationKind::SetName => "setName",
            OperationKind::SetVisible => "setVisible",
            OperationKind::DiscoverDevices => "discoverDevices",
            OperationKind::StopDiscovery => "stopDiscovery",
            OperationKind::CreateBonding => "createBonding",
            OperationKind::DestroyBonding => "destroyBonding",
        };
        f.write_str(name)
    }
}

pub enum PendingRequest {
    SetPowered {
        requested: bool,
        callback: VoidCallback,
    },
    SetName {
        requested: String,
        callback: VoidCallback,
    },
    SetVisible {
        requested: VisibilityMode,
        callback: VoidCallback,
    },
    DiscoverDevices {
        callbacks: DiscoveryCallbacks,
    },
    StopDiscovery {
        callback: VoidCallback,
    },
    CreateBonding {
        address: String,
        callback: DeviceCallback,
    },
    DestroyBonding {
        address: String,
        callback: VoidCallback,
    },
}

impl PendingRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            PendingRequest::SetPowered { .. } => OperationKind::SetPowered,
            PendingRequest::SetName { .. } => OperationKind::SetName,
            PendingRequest::SetVisible { .. } => OperationKind::SetVisible,
            PendingRequest::DiscoverDevices { .. } => OperationKind::DiscoverDevices,
            PendingRequest::StopDiscovery { .. } => OperationKind::StopDiscovery,
            PendingRequest::CreateBonding { .. } => OperationKind::CreateBonding,
            PendingRequest::DestroyBonding { .. } => OperationKind::DestroyBonding,
        }
    }

    pub fn context(&self) -> ContextId {
        match self {
            PendingRequest::SetPowered { callback, .. }
            | PendingRequest::SetName { callback, .. }
            | PendingRequest::SetVisible { callback, .. }
            | PendingRequest::StopDiscovery { callback }
            | PendingRequest::DestroyBonding { callback, .. } => callback.context(),
            PendingRequest::DiscoverDevices { callbacks } => callbacks.context(),
            PendingRequest::CreateBonding { callback, .. } => callback.context(),
        }
    }

    /// Report `error` through whichever error callback the request carries.
    pub fn fail(self, error: BridgeError) {
        match self {
            PendingRequest::SetPowered { callback, .. }
            | PendingRequest::SetName { callback, .. }
            | PendingRequest::SetVisible { callback, .. }
            | PendingRequest::StopDiscovery { callback }
            | PendingRequest::DestroyBonding { callback, .. } => callback.fail(error),
            PendingRequest::DiscoverDevices { callbacks } => callbacks.fail(error),
            PendingRequest::CreateBonding { callback, .. } => callback.fail(error),
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("kind", &self.kind())
            .field("context", &self.context())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct OperationSlotRegistry {
    slots: HashMap<OperationKind, PendingRequest>,
}

impl OperationSlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_claimed(&self, kind: OperationKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Claim the slot of the request's kind, handing the request back when
    /// the slot is occupied.
    pub fn try_claim(&mut self, request: PendingRequest) -> Result<(), PendingRequest> {
        let kind = request.kind();
        if self.slots.contains_key(&kind) {
            return Err(request);
        }
        self.slots.insert(kind, request);
        Ok(())
    }

    pub fn release(&mut self, kind: OperationKind) -> Option<PendingRequest> {
        self.slots.remove(&kind)
    }

    pub fn get(&self, kind: OperationKind) -> Option<&PendingRequest> {
        self.slots.get(&kind)
    }

    pub fn get_mut(&mut self, kind: OperationKind) -> Option<&mut PendingRequest> {
        self.slots.get_mut(&kind)
    }

    /// Drop, without resolving, every request for which `keep` is false.
    /// Returns the kinds that were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&PendingRequest) -> bool) -> Vec<OperationKind> {
        let mut dropped = Vec::new();
        self.slots.retain(|kind, request| {
            let kept = keep(request);
            if !kept {
                dropped.push(*kind);
            }
            kept
        });
        dropped
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
