//! Context teardown
//!
//! When a script context goes away its pending work is discarded without
//! being resolved; other contexts keep theirs.

use crate::infrastructure::bluetooth::bonding::BondDirection;
use crate::infrastructure::bluetooth::service::BluetoothAdapter;
use crate::infrastructure::bluetooth::slots::OperationKind;
use crate::script::ContextId;
use tracing::info;

impl BluetoothAdapter {
    /// Drop every request, worker job and listener owned by `context`.
    /// Returns how many entries were discarded.
    pub fn unload_context(&mut self, context: ContextId) -> usize {
        let dropped_kinds = self.slots.retain(|request| request.context() != context);
        for kind in &dropped_kinds {
            match kind {
                OperationKind::CreateBonding => {
                    self.bonding.unwatch(BondDirection::Create, self.native.as_ref())
                }
                OperationKind::DestroyBonding => {
                    self.bonding.unwatch(BondDirection::Destroy, self.native.as_ref())
                }
                OperationKind::DiscoverDevices => self.discovery.abort(),
                _ => {}
            }
        }

        let dropped_requests = self
            .connections
            .retain_requests(|request| request.context() != context);
        self.connections.sync_subscriptions(self.native.as_ref());

        let jobs_before = self.pending_jobs.len();
        self.pending_jobs
            .retain(|_, callback| callback.context() != context);
        let dropped_jobs = jobs_before - self.pending_jobs.len();

        let owns_listener = self
            .change_listener
            .as_ref()
            .is_some_and(|listener| listener.context() == context);
        let dropped_listener = if owns_listener {
            self.change_listener = None;
            1
        } else {
            0
        };

        let total = dropped_kinds.len() + dropped_requests + dropped_jobs + dropped_listener;
        info!(
            "Unloaded {}: {} requests, {} connection requests, {} jobs, {} listeners",
            context,
            dropped_kinds.len(),
            dropped_requests,
            dropped_jobs,
            dropped_listener
        );
        total
    }
}
