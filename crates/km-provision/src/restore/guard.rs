//! RAII guard that guarantees restoration

use super::{ElevationRegistry, RestoreReport, restore_pending};
use crate::control_plane::CloudControlPlane;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{error, warn};

/// Guard owning the restoration of everything in an [`ElevationRegistry`]
///
/// Acquire it when the first snapshot is taken. The normal exit path calls
/// [`restore_all`](Self::restore_all). If the guard is dropped instead (panic
/// unwinding, an aborted future) `Drop` restores synchronously on the current
/// multi-thread runtime, or logs every resource left exposed when no such
/// runtime is available.
///
/// # Example
///
/// ```ignore
/// let registry = ElevationRegistry::new();
/// let guard = RestoreGuard::new(&arm, registry.clone());
///
/// elevator.elevate(snapshot).await?; // a failure here still restores
///
/// let report = guard.restore_all().await;
/// ```
pub struct RestoreGuard<'a, C: CloudControlPlane> {
    cp: &'a C,
    registry: ElevationRegistry,
    /// Cleared once `restore_all` has run
    armed: bool,
}

impl<'a, C: CloudControlPlane> RestoreGuard<'a, C> {
    pub fn new(cp: &'a C, registry: ElevationRegistry) -> Self {
        Self {
            cp,
            registry,
            armed: true,
        }
    }

    pub fn registry(&self) -> &ElevationRegistry {
        &self.registry
    }

    /// Restore every pending entry, in reverse elevation order
    ///
    /// Consumes the guard, so restoration is attempted exactly once.
    pub async fn restore_all(mut self) -> RestoreReport {
        self.armed = false;
        restore_pending(self.cp, &self.registry).await
    }
}

impl<C: CloudControlPlane> Drop for RestoreGuard<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let pending = self.registry.pending();
        if pending.is_empty() {
            return;
        }

        warn!(
            count = pending.len(),
            "Restore guard dropped without explicit restoration, restoring now"
        );

        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                let report = tokio::task::block_in_place(|| {
                    handle.block_on(restore_pending(self.cp, &self.registry))
                });
                if !report.is_clean() {
                    error!(failed = report.failed.len(), "Restoration from drop was incomplete");
                }
            }
            _ => {
                for state in &pending {
                    error!(
                        resource = %state.resource(),
                        public_access = state.public_access_enabled(),
                        default_action = ?state.default_action(),
                        temporary_rule = ?state.temporary_rule_name(),
                        "Cannot restore outside a multi-thread runtime; resource left elevated"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeControlPlane, FakeOp};
    use km_provision_common::{ExposureConfig, NetworkState, ResourceKind, ResourceRef};

    fn search() -> ResourceRef {
        ResourceRef::new(
            ResourceKind::SearchService,
            "km-search",
            "rg-km",
            "00000000-0000-0000-0000-000000000001",
        )
    }

    fn elevated() -> (FakeControlPlane, ElevationRegistry) {
        let cp = FakeControlPlane::new().with_resource(search(), ExposureConfig::reachable(false));
        let registry = ElevationRegistry::new();
        registry.register(NetworkState::captured(search(), ExposureConfig::closed(false)));
        (cp, registry)
    }

    #[tokio::test]
    async fn test_restore_all_runs_once() {
        let (cp, registry) = elevated();
        let report = RestoreGuard::new(&cp, registry.clone()).restore_all().await;

        assert_eq!(report.restored, vec![search()]);
        assert_eq!(cp.exposure(&search()), Some(ExposureConfig::closed(false)));
        assert_eq!(cp.calls(FakeOp::SetPublicAccess), 1);
        assert!(registry.pending().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_restores_on_multi_thread_runtime() {
        let (cp, registry) = elevated();
        {
            let _guard = RestoreGuard::new(&cp, registry.clone());
        }
        assert_eq!(cp.exposure(&search()), Some(ExposureConfig::closed(false)));
        assert!(registry.pending().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_restores_after_panic() {
        let (cp, registry) = elevated();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = RestoreGuard::new(&cp, registry.clone());
            panic!("stage blew up");
        }));

        assert!(result.is_err());
        assert_eq!(cp.exposure(&search()), Some(ExposureConfig::closed(false)));
    }

    #[tokio::test]
    async fn test_drop_on_current_thread_only_logs() {
        let (cp, registry) = elevated();
        drop(RestoreGuard::new(&cp, registry.clone()));

        assert_eq!(cp.mutation_count(), 0);
        assert_eq!(registry.pending().len(), 1);
    }
}
