//! Container Manager
//!
//! Create, delete, list and existence operations on containers. Mutations
//! report `Success` only once the convergence waiter has observed them.

use crate::backend::{Container, StorageBackend};
use crate::classify::issue;
use crate::config::ClientConfig;
use crate::outcome::{AlreadyExistsOwner, OperationOutcome};
use crate::waiter::{ConvergenceWaiter, Presence};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Container operations borrowing the client's backend handle
pub struct ContainerManager<'a, B: StorageBackend + ?Sized> {
    backend: &'a B,
    config: &'a ClientConfig,
    waiter: &'a ConvergenceWaiter,
}

impl<'a, B: StorageBackend + ?Sized> ContainerManager<'a, B> {
    pub fn new(backend: &'a B, config: &'a ClientConfig, waiter: &'a ConvergenceWaiter) -> Self {
        ContainerManager {
            backend,
            config,
            waiter,
        }
    }

    /// Create a container and wait until it is visible.
    ///
    /// `AlreadyExists` is returned as-is, whoever owns the name.
    pub async fn create(
        &self,
        name: &str,
        region: Option<&str>,
        cancel: &CancellationToken,
    ) -> OperationOutcome {
        debug!(container = name, ?region, "creating container");
        let call = self.backend.create_container(name, region);
        if let Err(outcome) = issue(call, self.config.operation_timeout, cancel).await {
            match outcome {
                OperationOutcome::AlreadyExists(AlreadyExistsOwner::Caller) => {
                    info!(container = name, "container already exists and is owned by you")
                }
                OperationOutcome::AlreadyExists(_) => {
                    warn!(container = name, "container name is owned by another account")
                }
                ref other => warn!(container = name, outcome = %other, "create container failed"),
            }
            return outcome;
        }

        let backend = self.backend;
        let outcome = self
            .waiter
            .wait(
                move || backend.head_container(name).map(|r| r.map(|_| ())),
                Presence::Present,
                cancel,
            )
            .await;
        match outcome {
            OperationOutcome::Success => info!(container = name, "container created"),
            ref other => error!(
                container = name,
                outcome = %other,
                "container creation accepted but not confirmed"
            ),
        }
        outcome
    }

    /// Delete a container and wait until it is gone.
    ///
    /// `NotFound` means the container did not exist and is surfaced. Once
    /// the service accepted the delete, a failed wait is reported as the
    /// wait's own outcome (`Timeout`), never as `NotFound`.
    pub async fn delete(&self, name: &str, cancel: &CancellationToken) -> OperationOutcome {
        debug!(container = name, "deleting container");
        let call = self.backend.delete_container(name);
        if let Err(outcome) = issue(call, self.config.operation_timeout, cancel).await {
            match outcome {
                OperationOutcome::NotFound => warn!(container = name, "container does not exist"),
                ref other => warn!(container = name, outcome = %other, "delete container failed"),
            }
            return outcome;
        }

        let backend = self.backend;
        let outcome = self
            .waiter
            .wait(
                move || backend.head_container(name).map(|r| r.map(|_| ())),
                Presence::Absent,
                cancel,
            )
            .await;
        match outcome {
            OperationOutcome::Success => info!(container = name, "container deleted"),
            ref other => error!(
                container = name,
                outcome = %other,
                "container deletion accepted but not confirmed"
            ),
        }
        outcome
    }

    /// All containers visible to the credentials.
    ///
    /// `AccessDenied` is an expected answer: list permission is often
    /// withheld while other permissions are granted.
    pub async fn list_all(&self, cancel: &CancellationToken) -> (Vec<Container>, OperationOutcome) {
        let call = self.backend.list_containers();
        match issue(call, self.config.operation_timeout, cancel).await {
            Ok(containers) => {
                debug!(count = containers.len(), "listed containers");
                (containers, OperationOutcome::Success)
            }
            Err(OperationOutcome::AccessDenied) => {
                info!("not permitted to list containers");
                (Vec::new(), OperationOutcome::AccessDenied)
            }
            Err(outcome) => {
                warn!(outcome = %outcome, "list containers failed");
                (Vec::new(), outcome)
            }
        }
    }

    /// Metadata-only existence probe.
    ///
    /// Any failure yields `false`; the outcome says whether that means
    /// "absent" (`NotFound`) or "could not tell".
    pub async fn exists(&self, name: &str, cancel: &CancellationToken) -> (bool, OperationOutcome) {
        let call = self.backend.head_container(name);
        match issue(call, self.config.operation_timeout, cancel).await {
            Ok(_) => (true, OperationOutcome::Success),
            Err(outcome) => {
                if outcome != OperationOutcome::NotFound {
                    debug!(container = name, outcome = %outcome, "existence probe failed");
                }
                (false, outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RemoteError;
    use crate::memory::{InMemoryBackend, InMemoryConfig};
    use crate::simulated::{BackendOp, SimulatedBackend};
    use std::time::Duration;

    struct Fixture<B: StorageBackend> {
        backend: B,
        config: ClientConfig,
        waiter: ConvergenceWaiter,
    }

    impl<B: StorageBackend> Fixture<B> {
        fn new(backend: B) -> Self {
            let config = ClientConfig::test();
            let waiter = ConvergenceWaiter::new(config.waiter.clone());
            Fixture {
                backend,
                config,
                waiter,
            }
        }

        fn manager(&self) -> ContainerManager<'_, B> {
            ContainerManager::new(&self.backend, &self.config, &self.waiter)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_visibility() {
        let store = InMemoryBackend::new(InMemoryConfig::eventual(Duration::from_millis(300)));
        let fixture = Fixture::new(store.clone());
        let cancel = CancellationToken::new();

        let outcome = fixture.manager().create("photos", None, &cancel).await;
        assert_eq!(outcome, OperationOutcome::Success);
        assert!(store.visible_container("photos"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_existing_is_already_exists() {
        let fixture = Fixture::new(InMemoryBackend::default());
        let cancel = CancellationToken::new();
        let manager = fixture.manager();

        assert!(manager.create("photos", None, &cancel).await.is_success());
        assert_eq!(
            manager.create("photos", None, &cancel).await,
            OperationOutcome::AlreadyExists(AlreadyExistsOwner::Caller)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_name_owned_by_other_account() {
        let store = InMemoryBackend::default();
        let cancel = CancellationToken::new();
        let theirs = Fixture::new(store.as_owner("someone-else"));
        assert!(theirs.manager().create("shared", None, &cancel).await.is_success());

        let mine = Fixture::new(store);
        assert_eq!(
            mine.manager().create("shared", None, &cancel).await,
            OperationOutcome::AlreadyExists(AlreadyExistsOwner::Other)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_missing_container_is_not_found() {
        let fixture = Fixture::new(InMemoryBackend::default());
        let outcome = fixture
            .manager()
            .delete("missing", &CancellationToken::new())
            .await;
        assert_eq!(outcome, OperationOutcome::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_for_absence() {
        let store = InMemoryBackend::new(InMemoryConfig::eventual(Duration::from_millis(200)));
        let fixture = Fixture::new(store.clone());
        let cancel = CancellationToken::new();
        let manager = fixture.manager();

        assert!(manager.create("photos", None, &cancel).await.is_success());
        assert!(manager.delete("photos", &cancel).await.is_success());
        assert!(!store.visible_container("photos"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_unconfirmed_is_timeout_not_not_found() {
        // visibility lag longer than the waiter deadline
        let store = InMemoryBackend::new(InMemoryConfig::eventual(Duration::from_secs(30)));
        store.create_container("photos", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        let fixture = Fixture::new(store);
        let outcome = fixture
            .manager()
            .delete("photos", &CancellationToken::new())
            .await;
        assert_eq!(outcome, OperationOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_all_access_denied() {
        let store = InMemoryBackend::default();
        store.set_list_containers_denied(true);
        let fixture = Fixture::new(store);

        let (containers, outcome) = fixture.manager().list_all(&CancellationToken::new()).await;
        assert!(containers.is_empty());
        assert_eq!(outcome, OperationOutcome::AccessDenied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_all_empty_is_success() {
        let fixture = Fixture::new(InMemoryBackend::default());
        let (containers, outcome) = fixture.manager().list_all(&CancellationToken::new()).await;
        assert!(containers.is_empty());
        assert_eq!(outcome, OperationOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exists_surfaces_non_not_found_errors() {
        let sim = SimulatedBackend::passthrough(InMemoryBackend::default());
        sim.fail_next(
            BackendOp::HeadContainer,
            RemoteError::service("SlowDown", "Please reduce your request rate.", 503),
        );
        let fixture = Fixture::new(sim);

        let (exists, outcome) = fixture
            .manager()
            .exists("photos", &CancellationToken::new())
            .await;
        assert!(!exists);
        assert_eq!(outcome.code(), Some("SlowDown"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_call_timeout() {
        let sim = SimulatedBackend::passthrough(InMemoryBackend::default());
        sim.hang_next(BackendOp::CreateContainer);
        let fixture = Fixture::new(sim);

        let outcome = fixture
            .manager()
            .create("photos", None, &CancellationToken::new())
            .await;
        assert_eq!(outcome, OperationOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_cancelled_while_waiting() {
        let store = InMemoryBackend::new(InMemoryConfig::eventual(Duration::from_secs(600)));
        let fixture = Fixture::new(store);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = fixture.manager().create("photos", None, &cancel).await;
        assert_eq!(outcome, OperationOutcome::Cancelled);
    }
}
