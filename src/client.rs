//! Storage Client
//!
//! Single entry point owning the backend handle and configuration. The
//! managers it hands out borrow both for the duration of a call and keep
//! nothing between calls, so one client can be shared (e.g. behind an
//! `Arc`) by any number of concurrent tasks.

use crate::backend::StorageBackend;
use crate::config::ClientConfig;
use crate::container::ContainerManager;
use crate::item::ItemManager;
use crate::outcome::ClientError;
use crate::waiter::ConvergenceWaiter;
use tracing::info;

/// Facade composing the container and item managers
pub struct StorageClient<B: StorageBackend> {
    backend: B,
    config: ClientConfig,
    waiter: ConvergenceWaiter,
}

impl<B: StorageBackend> StorageClient<B> {
    /// Build a client over an existing backend
    pub fn new(backend: B, config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        info!(
            region = %config.region,
            endpoint = ?config.endpoint,
            timeout_ms = config.operation_timeout.as_millis() as u64,
            "storage client ready"
        );
        let waiter = ConvergenceWaiter::new(config.waiter.clone());
        Ok(StorageClient {
            backend,
            config,
            waiter,
        })
    }

    pub fn containers(&self) -> ContainerManager<'_, B> {
        ContainerManager::new(&self.backend, &self.config, &self.waiter)
    }

    pub fn items(&self) -> ItemManager<'_, B> {
        ItemManager::new(&self.backend, &self.config, &self.waiter)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn waiter(&self) -> &ConvergenceWaiter {
        &self.waiter
    }
}

#[cfg(feature = "s3")]
impl StorageClient<crate::s3::S3Backend> {
    /// Connect to S3 (or a compatible endpoint) using `config`
    pub async fn connect_s3(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let backend = crate::s3::S3Backend::connect(&config).await;
        Self::new(backend, config)
    }
}
