//! Client Configuration
//!
//! Construction inputs for `StorageClient`: region, credentials, endpoint
//! and the timing knobs of the convergence protocol. Loadable from TOML or
//! from the standard AWS environment variables.

use crate::outcome::ClientError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound of items in one batch delete request
pub const BATCH_DELETE_LIMIT: usize = 1000;

/// Upper bound of parts in one multipart upload
pub const MAX_PARTS: u64 = 10_000;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Region the client talks to (default: us-east-1)
    pub region: String,
    /// Static credentials; `None` defers to the backend's provider chain
    pub credentials: Option<Credentials>,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack)
    pub endpoint: Option<String>,
    /// Deadline for a single remote call (default: 60s)
    #[serde(with = "duration_millis")]
    pub operation_timeout: Duration,
    /// Convergence polling settings
    pub waiter: WaiterConfig,
    /// Files at or above this size go through multipart upload (default: 64MB)
    pub multipart_threshold: u64,
    /// Part size for multipart uploads (default: 8MB)
    pub part_size: u64,
    /// Concurrent per-item convergence waits in a batch delete (default: 8)
    pub batch_parallelism: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            region: "us-east-1".to_string(),
            credentials: None,
            endpoint: None,
            operation_timeout: Duration::from_secs(60),
            waiter: WaiterConfig::default(),
            multipart_threshold: 64 * 1024 * 1024, // 64MB
            part_size: 8 * 1024 * 1024,            // 8MB
            batch_parallelism: 8,
        }
    }
}

impl ClientConfig {
    /// Configuration for tests (short deadlines, fast polling)
    pub fn test() -> Self {
        ClientConfig {
            operation_timeout: Duration::from_secs(5),
            waiter: WaiterConfig::test(),
            multipart_threshold: 1024,
            part_size: 256,
            ..Default::default()
        }
    }

    /// Load from environment variables.
    ///
    /// - AWS_REGION (default: us-east-1)
    /// - AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY / AWS_SESSION_TOKEN
    /// - CONVERGENT_ENDPOINT
    /// - CONVERGENT_TIMEOUT_MS (operation and convergence timeout)
    pub fn from_env() -> Self {
        let mut config = ClientConfig {
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: std::env::var("CONVERGENT_ENDPOINT").ok(),
            ..Default::default()
        };

        if let (Ok(access_key_id), Ok(secret_access_key)) = (
            std::env::var("AWS_ACCESS_KEY_ID"),
            std::env::var("AWS_SECRET_ACCESS_KEY"),
        ) {
            config.credentials = Some(Credentials {
                access_key_id,
                secret_access_key,
                session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
            });
        }

        if let Some(timeout) = std::env::var("CONVERGENT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.operation_timeout = Duration::from_millis(timeout);
            config.waiter.timeout = Duration::from_millis(timeout);
        }

        config
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ClientError> {
        let config: ClientConfig =
            toml::from_str(text).map_err(|e| ClientError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ClientError> {
        let text = std::fs::read_to_string(path).map_err(|e| ClientError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.region.is_empty() {
            return Err(ClientError::InvalidConfig("region must not be empty".into()));
        }
        if self.batch_parallelism == 0 {
            return Err(ClientError::InvalidConfig(
                "batch_parallelism must be at least 1".into(),
            ));
        }
        if self.part_size == 0 {
            return Err(ClientError::InvalidPartSize(0));
        }
        if self.operation_timeout.is_zero() {
            return Err(ClientError::InvalidConfig(
                "operation_timeout must be positive".into(),
            ));
        }
        self.waiter.validate()
    }
}

/// Static credential material
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

// Secrets stay out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Convergence waiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaiterConfig {
    /// How long to wait for a mutation to become observable (default: 60s)
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// First delay between probes (default: 250ms)
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Delay ceiling; delays double up to this (default: 5s)
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        WaiterConfig {
            timeout: Duration::from_secs(60),
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl WaiterConfig {
    /// Configuration for tests (fast polling)
    pub fn test() -> Self {
        WaiterConfig {
            timeout: Duration::from_secs(2),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.initial_delay.is_zero() {
            return Err(ClientError::InvalidConfig(
                "waiter.initial_delay must be positive".into(),
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(ClientError::InvalidConfig(
                "waiter.initial_delay must not exceed waiter.max_delay".into(),
            ));
        }
        Ok(())
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
