pub mod backend;
pub mod checksum;
pub mod classify;
pub mod client;
pub mod config;
pub mod container;
pub mod dst;
pub mod item;
pub mod memory;
pub mod outcome;
pub mod simulated;
pub mod waiter;

#[cfg(feature = "s3")]
pub mod s3;

pub use backend::{Container, Item, ItemId, RemoteError, StorageBackend};
pub use checksum::{Checksum, ChecksumAlgorithm};
pub use client::StorageClient;
pub use config::{ClientConfig, Credentials, WaiterConfig};
pub use item::{BatchDeleteRequest, BatchDeleteResult, ItemOutcome};
pub use memory::{InMemoryBackend, InMemoryConfig};
pub use outcome::{AlreadyExistsOwner, ClientError, OperationOutcome};
pub use simulated::{BackendOp, SimulatedBackend, SimulatedConfig};
pub use waiter::{ConvergenceWaiter, Presence};
