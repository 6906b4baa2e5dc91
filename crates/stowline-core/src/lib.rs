//! stowline-core - Core library for Stowline
//!
//! Offline-first synchronization for shared project inventories: a local
//! libSQL store, a durable outbox replayed against the backend, and a
//! conflict detector/resolver that reconciles divergent copies.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod network;
pub mod sync;
pub mod util;

pub use backend::{Backend, BackendConfig, BackendError, MemoryBackend, RestBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use db::LocalStore;
pub use error::{Error, Result};
pub use models::{
    Conflict, ConflictId, EntityData, EntityKind, EntityRecord, Operation, OperationId, Scope,
    ScopeContext,
};
pub use network::{NetworkMonitor, NetworkStatus};
pub use sync::{DrainReport, OperationQueue, SyncEngine};
