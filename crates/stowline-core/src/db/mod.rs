//! Database layer for Stowline

mod cache_repository;
mod conflict_repository;
mod connection;
mod context_repository;
mod entity_repository;
mod media_repository;
mod migrations;
mod operation_repository;
mod store;

pub use cache_repository::LibSqlCacheRepository;
pub use conflict_repository::LibSqlConflictRepository;
pub use connection::Database;
pub use context_repository::{ContextRepository, LibSqlContextRepository};
pub use entity_repository::LibSqlEntityRepository;
pub use media_repository::LibSqlMediaRepository;
pub use migrations::CURRENT_VERSION as SCHEMA_VERSION;
pub use store::LocalStore;
