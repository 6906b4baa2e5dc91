//! Data models for Stowline

mod cache;
mod conflict;
mod entity;
mod media;
mod operation;
mod scope;

pub use cache::CacheEntry;
pub use conflict::{
    Conflict, ConflictId, ConflictSide, ConflictType, MergeInstructions, Resolution,
    ResolutionChoice, ResolutionStrategy, Side,
};
pub use entity::{
    new_business_id, EntityData, EntityKind, EntityRecord, EntityWrite, Item, ItemImage,
    MutableField, Project, Transaction,
};
pub use media::{MediaBlob, MediaId, MediaUsage};
pub use operation::{
    EntityRef, FailureKind, Mutation, Operation, OperationId, OperationMeta, OperationType,
};
pub use scope::{Scope, ScopeContext};
