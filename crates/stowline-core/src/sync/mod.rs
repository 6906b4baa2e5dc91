//! Outbox replay, conflict detection, and conflict resolution.

pub mod detector;
pub mod engine;
pub mod equality;
pub mod queue;
pub mod resolver;

pub use detector::{ConflictDetector, DetectionWindows, DETECTED_KINDS};
pub use engine::SyncEngine;
pub use equality::deep_equal;
pub use queue::{DrainReport, FailedOperation, OperationQueue, QueuePolicy};
pub use resolver::{merge, ConflictResolver, ResolveReport, FREE_TEXT_FIELDS, NON_CRITICAL_FIELD};
