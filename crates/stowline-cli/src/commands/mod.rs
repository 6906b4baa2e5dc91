pub mod cache;
pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod context;
pub mod media;
pub mod queue;
pub mod status;
pub mod sync;
