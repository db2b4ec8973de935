//! The autonomous optimization engine: exposure-window tracking,
//! statistical settle decisions, the campaign orchestrator, and the
//! periodic scheduler.

pub mod confidence;
pub mod memstore;
pub mod orchestrator;
pub mod rotation;
pub mod scheduler;

pub use memstore::InMemoryStore;
pub use orchestrator::Orchestrator;
pub use rotation::{RotationTracker, VariantPerformance};
pub use scheduler::Scheduler;
