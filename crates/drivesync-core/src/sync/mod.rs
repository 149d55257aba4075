//! Sync decision, commit protocol, and the shared service wrapper

mod decision;
mod files;
mod orchestrator;
mod service;

pub use decision::{decide, EPSILON};
pub use orchestrator::SyncOrchestrator;
pub use service::SyncService;
