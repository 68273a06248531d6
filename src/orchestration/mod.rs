pub mod cleanup_orchestrator;
pub mod pools;

pub use cleanup_orchestrator::CleanupOrchestrator;
pub use pools::{WorkerPool, WorkerPools};
