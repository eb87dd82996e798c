//! Per-account worker tasks

mod supervisor;

pub use supervisor::WorkerSupervisor;
