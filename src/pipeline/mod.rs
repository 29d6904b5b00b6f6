pub mod orchestrator;
pub mod packager;
pub mod prompt;
pub mod service;
pub mod work_item;

pub use orchestrator::{BatchOrchestrator, BatchReport, BatchState, ItemFailure};
pub use packager::{ArchiveHandle, ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use service::{BatchRequest, BatchService, BatchStatus, BatchSummary};
