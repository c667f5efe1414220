#![allow(clippy::missing_docs_in_private_items)]

pub mod intake;
pub mod jobs;
pub mod llm;
pub mod pipeline;
pub mod reconcile;
pub mod rescore;
pub mod sync;

pub use jobs::{EmbedderFactory, JobWorker};
pub use pipeline::{IngestOptions, IngestReport, IngestStatus, IngestionPipeline, ReuseMode};
pub use sync::{run_sync_worker, sync_once, SyncOptions};
