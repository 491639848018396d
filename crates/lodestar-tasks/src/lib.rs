//! Lodestar Tasks - hashing, caching and the action pipeline
//!
//! This crate fingerprints tasks from their inputs, stores and restores
//! results in a content-addressable cache, and runs a resolved workspace's
//! graph concurrently, producing a [`RunReport`].

pub mod action;
pub mod cache;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod pipeline;
pub mod report;
pub mod reporter;
pub mod runner;

pub use action::{Action, ActionStatus, Attempt};
pub use cache::{ArtifactCache, CacheEntry, CacheStats, EntrySource, Resolved};
pub use error::{CacheError, HashError, PipelineError, RunError};
pub use hasher::{
    compute_fingerprint, FileDigestProvider, Fingerprint, FsDigestProvider, HashManifest, PASSTHROUGH_HASH,
};
pub use manifest::HashStore;
pub use pipeline::Pipeline;
pub use report::{Order, RunReport, RunSummary, SortBy};
pub use reporter::{CollectingReporter, PipelineEvent, TaskReporter, TaskReporterRegistry, TracingReporter};
pub use runner::{CommandOutput, TaskRunner};
