//! Hivemind Core Library
//!
//! Maintains named knowledge artifacts, each produced by running an external
//! analysis process against a git repository at a specific revision. Every
//! artifact keeps its analyzed versions side by side and exposes one of them
//! as current through an atomically swapped pointer.

pub mod analysis;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod git;
pub mod lease;
pub mod obs;
pub mod pipeline;
pub mod registry;
pub mod staging;
pub mod store;
pub mod telemetry;

pub use analysis::{AnalysisExecutor, AnalysisMode, DefaultTemplate, InstructionTemplate, TailBuffer};
pub use cancel::CancellationToken;
pub use catalog::{filter_versions, sort_versions, VersionCatalog};
pub use config::{AnalysisConfig, HivemindConfig, OutputSet, PointerKind};
pub use domain::{
    short_revision, ErrorKind, HivemindError, ProgressEvent, ProgressSink, RepositoryBinding,
    Result, UpdateOutcome, UpdatePhase, Version, VersionKind,
};
pub use git::{CommitInfo, GitMirror, SourceMirror, TagInfo};
pub use lease::{ArtifactLease, ArtifactLeases};
pub use pipeline::UpdatePipeline;
pub use registry::{validate_artifact_name, RepositoryRegistry};
pub use staging::{StagingCoordinator, StagingWorkspace};
pub use store::{ArtifactSummary, CurrentVersionPointer, FilePointer, SymlinkPointer, VersionStore};
pub use telemetry::init_tracing;
