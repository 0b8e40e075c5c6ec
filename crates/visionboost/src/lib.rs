pub mod config;
pub mod error;
pub mod job;
pub mod filter_graph;
pub mod transcode;
pub mod artifacts;
pub mod report;
pub mod ledger;
pub mod pipeline;

pub use config::EnhancerConfig;
pub use error::{EnhanceError, TranscodeError};
pub use job::{Enhancement, EnhancementJob, EnhancementStatus, QualityTier, Stat};
pub use filter_graph::{FilterChain, FilterStage};
pub use transcode::{FfmpegTranscoder, TranscodeExecutor, TranscodeOutcome, Transcoder};
pub use artifacts::{ArtifactStore, NameGenerator, SequentialNames, TimestampNames};
pub use report::{PlaceholderReport, Report, ReportSynthesizer};
pub use ledger::{InMemoryLedger, JobLedger};
pub use pipeline::{Admission, EnhanceRequest, Limits, Orchestrator, PipelineState, Upload};

/// Name reported by the health endpoint
pub const SERVICE_NAME: &str = "VisionBoost AI";

/// Library version, reported by the health endpoint
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
