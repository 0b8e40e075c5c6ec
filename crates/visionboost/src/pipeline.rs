use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use crate::artifacts::{ArtifactStore, PendingOutput, StagedUpload};
use crate::config::EnhancerConfig;
use crate::error::EnhanceError;
use crate::filter_graph;
use crate::job::{self, Enhancement, EnhancementJob, QualityTier};
use crate::ledger::{InMemoryLedger, JobLedger};
use crate::report::{PlaceholderReport, ReportInput, ReportSynthesizer};
use crate::transcode::{FfmpegTranscoder, TranscodeExecutor};

/// Route under which artifacts are served
pub const DOWNLOAD_ROUTE: &str = "/api/download";

/// A raw uploaded file as handed over by the multipart reader
#[derive(Debug, Clone)]
pub struct Upload {
    /// Caller-supplied filename, untrusted
    pub file_name: String,
    pub data: Bytes,
}

/// One enhancement request, fields as they arrived from the caller
#[derive(Debug, Clone, Default)]
pub struct EnhanceRequest {
    pub upload: Option<Upload>,
    /// Quality tier label; absent or blank means 1080p
    pub quality: Option<String>,
    /// JSON array of enhancement identifiers
    pub enhancements: Option<String>,
}

/// Pipeline states a request moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Validated,
    Transcoding,
    Scored,
    Recorded,
    Rejected,
    Failed,
}

impl PipelineState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Received, Rejected)
                | (Validated, Rejected)
                | (Validated, Transcoding)
                | (Validated, Failed)
                | (Transcoding, Scored)
                | (Transcoding, Failed)
                | (Scored, Recorded)
                | (Scored, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Recorded | PipelineState::Rejected | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-request state tracker that logs each transition
struct Run {
    label: String,
    state: PipelineState,
}

impl Run {
    fn new(label: String) -> Self {
        debug!("[{}] {}", label, PipelineState::Received);
        Self {
            label,
            state: PipelineState::Received,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!("[{}] {} -> {}", self.label, self.state, next);
        self.state = next;
    }

    /// Move to Rejected or Failed depending on the error, then hand it back
    fn fail(&mut self, err: EnhanceError) -> EnhanceError {
        let terminal = if err.is_client_error() || matches!(err, EnhanceError::Overloaded { .. }) {
            PipelineState::Rejected
        } else {
            PipelineState::Failed
        };
        if terminal == PipelineState::Failed {
            error!("[{}] ❌ {}", self.label, err);
        } else {
            info!("[{}] Rejected: {}", self.label, err);
        }
        self.advance(terminal);
        err
    }
}

/// Admission and size limits applied before any work is done
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_concurrent_transcodes: usize,
    pub max_queued_requests: usize,
    pub max_upload_bytes: u64,
}

impl Limits {
    pub fn from_config(cfg: &EnhancerConfig) -> Self {
        Self {
            max_concurrent_transcodes: cfg.max_concurrent_transcodes,
            max_queued_requests: cfg.max_queued_requests,
            max_upload_bytes: cfg.max_upload_bytes,
        }
    }

    fn admission_capacity(&self) -> usize {
        self.max_concurrent_transcodes + self.max_queued_requests
    }
}

/// Request after validation, before anything touches disk
struct ValidatedRequest {
    file_name: String,
    data: Bytes,
    tier: QualityTier,
    enhancements: Vec<Enhancement>,
}

/// A place in the admission window, held until the request it was taken
/// for has finished
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

/// Composes staging, filter building, transcoding, scoring and recording
/// into the single "enhance one video" operation.
///
/// Clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<ArtifactStore>,
    ledger: Arc<dyn JobLedger>,
    executor: Arc<TranscodeExecutor>,
    reporter: Arc<dyn ReportSynthesizer>,
    limits: Limits,
    /// Requests admitted (running or waiting for a transcode slot)
    admission: Arc<Semaphore>,
    /// Transcode slots
    workers: Arc<Semaphore>,
    /// Held shared while publishing + recording, exclusive while clearing
    commit: Arc<RwLock<()>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ArtifactStore>,
        ledger: Arc<dyn JobLedger>,
        executor: TranscodeExecutor,
        reporter: Arc<dyn ReportSynthesizer>,
        limits: Limits,
    ) -> Self {
        Self {
            store,
            ledger,
            executor: Arc::new(executor),
            reporter,
            admission: Arc::new(Semaphore::new(limits.admission_capacity())),
            workers: Arc::new(Semaphore::new(limits.max_concurrent_transcodes)),
            limits,
            commit: Arc::new(RwLock::new(())),
        }
    }

    /// Production wiring: ffmpeg transcoder, timestamp names, in-memory ledger,
    /// placeholder report
    pub fn from_config(cfg: &EnhancerConfig) -> Self {
        let store = Arc::new(ArtifactStore::new(&cfg.staging_dir, &cfg.output_dir));
        let ledger: Arc<dyn JobLedger> = Arc::new(InMemoryLedger::new(store.clone()));
        let executor = TranscodeExecutor::new(
            Arc::new(FfmpegTranscoder::new(&cfg.ffmpeg_bin)),
            cfg.transcode_timeout(),
        );
        Self::new(store, ledger, executor, Arc::new(PlaceholderReport), Limits::from_config(cfg))
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Requests currently admitted, transcoding or queued
    pub fn in_flight(&self) -> usize {
        self.limits.admission_capacity() - self.admission.available_permits()
    }

    /// Take a place in the admission window without waiting.
    ///
    /// Fails with `Overloaded` when `max_concurrent_transcodes +
    /// max_queued_requests` requests are already admitted. Callers that
    /// still have to read the upload should admit first.
    pub fn admit(&self) -> Result<Admission, EnhanceError> {
        let capacity = self.limits.admission_capacity();
        let permit = self.admission.clone().try_acquire_owned().map_err(|_| {
            warn!("Admission ceiling of {} reached, rejecting request", capacity);
            EnhanceError::Overloaded { limit: capacity }
        })?;
        Ok(Admission { _permit: permit })
    }

    /// Enhance one uploaded video and record the result.
    ///
    /// Returns only once an artifact exists in the output root and the job
    /// is in the ledger. The staged upload is removed whatever the outcome.
    pub async fn enhance(&self, request: EnhanceRequest) -> Result<EnhancementJob, EnhanceError> {
        let admission = self.admit()?;
        self.enhance_admitted(admission, request).await
    }

    /// Like `enhance`, with the admission already taken.
    ///
    /// The work runs on its own task: if the caller stops waiting, the
    /// request is still carried to a terminal state, recorded or cleaned up,
    /// and the admission is released only then.
    pub async fn enhance_admitted(
        &self,
        admission: Admission,
        request: EnhanceRequest,
    ) -> Result<EnhancementJob, EnhanceError> {
        let this = self.clone();
        let task = tokio::spawn(async move {
            let _admission = admission;
            this.run(request).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(EnhanceError::storage("running enhancement task", io::Error::from(e))),
        }
    }

    async fn run(&self, request: EnhanceRequest) -> Result<EnhancementJob, EnhanceError> {
        let label = request
            .upload
            .as_ref()
            .map(|u| u.file_name.clone())
            .unwrap_or_else(|| "<no upload>".to_string());
        let mut run = Run::new(label);

        let validated = self.validate(request).map_err(|e| run.fail(e))?;
        run.advance(PipelineState::Validated);

        let staged = self
            .store
            .stage(&validated.file_name, &validated.data)
            .await
            .map_err(|e| run.fail(e))?;

        let result = self.process_staged(&mut run, &validated, &staged).await;

        // staging is transient; cleanup problems are logged, never fatal
        self.store.discard(&staged.path).await;

        result.map_err(|e| run.fail(e))
    }

    async fn process_staged(
        &self,
        run: &mut Run,
        request: &ValidatedRequest,
        staged: &StagedUpload,
    ) -> Result<EnhancementJob, EnhanceError> {
        let chain = filter_graph::build(request.tier, &request.enhancements);
        let pending = self.store.allocate_output().await?;

        let outcome = {
            let _slot = self.workers.acquire().await.map_err(|_| EnhanceError::Overloaded {
                limit: self.limits.max_concurrent_transcodes,
            })?;
            run.advance(PipelineState::Transcoding);

            match self.executor.execute(&staged.path, &pending.partial_path, &chain).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.store.discard(&pending.partial_path).await;
                    return Err(e);
                }
            }
        };

        let size_mb = job::size_in_mb(staged.size_bytes);
        let report = self.reporter.synthesize(&ReportInput {
            source_name: &request.file_name,
            size_mb,
            tier: request.tier,
            enhancements: chain.applied_enhancements(),
            outcome: &outcome,
        });
        run.advance(PipelineState::Scored);

        let job = self
            .record(&pending, |output_artifact| EnhancementJob {
                id: job::new_job_id(),
                source_name: request.file_name.clone(),
                source_size_mb: size_mb,
                quality_tier: request.tier,
                enhancements: request.enhancements.clone(),
                status: report.status,
                download_url: format!("{}/{}", DOWNLOAD_ROUTE, output_artifact),
                output_artifact,
                report: report.text.clone(),
                stats: report.stats.clone(),
                created_at: Utc::now(),
            })
            .await?;
        run.advance(PipelineState::Recorded);

        info!("✅ Job {} recorded ({:?})", job.id, job.status);
        Ok(job)
    }

    /// Publish the artifact and append its job without a clear in between
    async fn record(
        &self,
        pending: &PendingOutput,
        make_job: impl FnOnce(String) -> EnhancementJob,
    ) -> Result<EnhancementJob, EnhanceError> {
        let _commit = self.commit.read().await;

        if let Err(e) = self.store.finalize(pending).await {
            self.store.discard(&pending.partial_path).await;
            return Err(e);
        }

        let job = make_job(pending.name.clone());
        self.ledger.append(job.clone()).await?;
        Ok(job)
    }

    fn validate(&self, request: EnhanceRequest) -> Result<ValidatedRequest, EnhanceError> {
        let upload = match request.upload {
            Some(upload) if !upload.data.is_empty() => upload,
            _ => return Err(EnhanceError::MissingUpload),
        };

        let tier = match request.quality.as_deref().map(str::trim) {
            None | Some("") => QualityTier::FullHd,
            Some(label) => label.parse()?,
        };

        let size = upload.data.len() as u64;
        if size > self.limits.max_upload_bytes {
            return Err(EnhanceError::UploadTooLarge {
                size,
                limit: self.limits.max_upload_bytes,
            });
        }

        let enhancements = job::parse_enhancement_list(request.enhancements.as_deref());

        Ok(ValidatedRequest {
            file_name: upload.file_name,
            data: upload.data,
            tier,
            enhancements,
        })
    }

    /// All recorded jobs in insertion order
    pub async fn list_jobs(&self) -> Vec<EnhancementJob> {
        self.ledger.list().await
    }

    /// Remove every job and every artifact. Returns the number of jobs removed.
    pub async fn clear_all(&self) -> Result<usize, EnhanceError> {
        let _commit = self.commit.write().await;
        self.ledger.clear().await
    }

    /// Path of a downloadable artifact
    pub async fn download(&self, artifact_name: &str) -> Result<PathBuf, EnhanceError> {
        self.store.open_output(artifact_name).await
    }
}
