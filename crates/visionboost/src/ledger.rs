use std::sync::Arc;
use async_trait::async_trait;
use log::info;
use tokio::sync::Mutex;
use crate::artifacts::ArtifactStore;
use crate::error::EnhanceError;
use crate::job::EnhancementJob;

/// Append-only record of completed jobs
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Record a completed job; insertion order is kept
    async fn append(&self, job: EnhancementJob) -> Result<(), EnhanceError>;

    /// All jobs in insertion order
    async fn list(&self) -> Vec<EnhancementJob>;

    /// Drop every job together with every output artifact.
    /// Returns the number of jobs removed.
    async fn clear(&self) -> Result<usize, EnhanceError>;
}

/// In-process ledger backed by a mutex-guarded vector.
///
/// `clear` purges the artifact store while holding the same lock that
/// `append` and `list` take.
pub struct InMemoryLedger {
    jobs: Mutex<Vec<EnhancementJob>>,
    store: Arc<ArtifactStore>,
}

impl InMemoryLedger {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            store,
        }
    }
}

#[async_trait]
impl JobLedger for InMemoryLedger {
    async fn append(&self, job: EnhancementJob) -> Result<(), EnhanceError> {
        let mut jobs = self.jobs.lock().await;
        info!("Recorded job {} ({}) -> {}", job.id, job.source_name, job.output_artifact);
        jobs.push(job);
        Ok(())
    }

    async fn list(&self) -> Vec<EnhancementJob> {
        self.jobs.lock().await.clone()
    }

    async fn clear(&self) -> Result<usize, EnhanceError> {
        let mut jobs = self.jobs.lock().await;
        // purge first: if it fails the ledger still describes what is on disk
        self.store.purge().await?;
        let removed = jobs.len();
        jobs.clear();
        info!("Cleared {} job(s) from the ledger", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::SequentialNames;
    use crate::job::{EnhancementStatus, QualityTier};

    fn job(id: &str, source: &str) -> EnhancementJob {
        EnhancementJob {
            id: id.to_string(),
            source_name: source.to_string(),
            source_size_mb: 1.0,
            quality_tier: QualityTier::FullHd,
            enhancements: vec![],
            status: EnhancementStatus::Enhanced,
            output_artifact: format!("enhanced_{}.mp4", id),
            download_url: format!("/api/download/enhanced_{}.mp4", id),
            report: String::new(),
            stats: vec![],
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().join("up"), dir.path().join("out")));
        let ledger = InMemoryLedger::new(store);

        ledger.append(job("b", "same.mp4")).await.unwrap();
        ledger.append(job("a", "same.mp4")).await.unwrap();
        ledger.append(job("c", "other.mp4")).await.unwrap();

        let ids: Vec<_> = ledger.list().await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_clear_purges_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::with_names(
            dir.path().join("up"),
            dir.path().join("out"),
            Box::new(SequentialNames::new("l")),
        ));
        let ledger = InMemoryLedger::new(store.clone());

        let pending = store.allocate_output().await.unwrap();
        tokio::fs::write(&pending.partial_path, b"data").await.unwrap();
        store.finalize(&pending).await.unwrap();
        ledger.append(job("l-1", "a.mp4")).await.unwrap();

        assert_eq!(ledger.clear().await.unwrap(), 1);
        assert!(ledger.list().await.is_empty());
        assert_eq!(std::fs::read_dir(store.output_root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().join("up"), dir.path().join("out")));
        let ledger = Arc::new(InMemoryLedger::new(store));

        let mut handles = Vec::new();
        for i in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.append(job(&format!("j{}", i), "x.mp4")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.list().await.len(), 32);
    }
}
