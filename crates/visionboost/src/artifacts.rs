use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use log::{debug, info, warn};
use tokio::sync::RwLock;
use walkdir::WalkDir;
use crate::error::EnhanceError;

/// Extension given to every enhanced artifact
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Source of collision-resistant name tokens for staged and output files
pub trait NameGenerator: Send + Sync {
    fn next_token(&self) -> String;
}

/// `<unix millis>-<12 hex chars>`: time-ordered with a random component
#[derive(Debug, Default)]
pub struct TimestampNames;

impl NameGenerator for TimestampNames {
    fn next_token(&self) -> String {
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", chrono::Utc::now().timestamp_millis(), &random[..12])
    }
}

/// `<prefix>-<n>` from an atomic counter; deterministic for tests
#[derive(Debug)]
pub struct SequentialNames {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl NameGenerator for SequentialNames {
    fn next_token(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.prefix, n)
    }
}

/// An upload written to the staging root
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Where a transcode writes, and the name it will be published under
#[derive(Debug, Clone)]
pub struct PendingOutput {
    pub name: String,
    pub partial_path: PathBuf,
}

/// Staging and output roots for uploads and enhanced artifacts.
///
/// Partial outputs live in the staging root and are renamed into the
/// output root by `finalize`, so the output root only ever holds complete
/// files. `finalize` and `purge` exclude each other through `gate`.
pub struct ArtifactStore {
    staging_root: PathBuf,
    output_root: PathBuf,
    names: Box<dyn NameGenerator>,
    gate: RwLock<()>,
}

impl ArtifactStore {
    pub fn new(staging_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self::with_names(staging_root, output_root, Box::new(TimestampNames))
    }

    pub fn with_names(
        staging_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        names: Box<dyn NameGenerator>,
    ) -> Self {
        Self {
            staging_root: staging_root.into(),
            output_root: output_root.into(),
            names,
            gate: RwLock::new(()),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Write an upload under the staging root with a fresh name that keeps
    /// the original extension
    pub async fn stage(&self, original_name: &str, data: &[u8]) -> Result<StagedUpload, EnhanceError> {
        ensure_dir(&self.staging_root).await?;

        let file_name = match safe_extension(original_name) {
            Some(ext) => format!("{}.{}", self.names.next_token(), ext),
            None => self.names.next_token(),
        };
        let path = self.staging_root.join(file_name);

        tokio::fs::write(&path, data)
            .await
            .map_err(|e| EnhanceError::storage(format!("staging upload {}", path.display()), e))?;

        debug!("Staged {:?} ({} bytes) at {}", original_name, data.len(), path.display());
        Ok(StagedUpload {
            path,
            size_bytes: data.len() as u64,
        })
    }

    /// Reserve an output name and the partial path a transcode should write to
    pub async fn allocate_output(&self) -> Result<PendingOutput, EnhanceError> {
        ensure_dir(&self.staging_root).await?;
        let name = format!("enhanced_{}.{}", self.names.next_token(), OUTPUT_EXTENSION);
        let partial_path = self.staging_root.join(format!("{}.partial", name));
        Ok(PendingOutput { name, partial_path })
    }

    /// Map a caller-supplied artifact name to its path under the output root.
    ///
    /// Names with a path separator or a `..` token are rejected without
    /// touching the filesystem.
    pub fn resolve_output(&self, name: &str) -> Result<PathBuf, EnhanceError> {
        if !is_plain_name(name) {
            warn!("Rejected artifact reference {:?}", name);
            return Err(EnhanceError::InvalidReference(name.to_string()));
        }
        Ok(self.output_root.join(name))
    }

    /// Resolve a name and require that the artifact exists
    pub async fn open_output(&self, name: &str) -> Result<PathBuf, EnhanceError> {
        let path = self.resolve_output(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(EnhanceError::NotFound(name.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(EnhanceError::NotFound(name.to_string())),
            Err(e) => Err(EnhanceError::storage(format!("reading artifact {}", path.display()), e)),
        }
    }

    /// Publish a finished partial output under its final name
    pub async fn finalize(&self, pending: &PendingOutput) -> Result<PathBuf, EnhanceError> {
        let _shared = self.gate.read().await;
        ensure_dir(&self.output_root).await?;

        let final_path = self.resolve_output(&pending.name)?;
        if let Err(rename_err) = tokio::fs::rename(&pending.partial_path, &final_path).await {
            // roots on different filesystems: copy into a hidden name, then rename
            debug!("Rename into output root failed ({}), copying instead", rename_err);
            let hidden = self.output_root.join(format!(".{}.tmp", pending.name));
            tokio::fs::copy(&pending.partial_path, &hidden)
                .await
                .map_err(|e| EnhanceError::storage(format!("publishing {}", pending.name), e))?;
            tokio::fs::rename(&hidden, &final_path)
                .await
                .map_err(|e| EnhanceError::storage(format!("publishing {}", pending.name), e))?;
            remove_if_exists(&pending.partial_path).await;
        }

        info!("📦 Artifact ready: {}", final_path.display());
        Ok(final_path)
    }

    /// Delete every file under the output root. Returns the number removed.
    pub async fn purge(&self) -> Result<usize, EnhanceError> {
        let _exclusive = self.gate.write().await;

        // walkdir is blocking; collect the files off the runtime threads
        let files = tokio::task::spawn_blocking({
            let root = self.output_root.clone();
            move || list_files(&root)
        })
        .await
        .map_err(|e| EnhanceError::storage(format!("scanning {}", self.output_root.display()), io::Error::from(e)))??;

        let mut removed = 0;
        for path in files {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| EnhanceError::storage(format!("deleting {}", path.display()), e))?;
            removed += 1;
        }

        info!("🗑️  Purged {} artifact(s) from {}", removed, self.output_root.display());
        Ok(removed)
    }

    /// Remove uploads and partial outputs left in the staging root by a
    /// previous process. Only safe before any request is admitted.
    pub async fn sweep_staging(&self) -> Result<usize, EnhanceError> {
        let mut entries = match tokio::fs::read_dir(&self.staging_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(EnhanceError::storage(format!("reading {}", self.staging_root.display()), e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EnhanceError::storage(format!("reading {}", self.staging_root.display()), e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                remove_if_exists(&entry.path()).await;
                removed += 1;
            }
        }

        if removed > 0 {
            info!("🧹 Removed {} orphaned staging file(s) from {}", removed, self.staging_root.display());
        }
        Ok(removed)
    }

    /// Remove a staged upload or leftover partial file; failures are only logged
    pub async fn discard(&self, path: &Path) {
        remove_if_exists(path).await;
    }
}

async fn ensure_dir(dir: &Path) -> Result<(), EnhanceError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| EnhanceError::storage(format!("creating {}", dir.display()), e))
}

/// Every regular file below `root`, at any depth. A missing root is empty.
fn list_files(root: &Path) -> Result<Vec<PathBuf>, EnhanceError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let err = e.into_io_error().unwrap_or_else(|| io::Error::other("walkdir loop"));
            EnhanceError::storage(format!("scanning {}", root.display()), err)
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// True when `name` is a single path component: no separators, no `..`
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.contains('\0')
}

/// Lower-cased extension of an untrusted filename, if it is short and alphanumeric
fn safe_extension(original_name: &str) -> Option<String> {
    let base = original_name.rsplit(['/', '\\']).next().unwrap_or(original_name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
