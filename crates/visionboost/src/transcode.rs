use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use crate::error::{EnhanceError, TranscodeError};
use crate::filter_graph::FilterChain;

/// Lines of transcoder stderr kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// External process that applies a filter chain to a source file
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcode `source` into `dest` through `chain`, giving up after `timeout`
    async fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        chain: &FilterChain,
        timeout: Duration,
    ) -> Result<(), TranscodeError>;
}

/// Builds ffmpeg command lines for the fixed output profile
pub struct CommandBuilder;

impl CommandBuilder {
    /// H.264 at constant quality, AAC at a fixed bitrate, MP4 with faststart.
    /// Only the filter chain varies between requests.
    pub fn build_enhance_command(source: &Path, dest: &Path, chain: &FilterChain) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
        ];

        args.push("-i".into());
        args.push(source.to_string_lossy().to_string());

        args.push("-vf".into());
        args.push(chain.to_string());

        // first video stream, audio if there is any
        args.extend(["-map".into(), "0:v:0".into(), "-map".into(), "0:a?".into()]);

        args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "medium".into(),
            "-crf".into(),
            "18".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ]);
        args.extend(["-c:a".into(), "aac".into(), "-b:a".into(), "192k".into()]);
        args.extend(["-movflags".into(), "+faststart".into()]);

        // dest carries a .partial suffix, so the muxer must be named
        args.extend(["-f".into(), "mp4".into()]);
        args.push(dest.to_string_lossy().to_string());

        args
    }
}

/// Runs the ffmpeg binary directly
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_bin: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        chain: &FilterChain,
        timeout: Duration,
    ) -> Result<(), TranscodeError> {
        let args = CommandBuilder::build_enhance_command(source, dest, chain);
        debug!("Executing ffmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(&args);
        run_process(cmd, timeout).await
    }
}

/// Spawn `cmd`, wait for it with a hard timeout and kill it on expiry.
/// Stderr is drained while the process runs; its last lines go into the error.
pub async fn run_process(mut cmd: Command, timeout: Duration) -> Result<(), TranscodeError> {
    let bin = cmd.as_std().get_program().to_string_lossy().to_string();

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TranscodeError::Spawn { bin, source })?;

    let stderr_handle = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut tail = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail.join("\n")
        })
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(result) => result.map_err(TranscodeError::Wait)?,
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill timed out process: {}", e);
            }
            return Err(TranscodeError::TimedOut(timeout));
        }
    };

    let stderr = match stderr_handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() {
        return Err(TranscodeError::Exit {
            code: status.code(),
            stderr,
        });
    }

    Ok(())
}

/// How the artifact for a request was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    /// The filter chain was applied
    Enhanced { elapsed: Duration },
    /// The transcoder failed and the source was copied verbatim
    Fallback { reason: String },
}

impl TranscodeOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, TranscodeOutcome::Fallback { .. })
    }
}

/// Runs a transcoder with a timeout and falls back to a verbatim copy on
/// any failure, so every call that returns leaves a file at `dest`
pub struct TranscodeExecutor {
    transcoder: Arc<dyn Transcoder>,
    timeout: Duration,
}

impl TranscodeExecutor {
    pub fn new(transcoder: Arc<dyn Transcoder>, timeout: Duration) -> Self {
        Self { transcoder, timeout }
    }

    /// Only an I/O failure of the fallback copy itself is returned as an error
    pub async fn execute(
        &self,
        source: &Path,
        dest: &Path,
        chain: &FilterChain,
    ) -> Result<TranscodeOutcome, EnhanceError> {
        let started = Instant::now();
        info!("🎬 Transcoding {} to {} with filter chain: {}", source.display(), chain.tier(), chain);

        let failure = match self.transcoder.transcode(source, dest, chain, self.timeout).await {
            Ok(()) => match tokio::fs::metadata(dest).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {
                    let elapsed = started.elapsed();
                    info!("✅ Transcode finished in {:.1}s", elapsed.as_secs_f64());
                    return Ok(TranscodeOutcome::Enhanced { elapsed });
                }
                Ok(_) => "transcoder reported success but produced an empty file".to_string(),
                Err(e) => format!("transcoder reported success but output is unreadable: {}", e),
            },
            Err(e) => e.to_string(),
        };

        warn!("⚠️  Transcode failed, returning original instead: {}", failure);

        // drop whatever partial output the transcoder left behind
        match tokio::fs::remove_file(dest).await {
            Ok(()) => debug!("Removed partial output {}", dest.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial output {}: {}", dest.display(), e),
        }

        tokio::fs::copy(source, dest)
            .await
            .map_err(|e| EnhanceError::storage(format!("copying {} as fallback", source.display()), e))?;

        Ok(TranscodeOutcome::Fallback { reason: failure })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::filter_graph;
    use crate::job::{Enhancement, QualityTier};

    /// Writes a fixed payload to `dest`
    pub(crate) struct StubTranscoder(pub &'static [u8]);

    #[async_trait]
    impl Transcoder for StubTranscoder {
        async fn transcode(&self, _: &Path, dest: &Path, _: &FilterChain, _: Duration) -> Result<(), TranscodeError> {
            tokio::fs::write(dest, self.0).await.map_err(TranscodeError::Wait)
        }
    }

    /// Writes garbage to `dest` and then fails, like a crashed encoder
    pub(crate) struct CrashingTranscoder;

    #[async_trait]
    impl Transcoder for CrashingTranscoder {
        async fn transcode(&self, _: &Path, dest: &Path, _: &FilterChain, _: Duration) -> Result<(), TranscodeError> {
            tokio::fs::write(dest, b"half-written").await.map_err(TranscodeError::Wait)?;
            Err(TranscodeError::Exit {
                code: Some(1),
                stderr: "Conversion failed!".into(),
            })
        }
    }

    fn chain() -> FilterChain {
        filter_graph::build(QualityTier::Uhd4k, &[Enhancement::Sharpening])
    }

    #[test]
    fn test_enhance_command_profile() {
        let args = CommandBuilder::build_enhance_command(
            Path::new("/in/source.mov"),
            Path::new("/stage/out.mp4.partial"),
            &chain(),
        );

        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], chain().to_string());

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(input < vf, "input must precede the filter");

        let window = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        assert_eq!(window("-c:v"), "libx264");
        assert_eq!(window("-crf"), "18");
        assert_eq!(window("-c:a"), "aac");
        assert_eq!(window("-b:a"), "192k");
        assert_eq!(window("-f"), "mp4");
        assert_eq!(args.last().unwrap(), "/stage/out.mp4.partial");
    }

    #[tokio::test]
    async fn test_successful_transcode_is_enhanced() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mp4");
        let dest = dir.path().join("out.partial");
        tokio::fs::write(&source, b"source").await.unwrap();

        let executor = TranscodeExecutor::new(Arc::new(StubTranscoder(b"encoded")), Duration::from_secs(5));
        let outcome = executor.execute(&source, &dest, &chain()).await.unwrap();

        assert!(!outcome.is_fallback());
        assert_eq!(std::fs::read(&dest).unwrap(), b"encoded");
    }

    #[tokio::test]
    async fn test_failed_transcode_replaces_partial_with_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.mp4");
        let dest = dir.path().join("out.partial");
        tokio::fs::write(&source, b"original bytes").await.unwrap();

        let executor = TranscodeExecutor::new(Arc::new(CrashingTranscoder), Duration::from_secs(5));
        let outcome = executor.execute(&source, &dest, &chain()).await.unwrap();

        match outcome {
            TranscodeOutcome::Fallback { reason } => assert!(reason.contains("Conversion failed!")),
            other => panic!("expected fallback, got {:?}", other),
        }
        assert_eq!(std::fs::read(&dest).unwrap(), b"original bytes");
    }

    #[tokio::test]
    async fn test_missing_binary_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.webm");
        let dest = dir.path().join("out.partial");
        tokio::fs::write(&source, b"webm").await.unwrap();

        let transcoder = FfmpegTranscoder::new(dir.path().join("no-such-ffmpeg"));
        let executor = TranscodeExecutor::new(Arc::new(transcoder), Duration::from_secs(5));
        let outcome = executor.execute(&source, &dest, &chain()).await.unwrap();

        assert!(outcome.is_fallback());
        assert_eq!(std::fs::read(&dest).unwrap(), b"webm");
    }

    #[tokio::test]
    async fn test_unreadable_source_is_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let executor = TranscodeExecutor::new(Arc::new(CrashingTranscoder), Duration::from_secs(5));
        let result = executor
            .execute(&dir.path().join("gone.mp4"), &dir.path().join("out.partial"), &chain())
            .await;
        assert!(matches!(result, Err(EnhanceError::Storage { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_process_timeout_kills_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let started = Instant::now();
        let result = run_process(cmd, Duration::from_millis(300)).await;

        assert!(matches!(result, Err(TranscodeError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_process_reports_exit_code_and_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo 'Invalid data found' >&2; exit 3"]);

        match run_process(cmd, Duration::from_secs(10)).await {
            Err(TranscodeError::Exit { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "Invalid data found");
            }
            other => panic!("expected exit error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_process_success() {
        let cmd = Command::new("true");
        run_process(cmd, Duration::from_secs(10)).await.unwrap();
    }
}
