use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::GenerationSection;

use super::{ArtifactRequest, MediaError, MediaResult, MediaTool, RenderPlan};

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
        command.output().await
    }
}

/// [`MediaTool`] backed by the `ffprobe` and `ffmpeg` binaries.
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    command_timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for FfmpegTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegTool")
            .field("ffmpeg", &self.ffmpeg)
            .field("ffprobe", &self.ffprobe)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl FfmpegTool {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            command_timeout: Duration::from_secs(300),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn from_section(section: &GenerationSection) -> Self {
        Self::new(&section.ffmpeg, &section.ffprobe).with_timeout(section.command_timeout())
    }

    pub fn with_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    fn ffmpeg_command(&self) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command
            .kill_on_drop(true)
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error");
        command
    }

    async fn execute(&self, mut command: Command) -> MediaResult<Output> {
        let rendered = describe(&command);
        debug!(command = %rendered, "running media command");
        let program = program_name(&command);
        let result = timeout(self.command_timeout, self.executor.run(&mut command)).await;
        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(MediaError::Spawn { program, source }),
            Err(_) => {
                return Err(MediaError::Timeout {
                    command: rendered,
                    timeout: self.command_timeout,
                })
            }
        };
        if !output.status.success() {
            return Err(MediaError::CommandFailure {
                command: rendered,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn render_still(&self, source: &Path, output: &Path, at: f64) -> MediaResult<()> {
        let mut command = self.ffmpeg_command();
        command
            .arg("-ss")
            .arg(format!("{at:.2}"))
            .arg("-i")
            .arg(source)
            .arg("-vframes")
            .arg("1")
            .arg("-q:v")
            .arg("2")
            .arg(output);
        self.execute(command).await.map(|_| ())
    }

    async fn render_clip(
        &self,
        source: &Path,
        output: &Path,
        start: f64,
        seconds: f64,
    ) -> MediaResult<()> {
        let mut command = self.ffmpeg_command();
        command
            .arg("-ss")
            .arg(format!("{start:.2}"))
            .arg("-i")
            .arg(source)
            .arg("-t")
            .arg(format!("{seconds:.1}"));
        x264_silent(&mut command);
        command.arg("-movflags").arg("+faststart").arg(output);
        self.execute(command).await.map(|_| ())
    }

    /// Cuts every segment to MPEG-TS in a scratch directory next to `output`,
    /// then joins them with the concat protocol. The scratch directory is
    /// removed on every exit path.
    async fn render_montage(
        &self,
        source: &Path,
        output: &Path,
        starts: &[f64],
        segment_seconds: f64,
    ) -> MediaResult<()> {
        let scratch_parent = output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let scratch = tempfile::Builder::new()
            .prefix(".montage-")
            .tempdir_in(&scratch_parent)
            .map_err(|source| MediaError::Io {
                path: scratch_parent.clone(),
                source,
            })?;

        let mut segments = Vec::with_capacity(starts.len());
        for (index, start) in starts.iter().enumerate() {
            let segment = scratch.path().join(format!("seg{index:03}.ts"));
            let mut command = self.ffmpeg_command();
            command
                .arg("-ss")
                .arg(format!("{start:.2}"))
                .arg("-i")
                .arg(source)
                .arg("-t")
                .arg(format!("{segment_seconds:.1}"));
            x264_silent(&mut command);
            command.arg("-f").arg("mpegts").arg(&segment);
            self.execute(command).await?;
            segments.push(segment.display().to_string());
        }

        let mut command = self.ffmpeg_command();
        command
            .arg("-i")
            .arg(format!("concat:{}", segments.join("|")))
            .arg("-c")
            .arg("copy")
            .arg("-movflags")
            .arg("+faststart")
            .arg(output);
        self.execute(command).await.map(|_| ())
    }
}

#[async_trait::async_trait]
impl MediaTool for FfmpegTool {
    async fn probe_duration(&self, source: &Path) -> MediaResult<f64> {
        let mut command = Command::new(&self.ffprobe);
        command
            .kill_on_drop(true)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(source);
        let output = self.execute(command).await?;
        let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
        match raw.parse::<f64>() {
            Ok(duration) if duration.is_finite() => Ok(duration),
            _ => {
                warn!(path = %source.display(), raw = %raw, "ffprobe returned no usable duration");
                Err(MediaError::InvalidDuration {
                    path: source.to_path_buf(),
                    raw,
                })
            }
        }
    }

    async fn generate_artifact(&self, request: &ArtifactRequest) -> MediaResult<()> {
        match &request.plan {
            RenderPlan::Still { at } => {
                self.render_still(&request.source, &request.output, *at)
                    .await
            }
            RenderPlan::Montage {
                starts,
                segment_seconds,
            } => {
                self.render_montage(&request.source, &request.output, starts, *segment_seconds)
                    .await
            }
            RenderPlan::Clip { start, seconds } => {
                self.render_clip(&request.source, &request.output, *start, *seconds)
                    .await
            }
        }
    }
}

fn x264_silent(command: &mut Command) {
    command
        .arg("-c:v")
        .arg("libx264")
        .arg("-crf")
        .arg("28")
        .arg("-preset")
        .arg("fast")
        .arg("-an");
}

fn program_name(command: &Command) -> String {
    command.as_std().get_program().to_string_lossy().into_owned()
}

fn describe(command: &Command) -> String {
    let std = command.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<Vec<String>>>,
        stdout: Vec<u8>,
        exit_code: i32,
    }

    #[async_trait::async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
            let std = command.as_std();
            let mut call = vec![std.get_program().to_string_lossy().into_owned()];
            call.extend(std.get_args().map(|arg| arg.to_string_lossy().into_owned()));
            self.calls.lock().unwrap().push(call);
            Ok(Output {
                status: ExitStatus::from_raw(self.exit_code << 8),
                stdout: self.stdout.clone(),
                stderr: b"boom".to_vec(),
            })
        }
    }

    #[tokio::test]
    async fn probe_parses_ffprobe_output() {
        let executor = Arc::new(RecordingExecutor {
            stdout: b"123.456\n".to_vec(),
            ..Default::default()
        });
        let tool = FfmpegTool::new("ffmpeg", "ffprobe").with_executor(executor.clone());
        let duration = tool.probe_duration(Path::new("/v/a.mp4")).await.unwrap();
        assert!((duration - 123.456).abs() < 1e-9);
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0][0], "ffprobe");
        assert!(calls[0].contains(&"format=duration".to_string()));
    }

    #[tokio::test]
    async fn probe_rejects_garbage() {
        let executor = Arc::new(RecordingExecutor {
            stdout: b"N/A\n".to_vec(),
            ..Default::default()
        });
        let tool = FfmpegTool::new("ffmpeg", "ffprobe").with_executor(executor);
        let err = tool.probe_duration(Path::new("/v/a.mp4")).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidDuration { .. }));
    }

    #[tokio::test]
    async fn still_frame_seeks_to_requested_time() {
        let executor = Arc::new(RecordingExecutor::default());
        let tool = FfmpegTool::new("ffmpeg", "ffprobe").with_executor(executor.clone());
        let request = ArtifactRequest::new("/v/a.mp4", "/c/x.jpg", RenderPlan::Still { at: 61.5 });
        tool.generate_artifact(&request).await.unwrap();
        let calls = executor.calls.lock().unwrap();
        let args = &calls[0];
        let ss = args.iter().position(|arg| arg == "-ss").unwrap();
        assert_eq!(args[ss + 1], "61.50");
        assert!(args.contains(&"-vframes".to_string()));
        assert_eq!(args.last().unwrap(), "/c/x.jpg");
    }

    #[tokio::test]
    async fn montage_cuts_each_segment_then_concatenates() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::default());
        let tool = FfmpegTool::new("ffmpeg", "ffprobe").with_executor(executor.clone());
        let output = dir.path().join("p.mp4");
        let request = ArtifactRequest::new(
            "/v/a.mp4",
            &output,
            RenderPlan::Montage {
                starts: vec![1.0, 2.0, 3.0],
                segment_seconds: 0.5,
            },
        );
        tool.generate_artifact(&request).await.unwrap();
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let concat = &calls[3];
        assert!(concat.iter().any(|arg| arg.starts_with("concat:")));
        // scratch directory is cleaned up
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_command_failure() {
        let executor = Arc::new(RecordingExecutor {
            exit_code: 1,
            ..Default::default()
        });
        let tool = FfmpegTool::new("ffmpeg", "ffprobe").with_executor(executor);
        let request = ArtifactRequest::new(
            "/v/a.mp4",
            "/c/x.mp4",
            RenderPlan::Clip {
                start: 0.0,
                seconds: 30.0,
            },
        );
        let err = tool.generate_artifact(&request).await.unwrap_err();
        match err {
            MediaError::CommandFailure { status, stderr, .. } => {
                assert_eq!(status, Some(1));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
