use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::error::SubflixError;
use crate::model::ProcessingJob;

/// Bytes of encoder stderr kept for diagnostics
pub const DIAGNOSTIC_TAIL_BYTES: usize = 16 * 1024;

/// Inputs and output of one subtitle embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedRequest {
    pub video: PathBuf,
    pub subtitle: PathBuf,
    pub output: PathBuf,
}

impl EmbedRequest {
    pub fn for_job(job: &ProcessingJob) -> Self {
        EmbedRequest {
            video: job.input_video_path.clone(),
            subtitle: job.input_subtitle_path.clone(),
            output: job.output_path.clone(),
        }
    }
}

/// Outcome of a successful encoder run
#[derive(Debug, Clone)]
pub struct EncodeReport {
    pub elapsed: Duration,
    /// Tail of the diagnostic stream, bounded by [`DIAGNOSTIC_TAIL_BYTES`]
    pub diagnostics: String,
}

/// Runs the external muxer for a job
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn embed(&self, request: &EmbedRequest) -> Result<EncodeReport, SubflixError>;
}

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// Parse the first line of `ffmpeg -version`.
    /// Accepts distro suffixes ("6.1.1-3ubuntu5") and git tags ("n7.0").
    pub fn parse(version_str: &str) -> Result<Self> {
        let mut words = version_str.split_whitespace();
        let token = loop {
            match words.next() {
                Some("version") => break words.next(),
                Some(_) => continue,
                None => break None,
            }
        }
        .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        let numeric: String = token
            .trim_start_matches('n')
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = numeric.split('.').filter(|p| !p.is_empty());

        let major = parts
            .next()
            .ok_or_else(|| anyhow!("Invalid version format: {}", version_str))?
            .parse::<u32>()
            .with_context(|| format!("Failed to parse major version from: {}", token))?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

        Ok(FFmpegVersion { major, minor, patch })
    }
}

impl std::fmt::Display for FFmpegVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Run `ffmpeg -version` and parse the result
pub async fn probe_version(ffmpeg_bin: &Path) -> Result<FFmpegVersion> {
    let output = Command::new(ffmpeg_bin)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Failed to execute FFmpeg at: {}", ffmpeg_bin.display()))?;

    if !output.status.success() {
        return Err(anyhow!("FFmpeg version check failed"));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout
        .lines()
        .next()
        .ok_or_else(|| anyhow!("Empty output from FFmpeg -version"))?;

    FFmpegVersion::parse(first_line)
}

/// Command line builder for the embed invocation
pub struct CommandBuilder;

impl CommandBuilder {
    /// `-y -i <video> -i <subtitle> -c copy -c:s srt -map 0 -map 1 <output>`
    ///
    /// Every stream of the video is copied as-is, the subtitle input is
    /// mapped in and converted to SRT.
    pub fn build_embed_command(video: &Path, subtitle: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(13);
        args.push("-y".into());
        args.push("-i".into());
        args.push(video.into());
        args.push("-i".into());
        args.push(subtitle.into());
        args.push("-c".into());
        args.push("copy".into());
        args.push("-c:s".into());
        args.push("srt".into());
        args.push("-map".into());
        args.push("0".into());
        args.push("-map".into());
        args.push("1".into());
        args.push(output.into());
        args
    }
}

/// Spawns the ffmpeg binary directly
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_bin: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        FfmpegEncoder {
            ffmpeg_bin: ffmpeg_bin.into(),
            timeout: None,
        }
    }

    /// Wall-clock limit per run; zero disables it
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    fn spawn(&self, args: &[OsString]) -> Result<Child, SubflixError> {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a timeout can take down helpers too
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|e| SubflixError::EncoderUnavailable {
            bin: self.ffmpeg_bin.clone(),
            reason: e.to_string(),
        })
    }

    async fn wait(&self, child: &mut Child) -> Result<ExitStatus, SubflixError> {
        let wait_err = |source: std::io::Error| SubflixError::Io {
            context: "failed to wait for ffmpeg".to_string(),
            source,
        };

        let Some(limit) = self.timeout else {
            return child.wait().await.map_err(wait_err);
        };

        match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status.map_err(wait_err),
            Err(_) => {
                kill_process_group(child);
                if let Err(e) = child.kill().await {
                    debug!("ffmpeg already gone after timeout: {}", e);
                }
                Err(SubflixError::EncoderTimeout { limit })
            }
        }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn embed(&self, request: &EmbedRequest) -> Result<EncodeReport, SubflixError> {
        let args = CommandBuilder::build_embed_command(&request.video, &request.subtitle, &request.output);
        debug!(
            "Executing FFmpeg: {} {}",
            self.ffmpeg_bin.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let started = Instant::now();
        let mut child = self.spawn(&args)?;

        // Drain both pipes so ffmpeg never blocks on a full buffer
        let stdout_handle = child.stdout.take().map(|out| tokio::spawn(read_tail(out)));
        let stderr_handle = child.stderr.take().map(|err| tokio::spawn(read_tail(err)));

        let status = match self.wait(&mut child).await {
            Ok(status) => status,
            Err(e) => {
                for handle in [stdout_handle, stderr_handle].into_iter().flatten() {
                    handle.abort();
                }
                return Err(e);
            }
        };

        if let Some(handle) = stdout_handle {
            let _ = handle.await;
        }
        let diagnostics = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(SubflixError::EncoderFailure {
                exit_code: status.code(),
                diagnostics,
            });
        }

        let elapsed = started.elapsed();
        info!(
            "FFmpeg wrote {} in {:.1}s",
            request.output.display(),
            elapsed.as_secs_f64()
        );
        Ok(EncodeReport {
            elapsed,
            diagnostics,
        })
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            warn!("Failed to kill ffmpeg process group {}: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Read a stream to EOF, keeping only the last [`DIAGNOSTIC_TAIL_BYTES`]
async fn read_tail<R: AsyncRead + Unpin>(stream: R) -> String {
    let mut reader = BufReader::new(stream);
    let mut tail = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => push_tail(&mut tail, &String::from_utf8_lossy(&buf), DIAGNOSTIC_TAIL_BYTES),
            Err(e) => {
                debug!("Stopped reading ffmpeg output: {}", e);
                break;
            }
        }
    }
    tail.trim_end().to_string()
}

/// Append `chunk`, then drop whole characters from the front until `tail`
/// fits in `cap` bytes
fn push_tail(tail: &mut String, chunk: &str, cap: usize) {
    tail.push_str(chunk);
    if tail.len() <= cap {
        return;
    }
    let mut cut = tail.len() - cap;
    while !tail.is_char_boundary(cut) {
        cut += 1;
    }
    tail.drain(..cut);
}
