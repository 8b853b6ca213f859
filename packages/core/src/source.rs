//! Source reading: decoded BGRA frames pulled from the raw recording.
//!
//! The production reader plays the recording through ffmpeg at the
//! export frame cadence and reads raw frames off a pipe. Seeking
//! respawns the decoder at the target position, which keeps the read
//! loop a plain sequential pull.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::ffprobe::ffprobe_path;

use crate::error::{ReelError, ReelResult};

/// A decoded frame (tightly packed BGRA)
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Duration,
}

/// Static properties of a recording, probed once at open.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub duration_ms: f64,
    pub has_audio: bool,
}

/// Seekable, sequential access to the decoded frames of a recording.
#[async_trait::async_trait]
pub trait SourceReader: Send {
    /// Probe the recording and prepare for reading.
    async fn open(&mut self) -> ReelResult<SourceInfo>;
    /// Position the reader so the next frame decodes at `position_secs`.
    async fn seek(&mut self, position_secs: f64) -> ReelResult<()>;
    /// The next decoded frame, or `None` at end of stream.
    async fn next_frame(&mut self) -> ReelResult<Option<RawFrame>>;
    /// Release decoder resources.
    async fn close(&mut self) -> ReelResult<()>;
}

/// ffmpeg-backed reader: rawvideo BGRA over stdout at a fixed fps.
pub struct FfmpegSourceReader {
    path: PathBuf,
    frame_rate: u32,
    info: Option<SourceInfo>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    position_secs: f64,
    frames_read: u64,
}

impl FfmpegSourceReader {
    pub fn new(path: impl Into<PathBuf>, frame_rate: u32) -> Self {
        Self {
            path: path.into(),
            frame_rate,
            info: None,
            child: None,
            stdout: None,
            position_secs: 0.0,
            frames_read: 0,
        }
    }

    fn kill_decoder(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn spawn_decoder(&mut self, position_secs: f64) -> ReelResult<()> {
        self.kill_decoder();

        let path = self.path.to_string_lossy().to_string();
        let mut child = FfmpegCommand::new()
            .hide_banner()
            .args(["-loglevel", "error"])
            .args(["-ss", &format!("{:.6}", position_secs)])
            .input(&path)
            .args(["-an"])
            .args(["-vf", &format!("fps={}", self.frame_rate)])
            .args(["-f", "rawvideo", "-pix_fmt", "bgra"])
            .output("pipe:1")
            .as_inner_mut()
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        self.stdout = child.stdout.take();
        self.child = Some(child);
        self.position_secs = position_secs;
        self.frames_read = 0;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SourceReader for FfmpegSourceReader {
    async fn open(&mut self) -> ReelResult<SourceInfo> {
        let (width, height) = probe_dimensions(&self.path)?;
        let duration_ms = probe_duration_ms(&self.path)?;
        let has_audio = probe_audio_params(&self.path)?.is_some();

        tracing::info!(
            width,
            height,
            duration_ms,
            has_audio,
            "opened source {}",
            self.path.display()
        );

        let info = SourceInfo {
            width,
            height,
            duration_ms,
            has_audio,
        };
        self.info = Some(info.clone());
        Ok(info)
    }

    async fn seek(&mut self, position_secs: f64) -> ReelResult<()> {
        if self.info.is_none() {
            return Err(ReelError::SourceError(
                "seek called before open".to_string(),
            ));
        }
        tracing::debug!(position_secs, "seeking source");
        self.spawn_decoder(position_secs)
    }

    async fn next_frame(&mut self) -> ReelResult<Option<RawFrame>> {
        let info = self
            .info
            .as_ref()
            .ok_or_else(|| ReelError::SourceError("read called before open".to_string()))?;
        let (width, height) = (info.width, info.height);

        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| ReelError::SourceError("read called before seek".to_string()))?;

        let mut data = vec![0u8; (width * height * 4) as usize];
        match stdout.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let timestamp = Duration::from_secs_f64(
            self.position_secs + self.frames_read as f64 / self.frame_rate as f64,
        );
        self.frames_read += 1;

        Ok(Some(RawFrame {
            data,
            width,
            height,
            timestamp,
        }))
    }

    async fn close(&mut self) -> ReelResult<()> {
        self.kill_decoder();
        Ok(())
    }
}

impl Drop for FfmpegSourceReader {
    fn drop(&mut self) {
        self.kill_decoder();
    }
}

fn run_ffprobe(args: &[&str]) -> ReelResult<String> {
    let output = Command::new(ffprobe_path())
        .args(args)
        .stdin(Stdio::null())
        .output()?;
    if !output.status.success() {
        return Err(ReelError::SourceError(format!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Width and height of the first video stream.
pub(crate) fn probe_dimensions(path: &Path) -> ReelResult<(u32, u32)> {
    let out = run_ffprobe(&[
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height",
        "-of",
        "csv=p=0",
        &path.to_string_lossy(),
    ])?;
    parse_dimensions(&out).ok_or_else(|| {
        ReelError::SourceError(format!("could not parse dimensions from {:?}", out.trim()))
    })
}

/// Container duration in milliseconds.
pub(crate) fn probe_duration_ms(path: &Path) -> ReelResult<f64> {
    let out = run_ffprobe(&[
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "csv=p=0",
        &path.to_string_lossy(),
    ])?;
    parse_duration_ms(&out).ok_or_else(|| {
        ReelError::SourceError(format!("could not parse duration from {:?}", out.trim()))
    })
}

/// Sample rate and channel count of the first audio stream, if any.
pub(crate) fn probe_audio_params(path: &Path) -> ReelResult<Option<(u32, u16)>> {
    let out = run_ffprobe(&[
        "-v",
        "error",
        "-select_streams",
        "a:0",
        "-show_entries",
        "stream=sample_rate,channels",
        "-of",
        "csv=p=0",
        &path.to_string_lossy(),
    ])?;
    Ok(parse_audio_params(&out))
}

fn parse_dimensions(out: &str) -> Option<(u32, u32)> {
    let mut parts = out.trim().split(',');
    let width = parts.next()?.trim().parse().ok()?;
    let height = parts.next()?.trim().parse().ok()?;
    Some((width, height))
}

fn parse_duration_ms(out: &str) -> Option<f64> {
    out.trim().parse::<f64>().ok().map(|secs| secs * 1000.0)
}

fn parse_audio_params(out: &str) -> Option<(u32, u16)> {
    let mut parts = out.trim().split(',');
    let sample_rate = parts.next()?.trim().parse().ok()?;
    let channels = parts.next()?.trim().parse().ok()?;
    Some((sample_rate, channels))
}
