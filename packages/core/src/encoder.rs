//! Video and audio encoding seams plus the ffmpeg-sidecar
//! implementations.
//!
//! The video encoder is asynchronous: frames go in over `submit`,
//! compressed units come back over `next_unit`/`try_next_unit`, one
//! completion per submitted frame. The production encoder pipes raw
//! BGRA into an ffmpeg child process and parses the Annex-B elementary
//! stream coming back on a reader thread.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::paths::ffmpeg_path;

use crate::audio::{sample_blocks, AudioTrack};
use crate::config::{AudioCodec, VideoCodec};
use crate::error::{ReelError, ReelResult};
use crate::source::RawFrame;

/// Sample frames per AAC access unit.
const AAC_FRAME_SAMPLES: u64 = 1024;
/// Sample frames per WAV write chunk when staging audio for encode.
const WAV_BLOCK_FRAMES: usize = 4096;

/// One compressed access unit on its track's output timeline.
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    pub data: Vec<u8>,
    pub timestamp_us: u64,
    pub duration_us: u64,
    pub key_frame: bool,
    /// Decoder configuration (H.264 parameter sets), attached lazily to
    /// the first unit that exposes it.
    pub config: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceleration {
    Hardware,
    Software,
}

#[derive(Debug, Clone)]
pub struct VideoEncoderConfig {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate: u32,
    pub acceleration: Acceleration,
}

/// ffmpeg encoder name for a codec/acceleration pair.
pub(crate) fn encoder_name(codec: VideoCodec, acceleration: Acceleration) -> &'static str {
    if cfg!(target_os = "macos") {
        match (codec, acceleration) {
            (VideoCodec::H264, Acceleration::Hardware) => "h264_videotoolbox",
            (VideoCodec::H265, Acceleration::Hardware) => "hevc_videotoolbox",
            (VideoCodec::H264, Acceleration::Software) => "libx264",
            (VideoCodec::H265, Acceleration::Software) => "libx265",
        }
    } else {
        match (codec, acceleration) {
            (VideoCodec::H264, Acceleration::Hardware) => "h264_nvenc",
            (VideoCodec::H265, Acceleration::Hardware) => "hevc_nvenc",
            (VideoCodec::H264, Acceleration::Software) => "libx264",
            (VideoCodec::H265, Acceleration::Software) => "libx265",
        }
    }
}

/// Asynchronous frame encoder.
///
/// Capability negotiation is two-step: `supports` probes without side
/// effects, `configure` commits. The submitted `key_frame` flag is a
/// request; the authoritative flag on [`EncodedUnit`] comes from the
/// bitstream.
#[async_trait::async_trait]
pub trait VideoEncoder: Send {
    fn supports(&self, config: &VideoEncoderConfig) -> bool;
    fn configure(&mut self, config: &VideoEncoderConfig) -> ReelResult<()>;
    fn submit(
        &mut self,
        frame: &RawFrame,
        timestamp_us: u64,
        duration_us: u64,
        key_frame: bool,
    ) -> ReelResult<()>;
    /// Signal end of stream; the remaining units drain via `next_unit`.
    fn flush(&mut self) -> ReelResult<()>;
    /// Await the next completed unit; `None` once flushed and drained.
    async fn next_unit(&mut self) -> Option<EncodedUnit>;
    /// Non-blocking drain of already-completed units.
    fn try_next_unit(&mut self) -> Option<EncodedUnit>;
}

/// Whole-track audio encoder: all units are produced up front so the
/// orchestrator can interleave them against video by timestamp.
pub trait AudioEncoder: Send {
    fn encode_track(&mut self, track: &AudioTrack) -> ReelResult<Vec<EncodedUnit>>;
}

/// Ensure the bundled ffmpeg binary is available, downloading if needed.
pub fn ensure_ffmpeg() -> ReelResult<()> {
    use ffmpeg_sidecar::download::auto_download;

    if ffmpeg_sidecar::command::ffmpeg_is_installed() {
        tracing::debug!("FFmpeg is already installed");
        return Ok(());
    }

    tracing::info!("FFmpeg not found, downloading...");
    auto_download()
        .map_err(|e| ReelError::EncodingError(format!("Failed to download FFmpeg: {}", e)))?;

    tracing::info!("FFmpeg downloaded successfully");
    Ok(())
}

/// H.264/H.265 encoder over an ffmpeg child process.
pub struct SidecarVideoEncoder {
    config: Option<VideoEncoderConfig>,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    units: Option<tokio::sync::mpsc::UnboundedReceiver<EncodedUnit>>,
    timestamps: Option<std::sync::mpsc::Sender<(u64, u64)>>,
    reader: Option<JoinHandle<()>>,
}

impl SidecarVideoEncoder {
    pub fn new() -> Self {
        Self {
            config: None,
            process: None,
            stdin: None,
            units: None,
            timestamps: None,
            reader: None,
        }
    }

    fn shutdown(&mut self) {
        self.stdin = None;
        self.timestamps = None;
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.units = None;
    }
}

impl Default for SidecarVideoEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VideoEncoder for SidecarVideoEncoder {
    fn supports(&self, config: &VideoEncoderConfig) -> bool {
        let name = encoder_name(config.codec, config.acceleration);
        match list_encoders() {
            Ok(list) => {
                let found = list
                    .lines()
                    .any(|line| line.split_whitespace().nth(1) == Some(name));
                tracing::debug!(encoder = name, found, "probed encoder support");
                found
            }
            Err(e) => {
                tracing::warn!("encoder probe failed: {e}");
                false
            }
        }
    }

    fn configure(&mut self, config: &VideoEncoderConfig) -> ReelResult<()> {
        self.shutdown();

        let name = encoder_name(config.codec, config.acceleration);
        let elementary_format = match config.codec {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "hevc",
        };

        let mut cmd = FfmpegCommand::new();
        cmd.hide_banner()
            .args(["-loglevel", "error"])
            .args([
                "-f",
                "rawvideo",
                "-pixel_format",
                "bgra",
                "-video_size",
                &format!("{}x{}", config.width, config.height),
                "-framerate",
                &config.frame_rate.to_string(),
                "-i",
                "pipe:0",
            ])
            .args(["-c:v", name])
            .args(["-b:v", &config.bitrate.to_string()])
            .args(["-pix_fmt", "yuv420p"])
            .args(["-g", &(config.frame_rate * 2).to_string()])
            .args(["-bf", "0"]);
        if config.acceleration == Acceleration::Software {
            cmd.args(["-preset", "fast"]);
        }
        cmd.args(["-f", elementary_format]).output("pipe:1");

        let mut child = cmd
            .as_inner_mut()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ReelError::EncodingError(format!("Failed to start FFmpeg: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReelError::EncodingError("Failed to get FFmpeg stdin".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReelError::EncodingError("Failed to get FFmpeg stdout".to_string()))?;

        let (unit_tx, unit_rx) = tokio::sync::mpsc::unbounded_channel();
        let (ts_tx, ts_rx) = std::sync::mpsc::channel::<(u64, u64)>();

        let codec = config.codec;
        let reader = std::thread::spawn(move || {
            let mut splitter = AnnexBSplitter::new(codec);
            let forward = |au: AccessUnit| {
                let (timestamp_us, duration_us) = ts_rx.recv().unwrap_or((0, 0));
                let _ = unit_tx.send(EncodedUnit {
                    data: au.data,
                    timestamp_us,
                    duration_us,
                    key_frame: au.key_frame,
                    config: au.config,
                });
            };
            let mut buf = [0u8; 64 * 1024];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for au in splitter.push(&buf[..n]) {
                            forward(au);
                        }
                    }
                    Err(_) => break,
                }
            }
            if let Some(au) = splitter.finish() {
                forward(au);
            }
        });

        tracing::info!(
            encoder = name,
            width = config.width,
            height = config.height,
            frame_rate = config.frame_rate,
            "video encoder configured"
        );

        self.config = Some(config.clone());
        self.stdin = Some(stdin);
        self.process = Some(child);
        self.units = Some(unit_rx);
        self.timestamps = Some(ts_tx);
        self.reader = Some(reader);
        Ok(())
    }

    fn submit(
        &mut self,
        frame: &RawFrame,
        timestamp_us: u64,
        duration_us: u64,
        _key_frame: bool,
    ) -> ReelResult<()> {
        if let Some(config) = &self.config {
            let expected = (config.width * config.height * 4) as usize;
            if frame.data.len() != expected {
                return Err(ReelError::EncodingError(format!(
                    "frame buffer is {} bytes, expected {}",
                    frame.data.len(),
                    expected
                )));
            }
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ReelError::EncodingError("encoder not configured".to_string()))?;
        if let Some(ts_tx) = &self.timestamps {
            let _ = ts_tx.send((timestamp_us, duration_us));
        }
        stdin
            .write_all(&frame.data)
            .map_err(|e| ReelError::EncodingError(format!("Failed to write frame: {}", e)))
    }

    fn flush(&mut self) -> ReelResult<()> {
        // Closing stdin drains the encoder; the reader thread forwards
        // the remaining units and then closes the channel.
        self.stdin = None;
        Ok(())
    }

    async fn next_unit(&mut self) -> Option<EncodedUnit> {
        match self.units.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    fn try_next_unit(&mut self) -> Option<EncodedUnit> {
        self.units.as_mut().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for SidecarVideoEncoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn list_encoders() -> ReelResult<String> {
    let output = Command::new(ffmpeg_path())
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .output()?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// ffmpeg encoder name and raw stream format for an audio codec.
pub(crate) fn audio_codec_args(codec: AudioCodec) -> (&'static str, &'static str) {
    match codec {
        AudioCodec::Aac => ("aac", "adts"),
    }
}

/// AAC encoder: stage the track as WAV, encode to ADTS, split into one
/// unit per access unit.
pub struct SidecarAacEncoder {
    codec: AudioCodec,
    bitrate: u32,
}

impl SidecarAacEncoder {
    pub fn new(codec: AudioCodec, bitrate: u32) -> Self {
        Self { codec, bitrate }
    }
}

impl AudioEncoder for SidecarAacEncoder {
    fn encode_track(&mut self, track: &AudioTrack) -> ReelResult<Vec<EncodedUnit>> {
        if track.samples.is_empty() {
            return Ok(Vec::new());
        }

        let wav_path =
            std::env::temp_dir().join(format!("reel-audio-{}.wav", uuid::Uuid::new_v4()));
        let spec = hound::WavSpec {
            channels: track.channels,
            sample_rate: track.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let write_result = (|| -> Result<(), hound::Error> {
            let mut writer = hound::WavWriter::create(&wav_path, spec)?;
            for (_, block) in sample_blocks(track, WAV_BLOCK_FRAMES) {
                for &sample in block {
                    writer.write_sample(sample)?;
                }
            }
            writer.finalize()
        })();
        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&wav_path);
            return Err(ReelError::AudioError(format!("Failed to stage WAV: {}", e)));
        }

        let (codec_name, stream_format) = audio_codec_args(self.codec);
        let output = Command::new(ffmpeg_path())
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-i", &wav_path.to_string_lossy()])
            .args(["-c:a", codec_name, "-b:a", &self.bitrate.to_string()])
            .args(["-f", stream_format, "pipe:1"])
            .stdin(Stdio::null())
            .output();
        let _ = std::fs::remove_file(&wav_path);

        let output = output?;
        if !output.status.success() {
            return Err(ReelError::AudioError(format!(
                "AAC encode failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let rate = track.sample_rate.max(1) as u64;
        let unit_ts = |i: u64| i * AAC_FRAME_SAMPLES * 1_000_000 / rate;
        let units: Vec<EncodedUnit> = adts_frame_ranges(&output.stdout)
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| {
                let i = i as u64;
                EncodedUnit {
                    data: output.stdout[start..end].to_vec(),
                    timestamp_us: unit_ts(i),
                    duration_us: unit_ts(i + 1) - unit_ts(i),
                    key_frame: true,
                    config: None,
                }
            })
            .collect();

        tracing::info!(units = units.len(), "audio track encoded");
        Ok(units)
    }
}

/// Byte ranges of the ADTS frames in a raw AAC stream. Stops at the
/// first malformed header.
pub(crate) fn adts_frame_ranges(data: &[u8]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut pos = 0;
    while pos + 7 <= data.len() {
        if data[pos] != 0xFF || data[pos + 1] & 0xF0 != 0xF0 {
            break;
        }
        let frame_len = ((data[pos + 3] as usize & 0x03) << 11)
            | ((data[pos + 4] as usize) << 3)
            | ((data[pos + 5] as usize) >> 5);
        if frame_len < 7 || pos + frame_len > data.len() {
            break;
        }
        ranges.push((pos, pos + frame_len));
        pos += frame_len;
    }
    ranges
}

/// A complete access unit split out of an Annex-B elementary stream.
#[derive(Debug, Clone)]
pub(crate) struct AccessUnit {
    pub data: Vec<u8>,
    pub key_frame: bool,
    pub config: Option<Vec<u8>>,
}

/// Incremental Annex-B splitter. Collects NAL units until a VCL NAL
/// closes the access unit; parameter sets are captured once and
/// attached to the first emitted unit.
pub(crate) struct AnnexBSplitter {
    codec: VideoCodec,
    buf: Vec<u8>,
    pending: Vec<u8>,
    pending_key: bool,
    parameter_sets: Vec<u8>,
    config_emitted: bool,
}

impl AnnexBSplitter {
    pub(crate) fn new(codec: VideoCodec) -> Self {
        Self {
            codec,
            buf: Vec::new(),
            pending: Vec::new(),
            pending_key: false,
            parameter_sets: Vec::new(),
            config_emitted: false,
        }
    }

    pub(crate) fn push(&mut self, data: &[u8]) -> Vec<AccessUnit> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();
        loop {
            let Some((first_pos, first_len)) = find_start_code(&self.buf, 0) else {
                break;
            };
            let Some((next_pos, _)) = find_start_code(&self.buf, first_pos + first_len) else {
                break;
            };
            let nal: Vec<u8> = self.buf[first_pos..next_pos].to_vec();
            self.buf.drain(..next_pos);
            if let Some(au) = self.consume_nal(nal, first_len) {
                out.push(au);
            }
        }
        out
    }

    /// Flush the trailing NAL after end of stream.
    pub(crate) fn finish(&mut self) -> Option<AccessUnit> {
        if let Some((pos, len)) = find_start_code(&self.buf, 0) {
            let nal: Vec<u8> = self.buf[pos..].to_vec();
            self.buf.clear();
            if let Some(au) = self.consume_nal(nal, len) {
                return Some(au);
            }
        }
        if self.pending.is_empty() {
            return None;
        }
        Some(self.close_unit())
    }

    fn consume_nal(&mut self, nal: Vec<u8>, start_code_len: usize) -> Option<AccessUnit> {
        if nal.len() <= start_code_len {
            return None;
        }
        let header = nal[start_code_len];
        let (vcl, key, parameter_set) = match self.codec {
            VideoCodec::H264 => {
                let nal_type = header & 0x1F;
                (
                    (1..=5).contains(&nal_type),
                    nal_type == 5,
                    nal_type == 7 || nal_type == 8,
                )
            }
            VideoCodec::H265 => {
                let nal_type = (header >> 1) & 0x3F;
                (
                    nal_type <= 31,
                    (16..=21).contains(&nal_type),
                    (32..=34).contains(&nal_type),
                )
            }
        };

        if parameter_set && !self.config_emitted {
            self.parameter_sets.extend_from_slice(&nal);
        }
        self.pending.extend_from_slice(&nal);
        if vcl {
            self.pending_key |= key;
            return Some(self.close_unit());
        }
        None
    }

    fn close_unit(&mut self) -> AccessUnit {
        let config = if !self.config_emitted && !self.parameter_sets.is_empty() {
            self.config_emitted = true;
            Some(self.parameter_sets.clone())
        } else {
            None
        };
        let key_frame = self.pending_key;
        self.pending_key = false;
        AccessUnit {
            data: std::mem::take(&mut self.pending),
            key_frame,
            config,
        }
    }
}

/// Position and length of the next Annex-B start code at or after
/// `from`.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}
