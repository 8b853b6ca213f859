//! Export orchestration: one cooperative task that drives source,
//! compositor, encoders and muxer from `Idle` to `Done`.
//!
//! The capture loop is playback-based: the source decodes at the
//! export cadence and the loop pulls one frame per output slot. The
//! only backpressure signal is the in-flight frame count between
//! `submit` and the matching compressed unit.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::audio::{splice_trims, AudioExtractor, AudioTrack};
use crate::compositor::FrameCompositor;
use crate::config::ExportConfig;
use crate::encoder::{
    ensure_ffmpeg, Acceleration, AudioEncoder, EncodedUnit, SidecarAacEncoder,
    SidecarVideoEncoder, VideoEncoder, VideoEncoderConfig,
};
use crate::error::{ReelError, ReelResult};
use crate::muxer::{ContainerMuxer, Mp4Muxer};
use crate::segment::plan_segments;
use crate::source::{FfmpegSourceReader, SourceReader};

/// Stop submitting when this many frames are in flight.
const HIGH_WATER: u32 = 8;
/// Resume submitting once the backlog drains to this.
const LOW_WATER: u32 = 4;
/// Audio is muxed up to this far ahead of the last submitted video
/// timestamp.
const AUDIO_LOOKAHEAD_US: u64 = 500_000;
/// Progress callback cadence, in frames.
const PROGRESS_INTERVAL: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Idle,
    Initializing,
    Seeking,
    Capturing,
    Flushing,
    Muxing,
    Done,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ExportProgress {
    pub stage: ExportStage,
    pub current_frame: u64,
    pub total_frames: u64,
    /// Clamped below 100 until the single final event.
    pub percentage: f64,
    pub eta_secs: f64,
}

pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;

/// Cooperative cancellation flag, checked at frame boundaries and
/// inside backpressure waits.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The finished container plus some accounting.
pub struct ExportOutput {
    pub data: Vec<u8>,
    pub frames: u64,
}

pub struct ExportOrchestrator {
    config: ExportConfig,
    progress: Option<ProgressCallback>,
    cancel: CancelToken,
    stage: ExportStage,
    started: Option<Instant>,
}

impl ExportOrchestrator {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            progress: None,
            cancel: CancelToken::new(),
            stage: ExportStage::Idle,
            started: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stage(&self) -> ExportStage {
        self.stage
    }

    /// Run the whole export. The orchestrator exclusively owns every
    /// component for the duration of the call; cancellation yields
    /// `ReelError::Cancelled` and never a partially-finalized file.
    pub async fn export(
        &mut self,
        mut source: Box<dyn SourceReader>,
        mut video_encoder: Box<dyn VideoEncoder>,
        mut audio_encoder: Box<dyn AudioEncoder>,
        mut muxer: Box<dyn ContainerMuxer>,
        audio: Option<AudioTrack>,
    ) -> ReelResult<ExportOutput> {
        self.config.validate()?;
        self.stage = ExportStage::Initializing;
        self.started = Some(Instant::now());

        let result = self
            .run(
                &mut source,
                &mut *video_encoder,
                &mut *audio_encoder,
                &mut *muxer,
                audio,
            )
            .await;

        let _ = source.close().await;
        match &result {
            Ok(_) => self.stage = ExportStage::Done,
            Err(ReelError::Cancelled) => {
                tracing::info!("export cancelled");
                self.stage = ExportStage::Cancelled;
            }
            Err(e) => tracing::error!("export failed: {e}"),
        }
        result
    }

    async fn run(
        &mut self,
        source: &mut Box<dyn SourceReader>,
        video_encoder: &mut dyn VideoEncoder,
        audio_encoder: &mut dyn AudioEncoder,
        muxer: &mut dyn ContainerMuxer,
        audio: Option<AudioTrack>,
    ) -> ReelResult<ExportOutput> {
        let info = source.open().await?;
        let fps = self.config.frame_rate;

        let segments = plan_segments(info.duration_ms, &self.config.trims);
        if segments.is_empty() {
            return Err(ReelError::ConfigurationError(
                "timeline is empty after trims".to_string(),
            ));
        }
        let total_frames: u64 = segments
            .iter()
            .map(|s| (s.duration() * fps as f64).round() as u64)
            .sum();
        tracing::info!(
            segments = segments.len(),
            total_frames,
            "export planned"
        );
        if (self.config.playback_rate - 1.0).abs() > f32::EPSILON {
            tracing::debug!(
                playback_rate = self.config.playback_rate,
                "capture is pull-based and already runs unthrottled"
            );
        }

        // All audio is encoded before the first video frame so the
        // capture loop only ever drains a ready queue.
        let mut audio_units: VecDeque<EncodedUnit> = VecDeque::new();
        if let Some(track) = audio {
            let spliced = splice_trims(track, info.duration_ms, &self.config.trims);
            match audio_encoder.encode_track(&spliced) {
                Ok(units) => audio_units = units.into(),
                Err(e) => {
                    tracing::warn!("audio encode failed, exporting video-only: {e}");
                }
            }
        }

        // Two-step negotiation: probe, then configure. Hardware falls
        // back to software silently; software failing is fatal.
        let mut acceleration = Acceleration::Hardware;
        loop {
            let candidate = VideoEncoderConfig {
                codec: self.config.video_codec,
                width: self.config.width,
                height: self.config.height,
                frame_rate: fps,
                bitrate: self.config.video_bitrate,
                acceleration,
            };
            if video_encoder.supports(&candidate) {
                match video_encoder.configure(&candidate) {
                    Ok(()) => break,
                    Err(e) if acceleration == Acceleration::Hardware => {
                        tracing::warn!("hardware encoder rejected configuration: {e}");
                    }
                    Err(e) => return Err(e),
                }
            } else if acceleration == Acceleration::Software {
                return Err(ReelError::ConfigurationError(
                    "no supported video encoder configuration".to_string(),
                ));
            }
            acceleration = Acceleration::Software;
        }

        let mut compositor = FrameCompositor::new(self.config.clone());
        let frame_ms = 1000.0 / fps as f64;
        let keyframe_interval = 2 * fps as u64;

        let mut frame_index: u64 = 0;
        let mut in_flight: u32 = 0;
        let mut mux_failures: u64 = 0;
        let mut last_submit_ts: u64 = 0;

        for segment in &segments {
            self.check_cancelled()?;
            self.stage = ExportStage::Seeking;
            source.seek(segment.start).await?;
            self.stage = ExportStage::Capturing;

            let segment_frames = (segment.duration() * fps as f64).round() as u64;
            for i in 0..segment_frames {
                self.check_cancelled()?;

                let Some(raw) = source.next_frame().await? else {
                    tracing::warn!(
                        missing = segment_frames - i,
                        "source ended before the segment did"
                    );
                    break;
                };

                let timestamp_us = frame_timestamp_us(frame_index, fps);
                let duration_us = frame_timestamp_us(frame_index + 1, fps) - timestamp_us;
                let key_frame = frame_index % keyframe_interval == 0;
                let source_time_ms = segment.start * 1000.0 + i as f64 * frame_ms;

                match compositor.render(&raw, source_time_ms, true) {
                    Ok(staged) => {
                        match video_encoder.submit(&staged, timestamp_us, duration_us, key_frame) {
                            Ok(()) => {
                                in_flight += 1;
                                last_submit_ts = timestamp_us;
                            }
                            Err(e) => {
                                tracing::warn!(frame = frame_index, "submit failed, skipping: {e}")
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(frame = frame_index, "composite failed, skipping: {e}")
                    }
                }
                frame_index += 1;

                while let Some(unit) = video_encoder.try_next_unit() {
                    in_flight = in_flight.saturating_sub(1);
                    if let Err(e) = muxer.add_video_unit(unit) {
                        mux_failures += 1;
                        tracing::warn!("video unit failed to mux: {e}");
                    }
                }
                drain_audio(
                    &mut audio_units,
                    muxer,
                    last_submit_ts.saturating_add(AUDIO_LOOKAHEAD_US),
                    &mut mux_failures,
                );

                // Hysteresis: once the backlog hits the high-water
                // mark, capture pauses until it drains all the way to
                // the low-water mark (or the encoder channel closes).
                if in_flight >= HIGH_WATER {
                    while in_flight > LOW_WATER {
                        self.check_cancelled()?;
                        let Some(unit) = video_encoder.next_unit().await else {
                            break;
                        };
                        in_flight -= 1;
                        if let Err(e) = muxer.add_video_unit(unit) {
                            mux_failures += 1;
                            tracing::warn!("video unit failed to mux: {e}");
                        }
                    }
                }

                if frame_index % PROGRESS_INTERVAL == 0 {
                    self.emit_progress(frame_index, total_frames, false);
                }
            }
        }

        self.check_cancelled()?;
        self.stage = ExportStage::Flushing;
        video_encoder.flush()?;
        while let Some(unit) = video_encoder.next_unit().await {
            self.check_cancelled()?;
            in_flight = in_flight.saturating_sub(1);
            if let Err(e) = muxer.add_video_unit(unit) {
                mux_failures += 1;
                tracing::warn!("video unit failed to mux: {e}");
            }
        }
        drain_audio(&mut audio_units, muxer, u64::MAX, &mut mux_failures);
        if mux_failures > 0 {
            tracing::warn!(mux_failures, "some units were dropped by the muxer");
        }

        self.check_cancelled()?;
        self.stage = ExportStage::Muxing;
        let data = muxer.finalize()?;

        self.stage = ExportStage::Done;
        self.emit_progress(frame_index, total_frames, true);
        tracing::info!(frames = frame_index, bytes = data.len(), "export finished");

        Ok(ExportOutput {
            data,
            frames: frame_index,
        })
    }

    fn check_cancelled(&mut self) -> ReelResult<()> {
        if self.cancel.is_cancelled() {
            Err(ReelError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit_progress(&self, current_frame: u64, total_frames: u64, done: bool) {
        let Some(callback) = &self.progress else {
            return;
        };
        let percentage = if done {
            100.0
        } else if total_frames == 0 {
            0.0
        } else {
            (current_frame as f64 / total_frames as f64 * 100.0).min(99.9)
        };
        let eta_secs = match (self.started, current_frame) {
            (Some(started), n) if n > 0 && !done => {
                let elapsed = started.elapsed().as_secs_f64();
                elapsed / n as f64 * total_frames.saturating_sub(n) as f64
            }
            _ => 0.0,
        };
        callback(ExportProgress {
            stage: self.stage,
            current_frame,
            total_frames,
            percentage,
            eta_secs,
        });
    }
}

/// Feed queued audio to the muxer up to `limit_ts_us`, keeping audio
/// slightly ahead of video without outrunning the lookahead window.
fn drain_audio(
    audio_units: &mut VecDeque<EncodedUnit>,
    muxer: &mut dyn ContainerMuxer,
    limit_ts_us: u64,
    mux_failures: &mut u64,
) {
    while audio_units
        .front()
        .is_some_and(|unit| unit.timestamp_us <= limit_ts_us)
    {
        let Some(unit) = audio_units.pop_front() else {
            break;
        };
        if let Err(e) = muxer.add_audio_unit(unit) {
            *mux_failures += 1;
            tracing::warn!("audio unit failed to mux: {e}");
        }
    }
}

/// Output timestamp grid: `round(index * 1_000_000 / fps)`, strictly
/// monotonic (at 30 fps: 0, 33333, 66667, 100000, ...).
pub(crate) fn frame_timestamp_us(index: u64, fps: u32) -> u64 {
    (index * 1_000_000 + fps as u64 / 2) / fps as u64
}

/// Wire up the production components and export a recording from disk.
pub async fn export_recording(
    path: &Path,
    config: ExportConfig,
    progress: Option<ProgressCallback>,
    cancel: CancelToken,
) -> ReelResult<ExportOutput> {
    ensure_ffmpeg()?;

    let source = FfmpegSourceReader::new(path, config.frame_rate);
    let audio = AudioExtractor::decode(path)?;
    let video_encoder = SidecarVideoEncoder::new();
    let audio_encoder = SidecarAacEncoder::new(config.audio_codec, config.audio_bitrate);
    let muxer = Mp4Muxer::new(config.frame_rate, config.video_codec);

    let mut orchestrator = ExportOrchestrator::new(config).with_cancel(cancel);
    if let Some(callback) = progress {
        orchestrator = orchestrator.with_progress(callback);
    }
    orchestrator
        .export(
            Box::new(source),
            Box::new(video_encoder),
            Box::new(audio_encoder),
            Box::new(muxer),
            audio,
        )
        .await
}
