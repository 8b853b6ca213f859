//! Audio extraction: decode once, splice out the trimmed spans, hand
//! fixed-size blocks to the audio encoder.
//!
//! Audio is best-effort: a recording whose audio stream cannot be
//! decoded still exports, video-only.

use std::path::Path;
use std::process::{Command, Stdio};

use ffmpeg_sidecar::paths::ffmpeg_path;

use crate::config::TrimRegion;
use crate::error::ReelResult;
use crate::segment::retained_sample_ranges;
use crate::source::probe_audio_params;

/// Interleaved f32 PCM for the whole recording.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioTrack {
    /// Number of sample frames (one frame = one sample per channel).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_ms(&self) -> f64 {
        self.frame_count() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Remove the trimmed spans from a decoded track, sample-accurately.
///
/// The retained ranges come from the same interval walk the segment
/// planner uses, so audio and video always agree on the cut points.
/// With no effective trims the track is returned as-is, without
/// copying.
pub fn splice_trims(track: AudioTrack, duration_ms: f64, trims: &[TrimRegion]) -> AudioTrack {
    let total_frames = track.frame_count();
    let channels = track.channels.max(1) as usize;

    let ranges: Vec<(usize, usize)> = retained_sample_ranges(duration_ms, trims, track.sample_rate)
        .into_iter()
        .map(|(start, end)| (start.min(total_frames), end.min(total_frames)))
        .filter(|(start, end)| end > start)
        .collect();

    if ranges == [(0, total_frames)] {
        return track;
    }

    let retained_frames: usize = ranges.iter().map(|(s, e)| e - s).sum();
    let mut samples = Vec::with_capacity(retained_frames * channels);
    for (start, end) in ranges {
        samples.extend_from_slice(&track.samples[start * channels..end * channels]);
    }

    tracing::debug!(
        total_frames,
        retained_frames,
        "spliced audio track across trims"
    );

    AudioTrack {
        samples,
        sample_rate: track.sample_rate,
        channels: track.channels,
    }
}

/// Slice a track into fixed-size blocks of `block_frames` sample
/// frames, each tagged with its output timestamp in microseconds. The
/// final block may be short.
pub fn sample_blocks(
    track: &AudioTrack,
    block_frames: usize,
) -> impl Iterator<Item = (u64, &[f32])> {
    let channels = track.channels.max(1) as usize;
    let rate = track.sample_rate.max(1) as u64;
    track
        .samples
        .chunks(block_frames * channels)
        .enumerate()
        .map(move |(i, chunk)| {
            let frame_offset = (i * block_frames) as u64;
            (frame_offset * 1_000_000 / rate, chunk)
        })
}

/// Decodes the audio stream of a recording into an [`AudioTrack`].
pub struct AudioExtractor;

impl AudioExtractor {
    /// Decode the whole audio track, or `None` when the recording has
    /// no usable audio. Decode failures are logged, never fatal.
    pub fn decode(path: &Path) -> ReelResult<Option<AudioTrack>> {
        let (sample_rate, channels) = match probe_audio_params(path) {
            Ok(Some(params)) => params,
            Ok(None) => {
                tracing::info!("source has no audio stream");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!("audio probe failed, exporting video-only: {e}");
                return Ok(None);
            }
        };

        let output = Command::new(ffmpeg_path())
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-i", &path.to_string_lossy()])
            .args(["-vn", "-f", "f32le", "-acodec", "pcm_f32le"])
            .arg("pipe:1")
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() || output.stdout.is_empty() {
            tracing::warn!(
                "audio decode failed, exporting video-only: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }

        let mut samples: Vec<f32> = output
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        // keep whole sample frames only
        let channels_usize = channels.max(1) as usize;
        samples.truncate(samples.len() - samples.len() % channels_usize);

        tracing::info!(
            sample_rate,
            channels,
            frames = samples.len() / channels_usize,
            "decoded audio track"
        );

        Ok(Some(AudioTrack {
            samples,
            sample_rate,
            channels,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(frames: usize, sample_rate: u32, channels: u16) -> AudioTrack {
        let samples = (0..frames * channels as usize)
            .map(|i| i as f32)
            .collect();
        AudioTrack {
            samples,
            sample_rate,
            channels,
        }
    }

    #[test]
    fn test_splice_removes_exactly_the_trimmed_frames() {
        // 1s at 1000 Hz stereo, trim 200ms..500ms => 300 frames removed
        let input = track(1000, 1000, 2);
        let out = splice_trims(
            input,
            1000.0,
            &[TrimRegion {
                start_ms: 200.0,
                end_ms: 500.0,
            }],
        );
        assert_eq!(out.frame_count(), 700);
        assert_eq!(out.channels, 2);
        // first retained frame after the cut is frame 500
        assert_eq!(out.samples[200 * 2], (500 * 2) as f32);
    }

    #[test]
    fn test_splice_without_trims_does_not_copy() {
        let input = track(100, 1000, 2);
        let ptr = input.samples.as_ptr();
        let out = splice_trims(input, 100.0, &[]);
        assert_eq!(out.samples.as_ptr(), ptr);
        assert_eq!(out.frame_count(), 100);
    }

    #[test]
    fn test_splice_clamps_to_track_length() {
        // duration metadata says 2s but the track only holds 1s
        let input = track(1000, 1000, 1);
        let out = splice_trims(
            input,
            2000.0,
            &[TrimRegion {
                start_ms: 1500.0,
                end_ms: 1800.0,
            }],
        );
        assert_eq!(out.frame_count(), 1000);
    }

    #[test]
    fn test_sample_blocks_timestamps() {
        let input = track(2500, 1000, 2);
        let blocks: Vec<(u64, usize)> = sample_blocks(&input, 1024)
            .map(|(ts, chunk)| (ts, chunk.len()))
            .collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], (0, 1024 * 2));
        assert_eq!(blocks[1], (1_024_000, 1024 * 2));
        // final short block
        assert_eq!(blocks[2], (2_048_000, (2500 - 2048) * 2));
    }

    #[test]
    fn test_duration_ms() {
        let input = track(48_000, 48_000, 2);
        assert!((input.duration_ms() - 1000.0).abs() < 1e-9);
    }
}
