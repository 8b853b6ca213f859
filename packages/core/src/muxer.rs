//! Container muxing: buffered compressed units in, one self-contained
//! MP4 byte blob out.
//!
//! Units may arrive in any interleaving consistent with the
//! orchestrator's lookahead rule; nothing is written until
//! `finalize()`. The production muxer stages the elementary streams as
//! temp files and stream-copies them into MP4, no re-encode.

use std::path::PathBuf;
use std::process::Stdio;

use ffmpeg_sidecar::command::FfmpegCommand;

use crate::config::VideoCodec;
use crate::encoder::EncodedUnit;
use crate::error::{ReelError, ReelResult};

/// Sink for compressed units. `finalize` may be called once.
pub trait ContainerMuxer: Send {
    fn add_video_unit(&mut self, unit: EncodedUnit) -> ReelResult<()>;
    fn add_audio_unit(&mut self, unit: EncodedUnit) -> ReelResult<()>;
    /// Close the container and return its bytes. Errors if no video
    /// decoder configuration was ever supplied.
    fn finalize(&mut self) -> ReelResult<Vec<u8>>;
}

pub struct Mp4Muxer {
    frame_rate: u32,
    codec: VideoCodec,
    video: Vec<EncodedUnit>,
    audio: Vec<EncodedUnit>,
    video_config: Option<Vec<u8>>,
    finalized: bool,
    temp_paths: Vec<PathBuf>,
}

impl Mp4Muxer {
    pub fn new(frame_rate: u32, codec: VideoCodec) -> Self {
        Self {
            frame_rate,
            codec,
            video: Vec::new(),
            audio: Vec::new(),
            video_config: None,
            finalized: false,
            temp_paths: Vec::new(),
        }
    }

    fn cleanup_temps(&mut self) {
        for path in self.temp_paths.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }

    fn stage_stream(&mut self, extension: &str, units: &[EncodedUnit]) -> ReelResult<PathBuf> {
        let path = std::env::temp_dir().join(format!(
            "reel-mux-{}.{}",
            uuid::Uuid::new_v4(),
            extension
        ));
        let mut bytes = Vec::new();
        for unit in units {
            bytes.extend_from_slice(&unit.data);
        }
        std::fs::write(&path, bytes)?;
        self.temp_paths.push(path.clone());
        Ok(path)
    }
}

impl ContainerMuxer for Mp4Muxer {
    fn add_video_unit(&mut self, unit: EncodedUnit) -> ReelResult<()> {
        if self.finalized {
            return Err(ReelError::MuxingError(
                "container already finalized".to_string(),
            ));
        }
        if self.video_config.is_none() {
            if let Some(config) = &unit.config {
                self.video_config = Some(config.clone());
            }
        }
        self.video.push(unit);
        Ok(())
    }

    fn add_audio_unit(&mut self, unit: EncodedUnit) -> ReelResult<()> {
        if self.finalized {
            return Err(ReelError::MuxingError(
                "container already finalized".to_string(),
            ));
        }
        self.audio.push(unit);
        Ok(())
    }

    fn finalize(&mut self) -> ReelResult<Vec<u8>> {
        if self.finalized {
            return Err(ReelError::MuxingError(
                "container already finalized".to_string(),
            ));
        }
        if self.video_config.is_none() {
            return Err(ReelError::MuxingError(
                "no video decoder configuration was supplied".to_string(),
            ));
        }
        self.finalized = true;

        // Tracks may interleave on input; each stream is written in
        // timestamp order.
        self.video.sort_by_key(|u| u.timestamp_us);
        self.audio.sort_by_key(|u| u.timestamp_us);

        let elementary_ext = match self.codec {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "hevc",
        };
        let video_units = std::mem::take(&mut self.video);
        let audio_units = std::mem::take(&mut self.audio);
        let video_path = self.stage_stream(elementary_ext, &video_units)?;
        let audio_path = if audio_units.is_empty() {
            None
        } else {
            Some(self.stage_stream("aac", &audio_units)?)
        };

        let out_path = std::env::temp_dir().join(format!("reel-mux-{}.mp4", uuid::Uuid::new_v4()));
        self.temp_paths.push(out_path.clone());

        let mut cmd = FfmpegCommand::new();
        cmd.hide_banner()
            .args(["-loglevel", "error"])
            .args(["-r", &self.frame_rate.to_string()])
            .input(&video_path.to_string_lossy());
        if let Some(audio_path) = &audio_path {
            cmd.input(&audio_path.to_string_lossy());
        }
        cmd.args(["-c", "copy"])
            .args(["-movflags", "+faststart"])
            .args(["-y"])
            .output(&out_path.to_string_lossy());

        let status = cmd
            .as_inner_mut()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| ReelError::MuxingError(format!("Failed to run FFmpeg: {}", e)))?;
        if !status.success() {
            self.cleanup_temps();
            return Err(ReelError::MuxingError(format!(
                "FFmpeg mux exited with {}",
                status
            )));
        }

        let bytes = std::fs::read(&out_path)?;
        self.cleanup_temps();

        tracing::info!(
            video_units = video_units.len(),
            audio_units = audio_units.len(),
            bytes = bytes.len(),
            "container finalized"
        );
        Ok(bytes)
    }
}

impl Drop for Mp4Muxer {
    fn drop(&mut self) {
        self.cleanup_temps();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(timestamp_us: u64, config: Option<Vec<u8>>) -> EncodedUnit {
        EncodedUnit {
            data: vec![0, 0, 0, 1, 0x65],
            timestamp_us,
            duration_us: 33_333,
            key_frame: true,
            config,
        }
    }

    #[test]
    fn test_finalize_without_decoder_config_errors() {
        let mut muxer = Mp4Muxer::new(30, VideoCodec::H264);
        muxer.add_video_unit(unit(0, None)).unwrap();
        let err = muxer.finalize();
        assert!(matches!(err, Err(ReelError::MuxingError(_))));
    }

    #[test]
    fn test_decoder_config_captured_from_first_unit_exposing_it() {
        let mut muxer = Mp4Muxer::new(30, VideoCodec::H264);
        muxer.add_video_unit(unit(0, None)).unwrap();
        muxer
            .add_video_unit(unit(33_333, Some(vec![1, 2, 3])))
            .unwrap();
        muxer
            .add_video_unit(unit(66_667, Some(vec![9, 9, 9])))
            .unwrap();
        assert_eq!(muxer.video_config.as_deref(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_add_after_finalize_errors() {
        let mut muxer = Mp4Muxer::new(30, VideoCodec::H264);
        // finalize fails (no config) but still transitions? It must not:
        // a failed finalize with no config leaves the muxer usable.
        assert!(muxer.finalize().is_err());
        assert!(muxer.add_video_unit(unit(0, Some(vec![1]))).is_ok());

        // a second finalize after the terminal one is rejected
        muxer.finalized = true;
        assert!(muxer.finalize().is_err());
        assert!(muxer.add_video_unit(unit(0, None)).is_err());
        assert!(muxer.add_audio_unit(unit(0, None)).is_err());
    }
}
