//! Export configuration and edit-timeline types.
//!
//! An `ExportConfig` carries everything the editor decided about a
//! recording: output geometry, codec targets, and the edit timeline
//! (trims, zooms, crop, annotations, backdrop styling). It is immutable
//! for the lifetime of one export.

use serde::{Deserialize, Serialize};

use crate::error::{ReelError, ReelResult};

/// RGBA color (0.0-1.0 range)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba_u8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: a as f32 / 255.0,
        }
    }

    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);
}

/// Padding values (in pixels)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Padding {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Padding {
    pub const fn all(value: f32) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }

    pub const fn zero() -> Self {
        Self::all(0.0)
    }
}

/// Backdrop styling applied around the recording content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Background {
    pub style: BackgroundStyle,
    pub padding: Padding,
    pub corner_radius: f32,
}

impl Default for Background {
    fn default() -> Self {
        Self {
            style: BackgroundStyle::Transparent,
            padding: Padding::default(),
            corner_radius: 0.0,
        }
    }
}

/// Background fill style
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackgroundStyle {
    /// No background (transparent)
    Transparent,
    /// Solid color (RGBA)
    Solid(Color),
    /// Linear gradient
    Gradient {
        start: Color,
        end: Color,
        angle: f32, // degrees, 0 = left-to-right
    },
}

/// Drop shadow rendered under the content rectangle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowConfig {
    pub enabled: bool,
    pub offset_x: f32,
    pub offset_y: f32,
    pub blur_radius: f32,
    pub color: Color,
    pub opacity: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            offset_x: 0.0,
            offset_y: 8.0,
            blur_radius: 24.0,
            color: Color::BLACK,
            opacity: 0.35,
        }
    }
}

/// A span of the source timeline to remove from the output.
///
/// Regions may arrive unordered or overlapping; a region with
/// `end_ms <= start_ms` contributes nothing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrimRegion {
    pub start_ms: f64,
    pub end_ms: f64,
}

/// A timed zoom: the focus point (normalized within the content
/// rectangle) is placed at the stage center at the given scale.
/// Position and scale blend linearly over `transition_ms` at both
/// edges of the region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZoomRegion {
    pub start_ms: f64,
    pub end_ms: f64,
    pub focus_x: f32,
    pub focus_y: f32,
    pub scale: f32,
    pub transition_ms: f64,
}

impl Default for ZoomRegion {
    fn default() -> Self {
        Self {
            start_ms: 0.0,
            end_ms: 0.0,
            focus_x: 0.5,
            focus_y: 0.5,
            scale: 1.0,
            transition_ms: 300.0,
        }
    }
}

/// Normalized rectangle in source space, applied before placement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Normalized rectangle in stage space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A pre-rasterized RGBA image (tightly packed, `width * height * 4` bytes).
///
/// Label text is rasterized by the editor UI; the export core only
/// composites pixel buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bitmap {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A timed overlay drawn on the stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub start_ms: f64,
    pub end_ms: f64,
    pub rect: StageRect,
    pub kind: AnnotationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnnotationKind {
    /// Pre-rasterized text label
    Label { bitmap: Bitmap },
    /// Arrow from the rect origin to its opposite corner
    Arrow { color: Color, thickness: f32 },
    /// Arbitrary RGBA image
    Image { bitmap: Bitmap },
}

/// Target video codec family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    H265,
}

/// Target audio codec family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    Aac,
}

/// Complete export configuration: output targets plus the edit timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Output stage width in pixels
    pub width: u32,
    /// Output stage height in pixels
    pub height: u32,
    /// Output frame rate
    pub frame_rate: u32,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Video bitrate in bits/sec
    pub video_bitrate: u32,
    /// Audio bitrate in bits/sec
    pub audio_bitrate: u32,
    /// Source playback speed during capture (1.0 = real time)
    pub playback_rate: f32,
    pub trims: Vec<TrimRegion>,
    pub zooms: Vec<ZoomRegion>,
    pub crop: Option<CropRegion>,
    pub annotations: Vec<Annotation>,
    pub background: Background,
    pub shadow: ShadowConfig,
    pub motion_blur: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 30,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            video_bitrate: 8_000_000,
            audio_bitrate: 192_000,
            playback_rate: 1.0,
            trims: Vec::new(),
            zooms: Vec::new(),
            crop: None,
            annotations: Vec::new(),
            background: Background::default(),
            shadow: ShadowConfig::default(),
            motion_blur: false,
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> ReelResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ReelError::ConfigurationError(
                "output dimensions must be non-zero".to_string(),
            ));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ReelError::ConfigurationError(format!(
                "output dimensions must be even, got {}x{}",
                self.width, self.height
            )));
        }
        if self.frame_rate == 0 {
            return Err(ReelError::ConfigurationError(
                "frame rate must be non-zero".to_string(),
            ));
        }
        if self.playback_rate <= 0.0 {
            return Err(ReelError::ConfigurationError(format!(
                "playback rate must be positive, got {}",
                self.playback_rate
            )));
        }
        if let Some(crop) = &self.crop {
            if crop.width <= 0.0 || crop.height <= 0.0 {
                return Err(ReelError::ConfigurationError(
                    "crop region must have positive size".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.playback_rate, 1.0);
    }

    #[test]
    fn test_validate_rejects_odd_dimensions() {
        let config = ExportConfig {
            width: 1921,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_frame_rate() {
        let config = ExportConfig {
            frame_rate: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_degenerate_crop() {
        let config = ExportConfig {
            crop: Some(CropRegion {
                x: 0.1,
                y: 0.1,
                width: 0.0,
                height: 0.5,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = ExportConfig {
            trims: vec![TrimRegion {
                start_ms: 2000.0,
                end_ms: 4000.0,
            }],
            zooms: vec![ZoomRegion {
                start_ms: 1000.0,
                end_ms: 3000.0,
                focus_x: 0.25,
                focus_y: 0.75,
                scale: 2.0,
                transition_ms: 300.0,
            }],
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: ExportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trims.len(), 1);
        assert_eq!(back.zooms[0].scale, 2.0);
    }

    #[test]
    fn test_color_constructors() {
        let white = Color::WHITE;
        assert_eq!(white.r, 1.0);
        assert_eq!(white.a, 1.0);

        let semi = Color::rgba_u8(255, 128, 0, 128);
        assert!((semi.r - 1.0).abs() < 0.01);
        assert!((semi.a - 0.5).abs() < 0.01);
    }
}
