//! Core export pipeline: read a screen recording, composite each frame
//! with the configured edits, encode, and mux into an MP4.
//!
//! The high-level entry point is [`export_recording`]; every stage is
//! also available behind a trait for callers that bring their own
//! source, encoder or container.

pub mod audio;
pub mod compositor;
pub mod config;
pub mod encoder;
pub mod error;
pub mod muxer;
pub mod orchestrator;
pub mod segment;
pub mod source;

pub use audio::{sample_blocks, splice_trims, AudioExtractor, AudioTrack};
pub use compositor::FrameCompositor;
pub use config::{
    Annotation, AnnotationKind, AudioCodec, Background, BackgroundStyle, Bitmap, Color,
    CropRegion, ExportConfig, Padding, ShadowConfig, StageRect, TrimRegion, VideoCodec,
    ZoomRegion,
};
pub use encoder::{
    ensure_ffmpeg, Acceleration, AudioEncoder, EncodedUnit, SidecarAacEncoder,
    SidecarVideoEncoder, VideoEncoder, VideoEncoderConfig,
};
pub use error::{ReelError, ReelResult};
pub use muxer::{ContainerMuxer, Mp4Muxer};
pub use orchestrator::{
    export_recording, CancelToken, ExportOrchestrator, ExportOutput, ExportProgress,
    ExportStage, ProgressCallback,
};
pub use segment::{plan_segments, Segment};
pub use source::{FfmpegSourceReader, RawFrame, SourceInfo, SourceReader};
