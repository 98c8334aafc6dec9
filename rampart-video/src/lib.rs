//! Per-camera video pipeline: frame ingest, crop/scale, correlation
//! tracking, optional object detection and per-frame `FrameData`
//! production.
//!
//! One pipeline instance runs per camera on its own worker thread. It
//! never blocks the state model: each iteration reads a cached state
//! snapshot and reports tracking results back through an event channel
//! that the UI thread drains into `update_tracking_result`.

mod detector;
mod osd;
mod pipeline;
mod source;
mod tracker;

pub use detector::{Detector, NullDetector, YoloV8Detector};
pub use osd::compose_alarm_lines;
pub use pipeline::{CameraPipeline, PipelineConfig, PipelineEvent, PipelineHandle};
pub use source::{Frame, FrameSource, ImageDirSource, SyntheticSource};
pub use tracker::{CorrelationTracker, TrackerVerdict};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("image decode error: {source}")]
    Image {
        #[from]
        source: image::ImageError,
    },
    #[error("inference error: {0}")]
    Inference(String),
    #[error("frame source exhausted")]
    SourceExhausted,
    #[error("event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
