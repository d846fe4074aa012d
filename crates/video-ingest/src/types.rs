use std::path::PathBuf;

use anyhow::Error;
use thiserror::Error;

/// Raw BGR frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Number of bytes a well-formed buffer of this size must hold.
    pub fn expected_len(&self) -> usize {
        match self.format {
            FrameFormat::Bgr8 => (self.width.max(0) as usize) * (self.height.max(0) as usize) * 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("failed to decode {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Other(#[from] Error),
}

/// Receiving end handed to the detection loop.
pub type FrameReceiver = crossbeam_channel::Receiver<Result<Frame, CaptureError>>;
