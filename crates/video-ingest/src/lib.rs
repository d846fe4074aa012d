//! Frame sources feeding the detection loop.
//!
//! Every source runs on its own thread and hands BGR8 frames over a small bounded
//! channel. Finite sources loop back to their first frame instead of ending.

#[cfg(feature = "with-opencv")]
mod camera;
mod recovery;
mod sequence;
mod types;

use std::path::Path;

use anyhow::Result;

#[cfg(feature = "with-opencv")]
pub use camera::spawn_camera_reader;
pub use sequence::spawn_image_sequence_reader;
pub use types::{CaptureError, Frame, FrameFormat, FrameReceiver};

/// Open whichever reader suits `uri`: a directory of stills, or an OpenCV capture
/// (device index, video file, network stream).
pub fn open_source(uri: &str, target_size: (i32, i32), fps: f32) -> Result<FrameReceiver> {
    let path = Path::new(uri);
    if path.is_dir() {
        return spawn_image_sequence_reader(path, target_size, fps);
    }
    open_capture(uri, target_size)
}

#[cfg(feature = "with-opencv")]
fn open_capture(uri: &str, target_size: (i32, i32)) -> Result<FrameReceiver> {
    spawn_camera_reader(uri, target_size)
}

#[cfg(not(feature = "with-opencv"))]
fn open_capture(uri: &str, _target_size: (i32, i32)) -> Result<FrameReceiver> {
    Err(anyhow::Error::new(CaptureError::Open {
        uri: uri.to_string(),
    })
    .context("built without the `with-opencv` feature; only image-sequence directories are available"))
}
