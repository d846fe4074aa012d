//! OpenCV-backed capture for devices, video files and network streams.

use std::thread;

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{Sender, bounded};
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{info, warn};

use crate::{
    recovery::{EmptyRead, ReadTracker},
    types::{CaptureError, Frame, FrameFormat, FrameReceiver},
};

/// Spawns a background thread that continually captures frames from `uri`.
///
/// Frames are resized to `target_size` (width, height) before being forwarded over the
/// returned receiver. The buffer is small so the capture loop backpressures when the
/// detection loop falls behind. File sources rewind to the first frame when exhausted.
pub fn spawn_camera_reader(uri: &str, target_size: (i32, i32)) -> Result<FrameReceiver> {
    let cap = open_video_capture(uri)?;
    let (tx, rx) = bounded(2);
    let uri = uri.to_string();

    thread::Builder::new()
        .name("camera-reader".into())
        .spawn(move || {
            if let Err(err) = capture_loop(cap, &uri, target_size, tx.clone()) {
                let _ = tx.send(Err(err));
            }
        })?;

    Ok(rx)
}

fn capture_loop(
    mut cap: VideoCapture,
    uri: &str,
    target_size: (i32, i32),
    tx: Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let is_device = parse_device_index(uri).is_some();
    configure_camera(&mut cap, target_size, 30.0);

    let mut frame = Mat::default();
    let mut scratch = Mat::default();
    let (target_w, target_h) = target_size;
    let mut tracker = ReadTracker::new(!is_device);

    loop {
        let got_frame = cap
            .read(&mut frame)
            .map_err(|e| CaptureError::Other(e.into()))?;
        let width = frame.size().map_err(|e| CaptureError::Other(e.into()))?.width;

        if !got_frame || width <= 0 {
            match tracker.empty() {
                EmptyRead::Retry(backoff) => {
                    if tracker.empty_reads() % 50 == 0 {
                        warn!("{uri}: {} consecutive empty reads", tracker.empty_reads());
                    }
                    thread::sleep(backoff);
                }
                EmptyRead::Rewind => {
                    info!("Video ended, restarting");
                    let rewound = cap
                        .set(videoio::CAP_PROP_POS_FRAMES, 0.0)
                        .map_err(|e| CaptureError::Other(e.into()))?;
                    if !rewound {
                        return Err(CaptureError::Open {
                            uri: uri.to_string(),
                        });
                    }
                }
                EmptyRead::GiveUp => {
                    warn!("{uri}: no frames, giving up");
                    return Err(CaptureError::Open {
                        uri: uri.to_string(),
                    });
                }
            }
            continue;
        }
        tracker.frame();

        let size = frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &frame,
                &mut scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &scratch
        } else {
            &frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        let sent = tx.send(Ok(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }));
        if sent.is_err() {
            break;
        }
    }

    Ok(())
}

/// Parse a bare index or `/dev/videoX` URI into a zero-based device index.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    uri.strip_prefix("/dev/video")
        .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .and_then(|rest| rest.parse::<i32>().ok())
}

fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    match VideoCapture::from_file(uri, videoio::CAP_ANY) {
        Ok(cap) => {
            if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                return Ok(cap);
            }
        }
        Err(err) => {
            warn!("failed to open {uri}: {err}");
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
