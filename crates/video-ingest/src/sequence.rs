//! Image-sequence capture that replays a directory of stills as a looping feed.

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use chrono::Utc;
use crossbeam_channel::{Sender, bounded};
use image::imageops::FilterType;
use tracing::{debug, info, warn};

use crate::{
    recovery::{EmptyRead, ReadTracker},
    types::{CaptureError, Frame, FrameFormat, FrameReceiver},
};

const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Spawns a background thread that replays every image in `dir` in lexical order.
///
/// Frames are resized to `target_size` and paced at `fps`. Once the last file has been
/// sent the reader starts again from the first one, so a finite recording behaves like
/// a live feed.
pub fn spawn_image_sequence_reader(
    dir: &Path,
    target_size: (i32, i32),
    fps: f32,
) -> Result<FrameReceiver> {
    let files = list_frames(dir)?;
    if files.is_empty() {
        return Err(CaptureError::Open {
            uri: dir.display().to_string(),
        }
        .into());
    }
    if target_size.0 <= 0 || target_size.1 <= 0 {
        bail!("capture size must be positive, got {}x{}", target_size.0, target_size.1);
    }

    let (tx, rx) = bounded(2);
    let interval = if fps > 0.0 {
        Duration::from_secs_f32(1.0 / fps)
    } else {
        Duration::ZERO
    };
    debug!(
        "Replaying {} still(s) from {} at {:.1} fps",
        files.len(),
        dir.display(),
        fps
    );

    thread::Builder::new()
        .name("sequence-reader".into())
        .spawn({
            let source = dir.display().to_string();
            move || sequence_loop(source, files, target_size, interval, tx)
        })?;

    Ok(rx)
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let entries = fs::read_dir(dir).map_err(|_| CaptureError::Open {
        uri: dir.display().to_string(),
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn sequence_loop(
    source: String,
    files: Vec<PathBuf>,
    target_size: (i32, i32),
    interval: Duration,
    tx: Sender<Result<Frame, CaptureError>>,
) {
    let (target_w, target_h) = (target_size.0 as u32, target_size.1 as u32);
    let mut tracker = ReadTracker::new(true);
    loop {
        let mut decoded_any = false;
        for path in &files {
            let started = Instant::now();
            let message = load_frame(path, target_w, target_h);
            if message.is_ok() {
                decoded_any = true;
                tracker.frame();
            }
            if tx.send(message).is_err() {
                return;
            }
            if let Some(remaining) = interval.checked_sub(started.elapsed()) {
                thread::sleep(remaining);
            }
        }
        if !decoded_any && tracker.empty() == EmptyRead::GiveUp {
            warn!("No decodable stills left in the sequence, stopping");
            let _ = tx.send(Err(CaptureError::Open { uri: source }));
            return;
        }
        info!("Video ended, restarting");
    }
}

fn load_frame(path: &Path, width: u32, height: u32) -> Result<Frame, CaptureError> {
    let decoded = image::open(path).map_err(|source| CaptureError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let rgb = if decoded.width() != width || decoded.height() != height {
        decoded.resize_exact(width, height, FilterType::Triangle).to_rgb8()
    } else {
        decoded.to_rgb8()
    };

    let mut data = rgb.into_raw();
    for pixel in data.chunks_exact_mut(3) {
        pixel.swap(0, 2);
    }

    Ok(Frame {
        data,
        width: width as i32,
        height: height as i32,
        timestamp_ms: Utc::now().timestamp_millis(),
        format: FrameFormat::Bgr8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_still(dir: &Path, name: &str, color: [u8; 3]) {
        let img = RgbImage::from_pixel(8, 4, Rgb(color));
        img.save(dir.join(name)).expect("write still");
    }

    #[test]
    fn empty_directory_is_an_open_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = spawn_image_sequence_reader(dir.path(), (8, 4), 0.0).unwrap_err();
        assert!(err.downcast_ref::<CaptureError>().is_some());
    }

    #[test]
    fn replays_from_the_start_after_the_last_still() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_still(dir.path(), "000.png", [255, 0, 0]);
        write_still(dir.path(), "001.png", [0, 0, 255]);
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write note");

        let rx = spawn_image_sequence_reader(dir.path(), (8, 4), 0.0).expect("reader");
        let blues: Vec<u8> = (0..4)
            .map(|_| rx.recv().expect("frame").expect("decoded").data[0])
            .collect();

        // BGR order: red still has blue=0, blue still has blue=255.
        assert_eq!(blues, vec![0, 255, 0, 255]);
    }

    #[test]
    fn undecodable_sequence_stops_with_an_open_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("broken.png"), b"not a png").expect("write broken still");

        let rx = spawn_image_sequence_reader(dir.path(), (8, 4), 0.0).expect("reader");
        let messages: Vec<_> = rx.iter().collect();

        assert!(messages.len() > 1);
        let (last, earlier) = messages.split_last().expect("messages");
        assert!(earlier
            .iter()
            .all(|m| matches!(m, Err(CaptureError::Decode { .. }))));
        assert!(matches!(last, Err(CaptureError::Open { .. })));
    }

    #[test]
    fn resizes_to_capture_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_still(dir.path(), "a.png", [10, 20, 30]);

        let rx = spawn_image_sequence_reader(dir.path(), (4, 2), 0.0).expect("reader");
        let frame = rx.recv().expect("frame").expect("decoded");
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.data.len(), frame.expected_len());
        assert_eq!(&frame.data[..3], &[30, 20, 10]);
    }
}
