//! Latest-frame broadcast for MJPEG subscribers.
//!
//! The detection loop replaces the current frame; each subscriber re-encodes whatever
//! frame is current when it wakes up. Nothing is queued, so a slow client skips frames
//! and the producer never waits on anyone.

use std::sync::Arc;

use actix_web::web::Bytes;
use anyhow::{Result, anyhow};
use async_stream::stream;
use futures_util::Stream;
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use tokio::sync::watch;
use tracing::warn;

pub const MULTIPART_BOUNDARY: &str = "frame";

/// An annotated, display-scaled frame.
pub struct PublishedFrame {
    pub image: RgbImage,
    pub frame_number: u64,
}

#[derive(Clone)]
pub struct FramePublisher {
    latest: Arc<watch::Sender<Option<Arc<PublishedFrame>>>>,
    jpeg_quality: u8,
}

impl FramePublisher {
    pub fn new(jpeg_quality: u8) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            latest: Arc::new(tx),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Replace the current frame. Never blocks, with or without subscribers.
    pub fn publish(&self, image: RgbImage, frame_number: u64) {
        self.latest.send_replace(Some(Arc::new(PublishedFrame {
            image,
            frame_number,
        })));
    }

    pub fn latest(&self) -> Option<Arc<PublishedFrame>> {
        self.latest.borrow().clone()
    }

    /// JPEG of the current frame, `None` before the first publish.
    pub fn latest_jpeg(&self) -> Option<Result<Vec<u8>>> {
        self.latest()
            .map(|frame| encode_jpeg(&frame.image, self.jpeg_quality))
    }

    /// Endless multipart stream of the latest frame.
    ///
    /// Waits without polling until a frame exists, then yields one part per frame
    /// change it observes. Parts that fail to encode are skipped. The stream only ends
    /// when every publisher handle has been dropped.
    pub fn subscribe(&self) -> impl Stream<Item = Bytes> + Send + 'static {
        let mut rx = self.latest.subscribe();
        let quality = self.jpeg_quality;
        stream! {
            loop {
                let current = rx.borrow_and_update().clone();
                if let Some(frame) = current {
                    match encode_jpeg(&frame.image, quality) {
                        Ok(jpeg) => yield multipart_part(&jpeg, frame.frame_number),
                        Err(err) => warn!("skipping frame #{}: {err}", frame.frame_number),
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn multipart_part(jpeg: &[u8], frame_number: u64) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 96);
    payload.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    payload.extend_from_slice(format!("X-Sequence: {frame_number}\r\n\r\n").as_bytes());
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use image::Rgb;
    use std::time::Duration;

    fn frame(shade: u8) -> RgbImage {
        RgbImage::from_pixel(16, 8, Rgb([shade, shade, shade]))
    }

    fn jpeg_body(part: &[u8]) -> &[u8] {
        let header_end = part
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("header terminator");
        &part[header_end + 4..part.len() - 2]
    }

    #[actix_web::test]
    async fn stalls_until_the_first_frame() {
        let publisher = FramePublisher::new(80);
        let mut stream = Box::pin(publisher.subscribe());

        let waited = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(waited.is_err(), "no part before the first publish");

        publisher.publish(frame(10), 1);
        let part = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("part after publish")
            .expect("stream open");
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
        assert!(part.ends_with(b"\r\n"));
        let jpeg = jpeg_body(&part);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(image::load_from_memory(jpeg).is_ok());
    }

    #[actix_web::test]
    async fn slow_subscribers_see_only_the_latest_frame() {
        let publisher = FramePublisher::new(80);
        let mut stream = Box::pin(publisher.subscribe());
        for n in 1..=10 {
            publisher.publish(frame(n as u8), n);
        }
        let part = stream.next().await.expect("part");
        let text = String::from_utf8_lossy(&part[..64]).to_string();
        assert!(text.contains("X-Sequence: 10\r\n"), "{text}");
    }

    #[actix_web::test]
    async fn ends_when_the_publisher_is_dropped() {
        let publisher = FramePublisher::new(80);
        publisher.publish(frame(1), 1);
        let mut stream = Box::pin(publisher.subscribe());
        assert!(stream.next().await.is_some());
        drop(publisher);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn publishing_without_subscribers_keeps_the_latest() {
        let publisher = FramePublisher::new(80);
        assert!(publisher.latest_jpeg().is_none());
        publisher.publish(frame(200), 3);
        publisher.publish(frame(100), 4);
        assert_eq!(publisher.latest().expect("frame").frame_number, 4);
        assert!(publisher.latest_jpeg().expect("frame").is_ok());
    }
}
