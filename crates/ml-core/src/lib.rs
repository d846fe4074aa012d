//! Detector capability shared by the pipeline: a frame goes in, candidate boxes
//! with confidences come out.

#[cfg(feature = "with-tch")]
pub mod detector;

#[cfg(feature = "with-tch")]
pub use tch;

/// Upper bound on candidates kept from a single inference pass.
pub const MAX_CANDIDATES: usize = 512;

/// A candidate box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Candidate {
    /// Corners as `[x1, y1, x2, y2]`.
    pub bbox: [f32; 4],
    pub confidence: f32,
}

/// Borrowed BGR8 frame handed to a detector.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub bgr: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Anything that can propose fire candidates for a frame.
///
/// Implementations must not depend on state mutated between calls; the loop may
/// treat any error as "nothing found in this frame".
pub trait Detect: Send {
    fn detect(
        &self,
        frame: &FrameView<'_>,
        confidence_threshold: f32,
        size_hint: u32,
    ) -> anyhow::Result<Vec<Candidate>>;

    /// Short model identifier reported by the health endpoint.
    fn name(&self) -> &str;
}

impl<T: Detect + ?Sized> Detect for Box<T> {
    fn detect(
        &self,
        frame: &FrameView<'_>,
        confidence_threshold: f32,
        size_hint: u32,
    ) -> anyhow::Result<Vec<Candidate>> {
        (**self).detect(frame, confidence_threshold, size_hint)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Convert raw `(cx, cy, w, h, score...)` prediction rows from a square
/// `input_size` network input into frame-space candidates.
///
/// Rows with several trailing scores use the best one. Rows shorter than five
/// values or below `confidence_threshold` are dropped.
pub fn decode_rows<R: AsRef<[f32]>>(
    rows: &[R],
    input_size: u32,
    frame_size: (u32, u32),
    confidence_threshold: f32,
) -> Vec<Candidate> {
    let input = input_size.max(1) as f32;
    let scale_x = frame_size.0 as f32 / input;
    let scale_y = frame_size.1 as f32 / input;

    let mut candidates = Vec::new();
    for row in rows {
        let row = row.as_ref();
        if row.len() < 5 {
            continue;
        }
        let confidence = row[4..].iter().copied().fold(f32::MIN, f32::max);
        if confidence < confidence_threshold {
            continue;
        }
        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        candidates.push(Candidate {
            bbox: [
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ],
            confidence,
        });
        if candidates.len() >= MAX_CANDIDATES {
            break;
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_centre_boxes_into_frame_corners() {
        let rows = vec![vec![320.0, 320.0, 64.0, 32.0, 0.9]];
        let candidates = decode_rows(&rows, 640, (1280, 720), 0.25);
        assert_eq!(candidates.len(), 1);
        let c = candidates[0];
        assert_eq!(c.bbox, [576.0, 342.0, 704.0, 378.0]);
        assert!((c.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn drops_rows_below_threshold_and_short_rows() {
        let rows = vec![
            vec![10.0, 10.0, 4.0, 4.0, 0.1],
            vec![10.0, 10.0, 4.0],
            vec![10.0, 10.0, 4.0, 4.0, 0.2, 0.6],
        ];
        let candidates = decode_rows(&rows, 640, (640, 640), 0.25);
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].confidence - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn caps_candidate_count() {
        let rows = vec![[1.0, 1.0, 1.0, 1.0, 1.0]; MAX_CANDIDATES + 10];
        assert_eq!(decode_rows(&rows, 640, (640, 640), 0.5).len(), MAX_CANDIDATES);
    }
}
