//! Per-frame candidate filtering: size and colour-saturation heuristics reduce raw
//! detector output to a yes/no fire signal plus the best box for annotation.

use ml_core::Candidate;
use thiserror::Error;
use video_ingest::Frame;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterConfig {
    /// Boxes smaller than this fraction of the frame area are ignored.
    pub min_area_ratio: f32,
    /// Boxes whose mean HSV saturation (0-255) falls below this are ignored.
    pub min_saturation: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_area_ratio: 0.002,
            min_saturation: 60.0,
        }
    }
}

/// Integer pixel box, `x2`/`y2` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelBox {
    /// Truncate a float candidate box to pixel coordinates.
    pub fn from_candidate(candidate: &Candidate) -> Self {
        let [x1, y1, x2, y2] = candidate.bbox;
        Self {
            x1: x1 as i32,
            y1: y1 as i32,
            x2: x2 as i32,
            y2: y2 as i32,
        }
    }

    /// Signed area; inverted boxes come out negative.
    pub fn area(&self) -> i64 {
        (self.x2 as i64 - self.x1 as i64) * (self.y2 as i64 - self.y1 as i64)
    }

    /// Intersection with a `width`×`height` frame, `None` when nothing remains.
    pub fn clipped(&self, width: i32, height: i32) -> Option<Self> {
        let clipped = Self {
            x1: self.x1.clamp(0, width),
            y1: self.y1.clamp(0, height),
            x2: self.x2.clamp(0, width),
            y2: self.y2.clamp(0, height),
        };
        (clipped.x2 > clipped.x1 && clipped.y2 > clipped.y1).then_some(clipped)
    }
}

/// Highest-confidence candidate that survived filtering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BestCandidate {
    pub bbox: PixelBox,
    pub confidence: f32,
}

/// Outcome of filtering one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DetectionSignal {
    /// At least one candidate passed every check.
    pub fire_detected: bool,
    pub best: Option<BestCandidate>,
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("frame buffer holds {actual} bytes but {width}x{height} BGR needs {expected}")]
    BufferSize {
        width: i32,
        height: i32,
        expected: usize,
        actual: usize,
    },
}

#[derive(Clone, Debug)]
pub struct DetectionFilter {
    config: FilterConfig,
}

impl DetectionFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Reduce a frame's candidates to a detection signal.
    ///
    /// Detection fires when any candidate passes; `best` only tracks the top one.
    pub fn evaluate(
        &self,
        frame: &Frame,
        candidates: &[Candidate],
    ) -> Result<DetectionSignal, FilterError> {
        let expected = frame.expected_len();
        if frame.data.len() != expected {
            return Err(FilterError::BufferSize {
                width: frame.width,
                height: frame.height,
                expected,
                actual: frame.data.len(),
            });
        }

        let frame_area = frame.width as f64 * frame.height as f64;
        let min_area = self.config.min_area_ratio as f64 * frame_area;
        let mut signal = DetectionSignal::default();

        for candidate in candidates {
            let bbox = PixelBox::from_candidate(candidate);
            if (bbox.area() as f64) < min_area {
                continue;
            }
            let Some(roi) = bbox.clipped(frame.width, frame.height) else {
                continue;
            };
            if mean_saturation(frame, &roi) < self.config.min_saturation as f64 {
                continue;
            }

            signal.fire_detected = true;
            let better = signal
                .best
                .map_or(true, |best| candidate.confidence > best.confidence);
            if better {
                signal.best = Some(BestCandidate {
                    bbox,
                    confidence: candidate.confidence,
                });
            }
        }

        Ok(signal)
    }
}

/// Mean 8-bit HSV saturation over `roi`, which must lie inside the frame.
pub(crate) fn mean_saturation(frame: &Frame, roi: &PixelBox) -> f64 {
    let stride = frame.width as usize * 3;
    let mut total: u64 = 0;
    for y in roi.y1 as usize..roi.y2 as usize {
        let row = &frame.data[y * stride + roi.x1 as usize * 3..y * stride + roi.x2 as usize * 3];
        total += row
            .chunks_exact(3)
            .map(|px| pixel_saturation(px[0], px[1], px[2]) as u64)
            .sum::<u64>();
    }
    let pixels = (roi.x2 - roi.x1) as u64 * (roi.y2 - roi.y1) as u64;
    total as f64 / pixels as f64
}

fn pixel_saturation(b: u8, g: u8, r: u8) -> u8 {
    let max = b.max(g).max(r);
    if max == 0 {
        return 0;
    }
    let min = b.min(g).min(r);
    ((255 * (max - min) as u32 + max as u32 / 2) / max as u32) as u8
}
