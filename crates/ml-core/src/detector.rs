//! TorchScript YOLO inference behind the `Detect` trait.

use std::{convert::TryFrom, path::Path};

use anyhow::{Result, bail};
use image::{ImageBuffer, Rgb, imageops::FilterType};
use tch::{self, Device, Kind, Tensor};
use tracing::debug;

use crate::{Candidate, Detect, FrameView, decode_rows};

/// TorchScript-backed YOLO detector.
pub struct TorchDetector {
    module: tch::CModule,
    device: Device,
    name: String,
}

impl TorchDetector {
    /// Load a TorchScript export onto `device`.
    pub fn new<P: AsRef<Path>>(model_path: P, device: Device) -> Result<Self> {
        let model_path = model_path.as_ref();
        let module = tch::CModule::load_on_device(model_path, device)?;
        let name = model_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("yolo")
            .to_string();
        debug!("Loaded {} on {:?}", model_path.display(), device);
        Ok(Self {
            module,
            device,
            name,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Resize a BGR frame to the square network input and normalise it to NCHW RGB.
    fn frame_to_tensor(&self, frame: &FrameView<'_>, size: u32) -> Result<Tensor> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.bgr.len() != expected {
            bail!(
                "unexpected frame buffer size: got {} bytes, expected {}",
                frame.bgr.len(),
                expected
            );
        }

        let rgb: Vec<u8> = frame
            .bgr
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect();
        let image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(frame.width, frame.height, rgb)
            .ok_or_else(|| anyhow::anyhow!("frame does not fit its dimensions"))?;
        let resized = image::imageops::resize(&image, size, size, FilterType::Triangle);

        let side = size as i64;
        let tensor = Tensor::from_slice(resized.as_raw())
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, side, side, 3])
            .permute([0, 3, 1, 2])
            / 255.0;
        Ok(tensor)
    }
}

impl Detect for TorchDetector {
    fn detect(
        &self,
        frame: &FrameView<'_>,
        confidence_threshold: f32,
        size_hint: u32,
    ) -> Result<Vec<Candidate>> {
        let size = size_hint.max(32);
        let input = tch::no_grad(|| self.frame_to_tensor(frame, size))?;
        let output = tch::no_grad(|| self.module.forward_ts(&[input]))?;

        let shape = output.size();
        if shape.len() != 3 || shape[0] != 1 {
            bail!("unexpected detector output shape: {shape:?}");
        }
        if shape[1] < 5 {
            bail!(
                "detector output requires at least 5 channels (cx,cy,w,h,conf), got {}",
                shape[1]
            );
        }

        let preds = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows: Vec<Vec<f32>> = Vec::<Vec<f32>>::try_from(&preds)?;

        Ok(decode_rows(
            &rows,
            size,
            (frame.width, frame.height),
            confidence_threshold,
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
