use image::{GrayImage, Luma};
use ndarray::prelude::*;

use crate::errors::{AerialRoadsError, Result};

/// Predicted road mask with intensities in `[0, 255]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    mask: Array2<f32>,
}

impl PredictionResult {
    /// Reshapes a single-channel network output to `(height, width)` and scales
    /// the `[0, 1]` probabilities to `[0, 255]`.
    pub fn from_output(output: ArrayView4<f32>, height: usize, width: usize) -> Result<Self> {
        if output.len() != height * width {
            return Err(AerialRoadsError::Validation {
                field: "model output".to_string(),
                reason: format!(
                    "has shape {:?}, expected a single channel of {height}x{width}",
                    output.shape()
                ),
            });
        }

        let values: Vec<f32> = output.iter().map(|v| v * 255.0).collect();
        let mask = Array2::from_shape_vec((height, width), values)?;
        Ok(Self { mask })
    }

    pub fn mask(&self) -> ArrayView2<'_, f32> {
        self.mask.view()
    }

    /// `(width, height)`, matching the `image` crate convention.
    pub fn dimensions(&self) -> (u32, u32) {
        let (height, width) = self.mask.dim();
        (width as u32, height as u32)
    }

    pub fn to_luma8(&self) -> GrayImage {
        let (width, height) = self.dimensions();
        GrayImage::from_fn(width, height, |x, y| {
            let value = self.mask[[y as usize, x as usize]];
            Luma([value.round().clamp(0.0, 255.0) as u8])
        })
    }
}
