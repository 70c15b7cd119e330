use std::path::Path;

use image::RgbImage;
use ndarray::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::errors::{AerialRoadsError, Result};
use crate::prediction::PredictionResult;
use crate::preprocess::{preprocess, spatial_shape, SegmentationOptions, TensorLayout};

/// Road segmentation model abstraction.
///
/// The window and the controller depend on this trait rather than on the ONNX
/// Runtime session, so they can be driven by a mock in tests.
pub trait ImageSegmentationModel: Send + Sync {
    /// Forward pass on a batch-of-one input tensor (low-level API).
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>>;

    /// Layout the model expects its image input in.
    fn input_layout(&self) -> TensorLayout {
        TensorLayout::Nhwc
    }

    /// Preprocesses the image, runs inference and returns the road mask.
    ///
    /// The token is checked between preprocessing and inference.
    fn segment_image(
        &self,
        image: &RgbImage,
        options: &SegmentationOptions,
        cancel: &CancellationToken,
    ) -> Result<PredictionResult> {
        let layout = self.input_layout();
        let tensor = preprocess(image, options, layout)?;
        if cancel.is_cancelled() {
            return Err(AerialRoadsError::Cancelled);
        }

        let output = self.predict(tensor.view())?;
        let (height, width) = spatial_shape(&tensor.view(), layout);
        PredictionResult::from_output(output.view(), height, width)
    }
}

/// Produces a model handle from a file on disk.
pub trait ModelLoader: Send + Sync + 'static {
    type Model: ImageSegmentationModel + 'static;

    fn load(&self, path: &Path) -> Result<Self::Model>;
}
