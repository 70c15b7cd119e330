use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::prelude::*;

use crate::errors::{AerialRoadsError, Result};
use crate::preprocess::TensorLayout;
use crate::traits::{ImageSegmentationModel, ModelLoader};

/// Mock segmentation model for tests.
///
/// The "road probability" of a pixel is its green channel, so masks are
/// deterministic and easy to check.
#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    pub layout: TensorLayout,
    pub delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockSegmentationModel {
    pub fn new(layout: TensorLayout) -> Self {
        Self {
            layout,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of forward passes run so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageSegmentationModel for MockSegmentationModel {
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(match self.layout {
            TensorLayout::Nhwc => tensor.slice(s![.., .., .., 1..2]).to_owned(),
            TensorLayout::Nchw => tensor.slice(s![.., 1..2, .., ..]).to_owned(),
        })
    }

    fn input_layout(&self) -> TensorLayout {
        self.layout
    }
}

/// Mock loader: any existing file loads, anything else fails like a real loader.
#[derive(Debug, Clone)]
pub struct MockModelLoader {
    pub model: MockSegmentationModel,
    pub delay: Duration,
}

impl MockModelLoader {
    pub fn new(model: MockSegmentationModel) -> Self {
        Self {
            model,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for MockModelLoader {
    fn default() -> Self {
        Self::new(MockSegmentationModel::new(TensorLayout::Nhwc))
    }
}

impl ModelLoader for MockModelLoader {
    type Model = MockSegmentationModel;

    fn load(&self, path: &Path) -> Result<MockSegmentationModel> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if !path.is_file() {
            return Err(AerialRoadsError::FileSystem {
                path: path.to_path_buf(),
                operation: "open model".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "model file does not exist",
                ),
            });
        }
        Ok(self.model.clone())
    }
}
