use std::path::Path;

use ndarray::prelude::*;
use ort::session::{builder::SessionBuilder, Session};
use ort::value::TensorRef;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::errors::{AerialRoadsError, Result};
use crate::preprocess::{TensorLayout, SIZE_MULTIPLE};
use crate::traits::{ImageSegmentationModel, ModelLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOptions {
    pub device_id: i32,
    pub num_threads: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            device_id: 0,
            num_threads: 1,
        }
    }
}

/// ONNX Runtime session plus the input/output metadata needed to run it.
pub struct Model {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    layout: TensorLayout,
}

fn model_error<E>(operation: impl Into<String>, source: E) -> AerialRoadsError
where
    E: std::error::Error + Send + Sync + 'static,
{
    AerialRoadsError::Model {
        operation: operation.into(),
        source: Box::new(source),
    }
}

#[cfg(feature = "cuda")]
fn with_execution_providers(builder: SessionBuilder, device_id: i32) -> Result<SessionBuilder> {
    use ort::execution_providers::CUDAExecutionProvider;

    builder
        .with_execution_providers([CUDAExecutionProvider::default()
            .with_device_id(device_id)
            .build()])
        .map_err(|e| model_error("configure execution providers", e))
}

#[cfg(not(feature = "cuda"))]
fn with_execution_providers(builder: SessionBuilder, _device_id: i32) -> Result<SessionBuilder> {
    Ok(builder)
}

impl Model {
    pub fn new(model_path: &Path, options: &ModelOptions) -> Result<Self> {
        if !model_path.is_file() {
            return Err(AerialRoadsError::FileSystem {
                path: model_path.to_path_buf(),
                operation: "open model".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "model file does not exist",
                ),
            });
        }

        let builder =
            SessionBuilder::new().map_err(|e| model_error("initialize session builder", e))?;
        let session = with_execution_providers(builder, options.device_id)?
            .with_intra_threads(options.num_threads.max(1))
            .map_err(|e| model_error("configure intra-op threads", e))?
            .with_memory_pattern(true)
            .map_err(|e| model_error("configure memory pattern", e))?
            .commit_from_file(model_path)
            .map_err(|e| model_error(format!("load model file {}", model_path.display()), e))?;

        let input = session.inputs.first().ok_or_else(|| AerialRoadsError::Validation {
            field: "model".to_string(),
            reason: "has no inputs".to_string(),
        })?;
        let output = session.outputs.first().ok_or_else(|| AerialRoadsError::Validation {
            field: "model".to_string(),
            reason: "has no outputs".to_string(),
        })?;

        let shape: Vec<i64> = input
            .input_type
            .tensor_shape()
            .ok_or_else(|| AerialRoadsError::Validation {
                field: "model input".to_string(),
                reason: "is not a tensor".to_string(),
            })?
            .iter()
            .copied()
            .collect();
        let layout = detect_layout(&shape)?;
        check_dynamic_spatial_dims(&shape, layout)?;

        let model = Self {
            input_name: input.name.clone(),
            output_name: output.name.clone(),
            layout,
            session: Mutex::new(session),
        };
        info!(
            input = %model.input_name,
            output = %model.output_name,
            ?layout,
            "loaded model from {}",
            model_path.display()
        );

        // initialize model
        let warm_up = Array4::<f32>::zeros(warm_up_shape(layout));
        model.predict(warm_up.view())?;
        debug!("model warm-up finished");

        Ok(model)
    }
}

/// Keras exports are `(batch, height, width, 3)`; PyTorch-style exports put
/// the channels first.
fn detect_layout(shape: &[i64]) -> Result<TensorLayout> {
    match shape {
        [_, _, _, 3] => Ok(TensorLayout::Nhwc),
        [_, 3, _, _] => Ok(TensorLayout::Nchw),
        _ => Err(AerialRoadsError::Validation {
            field: "model input".to_string(),
            reason: format!("has shape {shape:?}, expected a 4-D RGB image tensor"),
        }),
    }
}

const fn spatial_axes(layout: TensorLayout) -> (usize, usize) {
    match layout {
        TensorLayout::Nhwc => (1, 2),
        TensorLayout::Nchw => (2, 3),
    }
}

/// Photos are fed at their own aligned size, so height and width must be dynamic.
fn check_dynamic_spatial_dims(shape: &[i64], layout: TensorLayout) -> Result<()> {
    let (h, w) = spatial_axes(layout);
    if shape[h] > 0 || shape[w] > 0 {
        return Err(AerialRoadsError::Validation {
            field: "model input".to_string(),
            reason: format!(
                "has fixed spatial size {}x{} in shape {shape:?}, \
                 height and width must be dynamic",
                shape[h], shape[w]
            ),
        });
    }
    Ok(())
}

/// Smallest input every aligned image size is derived from.
fn warm_up_shape(layout: TensorLayout) -> (usize, usize, usize, usize) {
    let side = SIZE_MULTIPLE as usize;
    match layout {
        TensorLayout::Nhwc => (1, side, side, 3),
        TensorLayout::Nchw => (1, 3, side, side),
    }
}

impl ImageSegmentationModel for Model {
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        let mask = outputs[self.output_name.as_str()].try_extract_array::<f32>()?;
        // 末尾のチャンネル軸を省略するエクスポートもある
        let mask = if mask.ndim() == 3 {
            mask.insert_axis(Axis(3))
        } else {
            mask
        };
        Ok(mask.into_dimensionality::<Ix4>()?.to_owned())
    }

    fn input_layout(&self) -> TensorLayout {
        self.layout
    }
}

/// Loads ONNX models with a fixed set of session options.
#[derive(Debug, Clone, Default)]
pub struct OnnxModelLoader {
    options: ModelOptions,
}

impl OnnxModelLoader {
    pub const fn new(options: ModelOptions) -> Self {
        Self { options }
    }
}

impl ModelLoader for OnnxModelLoader {
    type Model = Model;

    fn load(&self, path: &Path) -> Result<Model> {
        Model::new(path, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn detects_keras_layout() -> Result<()> {
        assert_eq!(detect_layout(&[-1, -1, -1, 3])?, TensorLayout::Nhwc);
        assert_eq!(detect_layout(&[1, 3, 512, 512])?, TensorLayout::Nchw);
        assert!(detect_layout(&[1, 512, 512]).is_err());
        assert!(detect_layout(&[1, 1, 512, 512]).is_err());
        Ok(())
    }

    #[test]
    fn fixed_spatial_size_is_rejected() -> Result<()> {
        check_dynamic_spatial_dims(&[-1, -1, -1, 3], TensorLayout::Nhwc)?;
        check_dynamic_spatial_dims(&[1, 3, -1, -1], TensorLayout::Nchw)?;

        let result = check_dynamic_spatial_dims(&[1, 512, 512, 3], TensorLayout::Nhwc);
        assert!(matches!(result, Err(AerialRoadsError::Validation { .. })));
        assert!(check_dynamic_spatial_dims(&[1, 3, 256, -1], TensorLayout::Nchw).is_err());
        Ok(())
    }

    #[test]
    fn warm_up_uses_smallest_aligned_size() {
        assert_eq!(warm_up_shape(TensorLayout::Nhwc), (1, 32, 32, 3));
        assert_eq!(warm_up_shape(TensorLayout::Nchw), (1, 3, 32, 32));
    }

    #[test]
    fn missing_model_file_is_a_filesystem_error() {
        let result = OnnxModelLoader::default().load(Path::new("/no/such/model.onnx"));
        assert!(matches!(result, Err(AerialRoadsError::FileSystem { .. })));
    }

    #[test]
    fn malformed_model_file_is_a_model_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let model_path = temp_dir.path().join("broken.onnx");
        std::fs::write(&model_path, b"definitely not protobuf")?;

        let result = OnnxModelLoader::default().load(&model_path);
        assert!(matches!(result, Err(AerialRoadsError::Model { .. })));
        Ok(())
    }
}
