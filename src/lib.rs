pub mod app;
pub mod config;
pub mod controller;
pub mod errors;
pub mod image_set;
pub mod model;
pub mod prediction;
pub mod preprocess;
pub mod task;
pub mod traits;

pub mod mocks;

pub use app::AerialRoadsApp;
pub use config::Config;
pub use controller::{Controller, ControllerSettings, Notice, NoticeLevel, ViewState};
pub use errors::{AerialRoadsError, Result};
pub use image_set::ImageSet;
pub use model::{Model, ModelOptions, OnnxModelLoader};
pub use prediction::PredictionResult;
pub use preprocess::{SegmentationOptions, TensorLayout};
pub use traits::*;
