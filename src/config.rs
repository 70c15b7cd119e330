use clap::Parser;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::errors::{AerialRoadsError, Result};
use crate::preprocess::{DEFAULT_MAX_IMAGE_SIZE, SIZE_MULTIPLE};

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Model to load at startup
    #[arg(short, long)]
    pub model_path: Option<PathBuf>,

    /// Image folder to open once the model is loaded
    #[arg(short, long)]
    pub images_dir: Option<PathBuf>,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    #[arg(short = 't', long, default_value_t = default_num_threads())]
    pub num_threads: usize,

    /// Images whose larger side exceeds this are downscaled before inference
    #[arg(long, default_value_t = DEFAULT_MAX_IMAGE_SIZE, value_parser = check_max_image_size)]
    pub max_image_size: u32,

    /// Abandon a model load or prediction after this many seconds (0 disables)
    #[arg(long, default_value_t = 300)]
    pub task_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: None,
            images_dir: None,
            device_id: 0,
            num_threads: default_num_threads(),
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            task_timeout_secs: 300,
        }
    }
}

impl Config {
    pub const fn task_timeout(&self) -> Option<Duration> {
        if self.task_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.task_timeout_secs))
        }
    }

    /// Checks the startup paths before the window opens.
    pub fn validate(&self) -> Result<()> {
        if let Some(model_path) = &self.model_path {
            if !model_path.is_file() {
                return Err(AerialRoadsError::Configuration {
                    message: format!("model file {} does not exist", model_path.display()),
                });
            }
        }
        if let Some(images_dir) = &self.images_dir {
            if !images_dir.is_dir() {
                return Err(AerialRoadsError::Configuration {
                    message: format!("image folder {} does not exist", images_dir.display()),
                });
            }
            if self.model_path.is_none() {
                return Err(AerialRoadsError::Configuration {
                    message: "--images-dir requires --model-path".to_string(),
                });
            }
        }
        if self.num_threads == 0 {
            return Err(AerialRoadsError::Validation {
                field: "num_threads".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn default_num_threads() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

fn check_max_image_size(s: &str) -> std::result::Result<u32, String> {
    let value: u32 = s.parse().map_err(|e| format!("{s} is not a number: {e}"))?;
    if value < SIZE_MULTIPLE {
        return Err(format!("must be at least {SIZE_MULTIPLE} pixels"));
    }
    Ok(value)
}
