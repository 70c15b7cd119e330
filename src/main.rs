#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use eframe::egui;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aerial_roads_rs::app::APP_TITLE;
use aerial_roads_rs::{AerialRoadsApp, Config, ModelOptions, OnnxModelLoader};

const DEFAULT_LOG_FILTER: &str = "info,ort=warn";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::parse();
    config.validate().context("invalid command line")?;
    info!(
        device_id = config.device_id,
        num_threads = config.num_threads,
        max_image_size = config.max_image_size,
        "starting"
    );

    let loader = OnnxModelLoader::new(ModelOptions {
        device_id: config.device_id,
        num_threads: config.num_threads,
    });

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(APP_TITLE)
            .with_maximized(true)
            .with_min_inner_size([800.0, 600.0]),
        ..Default::default()
    };

    eframe::run_native(
        APP_TITLE,
        options,
        Box::new(move |cc| Ok(Box::new(AerialRoadsApp::new(cc, loader, &config)))),
    )
    .map_err(|e| anyhow!("window closed with an error: {e}"))
}
