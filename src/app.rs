//! The egui window: five buttons on top, source image and predicted mask below.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eframe::egui::{self, ColorImage, TextureHandle, TextureOptions};
use image::RgbImage;
use rfd::{FileDialog, MessageButtons, MessageDialog, MessageLevel};

use crate::config::Config;
use crate::controller::{Controller, ControllerSettings, NoticeLevel, ViewState};
use crate::preprocess::SegmentationOptions;
use crate::traits::ModelLoader;

pub const APP_TITLE: &str = "Aerial Roads";

const IMAGE_HEADING_SIZE: f32 = 20.0;
const BUSY_REPAINT_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Default)]
struct Textures {
    input_source: Option<Arc<RgbImage>>,
    input: Option<TextureHandle>,
    mask: Option<TextureHandle>,
    revision: Option<u64>,
}

pub struct AerialRoadsApp<L: ModelLoader> {
    controller: Controller<L>,
    textures: Textures,
}

impl<L: ModelLoader> AerialRoadsApp<L> {
    pub fn new(cc: &eframe::CreationContext<'_>, loader: L, config: &Config) -> Self {
        let ctx = cc.egui_ctx.clone();
        let settings = ControllerSettings {
            segmentation: SegmentationOptions {
                max_image_size: config.max_image_size,
            },
            task_timeout: config.task_timeout(),
        };
        let mut controller = Controller::new(loader, settings, Arc::new(move || ctx.request_repaint()));

        if let Some(model_path) = &config.model_path {
            controller.choose_model(model_path.clone());
            if let Some(images_dir) = &config.images_dir {
                controller.open_folder_when_ready(images_dir.clone());
            }
        }

        Self {
            controller,
            textures: Textures::default(),
        }
    }

    fn sync_textures(&mut self, ctx: &egui::Context) {
        let display = self.controller.display();
        if self.textures.revision == Some(display.revision) {
            return;
        }

        let input_changed = match (&self.textures.input_source, &display.input) {
            (Some(shown), Some(current)) => !Arc::ptr_eq(shown, current),
            (None, None) => false,
            _ => true,
        };
        if input_changed {
            self.textures.input = display.input.as_ref().map(|image| {
                let size = [image.width() as usize, image.height() as usize];
                ctx.load_texture(
                    "source-image",
                    ColorImage::from_rgb(size, image.as_raw()),
                    TextureOptions::LINEAR,
                )
            });
            self.textures.input_source = display.input.clone();
        }

        self.textures.mask = display.mask.as_ref().map(|mask| {
            let size = [mask.width() as usize, mask.height() as usize];
            ctx.load_texture(
                "road-mask",
                ColorImage::from_gray(size, mask.as_raw()),
                TextureOptions::LINEAR,
            )
        });
        self.textures.revision = Some(display.revision);
    }

    fn pick_model(&mut self) {
        let picked = FileDialog::new()
            .set_title("Choose a model")
            .add_filter("ONNX models", &["onnx"])
            .set_directory(current_dir())
            .pick_file();
        if let Some(path) = picked {
            self.controller.choose_model(path);
        }
    }

    fn pick_folder(&mut self) {
        if !self.controller.request_folder() {
            return;
        }
        let picked = FileDialog::new()
            .set_title("Choose a folder with images")
            .set_directory(current_dir())
            .pick_folder();
        if let Some(directory) = picked {
            self.controller.choose_folder(&directory);
        }
    }

    fn button_row(&mut self, ui: &mut egui::Ui, state: ViewState) {
        let loading = state == ViewState::ModelLoading;
        ui.horizontal(|ui| {
            if ui
                .button("🧠 Choose model")
                .on_hover_text("Load an ONNX road segmentation model")
                .clicked()
            {
                self.pick_model();
            }
            if ui
                .add_enabled(!loading, egui::Button::new("📁 Choose folder"))
                .clicked()
            {
                self.pick_folder();
            }
            if ui.add_enabled(!loading, egui::Button::new("⬅ Previous")).clicked() {
                self.controller.previous();
            }
            if ui.add_enabled(!loading, egui::Button::new("Next ➡")).clicked() {
                self.controller.next();
            }
            if ui.add_enabled(!loading, egui::Button::new("⟲ Restart")).clicked() {
                self.controller.restart();
            }

            if loading {
                ui.separator();
                ui.add(egui::Spinner::new());
                ui.label("Loading model");
            }
        });
    }

    fn status_text(&self) -> String {
        let model = self
            .controller
            .model_path()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "no model".to_string());

        let position = match self.controller.images() {
            Some(images) if !images.is_empty() => {
                let name = images
                    .current()
                    .and_then(|p| p.file_name())
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{} ({}/{})", name, images.cursor() + 1, images.len())
            }
            Some(images) => format!("no images in {}", images.directory().display()),
            None => "no folder".to_string(),
        };

        format!("Model: {model}    Image: {position}")
    }

    fn show_notices(&mut self) {
        for notice in self.controller.take_notices() {
            let level = match notice.level {
                NoticeLevel::Info => MessageLevel::Info,
                NoticeLevel::Error => MessageLevel::Error,
            };
            MessageDialog::new()
                .set_level(level)
                .set_title(notice.title)
                .set_description(notice.message)
                .set_buttons(MessageButtons::Ok)
                .show();
        }
    }
}

fn image_column(ui: &mut egui::Ui, title: &str, texture: Option<&TextureHandle>, busy: bool) {
    ui.vertical_centered(|ui| {
        ui.label(egui::RichText::new(title).size(IMAGE_HEADING_SIZE).strong());
        ui.add_space(8.0);
        if busy {
            ui.add(egui::Spinner::new().size(64.0));
        } else if let Some(texture) = texture {
            ui.add(
                egui::Image::new(texture)
                    .max_size(ui.available_size())
                    .maintain_aspect_ratio(true),
            );
        } else {
            ui.weak("No image");
        }
    });
}

fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_default()
}

impl<L: ModelLoader> eframe::App for AerialRoadsApp<L> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.controller.poll();
        self.sync_textures(ctx);
        let state = self.controller.view_state();

        egui::TopBottomPanel::top("actions").show(ctx, |ui| {
            ui.add_space(6.0);
            self.button_row(ui, state);
            ui.add_space(6.0);
        });

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.label(self.status_text());
        });

        let predicting = self.controller.is_predicting();
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.columns(2, |columns| {
                image_column(
                    &mut columns[0],
                    "Source image",
                    self.textures.input.as_ref(),
                    false,
                );
                image_column(
                    &mut columns[1],
                    "Predicted roads",
                    self.textures.mask.as_ref(),
                    predicting,
                );
            });
        });

        // タイムアウトはフレーム描画時にしか検出されない
        if self.controller.is_busy() {
            ctx.request_repaint_after(BUSY_REPAINT_INTERVAL);
        }

        self.show_notices();
    }
}
