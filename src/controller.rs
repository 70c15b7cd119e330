//! Application state and the user actions that drive it.
//!
//! The controller owns the model handle, the image set and what is currently
//! on screen. It knows nothing about widgets: the window forwards button
//! presses here, polls for completions once per frame and renders
//! [`Display`] and [`Controller::take_notices`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{GrayImage, RgbImage};
use tracing::{debug, error, info, warn};

use crate::errors::{AerialRoadsError, Result};
use crate::image_set::ImageSet;
use crate::prediction::PredictionResult;
use crate::preprocess::SegmentationOptions;
use crate::task::{Notifier, TaskEvent, TaskRunner};
use crate::traits::{ImageSegmentationModel, ModelLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    NoModel,
    ModelLoading,
    ReadyNoImages,
    ReadyIdle,
    ReadyPredicting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Message for the user, shown by the window as a blocking dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: "Information".to_string(),
            message: message.into(),
        }
    }

    fn error(title: impl Into<String>, err: &AerialRoadsError) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: err.report(),
        }
    }
}

pub const NO_MODEL_MESSAGE: &str = "No model selected";
pub const NO_IMAGES_MESSAGE: &str = "Select a folder with images";

/// Images currently shown side by side.
///
/// `revision` changes whenever either image changes.
#[derive(Debug, Clone, Default)]
pub struct Display {
    pub input: Option<Arc<RgbImage>>,
    pub input_path: Option<PathBuf>,
    pub mask: Option<GrayImage>,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerSettings {
    pub segmentation: SegmentationOptions,
    pub task_timeout: Option<Duration>,
}

pub struct Controller<L: ModelLoader> {
    loader: Arc<L>,
    settings: ControllerSettings,
    model: Option<Arc<L::Model>>,
    model_path: Option<PathBuf>,
    images: Option<ImageSet>,
    display: Display,
    notices: Vec<Notice>,
    pending_folder: Option<PathBuf>,
    model_task: TaskRunner<(PathBuf, L::Model)>,
    prediction_task: TaskRunner<PredictionResult>,
}

impl<L: ModelLoader> Controller<L> {
    pub fn new(loader: L, settings: ControllerSettings, notifier: Notifier) -> Self {
        Self {
            loader: Arc::new(loader),
            settings,
            model: None,
            model_path: None,
            images: None,
            display: Display::default(),
            notices: Vec::new(),
            pending_folder: None,
            model_task: TaskRunner::new("model-load", settings.task_timeout, notifier.clone()),
            prediction_task: TaskRunner::new("prediction", settings.task_timeout, notifier),
        }
    }

    pub fn view_state(&self) -> ViewState {
        if self.model_task.is_running() {
            ViewState::ModelLoading
        } else if self.model.is_none() {
            ViewState::NoModel
        } else if self.images.as_ref().map_or(true, ImageSet::is_empty) {
            ViewState::ReadyNoImages
        } else if self.prediction_task.is_running() {
            ViewState::ReadyPredicting
        } else {
            ViewState::ReadyIdle
        }
    }

    pub fn is_busy(&self) -> bool {
        self.model_task.is_running() || self.prediction_task.is_running()
    }

    pub fn is_predicting(&self) -> bool {
        self.prediction_task.is_running()
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn images(&self) -> Option<&ImageSet> {
        self.images.as_ref()
    }

    pub const fn display(&self) -> &Display {
        &self.display
    }

    /// Drains the notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Opens `directory` as soon as the model that is loading now is ready.
    pub fn open_folder_when_ready(&mut self, directory: PathBuf) {
        self.pending_folder = Some(directory);
    }

    /// Whether a folder can be chosen now. Raises the no-model notice otherwise,
    /// so the window can skip the folder picker.
    pub fn request_folder(&mut self) -> bool {
        if self.model.is_none() {
            self.notices.push(Notice::info(NO_MODEL_MESSAGE));
            return false;
        }
        true
    }

    /// Starts loading a model in the background.
    ///
    /// Available in every state; a load already in flight is abandoned.
    pub fn choose_model(&mut self, path: PathBuf) {
        info!("loading model {}", path.display());
        let loader = Arc::clone(&self.loader);
        let started = self.model_task.start(move |_| {
            let model = loader.load(&path)?;
            Ok((path, model))
        });
        if let Err(e) = started {
            self.report_error("Model loading failed", &e);
        }
    }

    /// Lists the images of `directory` and starts predicting the first one.
    pub fn choose_folder(&mut self, directory: &Path) {
        if self.model.is_none() {
            self.notices.push(Notice::info(NO_MODEL_MESSAGE));
            return;
        }

        let images = match ImageSet::from_directory(directory) {
            Ok(images) => images,
            Err(e) => {
                self.report_error("Cannot open folder", &e);
                return;
            }
        };
        info!(count = images.len(), "opened folder {}", directory.display());

        let empty = images.is_empty();
        self.images = Some(images);
        if empty {
            self.prediction_task.cancel();
            self.notices.push(Notice::info(format!(
                "No png, jpg, jpeg or tiff images in {}",
                directory.display()
            )));
            return;
        }
        self.start_prediction();
    }

    pub fn next(&mut self) {
        self.navigate(ImageSet::next);
    }

    pub fn previous(&mut self) {
        self.navigate(ImageSet::previous);
    }

    pub fn restart(&mut self) {
        self.navigate(ImageSet::restart);
    }

    fn navigate(&mut self, step: fn(&mut ImageSet) -> Option<&Path>) {
        match self.images.as_mut() {
            Some(images) if !images.is_empty() => {
                step(images);
                self.start_prediction();
            }
            _ => self.notices.push(Notice::info(NO_IMAGES_MESSAGE)),
        }
    }

    fn start_prediction(&mut self) {
        let Some(model) = self.model.clone() else {
            self.notices.push(Notice::info(NO_MODEL_MESSAGE));
            return;
        };
        let Some(path) = self
            .images
            .as_ref()
            .and_then(ImageSet::current)
            .map(Path::to_path_buf)
        else {
            self.notices.push(Notice::info(NO_IMAGES_MESSAGE));
            return;
        };

        let image = match open_rgb(&path) {
            Ok(image) => Arc::new(image),
            Err(e) => {
                self.prediction_task.cancel();
                // カーソルは既に移動済みなので、前の画像とマスクを残さない
                self.display = Display {
                    input: None,
                    input_path: None,
                    mask: None,
                    revision: self.display.revision + 1,
                };
                self.report_error("Cannot open image", &e);
                return;
            }
        };

        self.display.input = Some(Arc::clone(&image));
        self.display.input_path = Some(path.clone());
        self.display.mask = None;
        self.display.revision += 1;

        let options = self.settings.segmentation;
        let started = self
            .prediction_task
            .start(move |cancel| model.segment_image(&image, &options, cancel));
        match started {
            Ok(id) => info!(%id, "predicting roads for {}", path.display()),
            Err(e) => self.report_error("Prediction failed", &e),
        }
    }

    /// Applies finished background work. Call once per frame on the UI thread.
    pub fn poll(&mut self) {
        if let Some(event) = self.model_task.poll() {
            self.on_model_loaded(event);
        }
        if let Some(event) = self.prediction_task.poll() {
            self.on_prediction_finished(event);
        }
    }

    fn on_model_loaded(&mut self, event: TaskEvent<(PathBuf, L::Model)>) {
        match event.result {
            Ok((path, model)) => {
                info!(id = %event.id, "model ready: {}", path.display());
                self.model = Some(Arc::new(model));
                self.model_path = Some(path);
                if let Some(directory) = self.pending_folder.take() {
                    self.choose_folder(&directory);
                }
            }
            Err(e) => {
                self.pending_folder = None;
                self.report_error("Model loading failed", &e);
            }
        }
    }

    fn on_prediction_finished(&mut self, event: TaskEvent<PredictionResult>) {
        match event.result {
            Ok(prediction) => {
                let (width, height) = prediction.dimensions();
                debug!(id = %event.id, width, height, "prediction finished");
                self.display.mask = Some(prediction.to_luma8());
                self.display.revision += 1;
            }
            Err(AerialRoadsError::Cancelled) => {
                debug!(id = %event.id, "prediction cancelled");
            }
            Err(e) => self.report_error("Prediction failed", &e),
        }
    }

    fn report_error(&mut self, title: &str, err: &AerialRoadsError) {
        error!("{title}: {}", err.report());
        self.notices.push(Notice::error(title, err));
    }
}

fn open_rgb(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|e| AerialRoadsError::ImageProcessing {
        path: path.display().to_string(),
        operation: "decode image".to_string(),
        source: Box::new(e),
    })?;
    if image.color().has_alpha() {
        warn!("dropping alpha channel of {}", path.display());
    }
    Ok(image.into_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockModelLoader, MockSegmentationModel};
    use crate::preprocess::TensorLayout;
    use crate::task::tests::noop_notifier;
    use image::Rgb;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    struct Fixture {
        temp_dir: TempDir,
        model_path: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let model_path = temp_dir.path().join("roads.onnx");
            fs::write(&model_path, b"mock").unwrap();
            Self {
                temp_dir,
                model_path,
            }
        }

        fn folder(&self, name: &str, images: &[&str]) -> PathBuf {
            let dir = self.temp_dir.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            for (i, file) in images.iter().enumerate() {
                let shade = (i as u8).wrapping_mul(60);
                RgbImage::from_pixel(64, 64, Rgb([0, shade, 0]))
                    .save(dir.join(file))
                    .unwrap();
            }
            dir
        }
    }

    fn controller(loader: MockModelLoader) -> Controller<MockModelLoader> {
        Controller::new(loader, ControllerSettings::default(), noop_notifier())
    }

    fn settle<L: ModelLoader>(controller: &mut Controller<L>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.is_busy() {
            assert!(Instant::now() < deadline, "background work did not finish");
            std::thread::sleep(Duration::from_millis(5));
            controller.poll();
        }
    }

    fn loaded(fixture: &Fixture) -> Controller<MockModelLoader> {
        let mut controller = controller(MockModelLoader::default());
        controller.choose_model(fixture.model_path.clone());
        settle(&mut controller);
        assert!(controller.has_model());
        controller
    }

    #[test]
    fn starts_without_model() {
        let mut controller = controller(MockModelLoader::default());
        assert_eq!(controller.view_state(), ViewState::NoModel);
        assert!(controller.take_notices().is_empty());
    }

    #[test]
    fn folder_without_model_shows_notice() {
        let fixture = Fixture::new();
        let dir = fixture.folder("tiles", &["a.png"]);
        let mut controller = controller(MockModelLoader::default());

        controller.choose_folder(&dir);

        assert_eq!(controller.take_notices(), vec![Notice::info(NO_MODEL_MESSAGE)]);
        assert!(controller.images().is_none());
        assert_eq!(controller.view_state(), ViewState::NoModel);
    }

    #[test]
    fn model_loading_state_then_ready() {
        let fixture = Fixture::new();
        let mut controller =
            controller(MockModelLoader::default().with_delay(Duration::from_millis(50)));

        controller.choose_model(fixture.model_path.clone());
        assert_eq!(controller.view_state(), ViewState::ModelLoading);

        settle(&mut controller);
        assert_eq!(controller.view_state(), ViewState::ReadyNoImages);
        assert_eq!(controller.model_path(), Some(fixture.model_path.as_path()));
    }

    #[test]
    fn failed_model_load_keeps_previous_model() {
        let fixture = Fixture::new();
        let mut controller = loaded(&fixture);

        controller.choose_model(fixture.temp_dir.path().join("missing.onnx"));
        settle(&mut controller);

        let notices = controller.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(controller.has_model());
        assert_eq!(controller.model_path(), Some(fixture.model_path.as_path()));
    }

    #[test]
    fn folder_with_images_predicts_first_one() {
        let fixture = Fixture::new();
        let dir = fixture.folder("tiles", &["b.png", "a.png", "c.jpg"]);
        let mut controller = loaded(&fixture);

        controller.choose_folder(&dir);
        assert_eq!(controller.view_state(), ViewState::ReadyPredicting);
        assert_eq!(controller.display().input_path, Some(dir.join("a.png")));
        assert!(controller.display().input.is_some());
        assert!(controller.display().mask.is_none());

        settle(&mut controller);
        assert_eq!(controller.view_state(), ViewState::ReadyIdle);
        let mask = controller.display().mask.as_ref().expect("mask after completion");
        assert_eq!(mask.dimensions(), (64, 64));
        assert!(controller.take_notices().is_empty());
    }

    #[test]
    fn navigation_wraps_and_repredicts() {
        let fixture = Fixture::new();
        let dir = fixture.folder("tiles", &["a.png", "b.png", "c.png"]);
        let mut controller = loaded(&fixture);
        controller.choose_folder(&dir);
        settle(&mut controller);

        controller.previous();
        assert_eq!(controller.images().unwrap().cursor(), 2);
        assert_eq!(controller.display().input_path, Some(dir.join("c.png")));
        settle(&mut controller);

        controller.next();
        assert_eq!(controller.images().unwrap().cursor(), 0);
        controller.next();
        assert_eq!(controller.images().unwrap().cursor(), 1);
        controller.restart();
        assert_eq!(controller.images().unwrap().cursor(), 0);
        settle(&mut controller);

        assert_eq!(controller.display().input_path, Some(dir.join("a.png")));
        assert!(controller.display().mask.is_some());
    }

    #[test]
    fn empty_folder_leaves_display_untouched() {
        let fixture = Fixture::new();
        let tiles = fixture.folder("tiles", &["a.png"]);
        let empty = fixture.folder("empty", &[]);
        let mut controller = loaded(&fixture);
        controller.choose_folder(&tiles);
        settle(&mut controller);
        let revision = controller.display().revision;

        controller.choose_folder(&empty);
        assert_eq!(controller.take_notices().len(), 1);
        assert_eq!(controller.view_state(), ViewState::ReadyNoImages);

        controller.next();
        controller.previous();
        controller.restart();

        let notices = controller.take_notices();
        assert_eq!(notices, vec![Notice::info(NO_IMAGES_MESSAGE); 3]);
        assert_eq!(controller.display().revision, revision);
        assert_eq!(controller.display().input_path, Some(tiles.join("a.png")));
    }

    #[test]
    fn navigation_without_folder_shows_notice() {
        let fixture = Fixture::new();
        let mut controller = loaded(&fixture);

        controller.next();
        assert_eq!(controller.take_notices(), vec![Notice::info(NO_IMAGES_MESSAGE)]);
    }

    #[test]
    fn rapid_navigation_shows_latest_request() {
        let fixture = Fixture::new();
        let dir = fixture.folder("tiles", &["a.png", "b.png", "c.png"]);
        let model = MockSegmentationModel::new(TensorLayout::Nhwc)
            .with_delay(Duration::from_millis(30));
        let mut controller = loaded_with(&fixture, MockModelLoader::new(model));

        controller.choose_folder(&dir);
        controller.next();
        controller.next();
        settle(&mut controller);

        // c.png が最も明るい緑で書き出されている
        let mask = controller.display().mask.as_ref().unwrap();
        assert_eq!(controller.display().input_path, Some(dir.join("c.png")));
        assert_eq!(mask.get_pixel(0, 0)[0], 120);
    }

    #[test]
    fn pending_folder_opens_after_model_load() {
        let fixture = Fixture::new();
        let dir = fixture.folder("tiles", &["a.png"]);
        let mut controller = controller(MockModelLoader::default());

        controller.choose_model(fixture.model_path.clone());
        controller.open_folder_when_ready(dir.clone());
        settle(&mut controller);

        assert_eq!(controller.images().map(ImageSet::len), Some(1));
        assert!(controller.display().mask.is_some());
    }

    #[test]
    fn undecodable_image_reports_error() {
        let fixture = Fixture::new();
        let dir = fixture.temp_dir.path().join("broken");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.png"), b"not a png").unwrap();
        let mut controller = loaded(&fixture);

        controller.choose_folder(&dir);

        let notices = controller.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(notices[0].message.contains("decode image"));
        assert!(notices[0].message.contains(&dir.join("a.png").display().to_string()));
        assert!(!controller.is_predicting());
    }

    #[test]
    fn undecodable_image_clears_previous_folder_display() {
        let fixture = Fixture::new();
        let good = fixture.folder("good", &["a.png", "b.png"]);
        let mut controller = loaded(&fixture);
        controller.choose_folder(&good);
        controller.next();
        settle(&mut controller);
        assert!(controller.display().mask.is_some());
        let revision = controller.display().revision;

        let broken = fixture.folder("broken", &["b.png"]);
        fs::write(broken.join("a.png"), b"not a png").unwrap();
        controller.choose_folder(&broken);

        assert_eq!(controller.images().unwrap().current(), Some(broken.join("a.png").as_path()));
        let display = controller.display();
        assert!(display.input.is_none());
        assert!(display.input_path.is_none());
        assert!(display.mask.is_none());
        assert!(display.revision > revision);
        assert_eq!(controller.take_notices().len(), 1);

        // 次の画像は通常どおり表示される
        controller.next();
        settle(&mut controller);
        assert_eq!(controller.display().input_path, Some(broken.join("b.png")));
        assert!(controller.display().mask.is_some());
    }

    #[test]
    fn tiny_image_prediction_fails_with_notice() {
        let fixture = Fixture::new();
        let dir = fixture.temp_dir.path().join("tiny");
        fs::create_dir_all(&dir).unwrap();
        RgbImage::new(16, 16).save(dir.join("a.png")).unwrap();
        let mut controller = loaded(&fixture);

        controller.choose_folder(&dir);
        settle(&mut controller);

        let notices = controller.take_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].message.contains("too small"));
        assert!(controller.display().mask.is_none());
    }

    fn loaded_with(fixture: &Fixture, loader: MockModelLoader) -> Controller<MockModelLoader> {
        let mut controller = controller(loader);
        controller.choose_model(fixture.model_path.clone());
        settle(&mut controller);
        controller
    }
}
