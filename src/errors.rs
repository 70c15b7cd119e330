use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed source error that can cross from a worker thread back to the UI thread.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the aerial roads viewer.
///
/// Each variant carries the context of its domain (filesystem, image decoding,
/// model operations, background tasks) so the window can show a readable
/// message without parsing strings.
#[derive(Error, Debug)]
pub enum AerialRoadsError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Operation timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("Failed to spawn worker thread {name}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker thread exited without reporting a result")]
    WorkerLost,
}

pub type Result<T> = std::result::Result<T, AerialRoadsError>;

impl AerialRoadsError {
    /// Formats the error together with its source chain, one cause per line.
    pub fn report(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str("\n  caused by: ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Callsites that know the path should construct `FileSystem` directly.
impl From<std::io::Error> for AerialRoadsError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<walkdir::Error> for AerialRoadsError {
    fn from(err: walkdir::Error) -> Self {
        let path = err
            .path()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("unknown"));
        let source = err
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
        Self::FileSystem {
            path,
            operation: "read directory".to_string(),
            source,
        }
    }
}

/// Convert ONNX Runtime errors to model errors.
impl From<ort::Error> for AerialRoadsError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors come out of tensor reshaping around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for AerialRoadsError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
