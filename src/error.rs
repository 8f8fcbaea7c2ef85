use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::TensorShape;

/// Opaque failure reported by an inference engine.
pub type EngineFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no model file name")]
    MissingModelPath,
    #[error("no input image name")]
    MissingInputPath,
    #[error("thread count must be -1 or at least 1, got {0}")]
    InvalidThreads(i32),
    #[error("invocation count must be at least 1")]
    ZeroCount,
    #[error("input standard deviation must be non-zero and finite, got {0}")]
    InvalidStd(f32),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("model file {} is empty", .0.display())]
    Empty(PathBuf),
    #[error("failed to parse model {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: EngineFailure,
    },
}

#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("failed to construct interpreter")]
    Build(#[source] EngineFailure),
    #[error("failed to configure interpreter ({what})")]
    Configure {
        what: &'static str,
        #[source]
        source: EngineFailure,
    },
    #[error("failed to allocate tensors")]
    Allocate(#[source] EngineFailure),
    #[error("failed to invoke model")]
    Invoke(#[source] EngineFailure),
    #[error("tensors are not allocated")]
    NotAllocated,
    #[error("tensors are already allocated")]
    AlreadyAllocated,
    #[error("tensor buffer is not contiguous")]
    NonContiguous,
    #[error("input tensor buffer holds {actual} values, {expected} are needed")]
    ShortBuffer { actual: usize, expected: usize },
    #[error("model has no {0} tensor")]
    MissingTensor(&'static str),
    #[error("tensor {name} has element type {found}, expected f32")]
    UnsupportedType { name: String, found: String },
    #[error("unsupported tensor shape {dims:?}: {reason}")]
    Shape { dims: Vec<i64>, reason: &'static str },
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to decode image {}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode image {}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot encode an image with {0} channels")]
    UnsupportedChannels(usize),
    #[error("image dimension {0} does not fit in u32")]
    Dimensions(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Model,
    Interpreter,
    Image,
    Validation,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("image holds {actual} bytes but input tensor {shape} needs {expected}")]
    InputSizeMismatch {
        actual: usize,
        expected: usize,
        shape: TensorShape,
    },
    #[error("output tensor holds {actual} values but shape {shape} declares {expected}")]
    OutputSizeMismatch {
        actual: usize,
        expected: usize,
        shape: TensorShape,
    },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Config(_) => ErrorKind::Config,
            PipelineError::Model(_) => ErrorKind::Model,
            PipelineError::Interpreter(_) => ErrorKind::Interpreter,
            PipelineError::Image(_) => ErrorKind::Image,
            PipelineError::InputSizeMismatch { .. } | PipelineError::OutputSizeMismatch { .. } => {
                ErrorKind::Validation
            }
        }
    }
}
