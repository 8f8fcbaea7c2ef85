//! Boundary between the inference pipeline and the engine that executes the
//! network. The pipeline only ever talks to [`Engine`] and [`Interpreter`];
//! [`OrtEngine`] runs models through ONNX Runtime.

pub mod onnx;
#[cfg(test)]
pub mod stub;

use std::fmt;
use std::path::Path;

use crate::error::{InterpreterError, ModelError};

pub use self::onnx::OrtEngine;

/// Loads models and builds interpreters for them.
pub trait Engine {
    type Model;
    type Interpreter: Interpreter;

    fn load_model(&self, path: &Path) -> Result<Self::Model, ModelError>;

    fn build_interpreter(&self, model: &Self::Model) -> Result<Self::Interpreter, InterpreterError>;
}

/// A runnable instance of a model.
///
/// Configuration calls (`set_num_threads`, `use_acceleration`) must come before
/// `allocate_tensors`. Dimensions and buffers are only meaningful afterwards.
/// Only the first input and the first output tensor are exposed.
pub trait Interpreter {
    fn set_num_threads(&mut self, threads: usize) -> Result<(), InterpreterError>;

    fn use_acceleration(&mut self, enable: bool) -> Result<(), InterpreterError>;

    /// Proposes a concrete shape for the input. Engines use it only to fill
    /// dimensions the model leaves dynamic; static dimensions always win.
    fn resize_input(&mut self, _shape: TensorShape) -> Result<(), InterpreterError> {
        Ok(())
    }

    fn allocate_tensors(&mut self) -> Result<(), InterpreterError>;

    fn input_count(&self) -> usize;

    fn output_count(&self) -> usize;

    fn input_dims(&self) -> Result<Vec<i64>, InterpreterError>;

    /// Engines with dynamic output dimensions report the concrete ones once
    /// the model has been invoked.
    fn output_dims(&self) -> Result<Vec<i64>, InterpreterError>;

    fn input_buffer_mut(&mut self) -> Result<&mut [f32], InterpreterError>;

    fn output_buffer(&self) -> Result<&[f32], InterpreterError>;

    /// Runs the model once. Whatever the engine needs to make the first
    /// output readable through `output_buffer` is part of this call and so
    /// part of the measured latency.
    fn invoke(&mut self) -> Result<(), InterpreterError>;

    fn state(&self) -> InterpreterState;
}

/// Dimensions of an NHWC image tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub batch: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl TensorShape {
    pub fn from_dims(dims: &[i64]) -> Result<Self, InterpreterError> {
        let shape_error = |reason| InterpreterError::Shape {
            dims: dims.to_vec(),
            reason,
        };
        let [batch, height, width, channels] = dims else {
            return Err(shape_error("expected 4 dimensions"));
        };
        let dim = |value: i64| {
            usize::try_from(value)
                .ok()
                .filter(|&v| v > 0)
                .ok_or_else(|| shape_error("dimensions must be positive"))
        };
        Ok(Self {
            batch: dim(*batch)?,
            height: dim(*height)?,
            width: dim(*width)?,
            channels: dim(*channels)?,
        })
    }

    /// Values in one image of the batch.
    pub fn pixel_values(&self) -> usize {
        self.height * self.width * self.channels
    }
}

/// Replaces dynamic (non-positive) dimensions of an NHWC tensor: the batch
/// becomes 1 and the others come from `proposed` when one was given.
pub fn resolve_dims(
    dims: &[i64],
    proposed: Option<&TensorShape>,
) -> Result<Vec<usize>, InterpreterError> {
    let fallback = |axis: usize| match (axis, proposed) {
        (0, _) => Some(1),
        (1, Some(shape)) => Some(shape.height),
        (2, Some(shape)) => Some(shape.width),
        (3, Some(shape)) => Some(shape.channels),
        _ => None,
    };
    dims.iter()
        .enumerate()
        .map(|(axis, &dim)| match usize::try_from(dim) {
            Ok(dim) if dim > 0 => Ok(dim),
            _ => fallback(axis).ok_or_else(|| InterpreterError::Shape {
                dims: dims.to_vec(),
                reason: "dynamic dimension with no proposed input shape",
            }),
        })
        .collect()
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.batch, self.height, self.width, self.channels
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    /// `None` when the tensor has dynamic dimensions.
    pub bytes: Option<usize>,
    pub element_type: String,
    pub scale: Option<f32>,
    pub zero_point: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterpreterState {
    pub tensors: Vec<TensorInfo>,
    pub nodes: Option<usize>,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub producer: Option<String>,
}
