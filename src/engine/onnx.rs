use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};
use ort::{
    CUDAExecutionProvider, GraphOptimizationLevel, NNAPIExecutionProvider, Session,
    SessionBuilder, TensorElementType, ValueType,
};
use tracing::{debug, warn};

use super::{resolve_dims, Engine, Interpreter, InterpreterState, TensorInfo, TensorShape};
use crate::error::{InterpreterError, ModelError};

/// Runs ONNX models through ONNX Runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrtEngine;

pub struct OrtModel {
    path: PathBuf,
    bytes: Arc<[u8]>,
}

impl OrtModel {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Engine for OrtEngine {
    type Model = OrtModel;
    type Interpreter = OrtInterpreter;

    fn load_model(&self, path: &Path) -> Result<OrtModel, ModelError> {
        let bytes = fs::read(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(ModelError::Empty(path.to_path_buf()));
        }

        // Corrupt files fail here, not later in allocate_tensors.
        let parsed = Session::builder()
            .and_then(|builder| builder.commit_from_memory(&bytes))
            .map_err(|e| ModelError::Parse {
                path: path.to_path_buf(),
                source: e.into(),
            })?;
        drop(parsed);
        debug!(model = %path.display(), bytes = bytes.len(), "parsed model");

        Ok(OrtModel {
            path: path.to_path_buf(),
            bytes: bytes.into(),
        })
    }

    fn build_interpreter(&self, model: &OrtModel) -> Result<OrtInterpreter, InterpreterError> {
        let builder = Session::builder()
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .map_err(|e| InterpreterError::Build(e.into()))?;
        debug!(model = %model.path().display(), "session builder ready");

        Ok(OrtInterpreter {
            model: Arc::clone(&model.bytes),
            builder: Some(builder),
            session: None,
            input_name: String::new(),
            proposed_input: None,
            input: None,
            output: None,
        })
    }
}

/// The session is only committed by `allocate_tensors`; until then the
/// interpreter holds a builder that collects thread and provider settings.
pub struct OrtInterpreter {
    model: Arc<[u8]>,
    builder: Option<SessionBuilder>,
    session: Option<Session>,
    input_name: String,
    proposed_input: Option<TensorShape>,
    input: Option<ArrayD<f32>>,
    output: Option<ArrayD<f32>>,
}

impl OrtInterpreter {
    fn pending_builder(&mut self) -> Result<SessionBuilder, InterpreterError> {
        self.builder.take().ok_or(InterpreterError::AlreadyAllocated)
    }

    fn session(&self) -> Result<&Session, InterpreterError> {
        self.session.as_ref().ok_or(InterpreterError::NotAllocated)
    }
}

impl Interpreter for OrtInterpreter {
    fn set_num_threads(&mut self, threads: usize) -> Result<(), InterpreterError> {
        let builder = self
            .pending_builder()?
            .with_intra_threads(threads)
            .map_err(|e| InterpreterError::Configure {
                what: "threads",
                source: e.into(),
            })?;
        self.builder = Some(builder);
        Ok(())
    }

    fn use_acceleration(&mut self, enable: bool) -> Result<(), InterpreterError> {
        if !enable {
            return Ok(());
        }
        // Providers that fail to register are skipped and the session falls back to CPU.
        let builder = self
            .pending_builder()?
            .with_execution_providers([
                NNAPIExecutionProvider::default().build(),
                CUDAExecutionProvider::default().build(),
            ])
            .map_err(|e| InterpreterError::Configure {
                what: "execution providers",
                source: e.into(),
            })?;
        self.builder = Some(builder);
        Ok(())
    }

    fn resize_input(&mut self, shape: TensorShape) -> Result<(), InterpreterError> {
        if self.session.is_some() {
            return Err(InterpreterError::AlreadyAllocated);
        }
        self.proposed_input = Some(shape);
        Ok(())
    }

    fn allocate_tensors(&mut self) -> Result<(), InterpreterError> {
        let session = self
            .pending_builder()?
            .commit_from_memory(&self.model[..])
            .map_err(|e| InterpreterError::Allocate(e.into()))?;

        let input = session
            .inputs
            .first()
            .ok_or(InterpreterError::MissingTensor("input"))?;
        if session.outputs.is_empty() {
            return Err(InterpreterError::MissingTensor("output"));
        }
        let dims = match &input.input_type {
            ValueType::Tensor {
                ty: TensorElementType::Float32,
                dimensions,
                ..
            } => resolve_dims(dimensions, self.proposed_input.as_ref())?,
            other => {
                return Err(InterpreterError::UnsupportedType {
                    name: input.name.clone(),
                    found: format!("{other:?}"),
                })
            }
        };
        debug!(input = %input.name, ?dims, "allocated input tensor");

        self.input_name = input.name.clone();
        self.input = Some(ArrayD::zeros(IxDyn(&dims)));
        self.output = None;
        self.session = Some(session);
        Ok(())
    }

    fn input_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.inputs.len())
    }

    fn output_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.outputs.len())
    }

    fn input_dims(&self) -> Result<Vec<i64>, InterpreterError> {
        let input = self.input.as_ref().ok_or(InterpreterError::NotAllocated)?;
        Ok(input.shape().iter().map(|&d| d as i64).collect())
    }

    fn output_dims(&self) -> Result<Vec<i64>, InterpreterError> {
        if let Some(output) = &self.output {
            return Ok(output.shape().iter().map(|&d| d as i64).collect());
        }
        let output = self
            .session()?
            .outputs
            .first()
            .ok_or(InterpreterError::MissingTensor("output"))?;
        match &output.output_type {
            ValueType::Tensor { dimensions, .. } => Ok(dimensions.clone()),
            other => Err(InterpreterError::UnsupportedType {
                name: output.name.clone(),
                found: format!("{other:?}"),
            }),
        }
    }

    fn input_buffer_mut(&mut self) -> Result<&mut [f32], InterpreterError> {
        self.input
            .as_mut()
            .ok_or(InterpreterError::NotAllocated)?
            .as_slice_mut()
            .ok_or(InterpreterError::NonContiguous)
    }

    fn output_buffer(&self) -> Result<&[f32], InterpreterError> {
        self.output
            .as_ref()
            .ok_or(InterpreterError::NotAllocated)?
            .as_slice()
            .ok_or(InterpreterError::NonContiguous)
    }

    fn invoke(&mut self) -> Result<(), InterpreterError> {
        let session = self.session.as_ref().ok_or(InterpreterError::NotAllocated)?;
        let input = self.input.as_ref().ok_or(InterpreterError::NotAllocated)?;

        let inputs = ort::inputs![self.input_name.as_str() => input.view()]
            .map_err(|e| InterpreterError::Invoke(e.into()))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| InterpreterError::Invoke(e.into()))?;
        // The session owns its outputs, so the copy out is part of the run.
        let output = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InterpreterError::Invoke(e.into()))?
            .as_standard_layout()
            .into_owned();
        drop(outputs);

        self.output = Some(output);
        Ok(())
    }

    fn state(&self) -> InterpreterState {
        let Some(session) = &self.session else {
            return InterpreterState::default();
        };

        let inputs = session.inputs.iter().map(|i| tensor_info(&i.name, &i.input_type));
        let outputs = session
            .outputs
            .iter()
            .map(|o| tensor_info(&o.name, &o.output_type));
        let input_count = session.inputs.len();
        let output_count = session.outputs.len();

        let producer = match session.metadata().and_then(|m| m.producer()) {
            Ok(producer) => Some(producer),
            Err(e) => {
                warn!("failed to read model metadata: {e}");
                None
            }
        };

        InterpreterState {
            tensors: inputs.chain(outputs).collect(),
            // ONNX Runtime does not expose the graph's node count.
            nodes: None,
            inputs: (0..input_count).collect(),
            outputs: (input_count..input_count + output_count).collect(),
            producer,
        }
    }
}

fn element_size(ty: &TensorElementType) -> Option<usize> {
    match ty {
        TensorElementType::Float64 | TensorElementType::Int64 => Some(8),
        TensorElementType::Float32 | TensorElementType::Int32 => Some(4),
        TensorElementType::Int16 | TensorElementType::Uint16 => Some(2),
        TensorElementType::Int8 | TensorElementType::Uint8 | TensorElementType::Bool => Some(1),
        _ => None,
    }
}

fn tensor_info(name: &str, value_type: &ValueType) -> TensorInfo {
    let (element_type, bytes) = match value_type {
        ValueType::Tensor { ty, dimensions, .. } => {
            let count = dimensions
                .iter()
                .map(|&d| usize::try_from(d).ok())
                .product::<Option<usize>>();
            (format!("{ty:?}"), count.zip(element_size(ty)).map(|(n, size)| n * size))
        }
        other => (format!("{other:?}"), None),
    };

    TensorInfo {
        name: name.to_string(),
        bytes,
        element_type,
        // Quantization parameters are not part of ONNX tensor metadata.
        scale: None,
        zero_point: None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::Config;
    use crate::error::ErrorKind;
    use crate::pipeline;

    #[test]
    fn element_sizes_follow_the_element_type() {
        assert_eq!(element_size(&TensorElementType::Float32), Some(4));
        assert_eq!(element_size(&TensorElementType::Int64), Some(8));
        assert_eq!(element_size(&TensorElementType::Uint8), Some(1));
        assert_eq!(element_size(&TensorElementType::String), None);
    }

    #[test]
    fn missing_model_file_is_a_model_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = OrtEngine.load_model(&dir.path().join("missing.onnx"));
        assert!(matches!(result, Err(ModelError::Read { .. })));
    }

    #[test]
    fn empty_model_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = OrtEngine.load_model(file.path());
        assert!(matches!(result, Err(ModelError::Empty(_))));
    }

    #[test]
    fn unparsable_model_is_a_model_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a model").unwrap();

        let result = OrtEngine.load_model(file.path());
        assert!(matches!(result, Err(ModelError::Parse { .. })));

        let config = Config {
            model_path: file.path().to_path_buf(),
            input_path: "img.bmp".into(),
            ..Config::default()
        };
        let err = pipeline::initialize(&OrtEngine, &config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Model);
    }
}
