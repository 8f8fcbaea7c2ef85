//! In-memory engine for tests. Behaves like an element-wise model and keeps a
//! log of every call the pipeline makes into it.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use super::{resolve_dims, Engine, Interpreter, InterpreterState, TensorInfo, TensorShape};
use crate::error::{InterpreterError, ModelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Load,
    Build,
    Allocate,
    Invoke,
}

#[derive(Debug, Default)]
pub struct CallLog {
    pub threads: Vec<usize>,
    pub acceleration: Vec<bool>,
    pub allocations: usize,
    pub invocations: usize,
    pub resized_to: Vec<TensorShape>,
    pub dropped_interpreters: usize,
}

pub struct StubEngine {
    input_dims: Vec<i64>,
    output_dims: Vec<i64>,
    op: fn(f32) -> f32,
    delay: Duration,
    read_delay: Duration,
    failure: Option<Failure>,
    calls: Rc<RefCell<CallLog>>,
}

impl StubEngine {
    /// An identity model whose input and output share `dims`.
    pub fn identity(dims: &[i64]) -> Self {
        Self {
            input_dims: dims.to_vec(),
            output_dims: dims.to_vec(),
            op: |x| x,
            delay: Duration::ZERO,
            read_delay: Duration::ZERO,
            failure: None,
            calls: Rc::default(),
        }
    }

    pub fn with_output_dims(mut self, dims: &[i64]) -> Self {
        self.output_dims = dims.to_vec();
        self
    }

    pub fn with_op(mut self, op: fn(f32) -> f32) -> Self {
        self.op = op;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Slows down every read of the output buffer.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn failing_at(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn calls(&self) -> std::cell::Ref<'_, CallLog> {
        self.calls.borrow()
    }

    fn fail(&self, at: Failure) -> bool {
        self.failure == Some(at)
    }
}

pub struct StubModel;

impl Engine for StubEngine {
    type Model = StubModel;
    type Interpreter = StubInterpreter;

    fn load_model(&self, path: &Path) -> Result<StubModel, ModelError> {
        if self.fail(Failure::Load) {
            return Err(ModelError::Empty(path.to_path_buf()));
        }
        Ok(StubModel)
    }

    fn build_interpreter(&self, _model: &StubModel) -> Result<StubInterpreter, InterpreterError> {
        if self.fail(Failure::Build) {
            return Err(InterpreterError::Build("stub refused to build".into()));
        }
        Ok(StubInterpreter {
            input_dims: self.input_dims.clone(),
            output_dims: self.output_dims.clone(),
            op: self.op,
            delay: self.delay,
            read_delay: self.read_delay,
            proposed_input: None,
            fail_allocate: self.fail(Failure::Allocate),
            fail_invoke: self.fail(Failure::Invoke),
            calls: Rc::clone(&self.calls),
            input: None,
            output: None,
        })
    }
}

pub struct StubInterpreter {
    input_dims: Vec<i64>,
    output_dims: Vec<i64>,
    op: fn(f32) -> f32,
    delay: Duration,
    read_delay: Duration,
    proposed_input: Option<TensorShape>,
    fail_allocate: bool,
    fail_invoke: bool,
    calls: Rc<RefCell<CallLog>>,
    input: Option<Vec<f32>>,
    output: Option<Vec<f32>>,
}

fn element_count(dims: &[i64]) -> usize {
    dims.iter().map(|&d| d.max(0) as usize).product()
}

impl Interpreter for StubInterpreter {
    fn set_num_threads(&mut self, threads: usize) -> Result<(), InterpreterError> {
        self.calls.borrow_mut().threads.push(threads);
        Ok(())
    }

    fn use_acceleration(&mut self, enable: bool) -> Result<(), InterpreterError> {
        self.calls.borrow_mut().acceleration.push(enable);
        Ok(())
    }

    fn resize_input(&mut self, shape: TensorShape) -> Result<(), InterpreterError> {
        self.calls.borrow_mut().resized_to.push(shape);
        self.proposed_input = Some(shape);
        Ok(())
    }

    fn allocate_tensors(&mut self) -> Result<(), InterpreterError> {
        self.calls.borrow_mut().allocations += 1;
        if self.fail_allocate {
            return Err(InterpreterError::Allocate("stub out of memory".into()));
        }
        // Dynamic dimensions follow the proposed input on both ends.
        let proposed = self.proposed_input;
        let resolved = |dims: &[i64]| -> Result<Vec<i64>, InterpreterError> {
            let dims = resolve_dims(dims, proposed.as_ref())?;
            Ok(dims.into_iter().map(|d| d as i64).collect())
        };
        self.input_dims = resolved(&self.input_dims)?;
        self.output_dims = resolved(&self.output_dims)?;
        self.input = Some(vec![0.0; element_count(&self.input_dims)]);
        self.output = Some(vec![0.0; element_count(&self.output_dims)]);
        Ok(())
    }

    fn input_count(&self) -> usize {
        1
    }

    fn output_count(&self) -> usize {
        1
    }

    fn input_dims(&self) -> Result<Vec<i64>, InterpreterError> {
        self.input.as_ref().ok_or(InterpreterError::NotAllocated)?;
        Ok(self.input_dims.clone())
    }

    fn output_dims(&self) -> Result<Vec<i64>, InterpreterError> {
        self.output.as_ref().ok_or(InterpreterError::NotAllocated)?;
        Ok(self.output_dims.clone())
    }

    fn input_buffer_mut(&mut self) -> Result<&mut [f32], InterpreterError> {
        self.input.as_deref_mut().ok_or(InterpreterError::NotAllocated)
    }

    fn output_buffer(&self) -> Result<&[f32], InterpreterError> {
        thread::sleep(self.read_delay);
        self.output.as_deref().ok_or(InterpreterError::NotAllocated)
    }

    fn invoke(&mut self) -> Result<(), InterpreterError> {
        self.calls.borrow_mut().invocations += 1;
        if self.fail_invoke {
            return Err(InterpreterError::Invoke("stub kernel failed".into()));
        }
        let (Some(input), Some(output)) = (&self.input, &mut self.output) else {
            return Err(InterpreterError::NotAllocated);
        };
        thread::sleep(self.delay);
        // Output element i reads input element i, wrapping when the output is larger.
        for (i, value) in output.iter_mut().enumerate() {
            *value = (self.op)(input[i % input.len()]);
        }
        Ok(())
    }

    fn state(&self) -> InterpreterState {
        let tensor = |name: &str, dims: &[i64]| TensorInfo {
            name: name.to_string(),
            bytes: Some(element_count(dims) * 4),
            element_type: "Float32".to_string(),
            scale: Some(0.0),
            zero_point: Some(0),
        };
        InterpreterState {
            tensors: vec![
                tensor("input", &self.input_dims),
                tensor("output", &self.output_dims),
            ],
            nodes: Some(1),
            inputs: vec![0],
            outputs: vec![1],
            producer: Some("stub".to_string()),
        }
    }
}

impl Drop for StubInterpreter {
    fn drop(&mut self) {
        self.calls.borrow_mut().dropped_interpreters += 1;
    }
}
