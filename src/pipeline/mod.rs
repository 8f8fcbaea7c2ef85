//! The inference pipeline.
//!
//! Each stage is its own type and consumes the previous one, so the order
//! load → allocate → populate → invoke → convert cannot be skipped or
//! reordered. On any error the stage value is dropped, which releases the
//! interpreter and then the model.

pub mod postprocessing;
pub mod preprocessing;

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{Config, Normalization};
use crate::engine::{Engine, Interpreter, InterpreterState, TensorShape};
use crate::error::PipelineError;
use crate::imaging::{self, DecodedImage, OutputImage};
use crate::report;

use self::postprocessing::convert_output;
use self::preprocessing::convert_input;

/// Timings and shapes of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub input_shape: TensorShape,
    pub output_shape: TensorShape,
    /// One entry per invocation, measured around the engine call only.
    pub invocations: Vec<Duration>,
    /// Interpreter diagnostics, collected only for verbose runs.
    pub state: Option<InterpreterState>,
}

impl RunReport {
    pub fn total(&self) -> Duration {
        self.invocations.iter().sum()
    }

    pub fn average(&self) -> Duration {
        match u32::try_from(self.invocations.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(count) => self.total() / count,
        }
    }
}

#[derive(Debug)]
pub struct RunOutput {
    pub image: OutputImage,
    pub report: RunReport,
}

/// Model and interpreter, configured but without tensors.
pub struct Loaded<E: Engine> {
    // Declared first so the interpreter is dropped before its model.
    interpreter: E::Interpreter,
    _model: E::Model,
    verbose: bool,
}

pub struct Allocated<E: Engine> {
    loaded: Loaded<E>,
    input_shape: TensorShape,
    state: Option<InterpreterState>,
}

pub struct Populated<E: Engine> {
    allocated: Allocated<E>,
}

pub struct Invoked<E: Engine> {
    allocated: Allocated<E>,
    invocations: Vec<Duration>,
}

pub fn initialize<E: Engine>(engine: &E, config: &Config) -> Result<Loaded<E>, PipelineError> {
    config.validate()?;

    let model = engine.load_model(&config.model_path)?;
    info!(model = %config.model_path.display(), "loaded model");

    let mut interpreter = engine.build_interpreter(&model)?;
    interpreter.use_acceleration(config.accelerated)?;
    if let Some(threads) = config.threads {
        interpreter.set_num_threads(threads.get())?;
    }
    debug!(accelerated = config.accelerated, threads = ?config.threads, "built interpreter");

    Ok(Loaded {
        interpreter,
        _model: model,
        verbose: config.verbose,
    })
}

impl<E: Engine> Loaded<E> {
    /// Allocates tensors for `image`. The image only fills dimensions the
    /// model declares as dynamic; the shape read back afterwards is the
    /// model's.
    pub fn allocate(mut self, image: &DecodedImage) -> Result<Allocated<E>, PipelineError> {
        self.interpreter.resize_input(TensorShape {
            batch: 1,
            height: image.height as usize,
            width: image.width as usize,
            channels: usize::from(image.channels),
        })?;
        self.interpreter.allocate_tensors()?;

        let inputs = self.interpreter.input_count();
        let outputs = self.interpreter.output_count();
        if inputs > 1 || outputs > 1 {
            warn!(
                inputs,
                outputs, "model has several inputs or outputs, only the first of each is used"
            );
        }
        let state = self.verbose.then(|| self.interpreter.state());
        if let Some(state) = &state {
            report::log_interpreter_state(state);
        }

        let input_shape = TensorShape::from_dims(&self.interpreter.input_dims()?)?;
        info!(
            batch = input_shape.batch,
            height = input_shape.height,
            width = input_shape.width,
            channels = input_shape.channels,
            "wanted input shape"
        );

        Ok(Allocated {
            loaded: self,
            input_shape,
            state,
        })
    }
}

impl<E: Engine> Allocated<E> {
    pub fn populate(
        mut self,
        image: &DecodedImage,
        normalization: Normalization,
    ) -> Result<Populated<E>, PipelineError> {
        let tensor = self.loaded.interpreter.input_buffer_mut()?;
        convert_input(image, &self.input_shape, normalization, tensor)?;
        Ok(Populated { allocated: self })
    }
}

impl<E: Engine> Populated<E> {
    /// Invokes the model `count` times against the same input tensor.
    pub fn invoke(mut self, count: u32) -> Result<Invoked<E>, PipelineError> {
        let interpreter = &mut self.allocated.loaded.interpreter;
        let mut invocations = Vec::with_capacity(count as usize);

        for run in 0..count {
            let start = Instant::now();
            interpreter.invoke()?;
            let elapsed = start.elapsed();
            debug!(run, elapsed_ms = report::millis(elapsed), "invoked");
            invocations.push(elapsed);
        }

        Ok(Invoked {
            allocated: self.allocated,
            invocations,
        })
    }
}

impl<E: Engine> Invoked<E> {
    pub fn convert_output(self) -> Result<RunOutput, PipelineError> {
        let interpreter = &self.allocated.loaded.interpreter;
        let output_shape = TensorShape::from_dims(&interpreter.output_dims()?)?;
        let image = convert_output(interpreter.output_buffer()?, &output_shape)?;

        Ok(RunOutput {
            image,
            report: RunReport {
                input_shape: self.allocated.input_shape,
                output_shape,
                invocations: self.invocations,
                state: self.allocated.state,
            },
        })
    }
}

/// Runs one configured inference: loads the model, feeds it the input image,
/// and writes the output image when a path is configured.
pub fn run<E: Engine>(engine: &E, config: &Config) -> Result<RunOutput, PipelineError> {
    let loaded = initialize(engine, config)?;
    let image = imaging::decode(&config.input_path)?;
    info!(
        path = %config.input_path.display(),
        width = image.width,
        height = image.height,
        channels = image.channels,
        "read input image"
    );
    let output = run_loaded(loaded, &image, config)?;

    if let Some(path) = &config.output_path {
        imaging::encode(path, &output.image)?;
        info!(path = %path.display(), "wrote output image");
    }
    Ok(output)
}

/// Everything after initialization, for an image already in memory.
pub fn run_loaded<E: Engine>(
    loaded: Loaded<E>,
    image: &DecodedImage,
    config: &Config,
) -> Result<RunOutput, PipelineError> {
    let output = loaded
        .allocate(image)?
        .populate(image, config.normalization)?
        .invoke(config.loop_count)?
        .convert_output()?;

    report::log_run(&output.report, config.verbose);
    Ok(output)
}
