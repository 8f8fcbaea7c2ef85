use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::Parser;

use crate::error::ConfigError;

/// Runs a convolutional network over one image and writes the transformed image.
#[derive(Parser, Debug)]
#[command(name = "cnn_inference", version, about, long_about = None)]
pub struct Cli {
    /// Use hardware acceleration [0|1]
    #[arg(short = 'a', long = "accelerated", default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=1))]
    pub accelerated: u8,

    /// Input mean
    #[arg(short = 'b', long = "input_mean", default_value_t = 0.0, allow_negative_numbers = true)]
    pub input_mean: f32,

    /// Run the interpreter this many times
    #[arg(short = 'c', long = "count", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub count: u32,

    /// Input image
    #[arg(short = 'i', long = "input_image", value_name = "FILE")]
    pub input_image: PathBuf,

    /// Model file
    #[arg(short = 'm', long = "tflite_model", visible_alias = "model", value_name = "FILE")]
    pub model: PathBuf,

    /// Output image, format taken from the extension
    #[arg(short = 'o', long = "output_image", value_name = "FILE")]
    pub output_image: Option<PathBuf>,

    /// Input standard deviation
    #[arg(short = 's', long = "input_std", default_value_t = 1.0, allow_negative_numbers = true)]
    pub input_std: f32,

    /// Number of threads, -1 keeps the engine default
    #[arg(short = 't', long = "threads", default_value_t = -1, allow_negative_numbers = true)]
    pub threads: i32,

    /// Print more information [0|1]
    #[arg(short = 'v', long = "verbose", default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=1))]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
}

impl Default for Normalization {
    fn default() -> Self {
        Self { mean: 0.0, std: 1.0 }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub model_path: PathBuf,
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub normalization: Normalization,
    /// `None` leaves the engine's thread setting untouched.
    pub threads: Option<NonZeroUsize>,
    pub accelerated: bool,
    pub loop_count: u32,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            input_path: PathBuf::new(),
            output_path: None,
            normalization: Normalization::default(),
            threads: None,
            accelerated: false,
            loop_count: 1,
            verbose: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingModelPath);
        }
        if self.input_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingInputPath);
        }
        if self.loop_count == 0 {
            return Err(ConfigError::ZeroCount);
        }
        let std = self.normalization.std;
        if std == 0.0 || !std.is_finite() {
            return Err(ConfigError::InvalidStd(std));
        }
        Ok(())
    }
}

fn parse_threads(threads: i32) -> Result<Option<NonZeroUsize>, ConfigError> {
    if threads == -1 {
        return Ok(None);
    }
    usize::try_from(threads)
        .ok()
        .and_then(NonZeroUsize::new)
        .map(Some)
        .ok_or(ConfigError::InvalidThreads(threads))
}

impl TryFrom<Cli> for Config {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let config = Config {
            model_path: cli.model,
            input_path: cli.input_image,
            output_path: cli.output_image,
            normalization: Normalization {
                mean: cli.input_mean,
                std: cli.input_std,
            },
            threads: parse_threads(cli.threads)?,
            accelerated: cli.accelerated != 0,
            loop_count: cli.count,
            verbose: cli.verbose != 0,
        };
        config.validate()?;
        Ok(config)
    }
}
