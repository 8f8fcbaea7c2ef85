use crate::config::Normalization;
use crate::engine::TensorShape;
use crate::error::{InterpreterError, PipelineError};
use crate::imaging::DecodedImage;

impl Normalization {
    /// Scales a pixel into `[0, 1]`, then shifts by the mean and divides by
    /// the standard deviation. The defaults leave `pixel / 255` unchanged.
    pub fn apply(&self, pixel: u8) -> f32 {
        let scaled = f64::from(pixel) / 255.0;
        ((scaled - f64::from(self.mean)) / f64::from(self.std)) as f32
    }
}

/// Writes the normalized image into the first batch entry of `tensor`.
/// Pixels keep their linear index; no layout conversion is done.
pub fn convert_input(
    image: &DecodedImage,
    shape: &TensorShape,
    normalization: Normalization,
    tensor: &mut [f32],
) -> Result<(), PipelineError> {
    let expected = shape.pixel_values();
    if image.pixels.len() != expected {
        return Err(PipelineError::InputSizeMismatch {
            actual: image.pixels.len(),
            expected,
            shape: *shape,
        });
    }
    if tensor.len() < expected {
        return Err(InterpreterError::ShortBuffer {
            actual: tensor.len(),
            expected,
        }
        .into());
    }

    for (value, &pixel) in tensor.iter_mut().zip(&image.pixels) {
        *value = normalization.apply(pixel);
    }

    Ok(())
}
