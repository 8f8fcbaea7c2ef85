use crate::engine::TensorShape;
use crate::error::PipelineError;
use crate::imaging::OutputImage;

/// Float-to-int `as` truncates toward zero and saturates, so values outside
/// `[0, 1]` clamp to 0 or 255 and NaN maps to 0.
pub fn denormalize(value: f32) -> u8 {
    (value * 255.0) as u8
}

/// Reads the first batch entry of the output tensor back into 8-bit pixels,
/// sized from the output shape rather than the input image.
pub fn convert_output(tensor: &[f32], shape: &TensorShape) -> Result<OutputImage, PipelineError> {
    let expected = shape.pixel_values();
    if tensor.len() < expected {
        return Err(PipelineError::OutputSizeMismatch {
            actual: tensor.len(),
            expected,
            shape: *shape,
        });
    }

    Ok(OutputImage {
        pixels: tensor[..expected].iter().map(|&v| denormalize(v)).collect(),
        width: shape.width,
        height: shape.height,
        channels: shape.channels,
    })
}
