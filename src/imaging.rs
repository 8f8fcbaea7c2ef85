use std::path::Path;

use image::{ColorType, GenericImageView};
use tracing::debug;

use crate::error::ImageError;

/// Row-major, channel-interleaved 8-bit pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

/// Denormalized model output, laid out like [`DecodedImage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputImage {
    pub pixels: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

/// Grayscale stays single channel, anything with alpha becomes RGBA and the
/// rest is converted to 8-bit RGB.
pub fn decode(path: &Path) -> Result<DecodedImage, ImageError> {
    let img = image::open(path).map_err(|source| ImageError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let (width, height) = img.dimensions();

    let (pixels, channels) = match img.color().channel_count() {
        1 => (img.to_luma8().into_raw(), 1),
        2 | 4 => (img.to_rgba8().into_raw(), 4),
        _ => (img.to_rgb8().into_raw(), 3),
    };
    debug!(path = %path.display(), width, height, channels, "decoded image");

    Ok(DecodedImage {
        pixels,
        width,
        height,
        channels,
    })
}

pub fn encode(path: &Path, output: &OutputImage) -> Result<(), ImageError> {
    let color = match output.channels {
        1 => ColorType::L8,
        3 => ColorType::Rgb8,
        4 => ColorType::Rgba8,
        other => return Err(ImageError::UnsupportedChannels(other)),
    };
    let width = u32::try_from(output.width).map_err(|_| ImageError::Dimensions(output.width))?;
    let height =
        u32::try_from(output.height).map_err(|_| ImageError::Dimensions(output.height))?;

    image::save_buffer(path, &output.pixels, width, height, color).map_err(|source| {
        ImageError::Encode {
            path: path.to_path_buf(),
            source,
        }
    })
}
