use image::imageops::FilterType;
use ndarray::{Array3, Array4, ArrayView3, Axis};

use crate::config::Settings;
use crate::error::PreprocessError;

pub const MIN_DIMENSION: u32 = 32;
pub const MAX_DIMENSION: u32 = 4096;

/// Turns uploaded image bytes into the normalized tensor the classifier
/// expects. Output shape is always (1, height, width, 3) regardless of the
/// input's size or color mode.
#[derive(Clone)]
pub struct ImageProcessor {
    width: u32,
    height: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImageProcessor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            width: settings.image_size[0],
            height: settings.image_size[1],
            mean: settings.normalize_mean,
            std: settings.normalize_std,
        }
    }

    pub fn process(&self, data: &[u8]) -> Result<Array4<f32>, PreprocessError> {
        let decoded = image::load_from_memory(data)?;

        let (width, height) = (decoded.width(), decoded.height());
        if width < MIN_DIMENSION || height < MIN_DIMENSION {
            return Err(PreprocessError::TooSmall {
                width,
                height,
                min: MIN_DIMENSION,
            });
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(PreprocessError::TooLarge {
                width,
                height,
                max: MAX_DIMENSION,
            });
        }

        // to_rgb8 coerces grayscale and alpha inputs to three channels.
        let rgb = decoded
            .resize_exact(self.width, self.height, FilterType::Lanczos3)
            .to_rgb8();

        let mut tensor = Array3::<f32>::zeros((self.height as usize, self.width as usize, 3));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                let scaled = pixel.0[c] as f32 / 255.0;
                tensor[[y as usize, x as usize, c]] = (scaled - self.mean[c]) / self.std[c];
            }
        }

        Ok(tensor.insert_axis(Axis(0)))
    }

    /// Inverse of the normalization, back to displayable 8-bit pixels
    /// clipped to [0, 255].
    pub fn denormalize(&self, tensor: &ArrayView3<f32>) -> Array3<u8> {
        Array3::from_shape_fn(tensor.dim(), |(y, x, c)| {
            let value = (tensor[[y, x, c]] * self.std[c] + self.mean[c]) * 255.0;
            value.clamp(0.0, 255.0) as u8
        })
    }
}
