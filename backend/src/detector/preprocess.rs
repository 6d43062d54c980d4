use image::imageops::FilterType;

use super::model::InferenceError;

/// Image converted to the model's square input, plus what is needed to map boxes back.
pub struct PreparedImage {
    /// CHW, RGB, scaled to `[0, 1]`.
    pub data: Vec<f32>,
    pub input_size: u32,
    pub source_width: u32,
    pub source_height: u32,
}

impl PreparedImage {
    /// Factors taking model-space coordinates back to source pixels.
    pub fn scale(&self) -> (f32, f32) {
        (
            self.source_width as f32 / self.input_size as f32,
            self.source_height as f32 / self.input_size as f32,
        )
    }
}

pub fn prepare(image_bytes: &[u8], input_size: u32) -> Result<PreparedImage, InferenceError> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| InferenceError::InvalidImage(e.to_string()))?;
    let (source_width, source_height) = (img.width(), img.height());
    if source_width == 0 || source_height == 0 {
        return Err(InferenceError::InvalidImage("image has no pixels".to_string()));
    }

    let resized = img
        .resize_exact(input_size, input_size, FilterType::Triangle)
        .to_rgb8();
    let plane = (input_size * input_size) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = (y * input_size + x) as usize;
        for channel in 0..3 {
            data[channel * plane + offset] = pixel[channel] as f32 / 255.0;
        }
    }

    Ok(PreparedImage {
        data,
        input_size,
        source_width,
        source_height,
    })
}
