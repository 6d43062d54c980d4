//! Draws detection boxes onto a copy of an uploaded image.

use std::path::Path;

use image::{ImageReader, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use shared::DetectionItem;

use super::model::InferenceError;

const LINE_WIDTH: i32 = 3;

/// Name of the annotated rendering for a stored upload.
pub fn annotated_name(stored_filename: &str) -> String {
    format!("boxed_{}", stored_filename)
}

fn class_color(class_id: u32) -> Rgb<u8> {
    const PALETTE: [[u8; 3]; 8] = [
        [255, 56, 56],
        [255, 157, 151],
        [255, 112, 31],
        [255, 178, 29],
        [207, 210, 49],
        [72, 249, 10],
        [146, 204, 23],
        [61, 219, 134],
    ];
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// Writes `boxed_<name>` into `annotated_dir` and returns that filename.
pub fn save_annotated(
    image_path: &Path,
    detections: &[DetectionItem],
    annotated_dir: &Path,
) -> Result<String, InferenceError> {
    let stored_filename = image_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| InferenceError::Annotation(format!("no file name in {}", image_path.display())))?;

    let invalid = |e: &dyn std::fmt::Display| {
        InferenceError::InvalidImage(format!("{}: {}", image_path.display(), e))
    };
    // sniff the format from the bytes; the stored extension may not match
    let mut canvas = ImageReader::open(image_path)
        .map_err(|e| invalid(&e))?
        .with_guessed_format()
        .map_err(|e| invalid(&e))?
        .decode()
        .map_err(|e| invalid(&e))?
        .to_rgb8();
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);

    for detection in detections {
        let [x1, y1, x2, y2] = detection.bbox.map(|v| v.round() as i32);
        let x_min = x1.min(x2).clamp(0, width - 1);
        let y_min = y1.min(y2).clamp(0, height - 1);
        let x_max = x1.max(x2).clamp(0, width - 1);
        let y_max = y1.max(y2).clamp(0, height - 1);
        let color = class_color(detection.label_id);

        for inset in 0..LINE_WIDTH {
            let rect_width = x_max - x_min - 2 * inset + 1;
            let rect_height = y_max - y_min - 2 * inset + 1;
            if rect_width <= 0 || rect_height <= 0 {
                break;
            }
            let rect = Rect::at(x_min + inset, y_min + inset)
                .of_size(rect_width as u32, rect_height as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }

    std::fs::create_dir_all(annotated_dir)
        .map_err(|e| InferenceError::Annotation(e.to_string()))?;
    let filename = annotated_name(stored_filename);
    canvas
        .save(annotated_dir.join(&filename))
        .map_err(|e| InferenceError::Annotation(e.to_string()))?;
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn draws_boxes_into_a_separate_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("20250101120000_abc.png");
        RgbImage::from_pixel(64, 48, Rgb([0, 0, 0])).save(&source).unwrap();

        let detections = vec![DetectionItem {
            label: "Cigarette".to_string(),
            label_id: 1,
            confidence: 0.8,
            bbox: [8.0, 6.0, 40.0, 30.0],
        }];
        let annotated_dir = dir.path().join("annotated");
        let name = save_annotated(&source, &detections, &annotated_dir).unwrap();
        assert_eq!(name, "boxed_20250101120000_abc.png");

        let annotated = image::open(annotated_dir.join(&name)).unwrap().to_rgb8();
        assert_eq!(*annotated.get_pixel(8, 6), class_color(1));
        assert_eq!(*annotated.get_pixel(20, 15), Rgb([0, 0, 0]));

        let original = image::open(&source).unwrap().to_rgb8();
        assert_eq!(*original.get_pixel(8, 6), Rgb([0, 0, 0]));
    }

    #[test]
    fn boxes_outside_the_frame_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("edge.png");
        RgbImage::from_pixel(16, 16, Rgb([10, 10, 10])).save(&source).unwrap();

        let detections = vec![DetectionItem {
            label: "Styrofoam".to_string(),
            label_id: 7,
            confidence: 0.5,
            bbox: [-20.0, -5.0, 500.0, 300.0],
        }];
        let name = save_annotated(&source, &detections, dir.path()).unwrap();
        let annotated = image::open(dir.path().join(name)).unwrap().to_rgb8();
        assert_eq!(*annotated.get_pixel(0, 0), class_color(7));
        assert_eq!(*annotated.get_pixel(15, 15), class_color(7));
    }

    #[test]
    fn decodes_by_content_not_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png_source = dir.path().join("png_bytes.png");
        RgbImage::from_pixel(32, 32, Rgb([0, 0, 0])).save(&png_source).unwrap();
        let source = dir.path().join("20250101120000_abc.jpg");
        std::fs::copy(&png_source, &source).unwrap();

        let detections = vec![DetectionItem {
            label: "Glass Waste".to_string(),
            label_id: 3,
            confidence: 0.6,
            bbox: [4.0, 4.0, 20.0, 20.0],
        }];
        let name = save_annotated(&source, &detections, dir.path()).unwrap();
        assert_eq!(name, "boxed_20250101120000_abc.jpg");
        let annotated = image::open(dir.path().join(name)).unwrap().to_rgb8();
        assert_eq!(annotated.dimensions(), (32, 32));
    }

    #[test]
    fn unreadable_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.jpg");
        std::fs::write(&source, b"not an image").unwrap();
        let err = save_annotated(&source, &[], dir.path()).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidImage(_)));
    }
}
