use std::collections::HashMap;

use ndarray::ArrayViewD;

use super::model::{InferenceError, RawDetection};

/// Decodes a YOLOv8 detection head of shape `[1, 4 + num_classes, num_anchors]`.
///
/// Boxes come out as centre/size in model input space; they are converted to corners and
/// rescaled by `scale` (`source / input` per axis) into source image pixels.
pub fn decode_yolo_output(
    output: ArrayViewD<'_, f32>,
    confidence_threshold: f32,
    iou_threshold: f32,
    scale: (f32, f32),
) -> Result<Vec<RawDetection>, InferenceError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 {
        return Err(InferenceError::Backend(format!(
            "unexpected output shape {:?}, expected [1, 4 + classes, anchors]",
            shape
        )));
    }
    if shape[1] <= 4 {
        return Err(InferenceError::Backend(format!(
            "output has {} rows, need at least one class score",
            shape[1]
        )));
    }
    let num_classes = shape[1] - 4;
    let num_anchors = shape[2];
    let (scale_x, scale_y) = scale;

    let mut detections = Vec::new();
    for i in 0..num_anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for class_idx in 0..num_classes {
            let score = output[[0, 4 + class_idx, i]];
            if score > best_score {
                best_score = score;
                best_class = class_idx;
            }
        }
        if best_score <= confidence_threshold {
            continue;
        }

        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];
        detections.push(RawDetection {
            class_id: best_class as u32,
            confidence: best_score,
            bbox: [
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ],
        });
    }

    let mut kept = non_max_suppression(detections, iou_threshold);
    kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(kept)
}

/// Per-class greedy suppression: within a class, drop any box overlapping a stronger one
/// by more than `iou_threshold`.
pub fn non_max_suppression(detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    let mut by_class: HashMap<u32, Vec<RawDetection>> = HashMap::new();
    for detection in detections {
        by_class.entry(detection.class_id).or_default().push(detection);
    }

    let mut kept = Vec::new();
    for (_, mut group) in by_class {
        group.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut suppressed = vec![false; group.len()];
        for i in 0..group.len() {
            if suppressed[i] {
                continue;
            }
            for j in (i + 1)..group.len() {
                if !suppressed[j] && iou(&group[i].bbox, &group[j].bbox) > iou_threshold {
                    suppressed[j] = true;
                }
            }
            kept.push(group[i].clone());
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let area = |r: &[f32; 4]| ((r[2] - r[0]).max(0.0)) * ((r[3] - r[1]).max(0.0));
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);
    let intersection = if x2 > x1 && y2 > y1 {
        (x2 - x1) * (y2 - y1)
    } else {
        0.0
    };
    let union = area(a) + area(b) - intersection;
    if union > 0.0 { intersection / union } else { 0.0 }
}
