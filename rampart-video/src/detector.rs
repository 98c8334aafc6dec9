//! Optional object detection: YOLOv8 in ONNX form, run through tract.
//!
//! The pipeline treats detection as best-effort garnish: a failed
//! inference logs a warning and yields an empty list, never an aborted
//! frame.

use std::path::Path;

use tract_onnx::prelude::*;
use tracing::debug;

use rampart_types::{Detection, PixelBox};

use crate::{Error, Result};

const INPUT_SIZE: usize = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;

pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

pub trait Detector: Send {
    fn detect(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;
}

/// Detection disabled: always returns an empty list.
#[derive(Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn detect(&mut self, _rgb: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct YoloV8Detector {
    plan: OnnxPlan,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloV8Detector {
    pub fn load(model_path: &Path) -> Result<Self> {
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| Error::Inference(e.to_string()))?
            .with_input_fact(
                0,
                f32::fact([1, 3, INPUT_SIZE, INPUT_SIZE]).into(),
            )
            .map_err(|e| Error::Inference(e.to_string()))?
            .into_optimized()
            .map_err(|e| Error::Inference(e.to_string()))?
            .into_runnable()
            .map_err(|e| Error::Inference(e.to_string()))?;
        debug!("YOLOv8 model loaded from {}", model_path.display());
        Ok(YoloV8Detector {
            plan,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
        })
    }
}

impl Detector for YoloV8Detector {
    fn detect(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let letterbox = Letterbox::fit(width, height, INPUT_SIZE as u32);
        let input = letterbox_tensor(rgb, width, height, &letterbox);

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| Error::Inference(e.to_string()))?;
        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| Error::Inference(e.to_string()))?;

        // Output layout: [1, 4 + classes, anchors].
        let shape = view.shape();
        if shape.len() != 3 {
            return Err(Error::Inference(format!(
                "unexpected output rank {:?}",
                shape
            )));
        }
        let classes = shape[1] - 4;
        let anchors = shape[2];

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut best_class = 0usize;
            let mut best_score = 0.0f32;
            for c in 0..classes {
                let score = view[[0, 4 + c, a]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            if best_score < self.confidence_threshold {
                continue;
            }
            let cx = view[[0, 0, a]];
            let cy = view[[0, 1, a]];
            let w = view[[0, 2, a]];
            let h = view[[0, 3, a]];
            let bbox = letterbox.unmap(PixelBox {
                x: cx - w / 2.0,
                y: cy - h / 2.0,
                w,
                h,
            });
            candidates.push(Detection {
                class_id: best_class as u32,
                confidence: best_score,
                bbox,
                label: COCO_CLASSES
                    .get(best_class)
                    .copied()
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

/// Letterbox mapping between the source image and the square model
/// input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let pad_x = (target as f32 - width as f32 * scale) / 2.0;
        let pad_y = (target as f32 - height as f32 * scale) / 2.0;
        Letterbox {
            scale,
            pad_x,
            pad_y,
        }
    }

    /// Map a box in model-input coordinates back to source pixels.
    pub fn unmap(&self, bbox: PixelBox) -> PixelBox {
        PixelBox {
            x: (bbox.x - self.pad_x) / self.scale,
            y: (bbox.y - self.pad_y) / self.scale,
            w: bbox.w / self.scale,
            h: bbox.h / self.scale,
        }
    }
}

fn letterbox_tensor(rgb: &[u8], width: u32, height: u32, letterbox: &Letterbox) -> Tensor {
    let mut input =
        tract_ndarray::Array4::<f32>::from_elem((1, 3, INPUT_SIZE, INPUT_SIZE), 114.0 / 255.0);
    for ty in 0..INPUT_SIZE {
        for tx in 0..INPUT_SIZE {
            let sx = ((tx as f32 - letterbox.pad_x) / letterbox.scale) as i64;
            let sy = ((ty as f32 - letterbox.pad_y) / letterbox.scale) as i64;
            if sx < 0 || sy < 0 || sx >= width as i64 || sy >= height as i64 {
                continue;
            }
            let base = ((sy as u32 * width + sx as u32) * 3) as usize;
            for ch in 0..3 {
                input[[0, ch, ty, tx]] = rgb[base + ch] as f32 / 255.0;
            }
        }
    }
    input.into()
}

fn iou(a: &PixelBox, b: &PixelBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.w).min(b.x + b.w);
    let y2 = (a.y + a.h).min(b.y + b.h);
    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.w * a.h + b.w * b.h - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn letterbox_round_trips() {
        let lb = Letterbox::fit(1024, 768, 640);
        assert_relative_eq!(lb.scale, 0.625);
        assert_relative_eq!(lb.pad_x, 0.0);
        assert_relative_eq!(lb.pad_y, 80.0);

        let mapped = lb.unmap(PixelBox::new(100.0, 180.0, 64.0, 32.0));
        assert_relative_eq!(mapped.x, 160.0);
        assert_relative_eq!(mapped.y, 160.0);
        assert_relative_eq!(mapped.w, 102.4);
    }

    #[test]
    fn nms_keeps_best_of_overlapping_pair() {
        let mk = |x: f32, conf: f32| Detection {
            class_id: 0,
            confidence: conf,
            bbox: PixelBox::new(x, 10.0, 50.0, 50.0),
            label: "person".to_string(),
        };
        let kept = non_max_suppression(vec![mk(10.0, 0.6), mk(12.0, 0.9), mk(200.0, 0.5)], 0.45);
        assert_eq!(kept.len(), 2);
        assert_relative_eq!(kept[0].confidence, 0.9);
        assert_relative_eq!(kept[1].confidence, 0.5);
    }

    #[test]
    fn nms_does_not_suppress_across_classes() {
        let mut a = Detection {
            class_id: 0,
            confidence: 0.9,
            bbox: PixelBox::new(10.0, 10.0, 50.0, 50.0),
            label: "person".to_string(),
        };
        let mut b = a.clone();
        b.class_id = 2;
        b.confidence = 0.8;
        a.label = "person".to_string();
        b.label = "car".to_string();
        let kept = non_max_suppression(vec![a, b], 0.45);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn null_detector_is_always_empty() {
        let mut detector = NullDetector;
        assert!(detector.detect(&[0; 12], 2, 2).unwrap().is_empty());
    }
}
