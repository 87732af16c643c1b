//! Detector adapter: finds document regions in a scanned page.

use docuflow_core::{BoundingBox, DetectedRegion, StageError};
use image::DynamicImage;

/// Abstraction over an object-detection backend.
///
/// `detect` must not fail for malformed-but-decodable images; when nothing is
/// found it returns an empty vec and the orchestrator records the outcome
/// with a marker instead of dropping it. Confidence filtering happens in the
/// orchestrator from the configured threshold.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedRegion>, StageError>;
}

impl<T: RegionDetector + ?Sized> RegionDetector for Box<T> {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedRegion>, StageError> {
        (**self).detect(image)
    }
}

// ── Mock backends (always available, used for tests and unconfigured runs) ───

/// Returns a pre-set region list regardless of input.
pub struct MockDetector {
    /// `None` means "report the whole page as one region".
    regions: Option<Vec<DetectedRegion>>,
}

impl MockDetector {
    pub fn new(regions: Vec<DetectedRegion>) -> Self {
        Self { regions: Some(regions) }
    }

    /// Never detects anything.
    pub fn empty() -> Self {
        Self { regions: Some(Vec::new()) }
    }

    /// Reports the whole page as a single high-confidence region — what an
    /// unconfigured desktop install falls back to, so the rest of the
    /// pipeline still runs end to end.
    pub fn full_page() -> Self {
        Self { regions: None }
    }
}

impl RegionDetector for MockDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedRegion>, StageError> {
        match &self.regions {
            Some(regions) => Ok(regions.clone()),
            None => Ok(vec![DetectedRegion::new(
                "document",
                0.99,
                BoundingBox::new(0, 0, image.width(), image.height()),
            )]),
        }
    }
}

// ── ONNX backend (optional, gated behind `onnx` feature) ────────────────────

#[cfg(feature = "onnx")]
pub mod onnx_backend {
    use super::{RegionDetector, StageError};
    use docuflow_core::{BoundingBox, DetectedRegion};
    use image::DynamicImage;
    use ndarray::Array4;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use std::path::Path;
    use std::sync::Mutex;

    const INPUT_SIZE: u32 = 640;

    /// YOLO-style detector. Expects an NMS-fused detection head emitting
    /// `[1, N, 6]` rows of `(x1, y1, x2, y2, confidence, class)`.
    pub struct OnnxDetector {
        session: Mutex<Session>,
        labels: Vec<String>,
    }

    impl OnnxDetector {
        /// Load the model. Failure here is `ModelUnavailable` and aborts the
        /// run before any document is processed.
        pub fn load(model_path: &Path, labels: Vec<String>) -> Result<Self, StageError> {
            let session = Session::builder()
                .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
                .and_then(|b| b.with_intra_threads(4))
                .and_then(|b| b.commit_from_file(model_path))
                .map_err(|e| {
                    StageError::ModelUnavailable(format!(
                        "detection model {}: {e}",
                        model_path.display()
                    ))
                })?;
            Ok(Self { session: Mutex::new(session), labels })
        }

        fn to_tensor(image: &DynamicImage) -> (Array4<f32>, f32, f32) {
            let resized = image.resize_exact(
                INPUT_SIZE,
                INPUT_SIZE,
                image::imageops::FilterType::Triangle,
            );
            let rgb = resized.to_rgb8();
            let mut input = Array4::<f32>::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
            for (x, y, pixel) in rgb.enumerate_pixels() {
                for c in 0..3 {
                    input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
                }
            }
            let scale_x = image.width() as f32 / INPUT_SIZE as f32;
            let scale_y = image.height() as f32 / INPUT_SIZE as f32;
            (input, scale_x, scale_y)
        }
    }

    impl RegionDetector for OnnxDetector {
        fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedRegion>, StageError> {
            let (input, scale_x, scale_y) = Self::to_tensor(image);
            let (shape, data) = (input.shape().to_vec(), input.into_raw_vec());

            let mut session = self
                .session
                .lock()
                .map_err(|_| StageError::InvalidInput("detector session poisoned".into()))?;
            let tensor = ort::value::Tensor::from_array((shape, data))
                .map_err(|e| StageError::InvalidInput(format!("tensor build failed: {e}")))?;
            let outputs = session
                .run(ort::inputs!["images" => tensor])
                .map_err(|e| StageError::InvalidInput(format!("detector inference failed: {e}")))?;

            let (out_shape, out) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| StageError::InvalidInput(format!("detector output: {e}")))?;
            let cols = *out_shape.last().unwrap_or(&6) as usize;
            if cols < 6 {
                return Ok(Vec::new());
            }

            let mut regions = Vec::new();
            for row in out.chunks_exact(cols) {
                let confidence = row[4];
                if confidence <= 0.0 {
                    continue;
                }
                let class = row[5] as usize;
                let label = self
                    .labels
                    .get(class)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{class}"));
                let bounds = BoundingBox::from_corners(
                    (row[0] * scale_x).max(0.0) as u32,
                    (row[1] * scale_y).max(0.0) as u32,
                    (row[2] * scale_x).max(0.0) as u32,
                    (row[3] * scale_y).max(0.0) as u32,
                );
                regions.push(DetectedRegion::new(label, confidence, bounds));
            }
            Ok(regions)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: u32, height: u32) -> DynamicImage {
        DynamicImage::new_luma8(width, height)
    }

    #[test]
    fn full_page_mock_covers_whole_image() {
        let regions = MockDetector::full_page().detect(&blank(120, 80)).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounds, BoundingBox::new(0, 0, 120, 80));
        assert!(regions[0].confidence > 0.9);
    }

    #[test]
    fn preset_mock_returns_fixed_regions() {
        let preset = vec![
            DetectedRegion::new("passport", 0.8, BoundingBox::new(5, 5, 50, 30)),
            DetectedRegion::new("attestation_label", 0.2, BoundingBox::new(0, 40, 20, 20)),
        ];
        let regions = MockDetector::new(preset.clone()).detect(&blank(100, 100)).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].label, "passport");
        assert_eq!(regions[1].confidence, 0.2);
    }
}
