//! Classifier adapter: assigns a document-type label to a cropped region.

use docuflow_core::{Classification, DocumentType, StageError};
use image::DynamicImage;

/// Abstraction over an image-classification backend.
///
/// Returns a best-effort label with confidence even when confidence is low —
/// disposition is the caller's business. `ModelUnavailable` only surfaces
/// from the backend constructor, never per call.
pub trait DocumentClassifier: Send + Sync {
    fn classify(&self, image: &DynamicImage) -> Result<Classification, StageError>;
}

impl<T: DocumentClassifier + ?Sized> DocumentClassifier for Box<T> {
    fn classify(&self, image: &DynamicImage) -> Result<Classification, StageError> {
        (**self).classify(image)
    }
}

// ── Mock backend ─────────────────────────────────────────────────────────────

/// Returns a pre-set classification regardless of input.
pub struct MockClassifier {
    classification: Classification,
}

impl MockClassifier {
    pub fn new(document_type: DocumentType, confidence: f32) -> Self {
        Self { classification: Classification::new(document_type, confidence) }
    }

    /// What an unconfigured install uses: everything is `unknown` at zero
    /// confidence, so structuring falls back to the generic schema.
    pub fn unknown() -> Self {
        Self::new(DocumentType::Unknown, 0.0)
    }
}

impl DocumentClassifier for MockClassifier {
    fn classify(&self, _image: &DynamicImage) -> Result<Classification, StageError> {
        Ok(self.classification)
    }
}

// ── ONNX backend (optional, gated behind `onnx` feature) ────────────────────

#[cfg(feature = "onnx")]
pub mod onnx_backend {
    use super::{DocumentClassifier, StageError};
    use docuflow_core::{Classification, DocumentType};
    use image::DynamicImage;
    use ndarray::Array4;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use std::path::Path;
    use std::sync::Mutex;

    const INPUT_SIZE: u32 = 224;
    // ImageNet normalization, matching the pretrained backbone.
    const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const STD: [f32; 3] = [0.229, 0.224, 0.225];

    /// ResNet-style classifier emitting `[1, C]` logits over the label set.
    pub struct OnnxClassifier {
        session: Mutex<Session>,
        labels: Vec<String>,
    }

    impl OnnxClassifier {
        /// Load the model; label order must match training order.
        pub fn load(model_path: &Path, labels: Vec<String>) -> Result<Self, StageError> {
            let session = Session::builder()
                .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
                .and_then(|b| b.with_intra_threads(4))
                .and_then(|b| b.commit_from_file(model_path))
                .map_err(|e| {
                    StageError::ModelUnavailable(format!(
                        "classification model {}: {e}",
                        model_path.display()
                    ))
                })?;
            Ok(Self { session: Mutex::new(session), labels })
        }

        fn to_tensor(image: &DynamicImage) -> Array4<f32> {
            let resized = image.resize_exact(
                INPUT_SIZE,
                INPUT_SIZE,
                image::imageops::FilterType::Triangle,
            );
            let rgb = resized.to_rgb8();
            let mut input = Array4::<f32>::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
            for (x, y, pixel) in rgb.enumerate_pixels() {
                for c in 0..3 {
                    let v = pixel[c] as f32 / 255.0;
                    input[[0, c, y as usize, x as usize]] = (v - MEAN[c]) / STD[c];
                }
            }
            input
        }
    }

    impl DocumentClassifier for OnnxClassifier {
        fn classify(&self, image: &DynamicImage) -> Result<Classification, StageError> {
            let input = Self::to_tensor(image);
            let (shape, data) = (input.shape().to_vec(), input.into_raw_vec());

            let mut session = self
                .session
                .lock()
                .map_err(|_| StageError::InvalidInput("classifier session poisoned".into()))?;
            let tensor = ort::value::Tensor::from_array((shape, data))
                .map_err(|e| StageError::InvalidInput(format!("tensor build failed: {e}")))?;
            let outputs = session
                .run(ort::inputs!["input" => tensor])
                .map_err(|e| {
                    StageError::InvalidInput(format!("classifier inference failed: {e}"))
                })?;

            let (_, logits) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| StageError::InvalidInput(format!("classifier output: {e}")))?;

            // Softmax over the logits to get a confidence for the argmax.
            let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exp_sum: f32 = logits.iter().map(|l| (l - max_logit).exp()).sum();
            let (best_idx, best_logit) = logits
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .unwrap_or((0, &0.0));
            let confidence = (best_logit - max_logit).exp() / exp_sum;

            let document_type = self
                .labels
                .get(best_idx)
                .and_then(|l| l.parse::<DocumentType>().ok())
                .unwrap_or(DocumentType::Unknown);

            Ok(Classification::new(document_type, confidence))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_returns_preset_label() {
        let c = MockClassifier::new(DocumentType::Passport, 0.87);
        let result = c.classify(&DynamicImage::new_luma8(4, 4)).unwrap();
        assert_eq!(result.document_type, DocumentType::Passport);
        assert_eq!(result.confidence, 0.87);
    }

    #[test]
    fn unknown_mock_has_zero_confidence() {
        let result = MockClassifier::unknown()
            .classify(&DynamicImage::new_luma8(4, 4))
            .unwrap();
        assert_eq!(result.document_type, DocumentType::Unknown);
        assert_eq!(result.confidence, 0.0);
    }
}
