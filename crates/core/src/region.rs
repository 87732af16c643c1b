use serde::{Deserialize, Serialize};

use crate::document::DocumentType;

/// Axis-aligned box in pixel coordinates, x/y at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from two corners; coordinates may arrive in any order.
    pub fn from_corners(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        let (left, right) = (x1.min(x2), x1.max(x2));
        let (top, bottom) = (y1.min(y2), y1.max(y2));
        Self { x: left, y: top, width: right - left, height: bottom - top }
    }

    /// Intersect with an image of the given dimensions. Returns `None` when
    /// nothing of the box lies inside the image.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<BoundingBox> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }
        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(BoundingBox { x: self.x, y: self.y, width, height })
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A detected sub-image of a document, produced by the detector adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedRegion {
    /// Detector class label (e.g. "document", "attestation_label").
    pub label: String,
    /// Detector confidence, clamped to [0, 1].
    pub confidence: f32,
    pub bounds: BoundingBox,
}

impl DetectedRegion {
    pub fn new(label: impl Into<String>, confidence: f32, bounds: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bounds,
        }
    }
}

/// Document-type label with classifier confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub document_type: DocumentType,
    /// Classifier confidence, clamped to [0, 1].
    pub confidence: f32,
}

impl Classification {
    pub fn new(document_type: DocumentType, confidence: f32) -> Self {
        Self { document_type, confidence: confidence.clamp(0.0, 1.0) }
    }
}

/// A block of recognized text with optional layout position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
}

/// Raw OCR output for one region.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrText {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<TextBlock>,
}

impl OcrText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), blocks: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_corners_normalizes_order() {
        let b = BoundingBox::from_corners(80, 90, 10, 20);
        assert_eq!(b, BoundingBox::new(10, 20, 70, 70));
    }

    #[test]
    fn clamp_shrinks_overhanging_box() {
        let b = BoundingBox::new(50, 50, 100, 100);
        let clamped = b.clamp_to(100, 100).unwrap();
        assert_eq!(clamped, BoundingBox::new(50, 50, 50, 50));
    }

    #[test]
    fn clamp_rejects_box_outside_image() {
        let b = BoundingBox::new(200, 10, 20, 20);
        assert!(b.clamp_to(100, 100).is_none());
    }

    #[test]
    fn clamp_keeps_contained_box() {
        let b = BoundingBox::new(10, 10, 30, 30);
        assert_eq!(b.clamp_to(100, 100), Some(b));
    }

    #[test]
    fn region_confidence_is_clamped() {
        let r = DetectedRegion::new("document", 1.7, BoundingBox::new(0, 0, 1, 1));
        assert_eq!(r.confidence, 1.0);
        let r = DetectedRegion::new("document", -0.3, BoundingBox::new(0, 0, 1, 1));
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn ocr_text_empty_when_whitespace() {
        assert!(OcrText::plain("  \n ").is_empty());
        assert!(!OcrText::plain("PASSPORT").is_empty());
    }
}
