//! Identity-tagged detections.

use serde::{Deserialize, Serialize};

/// COCO class id of "person", the default target class.
pub const PERSON_CLASS: i32 = 0;

/// Axis-aligned bounding box in canonical pixel coordinates (corner format).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Midpoint of the box.
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One detection for one frame. Ephemeral: never persisted directly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Stable identity assigned by the tracker
    #[serde(rename = "id")]
    pub identity: i64,
    /// Class id (COCO numbering)
    #[serde(rename = "class")]
    pub class_id: i32,
    /// Bounding box
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(identity: i64, class_id: i32, bbox: BoundingBox) -> Self {
        Self {
            identity,
            class_id,
            bbox,
        }
    }

    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS
    }

    /// Integer center used for trajectory points (truncated toward zero).
    pub fn center_px(&self) -> (i32, i32) {
        let (cx, cy) = self.bbox.center();
        (cx as i32, cy as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center() {
        let det = Detection::new(1, PERSON_CLASS, BoundingBox::new(100.0, 100.0, 121.0, 141.0));
        assert_eq!(det.bbox.center(), (110.5, 120.5));
        assert_eq!(det.center_px(), (110, 120));
        assert!(det.is_person());
    }

    #[test]
    fn test_detection_json_shape() {
        let json = r#"{"id": 4, "class": 2, "bbox": [1.0, 2.0, 3.0, 4.0]}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.identity, 4);
        assert_eq!(det.class_id, 2);
        assert_eq!(det.bbox, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        assert!(!det.is_person());

        let back = serde_json::to_value(det).unwrap();
        assert_eq!(back["bbox"][3], 4.0);
    }
}
