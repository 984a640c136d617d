//! Detector output types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates.
///
/// `x2` and `y2` are exclusive. Boxes coming from the detector are not
/// guaranteed to be inside the frame or even well-formed; callers must
/// validate them against frame bounds before touching pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Width in pixels (may be zero or negative for malformed boxes).
    pub fn width(&self) -> i64 {
        self.x2 as i64 - self.x1 as i64
    }

    /// Height in pixels (may be zero or negative for malformed boxes).
    pub fn height(&self) -> i64 {
        self.y2 as i64 - self.y1 as i64
    }

    /// Whether the box has positive area.
    pub fn is_well_formed(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }
}

/// A single detection for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// Box in frame pixel coordinates
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Model class id
    pub class_id: u32,
    /// Lower-cased class name from the detector's label table
    pub class_name: String,
    /// Detection confidence [0, 1]
    pub confidence: f32,
}

impl Detection {
    /// Create a detection, normalizing the class name to lower case.
    pub fn new(bbox: BoundingBox, class_id: u32, class_name: impl AsRef<str>, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            class_name: class_name.as_ref().trim().to_lowercase(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Class name formatted for display ("eau_vive" -> "Eau_vive").
    pub fn display_name(&self) -> String {
        let mut chars = self.class_name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}
