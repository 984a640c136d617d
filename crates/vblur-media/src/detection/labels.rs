//! Class id to class name mapping.

use std::path::Path;

use tracing::info;

use crate::error::{MediaError, MediaResult};

/// COCO class names (80 classes).
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// Fixed, lower-cased class names indexed by class id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    /// Build a table from names in class id order.
    pub fn from_names<I, S>(names: I) -> MediaResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_lowercase())
            .collect();

        if names.is_empty() {
            return Err(MediaError::invalid_input("Label table is empty"));
        }
        if let Some(pos) = names.iter().position(|n| n.is_empty()) {
            return Err(MediaError::invalid_input(format!(
                "Label table entry {} is blank",
                pos
            )));
        }

        Ok(Self { names })
    }

    /// The COCO-80 table.
    pub fn coco() -> Self {
        Self {
            names: COCO_CLASSES.iter().map(|n| n.to_string()).collect(),
        }
    }

    /// Parse a text table: one class name per line, blank and `#` lines skipped.
    pub fn parse(text: &str) -> MediaResult<Self> {
        Self::from_names(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        )
    }

    /// Load a text table from disk.
    pub fn from_file(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MediaError::invalid_input(format!(
                "Could not read class names from {}: {}",
                path.display(),
                e
            ))
        })?;
        let table = Self::parse(&text)?;
        info!(path = %path.display(), classes = table.len(), "Loaded label table");
        Ok(table)
    }

    /// Parse the `names` entry that YOLO exports embed in ONNX metadata,
    /// e.g. `{0: 'eau_vive', 1: 'cristalline'}`.
    pub fn from_model_metadata(raw: &str) -> MediaResult<Self> {
        let body = raw
            .trim()
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| MediaError::invalid_input("Model class names are not a mapping"))?;

        let mut entries: Vec<(u32, String)> = Vec::new();
        for entry in body.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, name) = entry.split_once(':').ok_or_else(|| {
                MediaError::invalid_input(format!("Malformed class name entry: {}", entry))
            })?;
            let id: u32 = id.trim().parse().map_err(|_| {
                MediaError::invalid_input(format!("Malformed class id: {}", id.trim()))
            })?;
            let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
            entries.push((id, name.to_string()));
        }

        entries.sort_by_key(|(id, _)| *id);
        if entries.iter().enumerate().any(|(i, (id, _))| *id as usize != i) {
            return Err(MediaError::invalid_input(
                "Model class ids are not contiguous from 0",
            ));
        }

        Self::from_names(entries.into_iter().map(|(_, name)| name))
    }

    /// Name for a class id.
    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::coco()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coco_table() {
        let table = LabelTable::coco();
        assert_eq!(table.len(), 80);
        assert_eq!(table.get(0), Some("person"));
        assert_eq!(table.get(39), Some("bottle"));
        assert_eq!(table.get(80), None);
    }

    #[test]
    fn test_parse_text_table() {
        let table = LabelTable::parse("# brands\nEau_Vive\n\n  cristalline \n").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0), Some("eau_vive"));
        assert_eq!(table.get(1), Some("cristalline"));

        assert!(LabelTable::parse("# nothing\n\n").is_err());
    }

    #[test]
    fn test_parse_model_metadata() {
        let table = LabelTable::from_model_metadata("{1: 'cristalline', 0: 'eau_vive'}").unwrap();
        assert_eq!(table.get(0), Some("eau_vive"));
        assert_eq!(table.get(1), Some("cristalline"));

        assert!(LabelTable::from_model_metadata("['a', 'b']").is_err());
        assert!(LabelTable::from_model_metadata("{0: 'a', 2: 'c'}").is_err());
    }
}
