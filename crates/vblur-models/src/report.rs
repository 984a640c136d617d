//! Per-frame processing outcome.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What the redaction policy decided for one detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RedactionDecision {
    /// Blur the region, then draw the label in the "redacted" style
    Redact,
    /// Leave the region intact and draw the label in the "not redacted" style
    Annotate,
}

impl RedactionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionDecision::Redact => "redact",
            RedactionDecision::Annotate => "annotate",
        }
    }
}

/// Counts and timings for one processed frame. Used for logs and metrics only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingReport {
    /// Detections returned by the detector
    pub detections: usize,
    /// Detections whose region was blurred
    pub redacted: usize,
    /// Detections left intact and labelled
    pub annotated: usize,
    /// Detections skipped because their box fell outside the frame
    pub skipped: usize,
    /// Time spent in the detector (milliseconds)
    pub detect_ms: f64,
    /// Total time for the frame (milliseconds)
    pub total_ms: f64,
}

impl ProcessingReport {
    /// Record one decision.
    pub fn record(&mut self, decision: RedactionDecision) {
        match decision {
            RedactionDecision::Redact => self.redacted += 1,
            RedactionDecision::Annotate => self.annotated += 1,
        }
    }

    /// Detections that were either redacted or annotated.
    pub fn applied(&self) -> usize {
        self.redacted + self.annotated
    }

    /// Fold another frame's report into this one.
    pub fn accumulate(&mut self, other: &ProcessingReport) {
        self.detections += other.detections;
        self.redacted += other.redacted;
        self.annotated += other.annotated;
        self.skipped += other.skipped;
        self.detect_ms += other.detect_ms;
        self.total_ms += other.total_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_accumulate() {
        let mut a = ProcessingReport {
            detections: 3,
            skipped: 1,
            ..Default::default()
        };
        a.record(RedactionDecision::Redact);
        a.record(RedactionDecision::Annotate);
        assert_eq!(a.applied(), 2);

        let mut total = ProcessingReport::default();
        total.accumulate(&a);
        total.accumulate(&a);
        assert_eq!(total.detections, 6);
        assert_eq!(total.redacted, 2);
        assert_eq!(total.skipped, 2);
    }
}
