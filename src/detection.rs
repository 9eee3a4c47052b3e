//! Detection results and the tolerant JSON decoder for them.
//!
//! The endpoint answers with a JSON array:
//!
//! ```text
//! [ { "class_name": "cat", "confidence": 0.87, "box": [left, top, right, bottom] }, ... ]
//! ```
//!
//! A malformed element is skipped on its own; only an unparsable payload
//! empties the whole batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Pixel-space box in display orientation. Coordinates are taken as sent,
/// with no ordering or bounds enforced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([left, top, right, bottom]: [f64; 4]) -> Self {
        Self::new(left, top, right, bottom)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.left, b.top, b.right, b.bottom]
    }
}

/// Confidence is passed through as received, even outside `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f64,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f64, bbox: BoundingBox) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox,
        }
    }

    /// `"<class> <confidence to 2 places>"`
    pub fn label(&self) -> String {
        format!("{} {:.2}", self.class_name, self.confidence)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed detection payload: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("detection payload is not a JSON array")]
    NotAnArray,

    #[error("detection #{index} is invalid: {source}")]
    Element {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("detection #{index} has an empty class name")]
    EmptyClassName { index: usize },
}

/// Result of decoding one payload: the usable detections, in payload order,
/// and the reasons any elements were dropped.
#[derive(Debug, Default)]
pub struct ParseReport {
    pub detections: Vec<Detection>,
    pub skipped: Vec<ParseError>,
}

/// Decodes one array element.
pub fn decode_element(index: usize, value: Value) -> Result<Detection, ParseError> {
    let detection: Detection =
        serde_json::from_value(value).map_err(|source| ParseError::Element { index, source })?;
    if detection.class_name.is_empty() {
        return Err(ParseError::EmptyClassName { index });
    }
    Ok(detection)
}

/// Decodes a payload, keeping every well-formed element.
pub fn parse_report(text: &str) -> Result<ParseReport, ParseError> {
    let value: Value = serde_json::from_str(text).map_err(ParseError::Malformed)?;
    let Value::Array(elements) = value else {
        return Err(ParseError::NotAnArray);
    };

    let mut report = ParseReport {
        detections: Vec::with_capacity(elements.len()),
        skipped: Vec::new(),
    };
    for (index, element) in elements.into_iter().enumerate() {
        match decode_element(index, element) {
            Ok(detection) => report.detections.push(detection),
            Err(e) => report.skipped.push(e),
        }
    }
    Ok(report)
}

/// Never fails: an unparsable payload yields no detections.
pub fn parse(text: &str) -> Vec<Detection> {
    match parse_report(text) {
        Ok(report) => {
            for skipped in &report.skipped {
                log::debug!("skipping {}", skipped);
            }
            report.detections
        }
        Err(e) => {
            log::warn!("{}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
#[path = "detection_test.rs"]
mod detection_test;
