//! Normalized inference results.
//!
//! Workers answer with a flat JSON object whose field names differ per task
//! (`disease` for leaves, `class` / `ripeness_confidence` for pepper
//! clusters). `ResultShape` maps that object onto `InferenceResult`. Fields it
//! does not interpret stay in `raw` and are forwarded to the caller verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::grade::ClassGrade;

/// Keys owned by the response envelope. They are never forwarded from `raw`.
pub const RESERVED_KEYS: &[&str] = &[
    "success",
    "label",
    "confidence",
    "detections",
    "error",
    "requestId",
    "processingTimeMs",
    "analysisId",
    "task",
    "inferenceSource",
];

/// One detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f64,
    /// `[x1, y1, x2, y2]` in image pixels.
    pub bbox: [f64; 4],
    /// Worker-specific extras such as `center` or `health_class`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// 0..=100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl InferenceResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            label: None,
            confidence: None,
            detections: Vec::new(),
            error: Some(message.into()),
            raw: Map::new(),
        }
    }

    /// Worth keeping in history: a successful answer that actually names something.
    pub fn is_persistable(&self) -> bool {
        self.success && self.label.is_some()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ShapeError {
    #[error("missing boolean \"success\" field")]
    MissingSuccess,
    #[error("field \"{0}\" has the wrong type")]
    WrongType(String),
    #[error("confidence {0} is outside 0..=100")]
    ConfidenceOutOfRange(f64),
    #[error("invalid detection at index {index}: {reason}")]
    InvalidDetection { index: usize, reason: String },
}

/// Per-task mapping from a worker payload to `InferenceResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultShape {
    /// Candidate label fields, first non-null wins. `label` is always accepted.
    pub label_keys: Vec<String>,
    /// Candidate confidence fields, first non-null wins.
    pub confidence_keys: Vec<String>,
    /// Detections field. `detections` is always accepted.
    pub detections_key: String,
    /// Error text used when the worker fails without saying why.
    pub failure_message: String,
    /// Derive `market_grade` from the label (pepper clusters).
    pub market_grade: bool,
}

impl Default for ResultShape {
    fn default() -> Self {
        Self {
            label_keys: vec!["label".to_string()],
            confidence_keys: vec!["confidence".to_string()],
            detections_key: "detections".to_string(),
            failure_message: "inference worker reported failure".to_string(),
            market_grade: false,
        }
    }
}

impl ResultShape {
    pub fn leaf() -> Self {
        Self {
            label_keys: vec!["disease".to_string()],
            failure_message: "no leaf detected".to_string(),
            ..Self::default()
        }
    }

    pub fn bunga() -> Self {
        Self {
            label_keys: vec!["class".to_string()],
            confidence_keys: vec![
                "ripeness_confidence".to_string(),
                "confidence".to_string(),
            ],
            detections_key: "bunga_detections".to_string(),
            failure_message: "no pepper cluster detected".to_string(),
            market_grade: true,
        }
    }

    pub fn normalize(&self, mut payload: Map<String, Value>) -> Result<InferenceResult, ShapeError> {
        let success = match payload.remove("success") {
            Some(Value::Bool(b)) => b,
            _ => return Err(ShapeError::MissingSuccess),
        };

        let error = match payload.remove("error") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };

        if !success || error.is_some() {
            for key in self.label_candidates() {
                payload.remove(key);
            }
            for key in &self.confidence_keys {
                payload.remove(key);
            }
            for key in self.detection_candidates() {
                payload.remove(key);
            }
            strip_reserved(&mut payload);
            return Ok(InferenceResult {
                error: Some(error.unwrap_or_else(|| self.failure_message.clone())),
                raw: payload,
                ..InferenceResult::failure(String::new())
            });
        }

        let label = self.take_label(&mut payload)?;
        let confidence = self.take_confidence(&mut payload)?;
        let detections = self.take_detections(&mut payload)?;
        strip_reserved(&mut payload);

        if self.market_grade {
            if let Some(label) = &label {
                let grade = ClassGrade::parse(label);
                payload.insert(
                    "market_grade".to_string(),
                    Value::String(grade.market.as_str().to_string()),
                );
            }
        }

        Ok(InferenceResult {
            success: true,
            label,
            confidence,
            detections,
            error: None,
            raw: payload,
        })
    }

    fn label_candidates(&self) -> impl Iterator<Item = &str> {
        self.label_keys
            .iter()
            .map(String::as_str)
            .chain(std::iter::once("label"))
    }

    fn detection_candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.detections_key.as_str()).chain(std::iter::once("detections"))
    }

    fn take_label(&self, payload: &mut Map<String, Value>) -> Result<Option<String>, ShapeError> {
        let mut label = None;
        for key in self.label_candidates() {
            match payload.remove(key) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) => {
                    if label.is_none() {
                        label = Some(s);
                    }
                }
                Some(_) => return Err(ShapeError::WrongType(key.to_string())),
            }
        }
        Ok(label)
    }

    fn take_confidence(&self, payload: &mut Map<String, Value>) -> Result<Option<f64>, ShapeError> {
        let mut confidence = None;
        for key in &self.confidence_keys {
            match payload.remove(key) {
                None | Some(Value::Null) => {}
                Some(v) => {
                    let c = v
                        .as_f64()
                        .ok_or_else(|| ShapeError::WrongType(key.clone()))?;
                    if !(0.0..=100.0).contains(&c) {
                        return Err(ShapeError::ConfidenceOutOfRange(c));
                    }
                    if confidence.is_none() {
                        confidence = Some(c);
                    }
                }
            }
        }
        Ok(confidence)
    }

    fn take_detections(&self, payload: &mut Map<String, Value>) -> Result<Vec<Detection>, ShapeError> {
        let mut found = None;
        for key in self.detection_candidates() {
            match payload.remove(key) {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    if found.is_none() {
                        found = Some(items);
                    }
                }
                Some(_) => return Err(ShapeError::WrongType(key.to_string())),
            }
        }

        found
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value(item).map_err(|e| ShapeError::InvalidDetection {
                    index,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

fn strip_reserved(payload: &mut Map<String, Value>) {
    for key in RESERVED_KEYS {
        payload.remove(*key);
    }
}
