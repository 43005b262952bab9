use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionResponse {
    pub prediction: String,
    pub confidence: f32,
    pub probabilities: HashMap<String, f32>,
}

/// One entry of a batch response. Exactly one of `prediction` or `error`
/// is populated per file.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BatchItem {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<HashMap<String, f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItem {
    pub fn success(filename: String, result: PredictionResponse) -> Self {
        Self {
            filename,
            prediction: Some(result.prediction),
            confidence: Some(result.confidence),
            probabilities: Some(result.probabilities),
            error: None,
        }
    }

    pub fn failure(filename: String, error: impl Into<String>) -> Self {
        Self {
            filename,
            prediction: None,
            confidence: None,
            probabilities: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BatchResponse {
    pub results: Vec<BatchItem>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClassesResponse {
    pub classes: Vec<String>,
    pub num_classes: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelInfoResponse {
    pub status: String,
    pub input_shape: Vec<usize>,
    pub output_width: usize,
    pub num_classes: usize,
    pub classes: Vec<String>,
}
