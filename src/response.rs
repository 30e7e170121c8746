//! JSON result shapes returned to callers.
//!
//! Every call produces one of these, success or failure, so a caller never
//! has to interpret a Rust error type.

use crate::predictor::{PredictError, TagPrediction};
use crate::trainer::{TrainError, TrainingReport};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracks_trained: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_tags: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrainResponse {
    pub fn from_result(user_id: &str, result: Result<TrainingReport, TrainError>) -> Self {
        match result {
            Ok(report) => Self {
                success: true,
                accuracy: Some(report.accuracy),
                user_id: report.user_id,
                tracks_trained: Some(report.tracks_trained),
                unique_tags: Some(report.unique_tags),
                classes: Some(report.classes),
                error: None,
            },
            Err(e) => Self {
                success: false,
                accuracy: None,
                user_id: user_id.to_string(),
                tracks_trained: None,
                unique_tags: None,
                classes: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<TagPrediction>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PredictResponse {
    pub fn from_result(result: Result<Vec<TagPrediction>, PredictError>) -> Self {
        match result {
            Ok(predictions) => Self {
                success: true,
                predictions: Some(predictions),
                error: None,
            },
            Err(e) => Self {
                success: false,
                predictions: None,
                error: Some(e.to_string()),
            },
        }
    }
}
