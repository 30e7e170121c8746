use crate::analyzer::{self, ExtractionError};
use crate::db::{Database, DbError};
use crate::model::{ModelError, TrainedModel};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Model not found for user {user_id}")]
    ModelMissing { user_id: String },
    #[error("Stored model is unreadable: {0}")]
    CorruptModel(#[from] ModelError),
    #[error("Failed to extract features")]
    FeatureExtractionFailed(#[source] ExtractionError),
    #[error("Model store failure: {0}")]
    Persistence(#[from] DbError),
}

/// Audio to classify.
#[derive(Debug, Clone)]
pub enum AudioInput {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPrediction {
    pub tag: String,
    pub confidence: f64,
}

/// Rank the tags of `user_id`'s model for one clip.
///
/// Returns at most `top_k` predictions, most confident first. Never writes to
/// the store.
pub fn predict(
    db: &Database,
    user_id: &str,
    audio: AudioInput,
    top_k: usize,
) -> Result<Vec<TagPrediction>, PredictError> {
    let artifacts = db
        .load_model(user_id)?
        .ok_or_else(|| PredictError::ModelMissing {
            user_id: user_id.to_string(),
        })?;
    let model = TrainedModel::from_artifacts(&artifacts)?;

    let features = match audio {
        AudioInput::Path(path) => analyzer::extract_file(&path),
        AudioInput::Bytes(bytes) => analyzer::extract_bytes(bytes),
    }
    .map_err(PredictError::FeatureExtractionFailed)?;

    let predictions: Vec<TagPrediction> = model
        .top_tags(&features, top_k)
        .into_iter()
        .map(|(tag, confidence)| TagPrediction {
            tag: tag.to_string(),
            confidence,
        })
        .collect();

    if let Some(top) = predictions.first() {
        log::debug!("User {}: top tag {} ({:.3})", user_id, top.tag, top.confidence);
    }
    Ok(predictions)
}
