pub mod encoder;
pub mod forest;
pub mod split;
pub mod tree;

use crate::analyzer::{FeatureVector, N_FEATURES};
use crate::db::models::ModelArtifacts;
use encoder::LabelEncoder;
use forest::RandomForest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the serialized forest and encoder documents. Loading any other
/// version fails.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Cannot fit on an empty training set")]
    EmptyTrainingSet,
    #[error("Got {rows} feature rows but {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },
    #[error("Feature rows differ in width: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
    #[error("Label {label} is out of range for {n_classes} classes")]
    LabelOutOfRange { label: usize, n_classes: usize },
    #[error("Unsupported model format version {0} (expected {FORMAT_VERSION})")]
    UnsupportedVersion(u32),
    #[error("Corrupt model: {0}")]
    Corrupt(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct VersionedRef<'a, T> {
    format_version: u32,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct Versioned<T> {
    format_version: u32,
    #[serde(flatten)]
    body: T,
}

fn to_document<T: Serialize>(body: &T) -> Result<Vec<u8>, ModelError> {
    Ok(serde_json::to_vec(&VersionedRef {
        format_version: FORMAT_VERSION,
        body,
    })?)
}

fn from_document<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ModelError> {
    let doc: Versioned<T> = serde_json::from_slice(bytes)?;
    if doc.format_version != FORMAT_VERSION {
        return Err(ModelError::UnsupportedVersion(doc.format_version));
    }
    Ok(doc.body)
}

/// A fitted forest paired with the encoder whose indices it was trained on.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub forest: RandomForest,
    pub encoder: LabelEncoder,
}

impl TrainedModel {
    pub fn new(forest: RandomForest, encoder: LabelEncoder) -> Result<Self, ModelError> {
        if forest.n_classes() != encoder.len() {
            return Err(ModelError::Corrupt(format!(
                "forest predicts {} classes but the encoder has {}",
                forest.n_classes(),
                encoder.len()
            )));
        }
        if forest.n_features() != N_FEATURES {
            return Err(ModelError::Dimension {
                expected: N_FEATURES,
                got: forest.n_features(),
            });
        }
        Ok(Self { forest, encoder })
    }

    pub fn to_artifacts(&self) -> Result<ModelArtifacts, ModelError> {
        Ok(ModelArtifacts {
            model: to_document(&self.forest)?,
            encoder: to_document(&self.encoder)?,
        })
    }

    pub fn from_artifacts(artifacts: &ModelArtifacts) -> Result<Self, ModelError> {
        let forest: RandomForest = from_document(&artifacts.model)?;
        let stored: LabelEncoder = from_document(&artifacts.encoder)?;
        let encoder = LabelEncoder::from_classes(stored.classes().to_vec())
            .ok_or_else(|| ModelError::Corrupt("encoder classes are not sorted and unique".into()))?;
        forest.validate()?;
        Self::new(forest, encoder)
    }

    /// Class probabilities, indexed like `self.encoder.classes()`.
    pub fn predict_proba(&self, features: &FeatureVector) -> Vec<f64> {
        self.forest.predict_proba(&features.to_array())
    }

    /// The `top_k` most probable tags, most probable first. Equal
    /// probabilities keep ascending class order.
    pub fn top_tags(&self, features: &FeatureVector, top_k: usize) -> Vec<(&str, f64)> {
        let proba = self.predict_proba(features);
        rank(&proba, top_k)
            .into_iter()
            .filter_map(|i| self.encoder.inverse(i).map(|tag| (tag, proba[i])))
            .collect()
    }
}

/// Class indices sorted by probability, descending, truncated to `top_k`.
pub fn rank(probas: &[f64], top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..probas.len()).collect();
    order.sort_by(|&a, &b| probas[b].total_cmp(&probas[a]));
    order.truncate(top_k);
    order
}
