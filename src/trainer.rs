use crate::analyzer::{self, FeatureVector};
use crate::config::TrainingConfig;
use crate::db::models::ModelInfo;
use crate::db::{Database, DbError};
use crate::model::encoder::LabelEncoder;
use crate::model::forest::{ForestParams, RandomForest};
use crate::model::split::{SplitError, stratified_split};
use crate::model::{ModelError, TrainedModel};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Need at least {required} tracks with features. Got {count}")]
    InsufficientData { count: usize, required: usize },
    #[error("Cannot split training data: {0}")]
    Split(#[from] SplitError),
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Invalid training input: {0}")]
    InvalidInput(String),
    #[error("Model store failure: {0}")]
    Persistence(#[from] DbError),
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// One candidate tag with the user's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagScore {
    pub tag: String,
    pub confidence: f64,
}

/// A track as submitted for training.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Path of the audio file.
    #[serde(default, alias = "audioPath")]
    pub audio_reference: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagScore>,
}

/// Features of one track paired with its chosen tag.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub features: FeatureVector,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub user_id: String,
    pub accuracy: f64,
    pub tracks_trained: usize,
    pub unique_tags: usize,
    pub classes: Vec<String>,
}

/// Read a JSON array of [`TrackRecord`]s from `path`.
pub fn read_tracks(path: &Path) -> Result<Vec<TrackRecord>, TrainError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| TrainError::InvalidInput(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| TrainError::InvalidInput(format!("cannot parse {}: {e}", path.display())))
}

/// The highest-confidence tag. On ties the earliest one wins. Non-finite
/// confidences are ignored.
pub fn best_tag(tags: &[TagScore]) -> Option<&TagScore> {
    let mut best: Option<&TagScore> = None;
    for tag in tags {
        if !tag.confidence.is_finite() {
            continue;
        }
        if best.is_none_or(|b| tag.confidence > b.confidence) {
            best = Some(tag);
        }
    }
    best
}

/// Train and store a personal model for `user_id`, replacing any previous one.
///
/// Tracks without audio, without tags, or whose audio cannot be analyzed are
/// skipped. Nothing is written unless fitting and evaluation succeed.
pub fn train(
    db: &Database,
    user_id: &str,
    tracks: &[TrackRecord],
    config: &TrainingConfig,
) -> Result<TrainingReport, TrainError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()?;

    let examples = pool.install(|| collect_examples(tracks));
    log::info!(
        "User {}: {} of {} tracks usable for training",
        user_id,
        examples.len(),
        tracks.len()
    );

    let fitted = pool.install(|| fit(&examples, config))?;
    store(db, user_id, fitted)
}

/// Extract features for every usable track, in input order.
fn collect_examples(tracks: &[TrackRecord]) -> Vec<LabeledExample> {
    use rayon::prelude::*;

    let pb = ProgressBar::new(tracks.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message("extracting features");

    let examples: Vec<Option<LabeledExample>> = tracks
        .par_iter()
        .enumerate()
        .map(|(index, track)| {
            let example = example_for(index, track);
            pb.inc(1);
            example
        })
        .collect();

    let examples: Vec<LabeledExample> = examples.into_iter().flatten().collect();
    pb.finish_with_message(format!("{} usable", examples.len()));
    examples
}

fn example_for(index: usize, track: &TrackRecord) -> Option<LabeledExample> {
    let Some(path) = track.audio_reference.as_deref().filter(|p| !p.is_empty()) else {
        log::debug!("Track {index}: no audio reference, skipping");
        return None;
    };
    let Some(tag) = best_tag(&track.tags) else {
        log::debug!("Track {index}: no tags, skipping");
        return None;
    };
    match analyzer::extract_file(Path::new(path)) {
        Ok(features) => Some(LabeledExample {
            features,
            tag: tag.tag.clone(),
        }),
        Err(e) => {
            log::warn!("Track {index} ({path}): {e}");
            None
        }
    }
}

/// A fitted model with its held-out accuracy, not yet stored.
struct FittedModel {
    model: TrainedModel,
    accuracy: f64,
    tracks_used: usize,
}

/// Fit, evaluate and persist a model from already-extracted examples.
pub fn fit_and_store(
    db: &Database,
    user_id: &str,
    examples: &[LabeledExample],
    config: &TrainingConfig,
) -> Result<TrainingReport, TrainError> {
    let fitted = fit(examples, config)?;
    store(db, user_id, fitted)
}

fn fit(examples: &[LabeledExample], config: &TrainingConfig) -> Result<FittedModel, TrainError> {
    if examples.len() < config.min_examples {
        return Err(TrainError::InsufficientData {
            count: examples.len(),
            required: config.min_examples,
        });
    }

    let labels: Vec<&str> = examples.iter().map(|e| e.tag.as_str()).collect();
    let encoder = LabelEncoder::fit(&labels);
    let y = encoder
        .transform_all(&labels)
        .ok_or_else(|| ModelError::Corrupt("label missing from its own encoder".into()))?;
    let x: Vec<Vec<f64>> = examples
        .iter()
        .map(|e| e.features.to_array().to_vec())
        .collect();

    let split = stratified_split(&y, encoder.len(), config.test_fraction, config.seed)?;
    let (x_train, y_train) = select_rows(&x, &y, &split.train);
    let (x_test, y_test) = select_rows(&x, &y, &split.test);

    let params = ForestParams {
        n_trees: config.n_trees,
        seed: config.seed,
    };
    let forest = RandomForest::fit(&x_train, &y_train, encoder.len(), params)?;
    let accuracy = forest.accuracy(&x_test, &y_test);

    Ok(FittedModel {
        model: TrainedModel::new(forest, encoder)?,
        accuracy,
        tracks_used: examples.len(),
    })
}

fn store(db: &Database, user_id: &str, fitted: FittedModel) -> Result<TrainingReport, TrainError> {
    let artifacts = fitted.model.to_artifacts()?;
    let classes = fitted.model.encoder.classes().to_vec();

    let info = ModelInfo {
        user_id: user_id.to_string(),
        accuracy: fitted.accuracy,
        last_trained: chrono::Utc::now().to_rfc3339(),
        tracks_used: fitted.tracks_used,
        unique_tags: classes.len(),
        classes: classes.clone(),
    };
    db.save_model(user_id, &artifacts, &info)?;

    log::info!(
        "User {}: trained on {} tracks, {} tags, held-out accuracy {:.3}",
        user_id,
        fitted.tracks_used,
        classes.len(),
        fitted.accuracy
    );

    Ok(TrainingReport {
        user_id: user_id.to_string(),
        accuracy: fitted.accuracy,
        tracks_trained: fitted.tracks_used,
        unique_tags: classes.len(),
        classes,
    })
}

fn select_rows(x: &[Vec<f64>], y: &[usize], rows: &[usize]) -> (Vec<Vec<f64>>, Vec<usize>) {
    rows.iter().map(|&r| (x[r].clone(), y[r])).unzip()
}
