pub mod decode;
pub mod resample;
pub mod spectral;
pub mod tempo;

use serde::{Deserialize, Serialize};
use spectral::Spectrogram;
use std::path::Path;
use thiserror::Error;

// Analysis parameters. A trained model has no notion of a feature schema
// version, so these must never change between training and prediction.

/// Sample rate every clip is resampled to.
pub const SAMPLE_RATE: u32 = 22050;
/// Only the first `MAX_DURATION_SECS` of a clip are analyzed.
pub const MAX_DURATION_SECS: f64 = 30.0;
pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = 512;
pub const N_MELS: usize = 128;
pub const N_MFCC: usize = 13;
pub const N_CHROMA: usize = 12;
pub const ROLLOFF_PERCENT: f64 = 0.85;

/// Number of fields in a [`FeatureVector`].
pub const N_FEATURES: usize = 9;

/// Field names in model input order.
pub const FEATURE_NAMES: [&str; N_FEATURES] = [
    "tempo",
    "spectral_centroid_mean",
    "spectral_centroid_std",
    "spectral_rolloff_mean",
    "spectral_rolloff_std",
    "mfcc_mean",
    "mfcc_std",
    "chroma_mean",
    "chroma_std",
];

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    #[error("Resample error: {0}")]
    Resample(String),
    #[error("Analysis error: {0}")]
    Analysis(String),
    #[error("Feature {name} is not finite ({value})")]
    NonFinite { name: &'static str, value: f64 },
}

/// Fixed-length acoustic summary of one clip.
///
/// Every field is finite; a vector is either complete or not constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub tempo: f64,
    pub spectral_centroid_mean: f64,
    pub spectral_centroid_std: f64,
    pub spectral_rolloff_mean: f64,
    pub spectral_rolloff_std: f64,
    pub mfcc_mean: f64,
    pub mfcc_std: f64,
    pub chroma_mean: f64,
    pub chroma_std: f64,
}

impl FeatureVector {
    /// Build a vector from values in [`FEATURE_NAMES`] order.
    pub fn from_array(values: [f64; N_FEATURES]) -> Result<Self, ExtractionError> {
        if let Some((name, value)) = FEATURE_NAMES
            .into_iter()
            .zip(values)
            .find(|(_, v)| !v.is_finite())
        {
            return Err(ExtractionError::NonFinite { name, value });
        }
        let [
            tempo,
            spectral_centroid_mean,
            spectral_centroid_std,
            spectral_rolloff_mean,
            spectral_rolloff_std,
            mfcc_mean,
            mfcc_std,
            chroma_mean,
            chroma_std,
        ] = values;
        Ok(Self {
            tempo,
            spectral_centroid_mean,
            spectral_centroid_std,
            spectral_rolloff_mean,
            spectral_rolloff_std,
            mfcc_mean,
            mfcc_std,
            chroma_mean,
            chroma_std,
        })
    }

    /// Values in [`FEATURE_NAMES`] order.
    pub fn to_array(&self) -> [f64; N_FEATURES] {
        [
            self.tempo,
            self.spectral_centroid_mean,
            self.spectral_centroid_std,
            self.spectral_rolloff_mean,
            self.spectral_rolloff_std,
            self.mfcc_mean,
            self.mfcc_std,
            self.chroma_mean,
            self.chroma_std,
        ]
    }
}

/// Extract features from an audio file.
pub fn extract_file(path: &Path) -> Result<FeatureVector, ExtractionError> {
    let audio = decode::load_file(path, MAX_DURATION_SECS)?;
    extract_decoded(&audio)
}

/// Extract features from an in-memory audio blob.
pub fn extract_bytes(bytes: Vec<u8>) -> Result<FeatureVector, ExtractionError> {
    let audio = decode::load_bytes(bytes, MAX_DURATION_SECS)?;
    extract_decoded(&audio)
}

fn extract_decoded(audio: &decode::DecodedAudio) -> Result<FeatureVector, ExtractionError> {
    let mut samples = resample::to_rate(audio, SAMPLE_RATE)?;
    samples.truncate((MAX_DURATION_SECS * SAMPLE_RATE as f64) as usize);
    extract_samples(&samples, SAMPLE_RATE)
}

/// Extract features from mono samples already at `sample_rate`.
pub fn extract_samples(samples: &[f64], sample_rate: u32) -> Result<FeatureVector, ExtractionError> {
    let spec = Spectrogram::compute(samples, sample_rate)?;

    let (centroid_mean, centroid_std) = mean_std(spec.centroid().iter().copied());
    let (rolloff_mean, rolloff_std) = mean_std(spec.rolloff().iter().copied());

    // MFCC and chroma are reduced jointly over every coefficient and frame
    let (mfcc_mean, mfcc_std) = mean_std(spec.mfcc().iter().flatten().copied());
    let (chroma_mean, chroma_std) = mean_std(spec.chroma().iter().flatten().copied());

    let envelope = tempo::onset_strength(&spec.mel_power());
    let tempo = tempo::estimate_tempo(&envelope, sample_rate);

    log::trace!(
        "Features: tempo={:.1} centroid={:.1} rolloff={:.1}",
        tempo,
        centroid_mean,
        rolloff_mean
    );

    FeatureVector::from_array([
        tempo,
        centroid_mean,
        centroid_std,
        rolloff_mean,
        rolloff_std,
        mfcc_mean,
        mfcc_std,
        chroma_mean,
        chroma_std,
    ])
}

/// Population mean and standard deviation. Empty input gives NaN, which the
/// finiteness check then rejects.
fn mean_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let (sum, count) = values.clone().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = sum / count as f64;
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    (mean, var.sqrt())
}
