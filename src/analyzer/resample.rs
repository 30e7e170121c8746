//! Sample rate conversion to the fixed analysis rate.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use super::decode::DecodedAudio;
use super::ExtractionError;

/// Resample mono audio to `target_rate` and return it as `f64` samples.
///
/// Audio already at the target rate is passed through unchanged.
pub fn to_rate(audio: &DecodedAudio, target_rate: u32) -> Result<Vec<f64>, ExtractionError> {
    if audio.sample_rate == target_rate {
        log::trace!("Sample rate already at {}Hz, skipping resample", target_rate);
        return Ok(audio.samples.iter().map(|&s| f64::from(s)).collect());
    }

    log::debug!(
        "Resampling {} frames from {}Hz to {}Hz",
        audio.samples.len(),
        audio.sample_rate,
        target_rate
    );

    let ratio = f64::from(target_rate) / f64::from(audio.sample_rate);
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Septic,
        audio.samples.len(),
        1,
    )
    .map_err(|e| ExtractionError::Resample(e.to_string()))?;

    let planar_input = [audio.samples.as_slice()];
    let planar_output = resampler
        .process(&planar_input, None)
        .map_err(|e| ExtractionError::Resample(e.to_string()))?;

    let expected = (audio.samples.len() as f64 * ratio).round() as usize;
    let mut output: Vec<f64> = planar_output
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(f64::from)
        .collect();
    output.truncate(expected);
    Ok(output)
}
