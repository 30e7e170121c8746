//! Global tempo estimation.
//!
//! Onset strength is the positive frame-to-frame increase of the dB mel
//! spectrogram, averaged over bands. A windowed autocorrelation tempogram of
//! that envelope is averaged over time and weighted by a log-normal prior
//! around `START_BPM`; the best-scoring lag is the tempo.

use super::spectral::{Autocorrelator, hann_periodic, power_to_db};
use super::{HOP_LENGTH, N_FFT};

/// Centre of the tempo prior.
const START_BPM: f64 = 120.0;
/// Width of the tempo prior in octaves.
const STD_BPM: f64 = 1.0;
/// Tempi above this are never selected.
const MAX_TEMPO: f64 = 320.0;
/// Autocorrelation window length in seconds.
const AC_SIZE_SECS: f64 = 8.0;

/// Onset strength envelope from a mel power spectrogram (`frames[t][band]`).
///
/// The envelope has one value per spectrogram frame and is shifted to line up
/// with the centred STFT frames.
pub fn onset_strength(mel_power: &[Vec<f64>]) -> Vec<f64> {
    let n_frames = mel_power.len();
    if n_frames == 0 {
        return Vec::new();
    }
    let mel_db = power_to_db(mel_power);

    let diffs = mel_db.windows(2).map(|pair| {
        let (prev, cur) = (&pair[0], &pair[1]);
        let bands = cur.len().max(1) as f64;
        cur.iter()
            .zip(prev)
            .map(|(c, p)| (c - p).max(0.0))
            .sum::<f64>()
            / bands
    });

    // lag (1) + centring offset of the STFT
    let pad = 1 + N_FFT / (2 * HOP_LENGTH);
    let mut envelope: Vec<f64> = std::iter::repeat_n(0.0, pad).chain(diffs).collect();
    envelope.truncate(n_frames);
    envelope
}

/// Estimate the tempo in BPM from an onset envelope.
///
/// Returns 0.0 when the envelope contains no onsets.
pub fn estimate_tempo(envelope: &[f64], sample_rate: u32) -> f64 {
    if !envelope.iter().any(|&v| v != 0.0) {
        return 0.0;
    }

    let win = (AC_SIZE_SECS * f64::from(sample_rate) / HOP_LENGTH as f64).floor() as usize;
    let tempogram = mean_tempogram(envelope, win);

    let mut best: Option<(usize, f64)> = None;
    for (lag, &strength) in tempogram.iter().enumerate().skip(1) {
        let bpm = lag_to_bpm(lag, sample_rate);
        if bpm > MAX_TEMPO {
            continue;
        }
        let log_prior = -0.5 * ((bpm.log2() - START_BPM.log2()) / STD_BPM).powi(2);
        let score = (1e6 * strength).ln_1p() + log_prior;
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((lag, score));
        }
    }

    best.map(|(lag, _)| lag_to_bpm(lag, sample_rate))
        .unwrap_or(0.0)
}

fn lag_to_bpm(lag: usize, sample_rate: u32) -> f64 {
    60.0 * f64::from(sample_rate) / (HOP_LENGTH as f64 * lag as f64)
}

/// Hann-windowed autocorrelation of every `win`-frame window centred on each
/// envelope frame, max-normalised per frame, then averaged over frames.
fn mean_tempogram(envelope: &[f64], win: usize) -> Vec<f64> {
    let half = win / 2;
    let padded = linear_ramp_pad(envelope, half);
    let window = hann_periodic(win);

    let mut sum = vec![0.0_f64; win];
    let n_frames = envelope.len();
    let mut segment = vec![0.0_f64; win];
    let mut autocorrelator = Autocorrelator::new(win);

    for t in 0..n_frames {
        let end = (t + win).min(padded.len());
        for (i, slot) in segment.iter_mut().enumerate() {
            *slot = if t + i < end { padded[t + i] * window[i] } else { 0.0 };
        }
        let ac = autocorrelator.compute(&segment, win);
        let peak = ac.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if peak > f64::MIN_POSITIVE {
            for (s, v) in sum.iter_mut().zip(&ac) {
                *s += v / peak;
            }
        }
    }

    sum.iter().map(|s| s / n_frames as f64).collect()
}

/// Pad both ends with `width` values ramping linearly between 0 and the edge
/// sample (the edge itself is not repeated).
fn linear_ramp_pad(signal: &[f64], width: usize) -> Vec<f64> {
    let first = signal.first().copied().unwrap_or(0.0);
    let last = signal.last().copied().unwrap_or(0.0);
    let w = width.max(1) as f64;

    let mut padded = Vec::with_capacity(signal.len() + 2 * width);
    padded.extend((0..width).map(|i| first * i as f64 / w));
    padded.extend_from_slice(signal);
    padded.extend((0..width).map(|j| last * (width - 1 - j) as f64 / w));
    padded
}
