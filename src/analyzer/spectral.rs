//! Short-time spectral features: STFT, centroid, roll-off, MFCC and chroma.
//!
//! All matrices are stored frame-major (`frames[t][bin]`).

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use super::{ExtractionError, HOP_LENGTH, N_CHROMA, N_FFT, N_MELS, N_MFCC, ROLLOFF_PERCENT};

/// Smallest positive power accepted by the dB conversion.
const AMIN: f64 = 1e-10;
/// Dynamic range floor of the dB conversion.
const TOP_DB: f64 = 80.0;

/// Magnitude spectrogram of a mono signal.
pub struct Spectrogram {
    pub sample_rate: u32,
    /// `frames[t][k]` = |X_t(k)|, `N_FFT / 2 + 1` bins per frame.
    pub frames: Vec<Vec<f64>>,
}

impl Spectrogram {
    /// Centred STFT with a periodic Hann window.
    ///
    /// The signal is zero-padded by `N_FFT / 2` on both sides, so frame `t`
    /// is centred on sample `t * HOP_LENGTH`.
    pub fn compute(samples: &[f64], sample_rate: u32) -> Result<Self, ExtractionError> {
        if samples.is_empty() {
            return Err(ExtractionError::Analysis("empty signal".to_string()));
        }

        let pad = N_FFT / 2;
        let mut padded = vec![0.0_f64; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let n_frames = 1 + (padded.len() - N_FFT) / HOP_LENGTH;
        let window = hann_periodic(N_FFT);

        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(N_FFT);
        let mut input = fft.make_input_vec();
        let mut spectrum = fft.make_output_vec();
        let mut scratch = fft.make_scratch_vec();

        let mut frames = Vec::with_capacity(n_frames);
        for t in 0..n_frames {
            let start = t * HOP_LENGTH;
            for (i, slot) in input.iter_mut().enumerate() {
                *slot = padded[start + i] * window[i];
            }
            fft.process_with_scratch(&mut input, &mut spectrum, &mut scratch)
                .map_err(|e| ExtractionError::Analysis(format!("FFT failed: {e}")))?;
            frames.push(spectrum.iter().map(|c| c.norm()).collect());
        }

        Ok(Self {
            sample_rate,
            frames,
        })
    }

    pub fn n_bins(&self) -> usize {
        N_FFT / 2 + 1
    }

    /// Centre frequency of every FFT bin in Hz.
    pub fn bin_frequencies(&self) -> Vec<f64> {
        fft_frequencies(self.sample_rate, N_FFT)
    }

    /// Power spectrogram (|X|²), frame-major.
    pub fn power(&self) -> Vec<Vec<f64>> {
        self.frames
            .iter()
            .map(|f| f.iter().map(|m| m * m).collect())
            .collect()
    }

    /// Magnitude-weighted mean frequency per frame. Silent frames give 0.
    pub fn centroid(&self) -> Vec<f64> {
        let freqs = self.bin_frequencies();
        self.frames
            .iter()
            .map(|frame| {
                let total: f64 = frame.iter().sum();
                if total <= f64::MIN_POSITIVE {
                    return 0.0;
                }
                frame.iter().zip(&freqs).map(|(m, f)| m * f).sum::<f64>() / total
            })
            .collect()
    }

    /// Lowest bin frequency whose cumulative magnitude reaches
    /// `ROLLOFF_PERCENT` of the frame total.
    pub fn rolloff(&self) -> Vec<f64> {
        let freqs = self.bin_frequencies();
        self.frames
            .iter()
            .map(|frame| {
                let total: f64 = frame.iter().sum();
                let threshold = ROLLOFF_PERCENT * total;
                let mut cumulative = 0.0;
                for (m, f) in frame.iter().zip(&freqs) {
                    cumulative += m;
                    if cumulative >= threshold {
                        return *f;
                    }
                }
                freqs.last().copied().unwrap_or(0.0)
            })
            .collect()
    }

    /// Mel power spectrogram, `frames[t][mel_band]`.
    pub fn mel_power(&self) -> Vec<Vec<f64>> {
        let filters = mel_filter_bank(self.sample_rate, N_FFT, N_MELS);
        self.power()
            .iter()
            .map(|frame| apply_filters(&filters, frame))
            .collect()
    }

    /// `N_MFCC` cepstral coefficients per frame.
    pub fn mfcc(&self) -> Vec<Vec<f64>> {
        let mel_db = power_to_db(&self.mel_power());
        let basis = dct_ortho_basis(N_MELS, N_MFCC);
        mel_db
            .iter()
            .map(|frame| {
                basis
                    .iter()
                    .map(|row| row.iter().zip(frame).map(|(b, x)| b * x).sum())
                    .collect()
            })
            .collect()
    }

    /// `N_CHROMA` pitch-class energies per frame, each frame max-normalised.
    pub fn chroma(&self) -> Vec<Vec<f64>> {
        let filters = chroma_filter_bank(self.sample_rate, N_FFT, N_CHROMA);
        self.power()
            .iter()
            .map(|frame| {
                let mut raw = apply_filters(&filters, frame);
                let peak = raw.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
                if peak > f64::MIN_POSITIVE {
                    raw.iter_mut().for_each(|v| *v /= peak);
                }
                raw
            })
            .collect()
    }
}

/// Periodic Hann window of length `n`.
pub fn hann_periodic(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos())
        .collect()
}

/// Frequencies of the `n_fft / 2 + 1` real-FFT bins.
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f64> {
    (0..=n_fft / 2)
        .map(|k| k as f64 * f64::from(sample_rate) / n_fft as f64)
        .collect()
}

/// `10 * log10(power)` with an `AMIN` floor, clipped to `TOP_DB` below the
/// global maximum.
pub fn power_to_db(power: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut db: Vec<Vec<f64>> = power
        .iter()
        .map(|frame| frame.iter().map(|p| 10.0 * p.max(AMIN).log10()).collect())
        .collect();
    let max = db
        .iter()
        .flatten()
        .fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    if max.is_finite() {
        let floor = max - TOP_DB;
        db.iter_mut().flatten().for_each(|v| *v = v.max(floor));
    }
    db
}

fn apply_filters(filters: &[Vec<f64>], frame: &[f64]) -> Vec<f64> {
    filters
        .iter()
        .map(|weights| weights.iter().zip(frame).map(|(w, p)| w * p).sum())
        .collect()
}

// Slaney mel scale: linear below 1 kHz, logarithmic above.
const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;
const MEL_MIN_LOG_MEL: f64 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_logstep() -> f64 {
    6.4_f64.ln() / 27.0
}

pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_MEL + (hz / MEL_MIN_LOG_HZ).ln() / mel_logstep()
    } else {
        hz / MEL_F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MEL_MIN_LOG_MEL {
        MEL_MIN_LOG_HZ * (mel_logstep() * (mel - MEL_MIN_LOG_MEL)).exp()
    } else {
        MEL_F_SP * mel
    }
}

/// Triangular mel filters between 0 Hz and Nyquist, area-normalised.
/// Returns `n_mels` rows of `n_fft / 2 + 1` weights.
pub fn mel_filter_bank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f64>> {
    let fft_freqs = fft_frequencies(sample_rate, n_fft);
    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(f64::from(sample_rate) / 2.0);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, centre, hi) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
            let enorm = 2.0 / (hi - lo);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - lo) / (centre - lo);
                    let upper = (hi - f) / (hi - centre);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

/// Rows of the orthonormal DCT-II matrix, truncated to `n_out` coefficients.
pub fn dct_ortho_basis(n_in: usize, n_out: usize) -> Vec<Vec<f64>> {
    let n = n_in as f64;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_in)
                .map(|i| {
                    scale
                        * (std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n))
                            .cos()
                })
                .collect()
        })
        .collect()
}

/// Chroma filter bank: Gaussian bumps per pitch class, weighted towards the
/// middle octaves, rows starting at C.
///
/// Returns `n_chroma` rows of `n_fft / 2 + 1` weights.
pub fn chroma_filter_bank(sample_rate: u32, n_fft: usize, n_chroma: usize) -> Vec<Vec<f64>> {
    const CENTER_OCTAVE: f64 = 5.0;
    const OCTAVE_WIDTH: f64 = 2.0;
    // A440 / 16: reference of the octave scale
    const OCT_REF_HZ: f64 = 440.0 / 16.0;

    let nc = n_chroma as f64;

    // Fractional chroma bin of every FFT bin over the full (two-sided) range;
    // DC gets a virtual position 1.5 octaves below bin 1.
    let mut frq_bins: Vec<f64> = Vec::with_capacity(n_fft);
    for k in 1..n_fft {
        let f = k as f64 * f64::from(sample_rate) / n_fft as f64;
        frq_bins.push(nc * (f / OCT_REF_HZ).log2());
    }
    frq_bins.insert(0, frq_bins[0] - 1.5 * nc);

    let mut bin_widths: Vec<f64> = frq_bins.windows(2).map(|w| (w[1] - w[0]).max(1.0)).collect();
    bin_widths.push(1.0);

    let half = (nc / 2.0).round();
    let mut weights = vec![vec![0.0_f64; n_fft]; n_chroma];
    for (k, (&fb, &width)) in frq_bins.iter().zip(&bin_widths).enumerate() {
        for (c, row) in weights.iter_mut().enumerate() {
            let d = (fb - c as f64 + half + 10.0 * nc).rem_euclid(nc) - half;
            row[k] = (-0.5 * (2.0 * d / width).powi(2)).exp();
        }
    }

    // L2-normalise each FFT bin across chroma, then apply the octave weighting
    for k in 0..n_fft {
        let norm = weights.iter().map(|row| row[k] * row[k]).sum::<f64>().sqrt();
        let octave_weight =
            (-0.5 * ((frq_bins[k] / nc - CENTER_OCTAVE) / OCTAVE_WIDTH).powi(2)).exp();
        for row in weights.iter_mut() {
            if norm > f64::MIN_POSITIVE {
                row[k] /= norm;
            }
            row[k] *= octave_weight;
        }
    }

    // Rotate so that row 0 is C instead of A
    weights.rotate_left(3 * (n_chroma / 12));

    weights
        .into_iter()
        .map(|mut row| {
            row.truncate(n_fft / 2 + 1);
            row
        })
        .collect()
}

/// Autocorrelation of `signal` for lags `0..max_lag`, computed via FFT.
pub fn autocorrelate(signal: &[f64], max_lag: usize) -> Vec<f64> {
    if signal.is_empty() {
        return vec![0.0; max_lag];
    }
    Autocorrelator::new(signal.len()).compute(signal, max_lag)
}

/// Reusable FFT plans for repeated autocorrelation of equal-length signals.
pub struct Autocorrelator {
    len: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    input: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
    output: Vec<f64>,
}

impl Autocorrelator {
    /// Plans for signals of exactly `len` samples (`len > 0`).
    pub fn new(len: usize) -> Self {
        let n_pad = (2 * len).saturating_sub(1).max(1);
        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(n_pad);
        let inverse = planner.plan_fft_inverse(n_pad);
        let input = forward.make_input_vec();
        let spectrum = forward.make_output_vec();
        let output = inverse.make_output_vec();
        Self {
            len,
            forward,
            inverse,
            input,
            spectrum,
            output,
        }
    }

    /// Lags `0..max_lag`; lags past the signal length are 0.
    pub fn compute(&mut self, signal: &[f64], max_lag: usize) -> Vec<f64> {
        let n = signal.len().min(self.len);
        self.input.iter_mut().for_each(|v| *v = 0.0);
        self.input[..n].copy_from_slice(&signal[..n]);

        if self.forward.process(&mut self.input, &mut self.spectrum).is_err() {
            return vec![0.0; max_lag];
        }
        for c in self.spectrum.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        if self.inverse.process(&mut self.spectrum, &mut self.output).is_err() {
            return vec![0.0; max_lag];
        }

        let scale = self.output.len() as f64;
        (0..max_lag)
            .map(|lag| if lag < n { self.output[lag] / scale } else { 0.0 })
            .collect()
    }
}
