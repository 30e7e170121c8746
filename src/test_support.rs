//! Fixture audio for tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

fn spec(sample_rate: u32, channels: u16) -> hound::WavSpec {
    hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Write a 16-bit sine tone at half scale.
pub fn write_sine_wav(path: &Path, freq: f64, secs: f64, sample_rate: u32, channels: u16) {
    let mut writer = hound::WavWriter::create(path, spec(sample_rate, channels)).unwrap();
    let n = (secs * f64::from(sample_rate)) as usize;
    for i in 0..n {
        let v = 0.5 * (2.0 * std::f64::consts::PI * freq * i as f64 / f64::from(sample_rate)).sin();
        let s = (v * f64::from(i16::MAX)) as i16;
        for _ in 0..channels {
            writer.write_sample(s).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Write seeded white noise at quarter scale.
pub fn write_noise_wav(path: &Path, secs: f64, sample_rate: u32, seed: u64) {
    let mut writer = hound::WavWriter::create(path, spec(sample_rate, 1)).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    let n = (secs * f64::from(sample_rate)) as usize;
    for _ in 0..n {
        let v: f64 = rng.gen_range(-0.25..0.25);
        writer.write_sample((v * f64::from(i16::MAX)) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Write a click track: short noise bursts every `60 / bpm` seconds.
pub fn write_click_wav(path: &Path, bpm: f64, secs: f64, sample_rate: u32) {
    let mut writer = hound::WavWriter::create(path, spec(sample_rate, 1)).unwrap();
    let mut rng = StdRng::seed_from_u64(bpm as u64);
    let period = (60.0 / bpm * f64::from(sample_rate)) as usize;
    let burst = sample_rate as usize / 100;
    let n = (secs * f64::from(sample_rate)) as usize;
    for i in 0..n {
        let v: f64 = if i % period < burst {
            rng.gen_range(-0.8..0.8)
        } else {
            0.0
        };
        writer.write_sample((v * f64::from(i16::MAX)) as i16).unwrap();
    }
    writer.finalize().unwrap();
}
