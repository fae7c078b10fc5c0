//! PCM conditioning ahead of spectral analysis.
//!
//! Every recording, ingest or query, passes through the same chain:
//! integer-to-float conversion, anti-alias low-pass at the source rate,
//! decimation to the canonical 11025 Hz, then peak normalization. The two
//! sides must agree bit-for-bit or the hash spaces drift apart.

use crate::config::{CANONICAL_RATE, LOWPASS_CUTOFF_HZ};
use crate::error::{Error, Result};

/// Convert 16-bit PCM to floats in [-1, 1).
pub fn pcm_to_float(samples: &[i16]) -> Vec<f64> {
    const SCALE: f64 = 1.0 / 32768.0;
    samples.iter().map(|&s| f64::from(s) * SCALE).collect()
}

/// Run the full conditioning chain on raw 16-bit PCM.
pub fn prepare(samples: &[i16], source_rate: u32) -> Result<Vec<f64>> {
    normalize(&pcm_to_float(samples), source_rate)
}

/// Run the conditioning chain on float samples already in [-1, 1].
pub fn normalize(samples: &[f64], source_rate: u32) -> Result<Vec<f64>> {
    if samples.is_empty() {
        return Err(Error::EmptyInput);
    }
    if source_rate < CANONICAL_RATE {
        return Err(Error::SourceRateInvalid {
            source_rate,
            target: CANONICAL_RATE,
        });
    }

    let filtered = low_pass(samples, f64::from(source_rate));
    let mut resampled = resample(&filtered, source_rate, CANONICAL_RATE)?;
    peak_normalize(&mut resampled);
    Ok(resampled)
}

/// First-order IIR low-pass with transfer function H(s) = 1 / (1 + sRC).
fn low_pass(input: &[f64], sample_rate: f64) -> Vec<f64> {
    let rc = 1.0 / (2.0 * std::f64::consts::PI * LOWPASS_CUTOFF_HZ);
    let dt = 1.0 / sample_rate;
    let alpha = dt / (rc + dt);

    let mut output = Vec::with_capacity(input.len());
    let mut prev = 0.0;
    for (i, &x) in input.iter().enumerate() {
        let y = if i == 0 {
            x * alpha
        } else {
            alpha * x + (1.0 - alpha) * prev
        };
        output.push(y);
        prev = y;
    }
    output
}

/// Reduce `input` from `source_rate` to `target_rate`.
///
/// Integer ratios decimate by block average; anything else falls back to
/// linear interpolation over position `i * source / target`. One rule for
/// both ingest and query.
fn resample(input: &[f64], source_rate: u32, target_rate: u32) -> Result<Vec<f64>> {
    if target_rate == 0 {
        return Err(Error::TargetRateInvalid(i64::from(target_rate)));
    }
    if source_rate == target_rate {
        return Ok(input.to_vec());
    }

    if source_rate % target_rate == 0 {
        let ratio = (source_rate / target_rate) as usize;
        let mut out = Vec::with_capacity(input.len() / ratio + 1);
        let mut i = 0;
        while i < input.len() {
            let end = (i + ratio).min(input.len());
            let sum: f64 = input[i..end].iter().sum();
            out.push(sum / (end - i) as f64);
            i += ratio;
        }
        return Ok(out);
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    let out_len = (input.len() as f64 / ratio) as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let index = pos as usize;
        let frac = pos - index as f64;
        let value = if index + 1 < input.len() {
            input[index] * (1.0 - frac) + input[index + 1] * frac
        } else {
            input[input.len() - 1]
        };
        out.push(value);
    }
    Ok(out)
}

/// Scale so the loudest sample sits at 0.9. Silence is left untouched.
fn peak_normalize(samples: &mut [f64]) {
    let peak = samples.iter().fold(0.0f64, |m, &s| m.max(s.abs()));
    if peak > 0.0 {
        let gain = 0.9 / peak;
        for s in samples.iter_mut() {
            *s *= gain;
        }
    }
}
