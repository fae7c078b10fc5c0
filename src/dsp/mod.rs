//! Signal path: PCM conditioning, spectrogram, peak constellation and
//! pair encoding, wired in pipeline order.

pub mod fingerprint;
pub mod normalize;
pub mod peaks;
pub mod spectrogram;

pub use fingerprint::{fold_query, Fingerprint};
pub use peaks::Peak;

use crate::config::AnalysisParams;
use crate::error::Result;

/// Run the full pipeline on raw 16-bit PCM at `source_rate`.
pub fn fingerprint_pcm(
    samples: &[i16],
    source_rate: u32,
    params: &AnalysisParams,
) -> Result<Vec<Fingerprint>> {
    let prepared = normalize::prepare(samples, source_rate)?;
    fingerprint_prepared(&prepared, params)
}

/// Run the full pipeline on float samples at `source_rate`.
pub fn fingerprint_samples(
    samples: &[f64],
    source_rate: u32,
    params: &AnalysisParams,
) -> Result<Vec<Fingerprint>> {
    let prepared = normalize::normalize(samples, source_rate)?;
    fingerprint_prepared(&prepared, params)
}

fn fingerprint_prepared(prepared: &[f64], params: &AnalysisParams) -> Result<Vec<Fingerprint>> {
    let spec = spectrogram::spectrogram(prepared, params);
    let peaks = peaks::pick_peaks(&spec, params);
    Ok(fingerprint::encode(&peaks, params.target_zone))
}
