//! Constellation peak selection.
//!
//! Two policies exist and they are not interchangeable once an index is
//! built: the hash space is defined by which peaks survive. The choice is
//! part of the persisted schema descriptor.

use crate::config::{AnalysisParams, PeakPolicy};

/// A salient point of the spectrogram in real units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub time_sec: f64,
    pub freq_hz: f64,
    pub magnitude: f64,
}

/// Logarithmic bands over the 512 magnitude bins.
const BANDS: [(usize, usize); 6] = [(0, 10), (10, 20), (20, 40), (40, 80), (80, 160), (160, 512)];

const LOCAL_MAX_PER_FRAME: usize = 5;
const LOCAL_MAX_TOTAL: usize = 5000;

/// Select peaks from a magnitude spectrogram.
///
/// The result is ordered by frame, then by frequency within a frame.
pub fn pick_peaks(spectrogram: &[Vec<f64>], params: &AnalysisParams) -> Vec<Peak> {
    match params.policy {
        PeakPolicy::BandMaxima => band_maxima(spectrogram, params),
        PeakPolicy::LocalMaxima => local_maxima(spectrogram, params),
    }
}

/// Per frame: the argmax of each band, kept when above the mean of the
/// six band maxima.
fn band_maxima(spectrogram: &[Vec<f64>], params: &AnalysisParams) -> Vec<Peak> {
    let frame_period = params.frame_period();
    let bin_resolution = params.bin_resolution();

    let mut peaks = Vec::new();
    for (frame_idx, frame) in spectrogram.iter().enumerate() {
        let mut band_max = [(0usize, 0.0f64); BANDS.len()];
        for (b, &(lo, hi)) in BANDS.iter().enumerate() {
            let hi = hi.min(frame.len());
            let mut best = (lo, 0.0);
            for (bin, &mag) in frame.iter().enumerate().take(hi).skip(lo) {
                if mag > best.1 {
                    best = (bin, mag);
                }
            }
            band_max[b] = best;
        }

        let mean: f64 = band_max.iter().map(|&(_, m)| m).sum::<f64>() / BANDS.len() as f64;

        for &(bin, mag) in &band_max {
            if mag > mean {
                peaks.push(Peak {
                    time_sec: frame_idx as f64 * frame_period,
                    freq_hz: bin as f64 * bin_resolution,
                    magnitude: mag,
                });
            }
        }
    }
    peaks
}

/// Per frame: strict local maxima ranked by magnitude, top five kept, with
/// a 5000-peak ceiling per recording.
fn local_maxima(spectrogram: &[Vec<f64>], params: &AnalysisParams) -> Vec<Peak> {
    let frame_period = params.frame_period();
    let bin_resolution = params.bin_resolution();

    let mut peaks: Vec<Peak> = Vec::new();
    for (frame_idx, frame) in spectrogram.iter().enumerate() {
        let mut locals: Vec<(usize, f64)> = Vec::new();
        for bin in 1..frame.len().saturating_sub(1) {
            if frame[bin] > frame[bin - 1] && frame[bin] > frame[bin + 1] {
                locals.push((bin, frame[bin]));
            }
        }
        locals.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        locals.truncate(LOCAL_MAX_PER_FRAME);
        // Restore frequency order within the frame.
        locals.sort_by_key(|&(bin, _)| bin);

        for (bin, mag) in locals {
            if peaks.len() >= LOCAL_MAX_TOTAL {
                return peaks;
            }
            peaks.push(Peak {
                time_sec: frame_idx as f64 * frame_period,
                freq_hz: bin as f64 * bin_resolution,
                magnitude: mag,
            });
        }
    }
    peaks
}
