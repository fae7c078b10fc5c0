//! Windowed STFT magnitude spectrogram.
//!
//! Frames are Hann-windowed, transformed with rustfft, and reduced to the
//! magnitudes of the first `window / 2` bins. Frames are independent, so
//! the transform fans out over rayon without affecting the output.

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::config::AnalysisParams;

/// Compute the magnitude spectrogram of canonical-rate samples.
///
/// Emits one frame per hop while a full window fits; the ragged tail is
/// dropped. Each frame holds `window / 2` non-negative magnitudes.
pub fn spectrogram(samples: &[f64], params: &AnalysisParams) -> Vec<Vec<f64>> {
    let frames = frame(samples, params.window, params.hop);
    fft_magnitude(frames, params.window)
}

/// Split samples into overlapping Hann-windowed frames.
fn frame(samples: &[f64], window_size: usize, hop: usize) -> Vec<Vec<f64>> {
    let window = hann_window(window_size);

    let mut frames = Vec::new();
    let mut start = 0;
    while start + window_size <= samples.len() {
        let frame: Vec<f64> = samples[start..start + window_size]
            .iter()
            .zip(window.iter())
            .map(|(&s, &w)| s * w)
            .collect();
        frames.push(frame);
        start += hop;
    }
    frames
}

fn fft_magnitude(frames: Vec<Vec<f64>>, window_size: usize) -> Vec<Vec<f64>> {
    if frames.is_empty() {
        return vec![];
    }

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(window_size);

    frames
        .into_par_iter()
        .map(|frame| {
            let mut buffer: Vec<Complex<f64>> =
                frame.iter().map(|&v| Complex { re: v, im: 0.0 }).collect();
            fft.process(&mut buffer);

            buffer[..window_size / 2]
                .iter()
                .map(|c| (c.re * c.re + c.im * c.im).sqrt())
                .collect()
        })
        .collect()
}

fn hann_window(size: usize) -> Vec<f64> {
    let n = (size - 1) as f64;
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / n).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AnalysisParams {
        AnalysisParams::default()
    }

    #[test]
    fn frame_count_matches_geometry() {
        // N samples yield floor((N - W) / H) + 1 frames.
        let samples = vec![0.1; 11025];
        let spec = spectrogram(&samples, &params());
        assert_eq!(spec.len(), (11025 - 1024) / 512 + 1);
        assert!(spec.iter().all(|f| f.len() == 512));
    }

    #[test]
    fn short_input_yields_no_frames() {
        let spec = spectrogram(&[0.5; 1023], &params());
        assert!(spec.is_empty());
    }

    #[test]
    fn pure_tone_peaks_in_its_bin() {
        // 1076.66 Hz sits exactly on bin 100 at 11025 Hz / 1024 points.
        let freq = 100.0 * 11025.0 / 1024.0;
        let samples: Vec<f64> = (0..4096)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / 11025.0).sin())
            .collect();
        let spec = spectrogram(&samples, &params());
        for frame in &spec {
            let argmax = frame
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .unwrap()
                .0;
            assert_eq!(argmax, 100);
        }
    }

    #[test]
    fn output_is_deterministic_across_runs() {
        let samples: Vec<f64> = (0..8192).map(|i| ((i * 7919) % 1000) as f64 / 1000.0).collect();
        let a = spectrogram(&samples, &params());
        let b = spectrogram(&samples, &params());
        assert_eq!(a, b);
    }

    #[test]
    fn magnitudes_are_non_negative() {
        let samples: Vec<f64> = (0..4096).map(|i| if i % 2 == 0 { -0.8 } else { 0.8 }).collect();
        let spec = spectrogram(&samples, &params());
        assert!(spec.iter().flatten().all(|&m| m >= 0.0));
    }
}
