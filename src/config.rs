//! Analysis parameters and the versioned schema descriptor.
//!
//! The fingerprint hash space is defined by the STFT geometry, the peak
//! policy, the target-zone size and the address bit layout. Any change to
//! one of these produces an incompatible index, so the full tuple is
//! persisted in the store and checked on open.

use serde::{Deserialize, Serialize};

/// Rate every recording is analyzed at, in Hz.
pub const CANONICAL_RATE: u32 = 11025;

/// Anti-alias low-pass cutoff applied at the source rate, in Hz.
pub const LOWPASS_CUTOFF_HZ: f64 = 5000.0;

/// Bit layout of the 32-bit address: anchor freq / target freq / delta ms.
pub const ADDRESS_LAYOUT: &str = "9/9/14";

/// Current descriptor version. Bump on any incompatible layout change.
pub const SCHEMA_VERSION: u32 = 1;

/// Peak selection policy. The two are not interchangeable mid-index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeakPolicy {
    /// Per-frame maxima of six logarithmic bands, kept when above the
    /// mean of the six.
    BandMaxima,
    /// Strict local maxima, top 5 per frame, 5000 per recording.
    LocalMaxima,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisParams {
    /// FFT window size, power of two.
    pub window: usize,
    /// Hop between frame starts.
    pub hop: usize,
    pub policy: PeakPolicy,
    /// Number of forward peaks paired with each anchor.
    pub target_zone: usize,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            window: 1024,
            hop: 512,
            policy: PeakPolicy::BandMaxima,
            target_zone: 5,
        }
    }
}

impl AnalysisParams {
    /// Seconds spanned by one hop at the canonical rate.
    pub fn frame_period(&self) -> f64 {
        self.hop as f64 / CANONICAL_RATE as f64
    }

    /// Hz spanned by one FFT bin at the canonical rate.
    pub fn bin_resolution(&self) -> f64 {
        CANONICAL_RATE as f64 / self.window as f64
    }

    pub fn descriptor(&self) -> SchemaDescriptor {
        SchemaDescriptor {
            version: SCHEMA_VERSION,
            window: self.window,
            hop: self.hop,
            peak_policy: self.policy,
            target_zone: self.target_zone,
            address_layout: ADDRESS_LAYOUT.to_string(),
        }
    }
}

/// The persisted identity of an index. Stored as JSON in the `meta` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub version: u32,
    pub window: usize,
    pub hop: usize,
    pub peak_policy: PeakPolicy,
    pub target_zone: usize,
    pub address_layout: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_through_json() {
        let desc = AnalysisParams::default().descriptor();
        let json = serde_json::to_string(&desc).unwrap();
        let back: SchemaDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(desc, back);
    }

    #[test]
    fn default_geometry() {
        let params = AnalysisParams::default();
        assert_eq!(params.window, 1024);
        assert_eq!(params.hop, 512);
        assert!((params.frame_period() - 512.0 / 11025.0).abs() < 1e-12);
    }
}
