//! Anchor-target pair encoding.
//!
//! Each anchor peak is paired with the next `target_zone` peaks and packed
//! into a 32-bit address: 9 bits of anchor frequency, 9 bits of target
//! frequency (both in 10 Hz steps), 14 bits of millisecond delta. The
//! layout is the only thing that crosses the ingest/query boundary, so it
//! must stay byte-identical on both sides.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dsp::peaks::Peak;

const FREQ_BITS: u32 = 9;
const DELTA_BITS: u32 = 14;
const FREQ_MASK: u32 = (1 << FREQ_BITS) - 1;
const DELTA_MASK: u32 = (1 << DELTA_BITS) - 1;

/// One encoded pair: the content address plus the anchor's position in
/// the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub address: u32,
    pub anchor_time_ms: u32,
}

/// Pack an anchor/target pair into its 32-bit address.
pub fn pack_address(anchor: &Peak, target: &Peak) -> u32 {
    let anchor_freq = (anchor.freq_hz / 10.0) as u32 & FREQ_MASK;
    let target_freq = (target.freq_hz / 10.0) as u32 & FREQ_MASK;
    let delta_ms = ((target.time_sec - anchor.time_sec) * 1000.0) as u32 & DELTA_MASK;

    (anchor_freq << (FREQ_BITS + DELTA_BITS)) | (target_freq << DELTA_BITS) | delta_ms
}

/// Split an address back into its (anchor_freq, target_freq, delta_ms)
/// fields. Inverse of [`pack_address`] over the truncated domain.
pub fn unpack_address(address: u32) -> (u32, u32, u32) {
    (
        (address >> (FREQ_BITS + DELTA_BITS)) & FREQ_MASK,
        (address >> DELTA_BITS) & FREQ_MASK,
        address & DELTA_MASK,
    )
}

/// Emit every anchor/target pair in the forward target zone.
///
/// All records are kept, duplicates included; the ingest side stores them
/// all and lets the anchor time disambiguate.
pub fn encode(peaks: &[Peak], target_zone: usize) -> Vec<Fingerprint> {
    let mut fingerprints = Vec::new();

    for (i, anchor) in peaks.iter().enumerate() {
        for target in peaks.iter().skip(i + 1).take(target_zone) {
            fingerprints.push(Fingerprint {
                address: pack_address(anchor, target),
                anchor_time_ms: (anchor.time_sec * 1000.0) as u32,
            });
        }
    }

    fingerprints
}

/// Fold records into the query-side map.
///
/// Duplicate addresses collapse; any surviving occurrence is acceptable,
/// and plain insertion keeps the last one.
pub fn fold_query(fingerprints: &[Fingerprint]) -> HashMap<u32, u32> {
    let mut folded = HashMap::with_capacity(fingerprints.len());
    for fp in fingerprints {
        folded.insert(fp.address, fp.anchor_time_ms);
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(time_sec: f64, freq_hz: f64) -> Peak {
        Peak {
            time_sec,
            freq_hz,
            magnitude: 1.0,
        }
    }

    #[test]
    fn packs_fields_into_expected_positions() {
        let anchor = peak(1.0, 1000.0);
        let target = peak(1.25, 2000.0);
        let address = pack_address(&anchor, &target);
        assert_eq!(address, (100 << 23) | (200 << 14) | 250);
    }

    #[test]
    fn unpack_inverts_pack() {
        let anchor = peak(0.5, 4510.0);
        let target = peak(2.0, 320.0);
        let (af, tf, dt) = unpack_address(pack_address(&anchor, &target));
        assert_eq!(af, 451);
        assert_eq!(tf, 32);
        assert_eq!(dt, 1500);
    }

    #[test]
    fn delta_beyond_14_bits_truncates() {
        let anchor = peak(0.0, 100.0);
        let target = peak(20.0, 100.0); // 20 000 ms > 16 383
        let (_, _, dt) = unpack_address(pack_address(&anchor, &target));
        assert_eq!(dt, 20_000 & 0x3FFF);
    }

    #[test]
    fn each_anchor_pairs_with_zone_peaks() {
        let peaks: Vec<Peak> = (0..8).map(|i| peak(i as f64 * 0.1, 500.0 + i as f64)).collect();
        let fps = encode(&peaks, 5);
        // First three anchors see a full zone of 5, then 4, 3, 2, 1, 0.
        assert_eq!(fps.len(), 5 + 5 + 5 + 4 + 3 + 2 + 1);
    }

    #[test]
    fn anchor_time_is_floor_milliseconds() {
        let peaks = vec![peak(1.2345, 1000.0), peak(1.5, 1200.0)];
        let fps = encode(&peaks, 5);
        assert_eq!(fps[0].anchor_time_ms, 1234);
    }

    #[test]
    fn fold_collapses_duplicate_addresses() {
        let fps = vec![
            Fingerprint { address: 7, anchor_time_ms: 100 },
            Fingerprint { address: 7, anchor_time_ms: 900 },
            Fingerprint { address: 9, anchor_time_ms: 50 },
        ];
        let folded = fold_query(&fps);
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[&7], 900);
    }
}
