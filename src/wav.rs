//! Canonical WAV reader and writer.
//!
//! The input contract is mono 16-bit signed little-endian PCM. The common
//! case is the canonical 44-byte RIFF/WAVE layout; files with extra chunks
//! ("LIST", "fact", ...) are handled by walking chunks until "data".

use crate::error::{Error, Result};

/// Decoded WAV payload: raw 16-bit samples plus the declared rate.
#[derive(Debug, Clone)]
pub struct WavAudio {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl WavAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Parse a RIFF/WAVE byte buffer into PCM samples.
///
/// Rejects anything that is not uncompressed mono 16-bit PCM.
pub fn read_wav(bytes: &[u8]) -> Result<WavAudio> {
    if bytes.len() < 44 {
        return Err(Error::InputMalformed("WAV shorter than header".into()));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(Error::InputMalformed("missing RIFF/WAVE magic".into()));
    }

    let mut sample_rate = None;
    let mut data: Option<&[u8]> = None;

    // Chunk walk from byte 12; each chunk is id + u32 size + payload,
    // payloads padded to even length.
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let body_start = pos + 8;
        let body_end = body_start.checked_add(size).unwrap_or(usize::MAX);
        if body_end > bytes.len() {
            return Err(Error::InputMalformed("chunk overruns file".into()));
        }
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                if size < 16 {
                    return Err(Error::InputMalformed("fmt chunk too small".into()));
                }
                let audio_format = u16::from_le_bytes(body[0..2].try_into().unwrap());
                let channels = u16::from_le_bytes(body[2..4].try_into().unwrap());
                let rate = u32::from_le_bytes(body[4..8].try_into().unwrap());
                let bits = u16::from_le_bytes(body[14..16].try_into().unwrap());

                if audio_format != 1 {
                    return Err(Error::InputMalformed(format!(
                        "unsupported audio format {audio_format} (expect PCM)"
                    )));
                }
                if channels != 1 {
                    return Err(Error::InputMalformed(format!(
                        "unsupported channel count {channels} (expect mono)"
                    )));
                }
                if bits != 16 {
                    return Err(Error::InputMalformed(format!(
                        "unsupported bits-per-sample {bits} (expect 16)"
                    )));
                }
                sample_rate = Some(rate);
            }
            b"data" => {
                data = Some(body);
            }
            _ => {}
        }

        pos = body_end + (size & 1);
    }

    let sample_rate =
        sample_rate.ok_or_else(|| Error::InputMalformed("missing fmt chunk".into()))?;
    let data = data.ok_or_else(|| Error::InputMalformed("missing data chunk".into()))?;

    let samples = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(WavAudio {
        sample_rate,
        samples,
    })
}

/// Serialize float samples in [-1, 1] as a canonical mono 16-bit WAV.
pub fn write_wav(samples: &[f64], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        out.extend_from_slice(&((clamped * 32767.0) as i16).to_le_bytes());
    }

    out
}
