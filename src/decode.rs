//! Decode collaborator: turns audio files into mono float samples at the
//! source rate. Canonical WAV input is parsed directly; everything else
//! goes through symphonia's probe/decode loop.

use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::dsp::normalize::pcm_to_float;
use crate::error::{Error, Result};
use crate::wav;

/// Load a file into (mono samples in [-1, 1], source rate).
pub fn load_audio(path: &Path) -> Result<(Vec<f64>, u32)> {
    let bytes = std::fs::read(path)?;
    let extension = path.extension().and_then(|e| e.to_str());
    load_bytes(&bytes, extension)
}

/// Same as [`load_audio`] for an in-memory buffer (e.g. an upload).
pub fn load_bytes(bytes: &[u8], extension: Option<&str>) -> Result<(Vec<f64>, u32)> {
    if bytes.starts_with(b"RIFF") {
        let audio = wav::read_wav(bytes)?;
        return Ok((pcm_to_float(&audio.samples), audio.sample_rate));
    }
    decode_container(bytes, extension)
}

fn decode_container(bytes: &[u8], extension: Option<&str>) -> Result<(Vec<f64>, u32)> {
    let cursor = Cursor::new(bytes.to_vec());
    let stream = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| Error::Decode("no default track".into()))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Decode("track has no sample rate".into()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1)
        .max(1);
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(e.to_string()))?;

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(_) => break, // end of stream
        };
        if packet.track_id() != track_id {
            continue;
        }

        // Skip undecodable packets rather than failing the recording.
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(_) => continue,
        };

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buffer.samples());
    }

    if interleaved.is_empty() {
        return Err(Error::Decode("no audio frames decoded".into()));
    }

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().map(|&s| f64::from(s)).sum::<f64>() / channels as f64)
        .collect();

    Ok((mono, sample_rate))
}
