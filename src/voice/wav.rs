//! Utterance packaging: sample merging and 16-bit PCM WAV encoding

use crate::{Error, Result};

/// Size of the canonical PCM WAV header
pub const WAV_HEADER_LEN: usize = 44;

/// Concatenate captured frames into one contiguous buffer, preserving order
#[must_use]
pub fn merge<B: AsRef<[f32]>>(buffers: &[B]) -> Vec<f32> {
    let total: usize = buffers.iter().map(|b| b.as_ref().len()).sum();
    let mut merged = Vec::with_capacity(total);
    for buffer in buffers {
        merged.extend_from_slice(buffer.as_ref());
    }
    merged
}

/// Convert one float sample to a signed 16-bit PCM value
///
/// The sample is clamped to [-1, 1] first. Positive values scale by 32767,
/// negative values by 32768, so both ends of the range are reachable.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Encode mono float samples as an uncompressed 16-bit PCM WAV file
///
/// # Errors
///
/// Returns [`Error::Packaging`] if the buffer contains a NaN sample or the
/// WAV writer fails
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    if let Some(index) = samples.iter().position(|s| s.is_nan()) {
        return Err(Error::Packaging(format!("corrupt sample at index {index}")));
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + samples.len() * 2));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Packaging(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(quantize(sample))
                .map_err(|e| Error::Packaging(e.to_string()))?;
        }

        writer
            .finalize()
            .map_err(|e| Error::Packaging(e.to_string()))?;
    }

    let wav = cursor.into_inner();
    tracing::trace!(samples = samples.len(), bytes = wav.len(), sample_rate, "encoded wav");
    Ok(wav)
}
