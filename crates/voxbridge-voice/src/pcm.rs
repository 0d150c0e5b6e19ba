//! PCM framing: f32 samples to signed 16-bit little-endian, energy, and WAV wrapping.

/// Convert one sample to 16-bit PCM. The sample is clamped to [-1.0, 1.0] first;
/// negative values scale by 0x8000 and positive values by 0x7FFF.
pub fn f32_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

pub fn pcm16_to_f32(value: i16) -> f32 {
    if value < 0 {
        value as f32 / 32768.0
    } else {
        value as f32 / 32767.0
    }
}

/// Encode samples as 16-bit little-endian PCM bytes.
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&f32_to_pcm16(s).to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM. A trailing odd byte is ignored.
pub fn decode_pcm16_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| pcm16_to_f32(i16::from_le_bytes([b[0], b[1]])))
        .collect()
}

/// Mean absolute amplitude on a 0–255 scale.
pub fn energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s.clamp(-1.0, 1.0).abs()).sum();
    sum / samples.len() as f32 * 255.0
}

/// Wrap mono 16-bit PCM in a WAV container for upload.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let mut buf = Vec::with_capacity(44 + pcm.len());
    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    buf.extend_from_slice(pcm);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_and_zero() {
        assert_eq!(f32_to_pcm16(1.0) as u16, 0x7FFF);
        assert_eq!(f32_to_pcm16(-1.0) as u16, 0x8000);
        assert_eq!(f32_to_pcm16(0.0), 0);
    }

    #[test]
    fn out_of_range_is_clamped() {
        assert_eq!(f32_to_pcm16(3.5), i16::MAX);
        assert_eq!(f32_to_pcm16(-7.0), i16::MIN);
    }

    #[test]
    fn encoding_is_little_endian() {
        assert_eq!(encode_pcm16_le(&[1.0, -1.0]), vec![0xFF, 0x7F, 0x00, 0x80]);
        assert_eq!(decode_pcm16_le(&[0xFF, 0x7F, 0x00, 0x80, 0x01]), vec![1.0, -1.0]);
    }

    #[test]
    fn energy_scale() {
        assert_eq!(energy(&[]), 0.0);
        assert_eq!(energy(&[0.0; 16]), 0.0);
        assert!((energy(&[1.0, -1.0]) - 255.0).abs() < 1e-3);
        assert!((energy(&[0.2, -0.2]) - 51.0).abs() < 1e-3);
    }

    #[test]
    fn wav_header_sizes() {
        let wav = pcm16_to_wav(&[0u8; 320], 16_000);
        assert_eq!(wav.len(), 44 + 320);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]), 36 + 320);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 320);
    }
}
