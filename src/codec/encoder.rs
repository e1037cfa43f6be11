//! mu-law encoder

use bytes::Bytes;

use super::{BIAS, CLIP};

/// Compress one 16-bit linear sample to mu-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = i32::from(sample);
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };

    let biased = pcm.min(CLIP) + BIAS;

    // biased lies in [0x84, 0x7FFF], so biased >> 7 is in [1, 255]
    let exponent = 31 - ((biased >> 7) as u32).leading_zeros();
    let mantissa = (biased >> (exponent + 3)) & 0x0F;

    !(sign | ((exponent as i32) << 4) | mantissa) as u8
}

/// Encode a PCM frame into a new buffer.
pub fn encode(pcm: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(pcm.len());
    encode_into(pcm, &mut out);
    Bytes::from(out)
}

/// Encode a PCM frame, replacing the contents of `out`.
pub fn encode_into(pcm: &[i16], out: &mut Vec<u8>) {
    out.clear();
    out.extend(pcm.iter().map(|&s| linear_to_ulaw(s)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(linear_to_ulaw(-1), 0x7F);
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(i16::MIN), 0x00);
    }

    #[test]
    fn test_sign_bit() {
        for s in [1i16, 100, 1000, 10000, 30000] {
            assert_eq!(linear_to_ulaw(s) & 0x80, 0x80, "positive {}", s);
            assert_eq!(linear_to_ulaw(-s) & 0x80, 0x00, "negative {}", -s);
        }
    }

    #[test]
    fn test_monotonic() {
        // Larger positive magnitudes never map to a smaller code
        let mut last = linear_to_ulaw(0) & 0x7F;
        for s in (0..=i16::MAX).step_by(7) {
            let code = linear_to_ulaw(s) & 0x7F;
            assert!(code <= last, "sample {} code {:#x} after {:#x}", s, code, last);
            last = code;
        }
    }

    #[test]
    fn test_frame_encoding_halves_size() {
        let pcm = vec![1234i16; 1024];
        let encoded = encode(&pcm);
        assert_eq!(encoded.len(), 1024);
        assert_eq!(encoded.len() * 2, pcm.len() * std::mem::size_of::<i16>());
    }

    #[test]
    fn test_encode_into_reuses_buffer() {
        let mut out = vec![0u8; 8];
        encode_into(&[0, 0, 0], &mut out);
        assert_eq!(out, vec![0xFF, 0xFF, 0xFF]);
    }
}
