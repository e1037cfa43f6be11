//! mu-law decoder

use super::BIAS;

const fn expand(code: u8) -> i16 {
    let u = !code;
    let exponent = (u >> 4) & 0x07;
    let mantissa = (u & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if u & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

const fn build_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = expand(i as u8);
        i += 1;
    }
    table
}

static DECODE_TABLE: [i16; 256] = build_table();

/// Expand one mu-law byte to a 16-bit linear sample.
#[inline]
pub fn ulaw_to_linear(code: u8) -> i16 {
    DECODE_TABLE[code as usize]
}

/// Decode an encoded frame into a new PCM buffer.
pub fn decode(data: &[u8]) -> Vec<i16> {
    let mut out = Vec::with_capacity(data.len());
    decode_into(data, &mut out);
    out
}

/// Decode an encoded frame, replacing the contents of `out`.
pub fn decode_into(data: &[u8], out: &mut Vec<i16>) {
    out.clear();
    out.extend(data.iter().map(|&b| ulaw_to_linear(b)));
}
