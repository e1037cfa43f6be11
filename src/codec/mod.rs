//! G.711 mu-law codec
//!
//! Stateless companding between 16-bit linear PCM and 8-bit mu-law, one
//! output byte per input sample. Sample rate and channel count are fixed
//! by the link, never negotiated.

pub mod decoder;
pub mod encoder;

pub use decoder::{decode, decode_into, ulaw_to_linear};
pub use encoder::{encode, encode_into, linear_to_ulaw};

/// Bias added to the magnitude before segment lookup
pub(crate) const BIAS: i32 = 0x84;

/// Largest magnitude that survives encoding unclipped
pub const CLIP: i32 = 32635;
