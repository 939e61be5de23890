//! G.711 μ-law expansion.
//!
//! Telephony media streams carry 8-bit μ-law; the core works on 16-bit
//! linear PCM, so inbound payloads are expanded here before buffering.

const BIAS: i16 = 0x84;

/// Expand one μ-law byte to a linear 16-bit sample.
pub fn mulaw_to_linear(mu: u8) -> i16 {
    let mu = !mu;
    let sign = mu & 0x80 != 0;
    let exponent = i16::from((mu >> 4) & 0x07);
    let mantissa = i16::from(mu & 0x0F);
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign {
        -magnitude
    } else {
        magnitude
    }
}

/// Expand a μ-law buffer into little-endian 16-bit PCM bytes.
pub fn decode(mulaw: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(mulaw.len() * 2);
    for &byte in mulaw {
        pcm.extend_from_slice(&mulaw_to_linear(byte).to_le_bytes());
    }
    pcm
}
