//! Compact ("bits") encoding of 256-bit difficulty targets.
//!
//! The 32-bit form is base-256 scientific notation: one exponent byte and a
//! three-byte mantissa whose top bit is reserved as a sign flag. Consensus
//! never accepts a negative or overflowing encoding, but the raw decoder is
//! still needed by the difficulty window, which weighs historical blocks by
//! whatever bits they actually carried.

use primitive_types::U256;
use thiserror::Error;

/// Sign bit within the three-byte mantissa.
const SIGN_BIT: u32 = 0x0080_0000;
/// Mantissa mask (23 value bits).
const MANTISSA_MASK: u32 = 0x007f_ffff;

/// Ways a compact encoding can be unusable as a proof-of-work target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CompactError {
    #[error("compact target encodes a negative value")]
    Negative,
    #[error("compact target overflows 256 bits")]
    Overflow,
    #[error("compact target is zero")]
    Zero,
    #[error("compact target exceeds the proof-of-work limit")]
    AboveLimit,
}

/// Decodes `bits` without any range policing.
///
/// The sign bit and overflowing exponents are simply reflected in the value
/// (an overflow shifts the mantissa off the top and yields zero); use
/// [`decode_compact`] or [`derive_target`] where those must be rejected.
pub fn compact_to_target(bits: u32) -> U256 {
    let size = (bits >> 24) as usize;
    let word = bits & MANTISSA_MASK;
    if size <= 3 {
        U256::from(word >> (8 * (3 - size)))
    } else {
        U256::from(word) << (8 * (size - 3))
    }
}

/// Encodes `target` into compact form.
///
/// The mantissa's top bit is kept clear by bumping the exponent, so encoded
/// values always decode as non-negative.
pub fn target_to_compact(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u64() as u32
    };
    if compact & SIGN_BIT != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | ((size as u32) << 24)
}

/// Strict decode: rejects negative, overflowing, and zero encodings.
pub fn decode_compact(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let word = bits & MANTISSA_MASK;
    if word != 0 && bits & SIGN_BIT != 0 {
        return Err(CompactError::Negative);
    }
    if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
        return Err(CompactError::Overflow);
    }
    let target = compact_to_target(bits);
    if target.is_zero() {
        return Err(CompactError::Zero);
    }
    Ok(target)
}

/// Decodes `bits` and enforces the proof-of-work policy range.
///
/// Every consumer of a claimed target routes through here so the policy
/// boundary is applied exactly once.
pub fn derive_target(bits: u32, pow_limit: &U256) -> Result<U256, CompactError> {
    let target = decode_compact(bits)?;
    if target > *pow_limit {
        return Err(CompactError::AboveLimit);
    }
    Ok(target)
}
