use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte block (or transaction) hash.
///
/// Byte order follows the Bitcoin convention: the array is the little-endian
/// representation of the 256-bit integer, and `Display` renders the familiar
/// reversed-byte hex string.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Tries to create a hash from a slice of bytes
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, std::array::TryFromSliceError> {
        let array: [u8; 32] = slice.try_into()?;
        Ok(Self(array))
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<BlockHash> for [u8; 32] {
    fn from(hash: BlockHash) -> Self {
        hash.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reversed byte order, as block explorers print it.
        let mut reversed = self.0;
        reversed.reverse();
        write!(f, "{}", hex::encode(reversed))
    }
}

// Debug delegates to Display so log lines stay readable.
impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_reverses_bytes() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = BlockHash::new(bytes);
        let rendered = hash.to_string();
        assert!(rendered.ends_with("ab"));
        assert_eq!(rendered.len(), 64);
    }

    #[test]
    fn test_try_from_slice() {
        assert!(BlockHash::try_from_slice(&[0u8; 32]).is_ok());
        assert!(BlockHash::try_from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_zero_check() {
        assert!(BlockHash::default().is_zero());
        assert!(!BlockHash::new([1u8; 32]).is_zero());
    }
}
