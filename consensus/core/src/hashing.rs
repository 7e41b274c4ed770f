use sha2::{Digest, Sha256};

/// Compute SHA256(data)
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Compute SHA256(SHA256(data))
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_sha256_vector() {
        let hash = sha256(b"hello");
        assert_eq!(
            hash,
            hex!("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn test_sha256d_is_double_application() {
        let data = b"block header data";
        assert_eq!(sha256d(data), sha256(&sha256(data)));
    }
}
