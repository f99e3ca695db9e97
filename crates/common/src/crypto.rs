use sha2::{Digest, Sha256};

/// Full lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    hex_encode(&digest)
}

/// First `len` hex characters of the SHA-256 digest of `data`. Used for the
/// TLS fingerprint hash (32 chars) and the behavioral session fingerprint
/// (16 chars).
pub fn sha256_hex_truncated(data: &str, len: usize) -> String {
    let full = sha256_hex(data);
    full[..len.min(full.len())].to_string()
}

/// First 4 bytes of SHA-256(data) interpreted as a big-endian u32, masked
/// to 31 bits. Used by the tarpit puzzle and the proof-of-work check.
pub fn sha256_u32_masked(data: &str) -> u32 {
    let digest = Sha256::digest(data.as_bytes());
    let raw = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    raw & 0x7FFF_FFFF
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_hash_is_a_prefix_of_the_full_hash() {
        let full = sha256_hex("hello");
        let truncated = sha256_hex_truncated("hello", 32);
        assert_eq!(&full[..32], truncated);
    }

    #[test]
    fn masked_value_never_sets_the_sign_bit() {
        for input in ["a", "b", "deadbeef", ""] {
            assert_eq!(sha256_u32_masked(input) & 0x8000_0000, 0);
        }
    }
}
