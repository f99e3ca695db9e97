//! Proof-of-work challenge (C12). Client finds a nonce whose
//! `SHA256(token:nonce)` has `difficulty` leading hex zero digits.

use waf_common::crypto::sha256_hex;

pub fn verify(token: &str, nonce: &str, difficulty: u32) -> bool {
    let digest = sha256_hex(&format!("{token}:{nonce}"));
    let difficulty = difficulty as usize;
    digest.len() >= difficulty && digest.as_bytes()[..difficulty].iter().all(|&b| b == b'0')
}

/// Difficulty grows with prior cookie bypasses, clamped to the configured
/// range.
pub fn scaled_difficulty(base: u32, prior_bypasses: u64, min: u32, max: u32) -> u32 {
    (base + prior_bypasses as u32).clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Brute-forces a valid nonce for a low difficulty so verification has
    /// something real to check against.
    fn solve(token: &str, difficulty: u32) -> String {
        for candidate in 0u64.. {
            let nonce = candidate.to_string();
            if verify(token, &nonce, difficulty) {
                return nonce;
            }
        }
        unreachable!()
    }

    #[test]
    fn a_solved_nonce_verifies() {
        let nonce = solve("abc123", 2);
        assert!(verify("abc123", &nonce, 2));
    }

    #[test]
    fn wrong_nonce_does_not_verify() {
        assert!(!verify("abc123", "not-a-solution", 3));
    }

    #[test]
    fn difficulty_scales_with_bypasses_but_stays_in_range() {
        assert_eq!(scaled_difficulty(3, 0, 1, 6), 3);
        assert_eq!(scaled_difficulty(3, 2, 1, 6), 5);
        assert_eq!(scaled_difficulty(3, 10, 1, 6), 6);
    }
}
