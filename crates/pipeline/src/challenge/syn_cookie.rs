//! SYN-cookie style connection admission (C12, supplemental). A stateless
//! check at the connection-attempt level, distinct from the HTTP
//! challenge ladder: no KV round trip is needed to verify a cookie, only
//! to track the per-IP attempt counter that decides whether to apply one.

use std::time::Duration;

use sha2::{Digest, Sha256};
use waf_common::error::WafError;
use waf_common::ports::KvStore;

const ATTEMPT_WINDOW: Duration = Duration::from_secs(60);

/// `SHA256(f"{src_ip}:{src_port}:{dst_ip}:{dst_port}:{seq}" + secret)`,
/// masked to 31 bits, with the low byte of `seq` folded into the top byte
/// of the result.
pub fn generate(
    secret: &str,
    source_ip: &str,
    source_port: u16,
    dest_ip: &str,
    dest_port: u16,
    sequence_number: u32,
) -> u32 {
    let material = format!("{source_ip}:{source_port}:{dest_ip}:{dest_port}:{sequence_number}{secret}");
    let digest = Sha256::digest(material.as_bytes());
    let masked = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7FFF_FFFF;
    let seq_low_byte = sequence_number & 0xFF;
    (masked & 0x00FF_FFFF) | (seq_low_byte << 24)
}

/// Recovers the folded low byte of `seq` from `cookie`'s top byte and
/// recomputes the cookie for the claimed `sequence_number` to compare.
pub fn verify(
    secret: &str,
    cookie: u32,
    source_ip: &str,
    source_port: u16,
    dest_ip: &str,
    dest_port: u16,
    sequence_number: u32,
) -> bool {
    let recovered_low_byte = (cookie >> 24) & 0xFF;
    if recovered_low_byte != sequence_number & 0xFF {
        return false;
    }
    generate(secret, source_ip, source_port, dest_ip, dest_port, sequence_number) == cookie
}

pub struct SynCookieGate {
    max_requests_per_ip: u64,
}

impl SynCookieGate {
    pub fn new(max_requests_per_ip: u64) -> Self {
        Self { max_requests_per_ip }
    }

    fn attempt_key(ip: &str) -> String {
        format!("syn_attempts:{ip}")
    }

    /// Engages once the rolling 60s attempt counter exceeds 70% of
    /// `max_requests_per_ip`.
    pub async fn should_apply(&self, kv: &impl KvStore, ip: &str) -> Result<bool, WafError> {
        let count = kv.incr(&Self::attempt_key(ip), Some(ATTEMPT_WINDOW)).await?;
        Ok(count as f64 > 0.7 * self.max_requests_per_ip as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waf_common::memory::InMemoryKvStore;

    #[test]
    fn a_generated_cookie_verifies_with_the_same_sequence() {
        let cookie = generate("secret", "203.0.113.1", 443, "198.51.100.1", 80, 12345);
        assert!(verify("secret", cookie, "203.0.113.1", 443, "198.51.100.1", 80, 12345));
    }

    #[test]
    fn a_different_sequence_does_not_verify() {
        let cookie = generate("secret", "203.0.113.1", 443, "198.51.100.1", 80, 12345);
        assert!(!verify("secret", cookie, "203.0.113.1", 443, "198.51.100.1", 80, 99999));
    }

    #[tokio::test]
    async fn gate_engages_past_seventy_percent_of_the_budget() {
        let kv = InMemoryKvStore::new();
        let gate = SynCookieGate::new(10);
        let mut engaged = false;
        for _ in 0..8 {
            engaged = gate.should_apply(&kv, "203.0.113.5").await.unwrap();
        }
        assert!(engaged);
    }

    #[tokio::test]
    async fn gate_stays_disengaged_under_the_budget() {
        let kv = InMemoryKvStore::new();
        let gate = SynCookieGate::new(10);
        let engaged = gate.should_apply(&kv, "203.0.113.6").await.unwrap();
        assert!(!engaged);
    }
}
