//! Challenge system (C12). Issues and verifies the cookie / encrypted
//! cookie / proof-of-work / tarpit ladder, tracks bypass counters, and
//! computes the escalation level a request sits at.

mod crypto;
mod pow;
mod syn_cookie;
mod tarpit;

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use waf_common::config::Config;
use waf_common::error::WafError;
use waf_common::model::{Challenge, ChallengeKind, ChallengeRecord};
use waf_common::ports::KvStore;

pub use syn_cookie::SynCookieGate;

const BYPASS_COUNTER_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Serialize, Deserialize)]
struct EncryptedCookiePayload {
    token: String,
    ip: String,
    issued_at: chrono::DateTime<Utc>,
    nonce: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LadderLevel {
    Allow = 1,
    SoftWarn = 2,
    EncryptedCookie = 3,
    PowOrTarpit = 4,
    HardBlock = 5,
}

impl LadderLevel {
    fn from_u8(level: u8) -> Self {
        match level {
            1 => LadderLevel::Allow,
            2 => LadderLevel::SoftWarn,
            3 => LadderLevel::EncryptedCookie,
            4 => LadderLevel::PowOrTarpit,
            _ => LadderLevel::HardBlock,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BypassCounts {
    pub total: i64,
    pub kind_specific: i64,
    pub same_fingerprint: Option<i64>,
}

/// Base level from (reputation_score, anomaly_score, request_count), per
/// §4.12's table.
pub fn base_level(reputation_score: f64, anomaly_score: f64, request_count: u64) -> LadderLevel {
    let level = if reputation_score >= 70.0 || anomaly_score >= 0.8 {
        5
    } else if reputation_score >= 40.0 || anomaly_score >= 0.6 {
        4
    } else if anomaly_score >= 0.4 || request_count > 50 {
        3
    } else if request_count > 20 {
        2
    } else {
        1
    };
    LadderLevel::from_u8(level)
}

/// Escalations are monotonic: the result is never below `level`.
pub fn escalate(
    level: LadderLevel,
    headless_confidence: f64,
    headless_threshold: f64,
    bypasses: BypassCounts,
    bypass_threshold: u64,
) -> LadderLevel {
    let mut level = level as u8;
    if headless_confidence >= headless_threshold {
        level = level.max(4);
    }
    if bypasses.total as u64 >= bypass_threshold {
        level = 5;
    }
    if bypasses.kind_specific as u64 >= bypass_threshold {
        level = (level + 1).min(5);
    }
    if bypasses.same_fingerprint.is_some_and(|n| n >= 1) {
        level = (level + 1).min(5);
    }
    LadderLevel::from_u8(level)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

pub struct ChallengeSystem {
    secret_key: String,
    record_ttl: Duration,
    pow_difficulty_min: u32,
    pow_difficulty_max: u32,
    tarpit_complexity_default: u32,
    tarpit_solve_time_min_ms: u64,
    tarpit_solve_time_max_ms: u64,
}

impl ChallengeSystem {
    pub fn new(config: &Config) -> Self {
        Self {
            secret_key: config.secret_key.expose().to_string(),
            record_ttl: Duration::from_secs(config.challenge_cookie_ttl_secs),
            pow_difficulty_min: config.pow_difficulty_min,
            pow_difficulty_max: config.pow_difficulty_max,
            tarpit_complexity_default: config.tarpit_complexity_default,
            tarpit_solve_time_min_ms: config.tarpit_solve_time_min_ms,
            tarpit_solve_time_max_ms: config.tarpit_solve_time_max_ms,
        }
    }

    fn record_key(kind: ChallengeKind, token: &str) -> String {
        format!("challenge:{}:{token}", kind.as_str())
    }

    fn bypass_key(ip: &str) -> String {
        format!("bypass:{ip}")
    }

    fn bypass_kind_key(ip: &str, kind: ChallengeKind) -> String {
        format!("bypass:{ip}:{}", kind.as_str())
    }

    fn bypass_fingerprint_key(fingerprint: &str) -> String {
        format!("bypass:fp:{fingerprint}")
    }

    fn new_token() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// CH-1: every issued record is bound to the requesting IP.
    pub async fn issue_cookie(&self, kv: &impl KvStore, ip: &str) -> Result<Challenge, WafError> {
        let token = Self::new_token();
        let record = ChallengeRecord {
            kind: ChallengeKind::Cookie,
            ip: ip.to_string(),
            token: token.clone(),
            difficulty_or_complexity: 0,
            issued_at: Utc::now(),
            expected_solution: None,
            nonce: Self::new_token(),
        };
        kv.set_json(&Self::record_key(ChallengeKind::Cookie, &token), &record, Some(self.record_ttl))
            .await?;
        Ok(Challenge::Cookie { token })
    }

    pub async fn verify_cookie(&self, kv: &impl KvStore, ip: &str, token: &str) -> Result<bool, WafError> {
        let record = kv
            .get_json::<ChallengeRecord>(&Self::record_key(ChallengeKind::Cookie, token))
            .await?;
        Ok(record.is_some_and(|r| constant_time_eq(&r.ip, ip)))
    }

    pub async fn issue_encrypted_cookie(&self, kv: &impl KvStore, ip: &str) -> Result<Challenge, WafError> {
        let token = Self::new_token();
        let nonce = Self::new_token();
        let issued_at = Utc::now();
        let record = ChallengeRecord {
            kind: ChallengeKind::EncryptedCookie,
            ip: ip.to_string(),
            token: token.clone(),
            difficulty_or_complexity: 0,
            issued_at,
            expected_solution: None,
            nonce: nonce.clone(),
        };
        kv.set_json(
            &Self::record_key(ChallengeKind::EncryptedCookie, &token),
            &record,
            Some(self.record_ttl),
        )
        .await?;

        let payload = EncryptedCookiePayload {
            token,
            ip: ip.to_string(),
            issued_at,
            nonce,
        };
        let plaintext =
            serde_json::to_vec(&payload).map_err(|e| WafError::input(format!("encoding encrypted cookie: {e}")))?;
        let key = crypto::derive_key(&self.secret_key);
        let sealed = crypto::seal(&key, &plaintext)?;
        Ok(Challenge::EncryptedCookie { payload: sealed })
    }

    /// Recovers plaintext, checks the token against its KV record, binds
    /// to `ip`, and bounds age by the record TTL.
    pub async fn verify_encrypted_cookie(
        &self,
        kv: &impl KvStore,
        ip: &str,
        sealed_payload: &str,
    ) -> Result<bool, WafError> {
        let key = crypto::derive_key(&self.secret_key);
        let plaintext = match crypto::open(&key, sealed_payload) {
            Some(p) => p,
            None => return Ok(false),
        };
        let payload: EncryptedCookiePayload = match serde_json::from_slice(&plaintext) {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };
        if !constant_time_eq(&payload.ip, ip) {
            return Ok(false);
        }
        let max_age = chrono::Duration::from_std(self.record_ttl).unwrap_or(chrono::Duration::seconds(300));
        if Utc::now() - payload.issued_at > max_age {
            return Ok(false);
        }
        let record = kv
            .get_json::<ChallengeRecord>(&Self::record_key(ChallengeKind::EncryptedCookie, &payload.token))
            .await?;
        Ok(record.is_some_and(|r| constant_time_eq(&r.ip, ip) && constant_time_eq(&r.token, &payload.token)))
    }

    pub async fn issue_pow(&self, kv: &impl KvStore, ip: &str, prior_bypasses: u64) -> Result<Challenge, WafError> {
        let token = Self::new_token();
        let difficulty = pow::scaled_difficulty(
            self.pow_difficulty_min,
            prior_bypasses,
            self.pow_difficulty_min,
            self.pow_difficulty_max,
        );
        let record = ChallengeRecord {
            kind: ChallengeKind::Pow,
            ip: ip.to_string(),
            token: token.clone(),
            difficulty_or_complexity: difficulty,
            issued_at: Utc::now(),
            expected_solution: None,
            nonce: Self::new_token(),
        };
        kv.set_json(&Self::record_key(ChallengeKind::Pow, &token), &record, Some(self.record_ttl))
            .await?;
        Ok(Challenge::Pow { token, difficulty })
    }

    /// CH-2: single-use via `get_and_delete`, closing the replay window.
    pub async fn verify_pow(&self, kv: &impl KvStore, ip: &str, token: &str, nonce: &str) -> Result<bool, WafError> {
        let record = self.take_record(kv, ChallengeKind::Pow, token).await?;
        let record = match record {
            Some(r) => r,
            None => return Ok(false),
        };
        if !constant_time_eq(&record.ip, ip) {
            return Ok(false);
        }
        Ok(pow::verify(token, nonce, record.difficulty_or_complexity))
    }

    pub async fn issue_tarpit(
        &self,
        kv: &impl KvStore,
        ip: &str,
        complexity: Option<u32>,
    ) -> Result<Challenge, WafError> {
        let complexity = complexity.unwrap_or(self.tarpit_complexity_default);
        let token = Self::new_token();
        let expected_solution = tarpit::compute_solution(&token, complexity);
        let record = ChallengeRecord {
            kind: ChallengeKind::Tarpit,
            ip: ip.to_string(),
            token: token.clone(),
            difficulty_or_complexity: complexity,
            issued_at: Utc::now(),
            expected_solution: Some(expected_solution),
            nonce: Self::new_token(),
        };
        kv.set_json(&Self::record_key(ChallengeKind::Tarpit, &token), &record, Some(self.record_ttl))
            .await?;
        Ok(Challenge::Tarpit { token, complexity })
    }

    /// CH-2 (single-use) + CH-3 (solve time must land in the configured
    /// window, rejecting both pre-computed and stalled clients).
    pub async fn verify_tarpit(
        &self,
        kv: &impl KvStore,
        ip: &str,
        token: &str,
        solution: &str,
        solve_time_ms: u64,
    ) -> Result<bool, WafError> {
        let record = self.take_record(kv, ChallengeKind::Tarpit, token).await?;
        let record = match record {
            Some(r) => r,
            None => return Ok(false),
        };
        if !constant_time_eq(&record.ip, ip) {
            return Ok(false);
        }
        if solve_time_ms < self.tarpit_solve_time_min_ms || solve_time_ms > self.tarpit_solve_time_max_ms {
            return Ok(false);
        }
        let expected = record.expected_solution.as_deref().unwrap_or_default();
        Ok(constant_time_eq(expected, solution))
    }

    async fn take_record(
        &self,
        kv: &impl KvStore,
        kind: ChallengeKind,
        token: &str,
    ) -> Result<Option<ChallengeRecord>, WafError> {
        match kv.get_and_delete(&Self::record_key(kind, token)).await? {
            Some(raw) => {
                let record = serde_json::from_str(&raw)
                    .map_err(|e| WafError::input(format!("malformed challenge record: {e}")))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Bypass counters expire after 1h (§4.12).
    pub async fn record_bypass(
        &self,
        kv: &impl KvStore,
        ip: &str,
        kind: ChallengeKind,
        fingerprint: Option<&str>,
    ) -> Result<BypassCounts, WafError> {
        let total = kv.incr(&Self::bypass_key(ip), Some(BYPASS_COUNTER_TTL)).await?;
        let kind_specific = kv.incr(&Self::bypass_kind_key(ip, kind), Some(BYPASS_COUNTER_TTL)).await?;
        let same_fingerprint = match fingerprint {
            Some(fp) => Some(kv.incr(&Self::bypass_fingerprint_key(fp), Some(BYPASS_COUNTER_TTL)).await?),
            None => None,
        };
        Ok(BypassCounts {
            total,
            kind_specific,
            same_fingerprint,
        })
    }
}
