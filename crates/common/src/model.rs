use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical wire/storage form is lowercase; see the malice/reputation
/// sections of the design notes for why the original's uppercase schema
/// spelling was not carried forward.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IpListKind {
    Allow,
    Deny,
}

/// A single request as seen by the pipeline. Owned exclusively by the
/// orchestrator for the lifetime of one request; never retained past
/// response emission.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub ip: String,
    pub endpoint: String,
    pub method: String,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub query_params: Vec<(String, String)>,
    pub form_data: BTreeMap<String, String>,
    pub json_data: Option<serde_json::Value>,
    pub payload_string: String,
    pub tls_features: Option<TlsFeatures>,
    pub headless: HeadlessVerdict,
}

/// C4's verdict, attached to every `RequestRecord` by the request analyzer
/// so downstream components (the challenge system's escalation ladder) can
/// read it without recomputing it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HeadlessVerdict {
    pub score: f64,
    pub detected: bool,
}

impl RequestRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers.get(&name).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFeatures {
    pub version: String,
    pub cipher_suites: Vec<String>,
    pub extensions: Vec<String>,
    pub curves: Vec<String>,
    pub point_formats: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpListEntry {
    pub ip: String,
    pub kind: IpListKind,
    pub reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl IpListEntry {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsThreatLevel {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFingerprintRecord {
    pub fingerprint: String,
    pub hash: String,
    pub first_seen: chrono::DateTime<chrono::Utc>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
    pub request_count: u64,
    pub blocked_count: u64,
    pub is_whitelisted: bool,
    pub is_blacklisted: bool,
    pub threat_level: TlsThreatLevel,
}

impl TlsFingerprintRecord {
    /// IL-2: whitelisted and blacklisted are never both true after an update.
    pub fn set_whitelisted(&mut self, value: bool) {
        self.is_whitelisted = value;
        if value {
            self.is_blacklisted = false;
        }
    }

    pub fn set_blacklisted(&mut self, value: bool) {
        self.is_blacklisted = value;
        if value {
            self.is_whitelisted = false;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub ip: String,
    pub endpoint: String,
    pub method: String,
    pub threat_type: String,
    pub threat_level: ThreatLevel,
    pub payload_snapshot: String,
    pub user_agent: String,
    pub blocked: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// One entry in a per-IP sliding metrics window, as appended by the
/// orchestrator after every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub status_code: u16,
    pub response_size: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Cookie,
    EncryptedCookie,
    Pow,
    Tarpit,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Cookie => "cookie",
            ChallengeKind::EncryptedCookie => "encrypted_cookie",
            ChallengeKind::Pow => "pow",
            ChallengeKind::Tarpit => "tarpit",
        }
    }
}

/// Ephemeral challenge record keyed by `{kind, ip, token}` in the KV port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub kind: ChallengeKind,
    pub ip: String,
    pub token: String,
    pub difficulty_or_complexity: u32,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    /// Pre-computed expected tarpit solution, memoized at issuance so
    /// verification never re-derives an O(2^complexity) puzzle.
    pub expected_solution: Option<String>,
    pub nonce: String,
}

/// The tagged-enum challenge ladder: the issuer returns exactly one of
/// these, and the encoder turns it into an HTTP response.
#[derive(Debug, Clone)]
pub enum Challenge {
    Cookie { token: String },
    EncryptedCookie { payload: String },
    Pow { token: String, difficulty: u32 },
    Tarpit { token: String, complexity: u32 },
    HardBlock { reason: String },
}

/// Result of one pipeline stage. First terminal outcome wins.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Allow,
    Deny { reason: String },
    Challenge(Challenge),
    Continue,
}
