//! Reputation engine (C7). Weighted fusion of threat-intel, behavioral,
//! temporal, and network sub-scores over the security event history,
//! cached for 1h per IP.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use waf_common::error::WafError;
use waf_common::model::SecurityEvent;
use waf_common::ports::{KvStore, RecordStore};

const CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReputationClassification {
    Clean,
    Suspicious,
    Malicious,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReputationScore {
    pub score: f64,
    pub classification: ReputationClassification,
    pub threat_intel: f64,
    pub behavioral: f64,
    pub temporal: f64,
    pub network: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedReputation {
    score: f64,
    threat_intel: f64,
    behavioral: f64,
    temporal: f64,
    network: f64,
}

pub struct ReputationEngine {
    malicious_threshold: f64,
    suspicious_threshold: f64,
}

impl ReputationEngine {
    pub fn new(malicious_threshold: f64, suspicious_threshold: f64) -> Self {
        Self {
            malicious_threshold,
            suspicious_threshold,
        }
    }

    fn cache_key(ip: &str) -> String {
        format!("reputation:{ip}")
    }

    pub async fn classify(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        ip: &str,
    ) -> Result<ReputationScore, WafError> {
        if let Some(cached) = kv.get_json::<CachedReputation>(&Self::cache_key(ip)).await? {
            return Ok(self.score_from_cache(cached));
        }

        let now = Utc::now();
        let last_24h = records
            .security_events_between(ip, now - chrono::Duration::hours(24), now)
            .await?;
        let last_1h = records
            .security_events_between(ip, now - chrono::Duration::hours(1), now)
            .await?;
        let same_hour_yesterday = records
            .security_events_between(
                ip,
                now - chrono::Duration::hours(25),
                now - chrono::Duration::hours(24),
            )
            .await?;

        let threat_intel = Self::threat_intel_score(&last_24h);
        let behavioral = Self::behavioral_score(&last_1h);
        let temporal = Self::temporal_score(last_1h.len(), same_hour_yesterday.len());
        let network = Self::network_score(&last_24h);

        let score = 0.3 * threat_intel + 0.4 * behavioral + 0.2 * temporal + 0.1 * network;
        let result = ReputationScore {
            score,
            classification: self.classify_score(score),
            threat_intel,
            behavioral,
            temporal,
            network,
        };

        kv.set_json(
            &Self::cache_key(ip),
            &CachedReputation {
                score,
                threat_intel,
                behavioral,
                temporal,
                network,
            },
            Some(CACHE_TTL),
        )
        .await?;
        Ok(result)
    }

    /// Invalidated when a threat is blocked for `ip`, per §4.7.
    pub async fn invalidate(&self, kv: &impl KvStore, ip: &str) -> Result<(), WafError> {
        kv.delete(&Self::cache_key(ip)).await
    }

    fn score_from_cache(&self, cached: CachedReputation) -> ReputationScore {
        ReputationScore {
            score: cached.score,
            classification: self.classify_score(cached.score),
            threat_intel: cached.threat_intel,
            behavioral: cached.behavioral,
            temporal: cached.temporal,
            network: cached.network,
        }
    }

    fn classify_score(&self, score: f64) -> ReputationClassification {
        if score >= self.malicious_threshold {
            ReputationClassification::Malicious
        } else if score >= self.suspicious_threshold {
            ReputationClassification::Suspicious
        } else {
            ReputationClassification::Clean
        }
    }

    /// 24h block ratio, multiplied by a severity bonus per distinct threat
    /// category present (+0.3 critical, +0.2 high), capped at 100.
    fn threat_intel_score(events: &[SecurityEvent]) -> f64 {
        if events.is_empty() {
            return 0.0;
        }
        let blocked = events.iter().filter(|e| e.blocked).count();
        let ratio = blocked as f64 / events.len() as f64;

        let categories: HashSet<&str> = events.iter().map(|e| e.threat_type.as_str()).collect();
        let mut multiplier = 1.0;
        for category in &categories {
            match *category {
                "sql_injection" | "command_injection" => multiplier += 0.3,
                "xss" | "path_traversal" => multiplier += 0.2,
                _ => {}
            }
        }
        (ratio * 100.0 * multiplier).min(100.0)
    }

    /// Endpoint diversity (0.3) + single-UA bias (0.2) + per-minute rate (0.5).
    fn behavioral_score(events: &[SecurityEvent]) -> f64 {
        if events.is_empty() {
            return 0.0;
        }
        let total = events.len();
        let unique_endpoints: HashSet<&str> = events.iter().map(|e| e.endpoint.as_str()).collect();
        let endpoint_diversity = unique_endpoints.len() as f64 / total as f64;

        let mut ua_counts: HashMap<&str, usize> = HashMap::new();
        for event in events {
            *ua_counts.entry(event.user_agent.as_str()).or_insert(0) += 1;
        }
        let max_ua = ua_counts.values().copied().max().unwrap_or(0);
        let single_ua_bias = max_ua as f64 / total as f64;

        let rate_per_minute = total as f64 / 60.0;
        let rate_score = (rate_per_minute / 10.0).min(1.0);

        100.0 * (0.3 * endpoint_diversity + 0.2 * single_ua_bias + 0.5 * rate_score)
    }

    /// Ratio of last-hour events to the same hour yesterday: >=5x -> 100,
    /// >=2x -> 50, else 0. Falls back to a linear scale when there is no
    /// history for that hour to compare against.
    fn temporal_score(last_hour_count: usize, same_hour_yesterday_count: usize) -> f64 {
        if same_hour_yesterday_count == 0 {
            return (last_hour_count as f64 * 10.0).min(100.0);
        }
        let ratio = last_hour_count as f64 / same_hour_yesterday_count as f64;
        if ratio >= 5.0 {
            100.0
        } else if ratio >= 2.0 {
            50.0
        } else {
            0.0
        }
    }

    /// 24h failure rate plus a volume penalty above 1000 events.
    fn network_score(events: &[SecurityEvent]) -> f64 {
        if events.is_empty() {
            return 0.0;
        }
        let blocked = events.iter().filter(|e| e.blocked).count();
        let failure_rate = blocked as f64 / events.len() as f64;
        let volume_penalty = if events.len() > 1000 {
            ((events.len() - 1000) as f64 / 100.0).min(50.0)
        } else {
            0.0
        };
        (failure_rate * 100.0 + volume_penalty).min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waf_common::memory::{InMemoryKvStore, InMemoryRecordStore};
    use waf_common::model::ThreatLevel;

    fn blocked_event(ip: &str, threat_type: &str, ago_secs: i64) -> SecurityEvent {
        SecurityEvent {
            ip: ip.to_string(),
            endpoint: "/search".to_string(),
            method: "GET".to_string(),
            threat_type: threat_type.to_string(),
            threat_level: ThreatLevel::Critical,
            payload_snapshot: String::new(),
            user_agent: "curl/8.0".to_string(),
            blocked: true,
            timestamp: Utc::now() - chrono::Duration::seconds(ago_secs),
        }
    }

    #[tokio::test]
    async fn ip_with_no_history_is_clean() {
        let kv = InMemoryKvStore::new();
        let records = InMemoryRecordStore::new();
        let engine = ReputationEngine::new(70.0, 40.0);
        let result = engine.classify(&kv, &records, "203.0.113.1").await.unwrap();
        assert_eq!(result.classification, ReputationClassification::Clean);
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn repeated_blocked_sqli_events_become_malicious() {
        let kv = InMemoryKvStore::new();
        let records = InMemoryRecordStore::new();
        for i in 0..20 {
            records
                .insert_security_event(blocked_event("203.0.113.2", "sql_injection", i * 60))
                .await
                .unwrap();
        }
        let engine = ReputationEngine::new(70.0, 40.0);
        let result = engine.classify(&kv, &records, "203.0.113.2").await.unwrap();
        assert_eq!(result.classification, ReputationClassification::Malicious);
    }

    #[tokio::test]
    async fn classification_is_cached_until_invalidated() {
        let kv = InMemoryKvStore::new();
        let records = InMemoryRecordStore::new();
        let engine = ReputationEngine::new(70.0, 40.0);
        let first = engine.classify(&kv, &records, "203.0.113.3").await.unwrap();

        for i in 0..20 {
            records
                .insert_security_event(blocked_event("203.0.113.3", "sql_injection", i * 60))
                .await
                .unwrap();
        }
        let still_cached = engine.classify(&kv, &records, "203.0.113.3").await.unwrap();
        assert_eq!(still_cached.score, first.score);

        engine.invalidate(&kv, "203.0.113.3").await.unwrap();
        let refreshed = engine.classify(&kv, &records, "203.0.113.3").await.unwrap();
        assert!(refreshed.score > first.score);
    }
}
