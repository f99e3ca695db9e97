//! Behavioral analyzer (C8). Bot/scraper heuristics over the last 50
//! events in a 5-minute window, plus a session fingerprint derived from
//! client headers that stay stable across a browsing session.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use waf_common::crypto::sha256_hex_truncated;
use waf_common::error::WafError;
use waf_common::model::MetricsEvent;
use waf_common::ports::KvStore;

const WINDOW_MINUTES: i64 = 5;
const MAX_STORED_EVENTS: usize = 50;
const EVENT_TTL: Duration = Duration::from_secs(300);
const IS_BOT_THRESHOLD: f64 = 0.5;
const HIGH_ENDPOINT_DIVERSITY_RATIO: f64 = 0.8;
const HIGH_ENDPOINT_DIVERSITY_MIN_TOTAL: usize = 20;
const REGULAR_TIMING_MAX_VARIANCE: f64 = 0.1;
const REGULAR_TIMING_MAX_MEAN_SECS: f64 = 2.0;
const SINGLE_UA_MIN_EVENTS: usize = 10;
const MOSTLY_GET_THRESHOLD: f64 = 0.95;

/// A minimal per-request sample recorded for behavioral analysis. Distinct
/// from `MetricsEvent` (C6), which tracks size/status for throughput, not
/// endpoint/method/UA for behavior.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BehaviorEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub endpoint: String,
    pub method: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorProfile {
    pub confidence: f64,
    pub is_bot: bool,
    pub is_scraper: bool,
    pub high_endpoint_diversity: bool,
    pub regular_timing: bool,
    pub single_user_agent: bool,
    pub mostly_get: bool,
}

impl BehaviorProfile {
    fn empty() -> Self {
        Self {
            confidence: 0.0,
            is_bot: false,
            is_scraper: false,
            high_endpoint_diversity: false,
            regular_timing: false,
            single_user_agent: false,
            mostly_get: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BehavioralAnalyzer;

impl BehavioralAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn events_key(ip: &str) -> String {
        format!("behavior:{ip}")
    }

    fn fingerprint_key(ip: &str) -> String {
        format!("behavior_fp:{ip}")
    }

    pub async fn append(&self, kv: &impl KvStore, ip: &str, event: BehaviorEvent) -> Result<(), WafError> {
        let key = Self::events_key(ip);
        let mut events: Vec<BehaviorEvent> = kv.get_json(&key).await?.unwrap_or_default();
        events.push(event);
        if events.len() > MAX_STORED_EVENTS {
            let excess = events.len() - MAX_STORED_EVENTS;
            events.drain(0..excess);
        }
        kv.set_json(&key, &events, Some(EVENT_TTL)).await?;
        Ok(())
    }

    pub async fn profile(&self, kv: &impl KvStore, ip: &str) -> Result<BehaviorProfile, WafError> {
        let events: Vec<BehaviorEvent> = kv.get_json(&Self::events_key(ip)).await?.unwrap_or_default();
        Ok(compute(&events))
    }

    /// SHA-256 of `{user-agent, accept-language, accept-encoding,
    /// sec-ch-ua}`, truncated to 16 hex characters. Stable across a
    /// browsing session, cached for 5 minutes so repeated lookups for the
    /// same request don't re-hash.
    pub async fn session_fingerprint(
        &self,
        kv: &impl KvStore,
        ip: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<String, WafError> {
        let key = Self::fingerprint_key(ip);
        if let Some(cached) = kv.get(&key).await? {
            return Ok(cached);
        }
        let material = format!(
            "{}|{}|{}|{}",
            headers.get("user-agent").map(String::as_str).unwrap_or_default(),
            headers.get("accept-language").map(String::as_str).unwrap_or_default(),
            headers.get("accept-encoding").map(String::as_str).unwrap_or_default(),
            headers.get("sec-ch-ua").map(String::as_str).unwrap_or_default(),
        );
        let fingerprint = sha256_hex_truncated(&material, 16);
        kv.set(&key, &fingerprint, Some(EVENT_TTL)).await?;
        Ok(fingerprint)
    }
}

fn compute(events: &[BehaviorEvent]) -> BehaviorProfile {
    let now = chrono::Utc::now();
    let cutoff = now - chrono::Duration::minutes(WINDOW_MINUTES);
    let windowed: Vec<&BehaviorEvent> = events.iter().filter(|e| e.timestamp >= cutoff).collect();
    if windowed.is_empty() {
        return BehaviorProfile::empty();
    }

    let total = windowed.len();
    let unique_endpoints: HashSet<&str> = windowed.iter().map(|e| e.endpoint.as_str()).collect();
    let high_endpoint_diversity = unique_endpoints.len() as f64 / total as f64 > HIGH_ENDPOINT_DIVERSITY_RATIO
        && total > HIGH_ENDPOINT_DIVERSITY_MIN_TOTAL;

    let mut sorted: Vec<&&BehaviorEvent> = windowed.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);
    let (mean, variance) = inter_arrival_stats(&sorted);
    let regular_timing =
        total >= 3 && mean > 0.0 && mean < REGULAR_TIMING_MAX_MEAN_SECS && variance < REGULAR_TIMING_MAX_VARIANCE;

    let mut ua_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for event in &windowed {
        *ua_counts.entry(event.user_agent.as_str()).or_insert(0) += 1;
    }
    let max_ua = ua_counts.values().copied().max().unwrap_or(0);
    let single_user_agent = max_ua > SINGLE_UA_MIN_EVENTS;

    let get_count = windowed.iter().filter(|e| e.method.eq_ignore_ascii_case("GET")).count();
    let mostly_get = get_count as f64 / total as f64 > MOSTLY_GET_THRESHOLD;

    let mut confidence = 0.0;
    if high_endpoint_diversity {
        confidence += 0.3;
    }
    if regular_timing {
        confidence += 0.4;
    }
    if single_user_agent {
        confidence += 0.2;
    }
    if mostly_get {
        confidence += 0.1;
    }

    BehaviorProfile {
        confidence,
        is_bot: confidence >= IS_BOT_THRESHOLD,
        is_scraper: high_endpoint_diversity && regular_timing,
        high_endpoint_diversity,
        regular_timing,
        single_user_agent,
        mostly_get,
    }
}

fn inter_arrival_stats(events: &[&&BehaviorEvent]) -> (f64, f64) {
    if events.len() < 2 {
        return (0.0, 0.0);
    }
    let deltas: Vec<f64> = events
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .collect();
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    let variance = deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / deltas.len() as f64;
    (mean, variance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use waf_common::memory::InMemoryKvStore;

    fn event(seconds_ago: i64, endpoint: &str, method: &str, ua: &str) -> BehaviorEvent {
        BehaviorEvent {
            timestamp: chrono::Utc::now() - chrono::Duration::seconds(seconds_ago),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            user_agent: ua.to_string(),
        }
    }

    #[tokio::test]
    async fn no_history_is_not_a_bot() {
        let kv = InMemoryKvStore::new();
        let analyzer = BehavioralAnalyzer::new();
        let profile = analyzer.profile(&kv, "203.0.113.1").await.unwrap();
        assert!(!profile.is_bot);
    }

    #[tokio::test]
    async fn regular_interval_scraper_is_flagged() {
        let kv = InMemoryKvStore::new();
        let analyzer = BehavioralAnalyzer::new();
        // 25 distinct endpoints (diversity > 0.8 with total > 20), 1s apart
        // (regular timing, mean < 2s), all the same UA (> 10 events single UA).
        let total = 25;
        for i in 0..total {
            let endpoint = format!("/path/{i}");
            analyzer
                .append(
                    &kv,
                    "203.0.113.2",
                    event((total - i) as i64, &endpoint, "GET", "scrapey/1.0"),
                )
                .await
                .unwrap();
        }
        let profile = analyzer.profile(&kv, "203.0.113.2").await.unwrap();
        assert!(profile.high_endpoint_diversity, "{:?}", profile);
        assert!(profile.single_user_agent, "{:?}", profile);
        assert!(profile.is_bot, "{:?}", profile);
        assert!(profile.is_scraper, "{:?}", profile);
    }

    #[tokio::test]
    async fn single_hit_is_not_enough_to_classify_timing() {
        let kv = InMemoryKvStore::new();
        let analyzer = BehavioralAnalyzer::new();
        analyzer
            .append(&kv, "203.0.113.3", event(1, "/home", "GET", "Mozilla/5.0"))
            .await
            .unwrap();
        let profile = analyzer.profile(&kv, "203.0.113.3").await.unwrap();
        assert!(!profile.regular_timing);
    }

    #[tokio::test]
    async fn session_fingerprint_is_stable_across_calls() {
        let kv = InMemoryKvStore::new();
        let analyzer = BehavioralAnalyzer::new();
        let mut headers = BTreeMap::new();
        headers.insert("user-agent".to_string(), "Mozilla/5.0".to_string());
        headers.insert("accept-language".to_string(), "en-US".to_string());
        let first = analyzer.session_fingerprint(&kv, "203.0.113.4", &headers).await.unwrap();
        let second = analyzer.session_fingerprint(&kv, "203.0.113.4", &headers).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
    }
}
