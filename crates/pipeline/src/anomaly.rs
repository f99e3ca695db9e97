//! Anomaly detector (C9). A discrete point system over endpoint entropy,
//! request rate, timing regularity, endpoint diversity, and blocked ratio;
//! crossing the hard threshold blocks the request outright.

use std::collections::HashMap;
use std::time::Duration;

use waf_common::error::WafError;
use waf_common::ports::KvStore;

const WINDOW_MINUTES: i64 = 10;
const FEATURE_CACHE_TTL: Duration = Duration::from_secs(300);
const BLOCK_THRESHOLD: f64 = 0.8;

const ENTROPY_POINTS: f64 = 0.2;
const RATE_POINTS: f64 = 0.3;
const REGULARITY_POINTS: f64 = 0.2;
const DIVERSITY_POINTS: f64 = 0.2;
const BLOCKED_RATIO_POINTS: f64 = 0.1;

const ENTROPY_THRESHOLD_BITS: f64 = 2.0;
const RATE_THRESHOLD_PER_SEC: f64 = 10.0;
const REGULARITY_STD_DEV_THRESHOLD_SECS: f64 = 0.5;
const REGULARITY_MIN_RATE_PER_SEC: f64 = 5.0;
const DIVERSITY_RATIO_THRESHOLD: f64 = 0.8;
const DIVERSITY_MIN_TOTAL: usize = 20;
const BLOCKED_RATIO_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AnomalyEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub endpoint: String,
    pub method: String,
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyScore {
    pub score: f64,
    pub should_block: bool,
    pub endpoint_entropy: f64,
    pub rate_per_second: f64,
    pub inter_arrival_std_dev: f64,
    pub diversity_ratio: f64,
    pub blocked_ratio: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AnomalyDetector;

impl AnomalyDetector {
    pub fn new() -> Self {
        Self
    }

    fn events_key(ip: &str) -> String {
        format!("anomaly:{ip}")
    }

    pub async fn append(&self, kv: &impl KvStore, ip: &str, event: AnomalyEvent) -> Result<(), WafError> {
        let key = Self::events_key(ip);
        let mut events: Vec<AnomalyEvent> = kv.get_json(&key).await?.unwrap_or_default();
        events.push(event);
        kv.set_json(&key, &events, Some(FEATURE_CACHE_TTL)).await?;
        Ok(())
    }

    pub async fn score(&self, kv: &impl KvStore, ip: &str) -> Result<AnomalyScore, WafError> {
        let events: Vec<AnomalyEvent> = kv.get_json(&Self::events_key(ip)).await?.unwrap_or_default();
        Ok(compute(&events))
    }
}

fn compute(events: &[AnomalyEvent]) -> AnomalyScore {
    let now = chrono::Utc::now();
    let cutoff = now - chrono::Duration::minutes(WINDOW_MINUTES);
    let mut windowed: Vec<&AnomalyEvent> = events.iter().filter(|e| e.timestamp >= cutoff).collect();
    windowed.sort_by_key(|e| e.timestamp);

    if windowed.is_empty() {
        return AnomalyScore {
            score: 0.0,
            should_block: false,
            endpoint_entropy: 0.0,
            rate_per_second: 0.0,
            inter_arrival_std_dev: 0.0,
            diversity_ratio: 0.0,
            blocked_ratio: 0.0,
        };
    }

    let total = windowed.len();
    let endpoint_entropy = raw_entropy(windowed.iter().map(|e| e.endpoint.as_str()));

    let first = windowed.first().unwrap().timestamp;
    let last = windowed.last().unwrap().timestamp;
    let span_secs = ((last - first).num_milliseconds() as f64 / 1000.0).max(1.0);
    let rate_per_second = total as f64 / span_secs;

    let inter_arrival_std_dev = inter_arrival_std_dev(&windowed);

    let unique_endpoints: std::collections::HashSet<&str> =
        windowed.iter().map(|e| e.endpoint.as_str()).collect();
    let diversity_ratio = unique_endpoints.len() as f64 / total as f64;

    let blocked = windowed.iter().filter(|e| e.blocked).count();
    let blocked_ratio = blocked as f64 / total as f64;

    let mut score = 0.0;
    if endpoint_entropy > ENTROPY_THRESHOLD_BITS {
        score += ENTROPY_POINTS;
    }
    if rate_per_second > RATE_THRESHOLD_PER_SEC {
        score += RATE_POINTS;
    }
    if inter_arrival_std_dev < REGULARITY_STD_DEV_THRESHOLD_SECS && rate_per_second > REGULARITY_MIN_RATE_PER_SEC {
        score += REGULARITY_POINTS;
    }
    if diversity_ratio > DIVERSITY_RATIO_THRESHOLD && total > DIVERSITY_MIN_TOTAL {
        score += DIVERSITY_POINTS;
    }
    if blocked_ratio > BLOCKED_RATIO_THRESHOLD {
        score += BLOCKED_RATIO_POINTS;
    }

    AnomalyScore {
        score,
        should_block: score > BLOCK_THRESHOLD,
        endpoint_entropy,
        rate_per_second,
        inter_arrival_std_dev,
        diversity_ratio,
        blocked_ratio,
    }
}

/// Raw Shannon entropy in bits, unnormalized (the spec's threshold is a
/// flat 2 bits, not a ratio against the distinct-symbol count).
fn raw_entropy<'a>(symbols: impl Iterator<Item = &'a str>) -> f64 {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut total = 0usize;
    for symbol in symbols {
        *counts.entry(symbol).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

fn inter_arrival_std_dev(events: &[&AnomalyEvent]) -> f64 {
    if events.len() < 3 {
        return f64::MAX;
    }
    let deltas: Vec<f64> = events
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .collect();
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    let variance = deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / deltas.len() as f64;
    variance.sqrt()
}
