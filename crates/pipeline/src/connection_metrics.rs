//! Connection-metrics analyzer (C6). Per-IP sliding window of request
//! timing/size/status, used to derive error rate, throughput, and the
//! low-and-slow flag.

use std::time::Duration;

use chrono::{DateTime, Utc};
use waf_common::error::WafError;
use waf_common::model::MetricsEvent;
use waf_common::ports::KvStore;

const EVENT_TTL: Duration = Duration::from_secs(3600);
/// Caps the stored event list so a high-volume IP cannot grow it
/// unboundedly within the 1h TTL; oldest events are dropped first.
const MAX_STORED_EVENTS: usize = 2000;
const DEFAULT_WINDOW_MINUTES: i64 = 5;
const LOW_AND_SLOW_MIN_DURATION_SECS: f64 = 60.0;
const LOW_AND_SLOW_MIN_REQUESTS: usize = 5;
const REGULAR_TIMING_MAX_VARIANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionMetrics {
    pub requests: usize,
    pub errors: usize,
    pub error_rate: f64,
    pub bytes_per_second: f64,
    pub mean_inter_arrival_secs: f64,
    pub variance_inter_arrival: f64,
    pub is_low_and_slow: bool,
    pub regular_timing: bool,
}

impl ConnectionMetrics {
    fn empty() -> Self {
        Self {
            requests: 0,
            errors: 0,
            error_rate: 0.0,
            bytes_per_second: 0.0,
            mean_inter_arrival_secs: 0.0,
            variance_inter_arrival: 0.0,
            is_low_and_slow: false,
            regular_timing: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionMetricsAnalyzer {
    low_and_slow_bytes_per_second_threshold: Option<f64>,
}

impl ConnectionMetricsAnalyzer {
    pub fn new(low_and_slow_bytes_per_second_threshold: f64) -> Self {
        Self {
            low_and_slow_bytes_per_second_threshold: Some(low_and_slow_bytes_per_second_threshold),
        }
    }

    fn threshold(&self) -> f64 {
        self.low_and_slow_bytes_per_second_threshold.unwrap_or(10.0)
    }

    fn events_key(ip: &str) -> String {
        format!("conn_metrics:{ip}")
    }

    pub async fn append(&self, kv: &impl KvStore, ip: &str, event: MetricsEvent) -> Result<(), WafError> {
        let key = Self::events_key(ip);
        let mut events: Vec<MetricsEvent> = kv.get_json(&key).await?.unwrap_or_default();
        events.push(event);
        if events.len() > MAX_STORED_EVENTS {
            let excess = events.len() - MAX_STORED_EVENTS;
            events.drain(0..excess);
        }
        kv.set_json(&key, &events, Some(EVENT_TTL)).await?;
        Ok(())
    }

    /// `window` defaults to 5 minutes and is bounded by the 1h KV TTL.
    pub async fn metrics(
        &self,
        kv: &impl KvStore,
        ip: &str,
        window: Option<chrono::Duration>,
    ) -> Result<ConnectionMetrics, WafError> {
        let window = window.unwrap_or_else(|| chrono::Duration::minutes(DEFAULT_WINDOW_MINUTES));
        let events: Vec<MetricsEvent> = kv.get_json(&Self::events_key(ip)).await?.unwrap_or_default();
        Ok(compute(&events, window, self.threshold()))
    }
}

fn compute(events: &[MetricsEvent], window: chrono::Duration, threshold: f64) -> ConnectionMetrics {
    let now = Utc::now();
    let cutoff = now - window;
    let mut windowed: Vec<&MetricsEvent> = events.iter().filter(|e| e.timestamp >= cutoff).collect();
    windowed.sort_by_key(|e| e.timestamp);

    if windowed.is_empty() {
        return ConnectionMetrics::empty();
    }

    let requests = windowed.len();
    let errors = windowed.iter().filter(|e| e.status_code >= 400).count();
    let error_rate = errors as f64 / requests as f64;
    let total_bytes: u64 = windowed.iter().map(|e| e.response_size).sum();

    let first: DateTime<Utc> = windowed.first().unwrap().timestamp;
    let last: DateTime<Utc> = windowed.last().unwrap().timestamp;
    let duration_secs = (last - first).num_milliseconds() as f64 / 1000.0;

    let bytes_per_second = if duration_secs > 0.0 {
        total_bytes as f64 / duration_secs
    } else {
        0.0
    };

    let (mean_inter_arrival_secs, variance_inter_arrival) = inter_arrival_stats(&windowed);

    let is_low_and_slow = bytes_per_second < threshold
        && duration_secs > LOW_AND_SLOW_MIN_DURATION_SECS
        && requests > LOW_AND_SLOW_MIN_REQUESTS;

    let regular_timing = variance_inter_arrival < REGULAR_TIMING_MAX_VARIANCE && mean_inter_arrival_secs > 0.0;

    ConnectionMetrics {
        requests,
        errors,
        error_rate,
        bytes_per_second,
        mean_inter_arrival_secs,
        variance_inter_arrival,
        is_low_and_slow,
        regular_timing,
    }
}

fn inter_arrival_stats(events: &[&MetricsEvent]) -> (f64, f64) {
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

    fn event(seconds_ago: i64, status: u16, size: u64) -> MetricsEvent {
        MetricsEvent {
            timestamp: Utc::now() - chrono::Duration::seconds(seconds_ago),
            status_code: status,
            response_size: size,
        }
    }

    #[tokio::test]
    async fn empty_window_has_no_flags() {
        let kv = InMemoryKvStore::new();
        let analyzer = ConnectionMetricsAnalyzer::new(10.0);
        let metrics = analyzer.metrics(&kv, "203.0.113.1", None).await.unwrap();
        assert_eq!(metrics.requests, 0);
        assert!(!metrics.is_low_and_slow);
    }

    #[tokio::test]
    async fn low_and_slow_flags_a_sustained_trickle() {
        let kv = InMemoryKvStore::new();
        let analyzer = ConnectionMetricsAnalyzer::new(10.0);
        // 10 requests, 20 B each, spread over 120s -> ~1.7 B/s.
        for i in 0..10 {
            let seconds_ago = 120 - i * 12;
            analyzer
                .append(&kv, "203.0.113.2", event(seconds_ago, 200, 20))
                .await
                .unwrap();
        }
        let metrics = analyzer
            .metrics(&kv, "203.0.113.2", Some(chrono::Duration::minutes(10)))
            .await
            .unwrap();
        assert!(metrics.is_low_and_slow, "{:?}", metrics);
        assert!(metrics.bytes_per_second < 10.0);
    }

    #[tokio::test]
    async fn error_rate_reflects_4xx_and_5xx_status() {
        let kv = InMemoryKvStore::new();
        let analyzer = ConnectionMetricsAnalyzer::new(10.0);
        analyzer.append(&kv, "203.0.113.3", event(5, 200, 100)).await.unwrap();
        analyzer.append(&kv, "203.0.113.3", event(4, 404, 100)).await.unwrap();
        analyzer.append(&kv, "203.0.113.3", event(3, 500, 100)).await.unwrap();
        analyzer.append(&kv, "203.0.113.3", event(2, 200, 100)).await.unwrap();
        let metrics = analyzer.metrics(&kv, "203.0.113.3", None).await.unwrap();
        assert_eq!(metrics.requests, 4);
        assert_eq!(metrics.errors, 2);
        assert!((metrics.error_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn events_outside_the_window_are_excluded() {
        let kv = InMemoryKvStore::new();
        let analyzer = ConnectionMetricsAnalyzer::new(10.0);
        analyzer.append(&kv, "203.0.113.4", event(600, 200, 100)).await.unwrap();
        let metrics = analyzer
            .metrics(&kv, "203.0.113.4", Some(chrono::Duration::minutes(5)))
            .await
            .unwrap();
        assert_eq!(metrics.requests, 0);
    }
}
