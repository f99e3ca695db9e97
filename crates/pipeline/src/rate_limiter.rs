//! Adaptive rate limiter (C11). Per-(ip, endpoint) burst (1s) and minute
//! (60s) fixed-window counters, with budgets scaled by reputation,
//! automation, and anomaly signals. A plain, non-adaptive mode is also
//! available for deployments that don't want budgets to move.

use std::time::Duration;

use waf_common::error::WafError;
use waf_common::ports::KvStore;

use crate::reputation::ReputationClassification;

const BURST_WINDOW: Duration = Duration::from_secs(1);
const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const MINIMUM_BUDGET: u32 = 1;

const CLEAN_MULTIPLIER: f64 = 1.5;
const SUSPICIOUS_MULTIPLIER: f64 = 0.5;
const MALICIOUS_MULTIPLIER: f64 = 0.1;
const AUTOMATED_MULTIPLIER: f64 = 0.5;
const HIGH_ANOMALY_MULTIPLIER: f64 = 0.3;
const HIGH_ANOMALY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSignals {
    pub reputation: ReputationClassification,
    pub is_automated: bool,
    pub anomaly_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub burst_count: i64,
    pub minute_count: i64,
    pub burst_budget: u32,
    pub minute_budget: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveRateLimiter {
    base_burst_budget: u32,
    base_minute_budget: u32,
    adaptive: bool,
}

impl AdaptiveRateLimiter {
    pub fn new(base_burst_budget: u32, base_minute_budget: u32) -> Self {
        Self {
            base_burst_budget,
            base_minute_budget,
            adaptive: true,
        }
    }

    /// A fixed-budget limiter that ignores `RateLimitSignals` entirely.
    pub fn non_adaptive(base_burst_budget: u32, base_minute_budget: u32) -> Self {
        Self {
            base_burst_budget,
            base_minute_budget,
            adaptive: false,
        }
    }

    fn burst_key(ip: &str, endpoint: &str) -> String {
        format!("rate:burst:{ip}:{endpoint}")
    }

    fn minute_key(ip: &str, endpoint: &str) -> String {
        format!("rate:minute:{ip}:{endpoint}")
    }

    fn multiplier(&self, signals: &RateLimitSignals) -> f64 {
        if !self.adaptive {
            return 1.0;
        }
        let mut multiplier = match signals.reputation {
            ReputationClassification::Clean => CLEAN_MULTIPLIER,
            ReputationClassification::Suspicious => SUSPICIOUS_MULTIPLIER,
            ReputationClassification::Malicious => MALICIOUS_MULTIPLIER,
        };
        if signals.is_automated {
            multiplier *= AUTOMATED_MULTIPLIER;
        }
        if signals.anomaly_score > HIGH_ANOMALY_THRESHOLD {
            multiplier *= HIGH_ANOMALY_MULTIPLIER;
        }
        multiplier
    }

    fn budget(base: u32, multiplier: f64) -> u32 {
        ((base as f64 * multiplier).floor() as u32).max(MINIMUM_BUDGET)
    }

    pub async fn check(
        &self,
        kv: &impl KvStore,
        ip: &str,
        endpoint: &str,
        signals: &RateLimitSignals,
    ) -> Result<RateLimitOutcome, WafError> {
        let multiplier = self.multiplier(signals);
        let burst_budget = Self::budget(self.base_burst_budget, multiplier);
        let minute_budget = Self::budget(self.base_minute_budget, multiplier);

        let burst_count = kv.incr(&Self::burst_key(ip, endpoint), Some(BURST_WINDOW)).await?;
        let minute_count = kv.incr(&Self::minute_key(ip, endpoint), Some(MINUTE_WINDOW)).await?;

        let allowed = burst_count <= burst_budget as i64 && minute_count <= minute_budget as i64;

        Ok(RateLimitOutcome {
            allowed,
            burst_count,
            minute_count,
            burst_budget,
            minute_budget,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waf_common::memory::InMemoryKvStore;

    fn clean_signals() -> RateLimitSignals {
        RateLimitSignals {
            reputation: ReputationClassification::Clean,
            is_automated: false,
            anomaly_score: 0.0,
        }
    }

    #[tokio::test]
    async fn clean_ip_gets_the_widened_budget() {
        let kv = InMemoryKvStore::new();
        let limiter = AdaptiveRateLimiter::new(10, 100);
        let outcome = limiter.check(&kv, "203.0.113.1", "/api", &clean_signals()).await.unwrap();
        assert_eq!(outcome.burst_budget, 15);
        assert!(outcome.allowed);
    }

    #[tokio::test]
    async fn malicious_ip_gets_a_tiny_budget_but_never_zero() {
        let kv = InMemoryKvStore::new();
        let limiter = AdaptiveRateLimiter::new(10, 100);
        let signals = RateLimitSignals {
            reputation: ReputationClassification::Malicious,
            is_automated: true,
            anomaly_score: 0.9,
        };
        let outcome = limiter.check(&kv, "203.0.113.2", "/api", &signals).await.unwrap();
        assert_eq!(outcome.burst_budget, MINIMUM_BUDGET);
        assert_eq!(outcome.minute_budget, MINIMUM_BUDGET);
    }

    #[tokio::test]
    async fn breaching_the_burst_budget_denies_further_requests_this_second() {
        let kv = InMemoryKvStore::new();
        let limiter = AdaptiveRateLimiter::new(2, 100);
        let signals = clean_signals();
        let mut last = limiter.check(&kv, "203.0.113.3", "/api", &signals).await.unwrap();
        for _ in 0..5 {
            last = limiter.check(&kv, "203.0.113.3", "/api", &signals).await.unwrap();
        }
        assert!(!last.allowed);
    }

    #[tokio::test]
    async fn non_adaptive_mode_ignores_signals() {
        let kv = InMemoryKvStore::new();
        let limiter = AdaptiveRateLimiter::non_adaptive(10, 100);
        let signals = RateLimitSignals {
            reputation: ReputationClassification::Malicious,
            is_automated: true,
            anomaly_score: 0.95,
        };
        let outcome = limiter.check(&kv, "203.0.113.4", "/api", &signals).await.unwrap();
        assert_eq!(outcome.burst_budget, 10);
    }
}
