//! Connection-state guard (C13). Host-wide half-open/total connection
//! caps sampled from `ConnectionTelemetry`, refreshed at most every 5s and
//! cached behind a mutex so a traffic spike doesn't hammer the sampling
//! call; plus a per-IP 60s rolling attempt cap.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use waf_common::error::WafError;
use waf_common::ports::{ConnectionTelemetry, KvStore};

const SNAPSHOT_REFRESH: Duration = Duration::from_secs(5);
const ATTEMPT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utilization {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy)]
pub struct GuardVerdict {
    pub allowed: bool,
    pub half_open: u64,
    pub total: u64,
    pub utilization: Utilization,
}

#[derive(Clone, Copy)]
struct Snapshot {
    half_open: u64,
    total: u64,
    taken_at: Instant,
}

pub struct ConnectionStateGuard {
    max_half_open: u64,
    max_total: u64,
    warning_threshold: f64,
    critical_threshold: f64,
    per_ip_attempt_cap: u64,
    snapshot: Mutex<Option<Snapshot>>,
}

impl ConnectionStateGuard {
    pub fn new(max_half_open: u64, max_total: u64, warning_threshold: f64, critical_threshold: f64, per_ip_attempt_cap: u64) -> Self {
        Self {
            max_half_open,
            max_total,
            warning_threshold,
            critical_threshold,
            per_ip_attempt_cap,
            snapshot: Mutex::new(None),
        }
    }

    fn attempt_key(ip: &str) -> String {
        format!("conn_attempts:{ip}")
    }

    async fn snapshot(&self, telemetry: &impl ConnectionTelemetry) -> Result<Snapshot, WafError> {
        let now = Instant::now();
        {
            let cached = self.snapshot.lock();
            if let Some(s) = *cached {
                if now.duration_since(s.taken_at) < SNAPSHOT_REFRESH {
                    return Ok(s);
                }
            }
        }
        let half_open = telemetry.half_open_count().await?;
        let total = telemetry.total_connection_count().await?;
        let fresh = Snapshot { half_open, total, taken_at: now };
        *self.snapshot.lock() = Some(fresh);
        Ok(fresh)
    }

    pub async fn check(
        &self,
        kv: &impl KvStore,
        telemetry: &impl ConnectionTelemetry,
        ip: &str,
    ) -> Result<GuardVerdict, WafError> {
        let attempt_count = kv.incr(&Self::attempt_key(ip), Some(ATTEMPT_WINDOW)).await?;
        if attempt_count as u64 > self.per_ip_attempt_cap {
            let snapshot = self.snapshot(telemetry).await?;
            return Ok(GuardVerdict {
                allowed: false,
                half_open: snapshot.half_open,
                total: snapshot.total,
                utilization: self.utilization(&snapshot),
            });
        }

        let snapshot = self.snapshot(telemetry).await?;
        let allowed = snapshot.half_open < self.max_half_open && snapshot.total < self.max_total;
        Ok(GuardVerdict {
            allowed,
            half_open: snapshot.half_open,
            total: snapshot.total,
            utilization: self.utilization(&snapshot),
        })
    }

    fn utilization(&self, snapshot: &Snapshot) -> Utilization {
        let half_open_ratio = snapshot.half_open as f64 / self.max_half_open.max(1) as f64;
        let total_ratio = snapshot.total as f64 / self.max_total.max(1) as f64;
        let ratio = half_open_ratio.max(total_ratio);
        if ratio >= self.critical_threshold {
            Utilization::Critical
        } else if ratio >= self.warning_threshold {
            Utilization::Warning
        } else {
            Utilization::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waf_common::memory::{InMemoryConnectionTelemetry, InMemoryKvStore};

    #[tokio::test]
    async fn under_capacity_is_allowed_and_normal() {
        let kv = InMemoryKvStore::new();
        let telemetry = InMemoryConnectionTelemetry::new();
        telemetry.set_half_open(10);
        telemetry.set_total(50);
        let guard = ConnectionStateGuard::new(1000, 5000, 0.7, 0.9, 20);
        let verdict = guard.check(&kv, &telemetry, "203.0.113.1").await.unwrap();
        assert!(verdict.allowed);
        assert_eq!(verdict.utilization, Utilization::Normal);
    }

    #[tokio::test]
    async fn over_total_capacity_is_denied() {
        let kv = InMemoryKvStore::new();
        let telemetry = InMemoryConnectionTelemetry::new();
        telemetry.set_half_open(10);
        telemetry.set_total(5000);
        let guard = ConnectionStateGuard::new(1000, 5000, 0.7, 0.9, 20);
        let verdict = guard.check(&kv, &telemetry, "203.0.113.2").await.unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.utilization, Utilization::Critical);
    }

    #[tokio::test]
    async fn per_ip_attempt_cap_denies_regardless_of_host_capacity() {
        let kv = InMemoryKvStore::new();
        let telemetry = InMemoryConnectionTelemetry::new();
        telemetry.set_half_open(1);
        telemetry.set_total(1);
        let guard = ConnectionStateGuard::new(1000, 5000, 0.7, 0.9, 3);
        let mut last = guard.check(&kv, &telemetry, "203.0.113.3").await.unwrap();
        for _ in 0..5 {
            last = guard.check(&kv, &telemetry, "203.0.113.3").await.unwrap();
        }
        assert!(!last.allowed);
    }

    #[tokio::test]
    async fn warning_threshold_is_reported_between_bounds() {
        let kv = InMemoryKvStore::new();
        let telemetry = InMemoryConnectionTelemetry::new();
        telemetry.set_half_open(750);
        telemetry.set_total(100);
        let guard = ConnectionStateGuard::new(1000, 5000, 0.7, 0.9, 20);
        let verdict = guard.check(&kv, &telemetry, "203.0.113.4").await.unwrap();
        assert_eq!(verdict.utilization, Utilization::Warning);
    }
}
