//! In-memory port implementations backed by `dashmap`. Used by the test
//! suites throughout the workspace and as the default backing when no
//! external KV or database URL is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::error::WafError;
use crate::model::{IpListEntry, IpListKind, SecurityEvent, TlsFingerprintRecord};
use crate::ports::{ConnectionTelemetry, KvStore, RecordStore};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// `dashmap`-backed `KvStore`. Expired entries are reaped lazily on access
/// rather than by a background sweep, matching the test-only scope of this
/// implementation.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, WafError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), WafError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), WafError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn get_and_delete(&self, key: &str) -> Result<Option<String>, WafError> {
        let now = Instant::now();
        match self.entries.remove(key) {
            Some((_, entry)) if entry.is_live(now) => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, WafError> {
        let now = Instant::now();
        let mut next = 1i64;
        self.entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.is_live(now) {
                    let current: i64 = entry.value.parse().unwrap_or(0);
                    next = current + 1;
                    entry.value = next.to_string();
                } else {
                    entry.value = "1".to_string();
                    entry.expires_at = ttl.map(|d| now + d);
                    next = 1;
                }
            })
            .or_insert_with(|| Entry {
                value: "1".to_string(),
                expires_at: ttl.map(|d| now + d),
            });
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    ip_entries: DashMap<String, IpListEntry>,
    tls_fingerprints: DashMap<String, TlsFingerprintRecord>,
    events: Mutex<Vec<SecurityEvent>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_ip_entry(&self, ip: &str) -> Result<Option<IpListEntry>, WafError> {
        Ok(self.ip_entries.get(ip).map(|e| e.clone()))
    }

    async fn upsert_ip_entry(&self, entry: IpListEntry) -> Result<(), WafError> {
        self.ip_entries.insert(entry.ip.clone(), entry);
        Ok(())
    }

    async fn remove_ip_entry(&self, ip: &str, kind: IpListKind) -> Result<(), WafError> {
        if let Some(existing) = self.ip_entries.get(ip) {
            if existing.kind == kind {
                drop(existing);
                self.ip_entries.remove(ip);
            }
        }
        Ok(())
    }

    async fn find_tls_fingerprint(
        &self,
        hash: &str,
    ) -> Result<Option<TlsFingerprintRecord>, WafError> {
        Ok(self.tls_fingerprints.get(hash).map(|r| r.clone()))
    }

    async fn upsert_tls_fingerprint(&self, record: TlsFingerprintRecord) -> Result<(), WafError> {
        self.tls_fingerprints.insert(record.hash.clone(), record);
        Ok(())
    }

    async fn insert_security_event(&self, event: SecurityEvent) -> Result<(), WafError> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn security_events_between(
        &self,
        ip: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, WafError> {
        let mut matches: Vec<SecurityEvent> = self
            .events
            .lock()
            .iter()
            .filter(|e| e.ip == ip && e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matches)
    }

    async fn blocked_event_count(&self, ip: &str) -> Result<u64, WafError> {
        let count = self
            .events
            .lock()
            .iter()
            .filter(|e| e.ip == ip && e.blocked)
            .count();
        Ok(count as u64)
    }

    async fn total_security_event_count(&self) -> Result<u64, WafError> {
        Ok(self.events.lock().len() as u64)
    }

    async fn total_blocked_count(&self) -> Result<u64, WafError> {
        Ok(self.events.lock().iter().filter(|e| e.blocked).count() as u64)
    }
}

/// Fixed host-capacity telemetry for tests: counts are set directly rather
/// than sampled from the kernel socket table.
#[derive(Default)]
pub struct InMemoryConnectionTelemetry {
    half_open: Mutex<u64>,
    total: Mutex<u64>,
    per_ip: DashMap<String, u64>,
}

impl InMemoryConnectionTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_half_open(&self, count: u64) {
        *self.half_open.lock() = count;
    }

    pub fn set_total(&self, count: u64) {
        *self.total.lock() = count;
    }

    pub fn set_ip_count(&self, ip: &str, count: u64) {
        self.per_ip.insert(ip.to_string(), count);
    }
}

#[async_trait]
impl ConnectionTelemetry for InMemoryConnectionTelemetry {
    async fn half_open_count(&self) -> Result<u64, WafError> {
        Ok(*self.half_open.lock())
    }

    async fn total_connection_count(&self) -> Result<u64, WafError> {
        Ok(*self.total.lock())
    }

    async fn connection_count_for_ip(&self, ip: &str) -> Result<u64, WafError> {
        Ok(self.per_ip.get(ip).map(|v| *v).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let kv = InMemoryKvStore::new();
        kv.set("k", "v", None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let kv = InMemoryKvStore::new();
        kv.set("k", "v", Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_and_delete_closes_the_replay_window() {
        let kv = InMemoryKvStore::new();
        kv.set("k", "v", None).await.unwrap();
        assert_eq!(kv.get_and_delete("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_counts_up_from_one() {
        let kv = InMemoryKvStore::new();
        assert_eq!(kv.incr("c", None).await.unwrap(), 1);
        assert_eq!(kv.incr("c", None).await.unwrap(), 2);
        assert_eq!(kv.incr("c", None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn ip_entries_round_trip_through_the_record_store() {
        let store = InMemoryRecordStore::new();
        let entry = IpListEntry {
            ip: "10.0.0.1".to_string(),
            kind: IpListKind::Deny,
            reason: Some("test".to_string()),
            created_at: Utc::now(),
            expires_at: None,
        };
        store.upsert_ip_entry(entry).await.unwrap();
        let found = store.find_ip_entry("10.0.0.1").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().kind, IpListKind::Deny);
    }
}
