//! Narrow trait boundaries between the pipeline and its external state.
//!
//! The pipeline never talks to Redis, MySQL, or a socket table directly; it
//! talks to `KvStore`, `RecordStore`, and `ConnectionTelemetry`. Production
//! wires these to real backends; tests and the no-external-services default
//! wire them to [`crate::memory`]'s dashmap-backed implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::error::WafError;
use crate::model::{IpListEntry, IpListKind, SecurityEvent, TlsFingerprintRecord};

/// Ephemeral key-value state: challenge tokens, rate-limit counters,
/// connection metrics windows, behavioral session fingerprints.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, WafError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), WafError>;

    async fn delete(&self, key: &str) -> Result<(), WafError>;

    /// Read and delete atomically. Used by single-use challenge
    /// verification (CH-2) to close the replay window.
    async fn get_and_delete(&self, key: &str) -> Result<Option<String>, WafError>;

    /// Fetch-and-add. `ttl` is applied only the first time the key is
    /// created, matching the original's `INCR` + conditional `EXPIRE`
    /// pairing used by the bypass counters and the fixed-window limiter.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, WafError>;

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, WafError> {
        match self.get(key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .map_err(|e| WafError::input(format!("malformed JSON for {key}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), WafError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| WafError::input(format!("could not serialize {key}: {e}")))?;
        self.set(key, &raw, ttl).await
    }
}

/// Durable state: IP lists, TLS fingerprint reputation, the security event
/// audit trail. Backed by a relational store in production.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_ip_entry(&self, ip: &str) -> Result<Option<IpListEntry>, WafError>;

    async fn upsert_ip_entry(&self, entry: IpListEntry) -> Result<(), WafError>;

    async fn remove_ip_entry(&self, ip: &str, kind: IpListKind) -> Result<(), WafError>;

    async fn find_tls_fingerprint(
        &self,
        hash: &str,
    ) -> Result<Option<TlsFingerprintRecord>, WafError>;

    async fn upsert_tls_fingerprint(&self, record: TlsFingerprintRecord) -> Result<(), WafError>;

    async fn insert_security_event(&self, event: SecurityEvent) -> Result<(), WafError>;

    /// Security events for `ip` in `[start, end]`, newest first. Backs the
    /// reputation engine's threat-intelligence/temporal sub-scores and the
    /// geo engine's attack-region counters without the pipeline needing to
    /// express its own SQL.
    async fn security_events_between(
        &self,
        ip: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, WafError>;

    /// Count of blocked events for `ip` across all time, used by the
    /// reputation engine's historical-violations sub-score.
    async fn blocked_event_count(&self, ip: &str) -> Result<u64, WafError>;

    /// Total security events recorded across every IP, backing the admin
    /// stats surface (§4.16, §6).
    async fn total_security_event_count(&self) -> Result<u64, WafError>;

    /// Total blocked events recorded across every IP, backing the admin
    /// stats surface.
    async fn total_blocked_count(&self) -> Result<u64, WafError>;
}

/// Host-level connection state the pipeline cannot derive from the request
/// alone: half-open counts, total concurrent connections, per-IP socket
/// counts. Abstracted so the connection-state guard and SYN-cookie gate
/// don't require raw socket access to be testable.
#[async_trait]
pub trait ConnectionTelemetry: Send + Sync {
    async fn half_open_count(&self) -> Result<u64, WafError>;

    async fn total_connection_count(&self) -> Result<u64, WafError>;

    async fn connection_count_for_ip(&self, ip: &str) -> Result<u64, WafError>;
}
