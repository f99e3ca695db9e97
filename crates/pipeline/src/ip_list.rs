//! IP allow/deny list (C2). Cache-then-record-store reads, write-through
//! updates, and lazy expiry on read.

use std::time::Duration;

use chrono::{DateTime, Utc};
use waf_common::error::WafError;
use waf_common::model::{IpListEntry, IpListKind};
use waf_common::ports::{KvStore, RecordStore};

const CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Default, Clone, Copy)]
pub struct IpListStore;

impl IpListStore {
    pub fn new() -> Self {
        Self
    }

    fn cache_key(kind: IpListKind, ip: &str) -> String {
        format!("ip_list:{}:{}", kind.as_wire(), ip)
    }

    pub async fn is_allowed(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        ip: &str,
    ) -> Result<bool, WafError> {
        self.check(kv, records, ip, IpListKind::Allow).await
    }

    pub async fn is_denied(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        ip: &str,
    ) -> Result<bool, WafError> {
        self.check(kv, records, ip, IpListKind::Deny).await
    }

    async fn check(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        ip: &str,
        kind: IpListKind,
    ) -> Result<bool, WafError> {
        let key = Self::cache_key(kind, ip);
        if let Some(cached) = kv.get(&key).await? {
            return Ok(cached == "1");
        }

        let entry = records.find_ip_entry(ip).await?;
        let now = Utc::now();
        let value = match entry {
            Some(e) if e.is_expired(now) => {
                records.remove_ip_entry(ip, e.kind).await?;
                false
            }
            Some(e) => e.kind == kind,
            None => false,
        };
        kv.set(&key, if value { "1" } else { "0" }, Some(CACHE_TTL)).await?;
        Ok(value)
    }

    /// Invariant: at most one row per ip (§3). Adding one kind implicitly
    /// clears any cached verdict for the other.
    pub async fn add(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        ip: &str,
        kind: IpListKind,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), WafError> {
        let entry = IpListEntry {
            ip: ip.to_string(),
            kind,
            reason,
            created_at: Utc::now(),
            expires_at,
        };
        records.upsert_ip_entry(entry).await?;
        kv.set(&Self::cache_key(kind, ip), "1", Some(CACHE_TTL)).await?;
        kv.delete(&Self::cache_key(kind.opposite(), ip)).await?;
        Ok(())
    }

    pub async fn remove(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        ip: &str,
        kind: IpListKind,
    ) -> Result<(), WafError> {
        records.remove_ip_entry(ip, kind).await?;
        kv.delete(&Self::cache_key(kind, ip)).await?;
        Ok(())
    }
}

trait IpListKindExt {
    fn as_wire(&self) -> &'static str;
    fn opposite(&self) -> IpListKind;
}

impl IpListKindExt for IpListKind {
    fn as_wire(&self) -> &'static str {
        match self {
            IpListKind::Allow => "allow",
            IpListKind::Deny => "deny",
        }
    }

    fn opposite(&self) -> IpListKind {
        match self {
            IpListKind::Allow => IpListKind::Deny,
            IpListKind::Deny => IpListKind::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waf_common::memory::{InMemoryKvStore, InMemoryRecordStore};

    #[tokio::test]
    async fn unlisted_ip_is_neither_allowed_nor_denied() {
        let kv = InMemoryKvStore::new();
        let records = InMemoryRecordStore::new();
        let store = IpListStore::new();
        assert!(!store.is_allowed(&kv, &records, "203.0.113.1").await.unwrap());
        assert!(!store.is_denied(&kv, &records, "203.0.113.1").await.unwrap());
    }

    #[tokio::test]
    async fn allow_listing_wins_and_is_exclusive_of_deny() {
        let kv = InMemoryKvStore::new();
        let records = InMemoryRecordStore::new();
        let store = IpListStore::new();

        store
            .add(&kv, &records, "203.0.113.1", IpListKind::Deny, None, None)
            .await
            .unwrap();
        assert!(store.is_denied(&kv, &records, "203.0.113.1").await.unwrap());

        store
            .add(&kv, &records, "203.0.113.1", IpListKind::Allow, None, None)
            .await
            .unwrap();
        assert!(store.is_allowed(&kv, &records, "203.0.113.1").await.unwrap());
        assert!(!store.is_denied(&kv, &records, "203.0.113.1").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_are_lazily_removed_on_read() {
        let kv = InMemoryKvStore::new();
        let records = InMemoryRecordStore::new();
        let store = IpListStore::new();
        let entry = IpListEntry {
            ip: "203.0.113.2".to_string(),
            kind: IpListKind::Deny,
            reason: None,
            created_at: Utc::now() - chrono::Duration::hours(2),
            expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
        };
        records.upsert_ip_entry(entry).await.unwrap();
        assert!(!store.is_denied(&kv, &records, "203.0.113.2").await.unwrap());
        assert!(records.find_ip_entry("203.0.113.2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removing_wrong_kind_is_a_no_op() {
        let kv = InMemoryKvStore::new();
        let records = InMemoryRecordStore::new();
        let store = IpListStore::new();
        store
            .add(&kv, &records, "203.0.113.3", IpListKind::Deny, None, None)
            .await
            .unwrap();
        store
            .remove(&kv, &records, "203.0.113.3", IpListKind::Allow)
            .await
            .unwrap();
        assert!(records.find_ip_entry("203.0.113.3").await.unwrap().is_some());
    }
}
