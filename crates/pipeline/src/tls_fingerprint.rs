//! TLS fingerprint reputation engine (C5). Canonicalizes ClientHello
//! features into a stable hash and tracks per-fingerprint request/block
//! counts behind a 1h KV cache.

use std::time::Duration;

use chrono::Utc;
use waf_common::crypto::sha256_hex_truncated;
use waf_common::error::WafError;
use waf_common::model::{TlsFeatures, TlsFingerprintRecord, TlsThreatLevel};
use waf_common::ports::{KvStore, RecordStore};

const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Canonical form: the JSON of `{version, cipher_suites, extensions,
/// curves, point_formats}` with every list sorted and keys sorted
/// alphabetically (`serde_json`'s default map representation is a
/// `BTreeMap`, so key order falls out of serialization for free).
pub fn canonicalize(features: &TlsFeatures) -> String {
    let mut cipher_suites = features.cipher_suites.clone();
    cipher_suites.sort();
    let mut extensions = features.extensions.clone();
    extensions.sort();
    let mut curves = features.curves.clone();
    curves.sort();
    let mut point_formats = features.point_formats.clone();
    point_formats.sort();

    serde_json::json!({
        "cipher_suites": cipher_suites,
        "curves": curves,
        "extensions": extensions,
        "point_formats": point_formats,
        "version": features.version,
    })
    .to_string()
}

/// First 32 hex characters of SHA-256(canonical form).
pub fn fingerprint_hash(features: &TlsFeatures) -> (String, String) {
    let canonical = canonicalize(features);
    let hash = sha256_hex_truncated(&canonical, 32);
    (canonical, hash)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TlsFingerprintEngine;

impl TlsFingerprintEngine {
    pub fn new() -> Self {
        Self
    }

    fn cache_key(hash: &str) -> String {
        format!("tls_fp:{hash}")
    }

    pub async fn lookup(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        hash: &str,
    ) -> Result<Option<TlsFingerprintRecord>, WafError> {
        let cache_key = Self::cache_key(hash);
        if let Some(cached) = kv.get_json::<TlsFingerprintRecord>(&cache_key).await? {
            return Ok(Some(cached));
        }
        let record = records.find_tls_fingerprint(hash).await?;
        if let Some(ref r) = record {
            kv.set_json(&cache_key, r, Some(CACHE_TTL)).await?;
        }
        Ok(record)
    }

    /// Upserts counts/timestamps for `hash`, re-deriving `threat_level`.
    pub async fn record(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        canonical: &str,
        hash: &str,
        blocked: bool,
    ) -> Result<TlsFingerprintRecord, WafError> {
        let now = Utc::now();
        let mut record = records
            .find_tls_fingerprint(hash)
            .await?
            .unwrap_or_else(|| TlsFingerprintRecord {
                fingerprint: canonical.to_string(),
                hash: hash.to_string(),
                first_seen: now,
                last_seen: now,
                request_count: 0,
                blocked_count: 0,
                is_whitelisted: false,
                is_blacklisted: false,
                threat_level: TlsThreatLevel::Unknown,
            });
        record.last_seen = now;
        record.request_count += 1;
        if blocked {
            record.blocked_count += 1;
        }
        record.threat_level = classify_threat_level(&record);
        records.upsert_tls_fingerprint(record.clone()).await?;
        kv.set_json(&Self::cache_key(hash), &record, Some(CACHE_TTL)).await?;
        Ok(record)
    }

    /// IL-2: whitelisting clears blacklisting and invalidates the cache.
    pub async fn set_whitelisted(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        hash: &str,
        value: bool,
    ) -> Result<(), WafError> {
        self.toggle(kv, records, hash, |record| record.set_whitelisted(value))
            .await
    }

    pub async fn set_blacklisted(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        hash: &str,
        value: bool,
    ) -> Result<(), WafError> {
        self.toggle(kv, records, hash, |record| record.set_blacklisted(value))
            .await
    }

    async fn toggle(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        hash: &str,
        apply: impl FnOnce(&mut TlsFingerprintRecord),
    ) -> Result<(), WafError> {
        let mut record = records
            .find_tls_fingerprint(hash)
            .await?
            .ok_or_else(|| WafError::decision("tls_fingerprint", format!("unknown fingerprint {hash}")))?;
        apply(&mut record);
        record.threat_level = classify_threat_level(&record);
        records.upsert_tls_fingerprint(record.clone()).await?;
        kv.delete(&Self::cache_key(hash)).await?;
        Ok(())
    }
}

fn classify_threat_level(record: &TlsFingerprintRecord) -> TlsThreatLevel {
    if record.is_blacklisted {
        return TlsThreatLevel::Critical;
    }
    if record.is_whitelisted || record.request_count == 0 {
        return TlsThreatLevel::Unknown;
    }
    let block_ratio = record.blocked_count as f64 / record.request_count as f64;
    if block_ratio >= 0.5 {
        TlsThreatLevel::High
    } else if block_ratio >= 0.2 {
        TlsThreatLevel::Medium
    } else if block_ratio > 0.0 {
        TlsThreatLevel::Low
    } else {
        TlsThreatLevel::Unknown
    }
}

/// Feeds C10's `tls'` normalization: blacklisted is the hard signal,
/// medium/high threat level short of blacklisting is "suspicious".
pub fn is_suspicious(record: &TlsFingerprintRecord) -> bool {
    matches!(record.threat_level, TlsThreatLevel::Medium | TlsThreatLevel::High)
}

#[cfg(test)]
mod tests {
    use super::*;
    use waf_common::memory::{InMemoryKvStore, InMemoryRecordStore};

    fn features() -> TlsFeatures {
        TlsFeatures {
            version: "TLSv1.3".to_string(),
            cipher_suites: vec!["TLS_AES_128_GCM_SHA256".to_string(), "TLS_AES_256_GCM_SHA384".to_string()],
            extensions: vec!["server_name".to_string(), "supported_versions".to_string()],
            curves: vec!["x25519".to_string()],
            point_formats: vec!["uncompressed".to_string()],
        }
    }

    #[test]
    fn canonical_form_is_order_independent() {
        let mut shuffled = features();
        shuffled.cipher_suites.reverse();
        assert_eq!(canonicalize(&features()), canonicalize(&shuffled));
    }

    #[test]
    fn hash_is_32_hex_characters() {
        let (_, hash) = fingerprint_hash(&features());
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn whitelisting_clears_blacklisting() {
        let kv = InMemoryKvStore::new();
        let records = InMemoryRecordStore::new();
        let engine = TlsFingerprintEngine::new();
        let (canonical, hash) = fingerprint_hash(&features());
        engine.record(&kv, &records, &canonical, &hash, false).await.unwrap();

        engine.set_blacklisted(&kv, &records, &hash, true).await.unwrap();
        let record = records.find_tls_fingerprint(&hash).await.unwrap().unwrap();
        assert!(record.is_blacklisted);

        engine.set_whitelisted(&kv, &records, &hash, true).await.unwrap();
        let record = records.find_tls_fingerprint(&hash).await.unwrap().unwrap();
        assert!(record.is_whitelisted);
        assert!(!record.is_blacklisted);
    }

    #[tokio::test]
    async fn lookup_serves_from_cache_after_first_record() {
        let kv = InMemoryKvStore::new();
        let records = InMemoryRecordStore::new();
        let engine = TlsFingerprintEngine::new();
        let (canonical, hash) = fingerprint_hash(&features());
        engine.record(&kv, &records, &canonical, &hash, true).await.unwrap();
        let looked_up = engine.lookup(&kv, &records, &hash).await.unwrap().unwrap();
        assert_eq!(looked_up.request_count, 1);
        assert_eq!(looked_up.blocked_count, 1);
    }
}
