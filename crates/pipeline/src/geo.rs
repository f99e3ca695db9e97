//! Geo filter (C14). IP-to-country via longest-prefix-match over a CIDR
//! table (REDESIGN: the original's naive first-match scan is replaced
//! here with a genuine longest-prefix lookup over an arbitrarily large,
//! possibly-overlapping table), plus an attack-threshold auto-block.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use ipnetwork::IpNetwork;
use waf_common::error::WafError;
use waf_common::ports::KvStore;

pub const LOCAL_REGION: &str = "LOCAL";

#[derive(Debug, Clone)]
struct CidrEntry {
    network: IpNetwork,
    country: String,
}

/// A table of (possibly overlapping) CIDR blocks to country codes, looked
/// up by longest matching prefix.
#[derive(Debug, Default, Clone)]
pub struct GeoTable {
    entries: Vec<CidrEntry>,
}

impl GeoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cidr: &str, country: &str) -> Result<(), WafError> {
        let network = IpNetwork::from_str(cidr)
            .map_err(|e| WafError::input(format!("invalid CIDR {cidr}: {e}")))?;
        self.entries.push(CidrEntry {
            network,
            country: country.to_string(),
        });
        Ok(())
    }

    /// RFC1918, loopback, and link-local addresses are always `LOCAL` and
    /// never matched against the table.
    pub fn lookup(&self, ip: &str) -> Option<String> {
        let addr: IpAddr = ip.parse().ok()?;
        if is_local(&addr) {
            return Some(LOCAL_REGION.to_string());
        }
        self.entries
            .iter()
            .filter(|entry| entry.network.contains(addr))
            .max_by_key(|entry| entry.network.prefix())
            .map(|entry| entry.country.clone())
    }
}

fn is_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

pub struct GeoFilter {
    table: GeoTable,
    attack_threshold: u64,
    auto_block_ttl: Duration,
}

impl GeoFilter {
    pub fn new(table: GeoTable, attack_threshold: u64, auto_block_ttl_secs: u64) -> Self {
        Self {
            table,
            attack_threshold,
            auto_block_ttl: Duration::from_secs(auto_block_ttl_secs),
        }
    }

    fn blocked_key(region: &str) -> String {
        format!("geo_blocked:{region}")
    }

    fn attack_count_key(region: &str) -> String {
        format!("geo_attacks:{region}")
    }

    pub fn region_for(&self, ip: &str) -> Option<String> {
        self.table.lookup(ip)
    }

    pub async fn is_blocked(&self, kv: &impl KvStore, region: &str) -> Result<bool, WafError> {
        if region == LOCAL_REGION {
            return Ok(false);
        }
        Ok(kv.get(&Self::blocked_key(region)).await?.is_some())
    }

    /// Records an attack-level event for `region`; once the count over the
    /// window exceeds the threshold, auto-blocks the region for the
    /// configured TTL. `LOCAL` is never blocked.
    pub async fn record_attack(&self, kv: &impl KvStore, region: &str) -> Result<bool, WafError> {
        if region == LOCAL_REGION {
            return Ok(false);
        }
        let count = kv.incr(&Self::attack_count_key(region), Some(self.auto_block_ttl)).await?;
        if count as u64 >= self.attack_threshold {
            kv.set(&Self::blocked_key(region), "1", Some(self.auto_block_ttl)).await?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waf_common::memory::InMemoryKvStore;

    fn sample_table() -> GeoTable {
        let mut table = GeoTable::new();
        table.insert("203.0.0.0/8", "US").unwrap();
        table.insert("203.0.113.0/24", "US-CA").unwrap();
        table
    }

    #[test]
    fn longest_prefix_wins_over_a_broader_match() {
        let table = sample_table();
        assert_eq!(table.lookup("203.0.113.5"), Some("US-CA".to_string()));
        assert_eq!(table.lookup("203.0.99.1"), Some("US".to_string()));
    }

    #[test]
    fn private_addresses_are_always_local() {
        let table = sample_table();
        assert_eq!(table.lookup("10.0.0.5"), Some(LOCAL_REGION.to_string()));
        assert_eq!(table.lookup("127.0.0.1"), Some(LOCAL_REGION.to_string()));
    }

    #[test]
    fn unmatched_address_has_no_region() {
        let table = sample_table();
        assert_eq!(table.lookup("198.51.100.1"), None);
    }

    #[tokio::test]
    async fn region_auto_blocks_after_crossing_the_attack_threshold() {
        let kv = InMemoryKvStore::new();
        let filter = GeoFilter::new(sample_table(), 3, 3600);
        assert!(!filter.is_blocked(&kv, "US-CA").await.unwrap());
        for _ in 0..3 {
            filter.record_attack(&kv, "US-CA").await.unwrap();
        }
        assert!(filter.is_blocked(&kv, "US-CA").await.unwrap());
    }

    #[tokio::test]
    async fn local_region_is_never_blocked() {
        let kv = InMemoryKvStore::new();
        let filter = GeoFilter::new(sample_table(), 1, 3600);
        filter.record_attack(&kv, LOCAL_REGION).await.unwrap();
        assert!(!filter.is_blocked(&kv, LOCAL_REGION).await.unwrap());
    }
}
