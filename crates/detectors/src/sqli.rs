//! SQL injection detector (C1). Union-based, boolean-tautology, time-based
//! and stacked-query techniques are matched independently so the reported
//! reason names the specific technique that fired, mirroring the per-
//! technique checks the original groups under one "sql injection" bucket.

use once_cell::sync::Lazy;
use regex::Regex;
use waf_common::model::ThreatLevel;

use crate::Detection;

fn ci_dotall(pattern: &str) -> Regex {
    Regex::new(&format!("(?is){pattern}")).expect("static sql injection pattern is valid")
}

static UNION_BASED: Lazy<Regex> = Lazy::new(|| {
    ci_dotall(r"\bunion\b[\s\S]{0,40}\bselect\b|\bselect\b[\s\S]{0,80}\bfrom\b[\s\S]{0,80}\bwhere\b")
});

static BOOLEAN_TAUTOLOGY: Lazy<Regex> = Lazy::new(|| {
    ci_dotall(
        r"\b(?:or|and)\b\s*['\x22]?\s*\d+\s*=\s*\d+|\b(?:or|and)\b\s*['\x22][^'\x22]*['\x22]\s*=\s*['\x22][^'\x22]*['\x22]",
    )
});

static TIME_BASED: Lazy<Regex> =
    Lazy::new(|| ci_dotall(r"\bsleep\s*\(|\bbenchmark\s*\(|\bpg_sleep\s*\(|\bwaitfor\s+delay\b"));

static STACKED_QUERY: Lazy<Regex> =
    Lazy::new(|| ci_dotall(r";\s*(?:drop|exec|execute|truncate|alter)\b|\bxp_cmdshell\b"));

static COMMENT_MARKER: Lazy<Regex> = Lazy::new(|| ci_dotall(r"(--\s|#|/\*[\s\S]*?\*/)"));

/// Stateless; holds no fields because the patterns it matches against are
/// compiled once into process-wide statics (see §9's "compile once at
/// startup" design note), not per-instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlInjectionDetector;

impl SqlInjectionDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn is_union_based(&self, payload: &str) -> bool {
        UNION_BASED.is_match(payload)
    }

    pub fn is_boolean_based(&self, payload: &str) -> bool {
        BOOLEAN_TAUTOLOGY.is_match(payload)
    }

    pub fn is_time_based(&self, payload: &str) -> bool {
        TIME_BASED.is_match(payload)
    }

    pub fn is_stacked_query(&self, payload: &str) -> bool {
        STACKED_QUERY.is_match(payload)
    }

    fn has_comment_marker_in_sql_context(&self, payload: &str) -> bool {
        if !COMMENT_MARKER.is_match(payload) {
            return false;
        }
        let lower = payload.to_ascii_lowercase();
        ["select", "union", "insert", "update", "delete", "from", "where"]
            .iter()
            .any(|kw| lower.contains(kw))
    }

    pub fn detect(&self, payload: &str) -> Option<Detection> {
        let technique = if self.is_union_based(payload) {
            "union_based"
        } else if self.is_stacked_query(payload) {
            "stacked_query"
        } else if self.is_time_based(payload) {
            "time_based"
        } else if self.is_boolean_based(payload) {
            "boolean_based"
        } else if self.has_comment_marker_in_sql_context(payload) {
            "comment_marker"
        } else {
            return None;
        };

        Some(Detection {
            threat_type: "sql_injection",
            threat_level: ThreatLevel::Critical,
            technique,
            reason: format!("sql injection via {technique}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_select_is_detected() {
        let d = SqlInjectionDetector::new();
        let hit = d.detect("1' UNION SELECT username, password FROM users--").unwrap();
        assert_eq!(hit.threat_level, ThreatLevel::Critical);
        assert_eq!(hit.technique, "union_based");
    }

    #[test]
    fn boolean_tautology_is_detected() {
        let d = SqlInjectionDetector::new();
        assert!(d.is_boolean_based("admin' OR 1=1--"));
        assert!(d.is_boolean_based("admin' or 'a'='a"));
    }

    #[test]
    fn time_based_sleep_is_detected() {
        let d = SqlInjectionDetector::new();
        assert!(d.is_time_based("1' AND SLEEP(5)--"));
        assert!(d.is_time_based("1' AND BENCHMARK(5000000, MD5('x'))--"));
    }

    #[test]
    fn stacked_drop_is_detected() {
        let d = SqlInjectionDetector::new();
        assert!(d.is_stacked_query("1'; DROP TABLE users;--"));
    }

    #[test]
    fn benign_payload_is_clean() {
        let d = SqlInjectionDetector::new();
        assert!(d.detect("hello world, what a nice day").is_none());
    }

    #[test]
    fn bare_hash_without_sql_context_does_not_trigger() {
        let d = SqlInjectionDetector::new();
        assert!(d.detect("color=#ff0000").is_none());
    }
}
