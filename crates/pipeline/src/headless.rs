//! Headless/automation detector (C4). Pure, synchronous heuristic scoring
//! over the already-normalized header map; never performs I/O.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use waf_common::model::HeadlessVerdict;

const UA_WEIGHT: f64 = 0.6;
const HEADER_WEIGHT: f64 = 0.3;
const BEHAVIOR_WEIGHT: f64 = 0.1;
const DETECTED_THRESHOLD: f64 = 0.6;

static AUTOMATION_UA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)headless|phantomjs|selenium|webdriver|puppeteer|playwright|automation|testcafe|cypress")
        .expect("static headless UA pattern is valid")
});

const CLIENT_HINT_HEADERS: &[&str] = &[
    "accept-language",
    "accept-encoding",
    "sec-ch-ua",
    "sec-fetch-site",
    "sec-fetch-mode",
    "sec-fetch-dest",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessDetector;

impl HeadlessDetector {
    pub fn new() -> Self {
        Self
    }

    /// Scores `headers`/`user_agent` in [0,1]. `detected` is true once the
    /// score reaches [`DETECTED_THRESHOLD`] — the sole authority for the
    /// flag, per §9 open question (c).
    pub fn analyze(
        &self,
        headers: &BTreeMap<String, String>,
        method: &str,
        user_agent: &str,
    ) -> HeadlessVerdict {
        let score = self.ua_score(user_agent) * UA_WEIGHT
            + self.header_score(headers) * HEADER_WEIGHT
            + self.behavior_score(headers, method) * BEHAVIOR_WEIGHT;
        let score = score.clamp(0.0, 1.0);
        HeadlessVerdict {
            score,
            detected: score >= DETECTED_THRESHOLD,
        }
    }

    fn ua_score(&self, user_agent: &str) -> f64 {
        if user_agent.trim().is_empty() {
            return 1.0;
        }
        if AUTOMATION_UA.is_match(user_agent) {
            return 1.0;
        }
        if user_agent.len() < 10 || !user_agent.contains('/') {
            return 0.5;
        }
        0.0
    }

    fn header_score(&self, headers: &BTreeMap<String, String>) -> f64 {
        if headers.keys().any(|h| h == "webdriver") {
            return 1.0;
        }
        let missing = CLIENT_HINT_HEADERS
            .iter()
            .filter(|h| !headers.contains_key(**h))
            .count();
        if missing >= 3 {
            1.0
        } else {
            missing as f64 / CLIENT_HINT_HEADERS.len() as f64
        }
    }

    fn behavior_score(&self, headers: &BTreeMap<String, String>, method: &str) -> f64 {
        let mut score = 0.0;
        if method.eq_ignore_ascii_case("GET") && !headers.contains_key("referer") {
            score += 0.5;
        }
        match headers.get("accept") {
            None => score += 0.5,
            Some(accept) if accept.trim() == "*/*" => score += 0.25,
            _ => {}
        }
        score.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn headless_chrome_user_agent_is_detected() {
        let d = HeadlessDetector::new();
        let verdict = d.analyze(&headers(&[]), "GET", "Mozilla/5.0 HeadlessChrome/120.0");
        assert!(verdict.score >= 0.6);
        assert!(verdict.detected);
    }

    #[test]
    fn webdriver_header_is_an_immediate_positive() {
        let d = HeadlessDetector::new();
        let verdict = d.analyze(
            &headers(&[("webdriver", "true"), ("user-agent", "ignored")]),
            "GET",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
        );
        assert!(verdict.detected);
    }

    #[test]
    fn ordinary_browser_request_is_not_detected() {
        let d = HeadlessDetector::new();
        let verdict = d.analyze(
            &headers(&[
                ("accept-language", "en-US"),
                ("accept-encoding", "gzip"),
                ("sec-ch-ua", "\"Chromium\";v=\"120\""),
                ("sec-fetch-site", "none"),
                ("sec-fetch-mode", "navigate"),
                ("sec-fetch-dest", "document"),
                ("referer", "https://example.com"),
                ("accept", "text/html"),
            ]),
            "GET",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36",
        );
        assert!(!verdict.detected);
    }

    #[test]
    fn empty_user_agent_contributes_heavily() {
        let d = HeadlessDetector::new();
        let verdict = d.analyze(&headers(&[]), "GET", "");
        assert!(verdict.score > 0.0);
    }
}
