//! Malice scorer (C10). Fuses connection-metrics, reputation, and TLS
//! signals into the single score that drives the challenge ladder.

use waf_common::model::TlsFingerprintRecord;

use crate::connection_metrics::ConnectionMetrics;
use crate::reputation::ReputationScore;
use crate::tls_fingerprint;

const ERROR_RATE_WEIGHT: f64 = 0.25;
const LOW_AND_SLOW_WEIGHT: f64 = 0.20;
const REGULAR_TIMING_WEIGHT: f64 = 0.20;
const REPUTATION_WEIGHT: f64 = 0.20;
const TLS_WEIGHT: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MaliceLevel {
    Clean,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaliceVerdict {
    pub score: f64,
    pub level: MaliceLevel,
}

#[derive(Debug, Clone)]
pub enum MaliceAction {
    Allow,
    Challenge(ChallengeIntent),
    Block { reason: String },
}

/// What the challenge system should issue; the actual token/nonce is
/// minted by C12, not here.
#[derive(Debug, Clone, Copy)]
pub enum ChallengeIntent {
    EncryptedCookie,
    Pow { difficulty: u32 },
    PowThenTarpit { difficulty: u32, complexity: u32 },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MaliceScorer;

impl MaliceScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(
        &self,
        metrics: &ConnectionMetrics,
        reputation: &ReputationScore,
        tls_record: Option<&TlsFingerprintRecord>,
    ) -> MaliceVerdict {
        let error_rate_n = (metrics.error_rate * 2.0).min(1.0);
        let low_and_slow_n = if metrics.is_low_and_slow { 1.0 } else { 0.0 };
        let regular_timing_n = regular_timing_prime(metrics.variance_inter_arrival);
        let reputation_n = reputation_prime(reputation.score);
        let tls_n = tls_prime(tls_record);

        let score = ERROR_RATE_WEIGHT * error_rate_n
            + LOW_AND_SLOW_WEIGHT * low_and_slow_n
            + REGULAR_TIMING_WEIGHT * regular_timing_n
            + REPUTATION_WEIGHT * reputation_n
            + TLS_WEIGHT * tls_n;

        MaliceVerdict {
            score,
            level: classify(score),
        }
    }

    /// §4.10's level -> action table. `HardBlock` is expressed through
    /// `MaliceAction::Block`, not `Challenge`, since a plain block carries
    /// no token for the caller to issue.
    pub fn action(&self, verdict: &MaliceVerdict) -> MaliceAction {
        match verdict.level {
            MaliceLevel::Critical => MaliceAction::Block {
                reason: "malice score in critical range".to_string(),
            },
            MaliceLevel::High => MaliceAction::Challenge(ChallengeIntent::PowThenTarpit {
                difficulty: 5,
                complexity: 7,
            }),
            MaliceLevel::Medium => MaliceAction::Challenge(ChallengeIntent::Pow { difficulty: 5 }),
            MaliceLevel::Low => MaliceAction::Challenge(ChallengeIntent::EncryptedCookie),
            MaliceLevel::Clean => MaliceAction::Allow,
        }
    }
}

fn classify(score: f64) -> MaliceLevel {
    if score >= 0.8 {
        MaliceLevel::Critical
    } else if score >= 0.6 {
        MaliceLevel::High
    } else if score >= 0.4 {
        MaliceLevel::Medium
    } else if score >= 0.2 {
        MaliceLevel::Low
    } else {
        MaliceLevel::Clean
    }
}

/// Piecewise by variance: 0.01/0.1/0.5 thresholds map to 1.0/0.7/0.4.
fn regular_timing_prime(variance: f64) -> f64 {
    if variance < 0.01 {
        1.0
    } else if variance < 0.1 {
        0.7
    } else if variance < 0.5 {
        0.4
    } else {
        0.0
    }
}

/// Piecewise by reputation score: 70/40/20 thresholds map to 1.0/0.6/0.3.
fn reputation_prime(score: f64) -> f64 {
    if score >= 70.0 {
        1.0
    } else if score >= 40.0 {
        0.6
    } else if score >= 20.0 {
        0.3
    } else {
        0.0
    }
}

fn tls_prime(record: Option<&TlsFingerprintRecord>) -> f64 {
    match record {
        Some(r) if r.is_blacklisted => 1.0,
        Some(r) if tls_fingerprint::is_suspicious(r) => 0.7,
        _ => 0.0,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::ReputationClassification;

    fn reputation(score: f64) -> ReputationScore {
        ReputationScore {
            score,
            classification: ReputationClassification::Clean,
            threat_intel: 0.0,
            behavioral: 0.0,
            temporal: 0.0,
            network: 0.0,
        }
    }

    fn clean_metrics() -> ConnectionMetrics {
        ConnectionMetrics {
            requests: 10,
            errors: 0,
            error_rate: 0.0,
            bytes_per_second: 1000.0,
            mean_inter_arrival_secs: 5.0,
            variance_inter_arrival: 4.0,
            is_low_and_slow: false,
            regular_timing: false,
        }
    }

    #[test]
    fn clean_traffic_is_allowed() {
        let scorer = MaliceScorer::new();
        let verdict = scorer.score(&clean_metrics(), &reputation(0.0), None);
        assert_eq!(verdict.level, MaliceLevel::Clean);
        assert!(matches!(scorer.action(&verdict), MaliceAction::Allow));
    }

    #[test]
    fn low_and_slow_plus_bad_reputation_escalates_to_challenge() {
        let scorer = MaliceScorer::new();
        let metrics = ConnectionMetrics {
            requests: 10,
            errors: 2,
            error_rate: 0.2,
            bytes_per_second: 2.0,
            mean_inter_arrival_secs: 12.0,
            variance_inter_arrival: 0.005,
            is_low_and_slow: true,
            regular_timing: true,
        };
        let verdict = scorer.score(&metrics, &reputation(45.0), None);
        assert!(verdict.level >= MaliceLevel::Medium, "{:?}", verdict);
        assert!(matches!(scorer.action(&verdict), MaliceAction::Challenge(_)));
    }

    #[test]
    fn score_matches_the_documented_weighted_sum() {
        let scorer = MaliceScorer::new();
        let metrics = ConnectionMetrics {
            requests: 10,
            errors: 5,
            error_rate: 0.5,
            bytes_per_second: 2.0,
            mean_inter_arrival_secs: 12.0,
            variance_inter_arrival: 0.005,
            is_low_and_slow: true,
            regular_timing: true,
        };
        let verdict = scorer.score(&metrics, &reputation(75.0), None);
        let expected = 0.25 * 1.0 + 0.20 * 1.0 + 0.20 * 1.0 + 0.20 * 1.0 + 0.15 * 0.0;
        assert!((verdict.score - expected).abs() < 1e-9);
    }

    #[test]
    fn score_always_lands_in_the_unit_interval() {
        let scorer = MaliceScorer::new();
        let metrics = ConnectionMetrics {
            requests: 1,
            errors: 1,
            error_rate: 1.0,
            bytes_per_second: 0.0,
            mean_inter_arrival_secs: 0.0,
            variance_inter_arrival: 0.0,
            is_low_and_slow: true,
            regular_timing: true,
        };
        let verdict = scorer.score(&metrics, &reputation(100.0), None);
        assert!((0.0..=1.0).contains(&verdict.score));
    }
}
