//! Pipeline orchestrator (C15). Wires every component into the exact
//! control-flow order: normalize, IP allow/deny, geo, connection state,
//! TLS fingerprint, reputation, behavioral, malice, anomaly, adaptive rate
//! limit, challenge ladder, content detectors — first terminal outcome
//! wins, IL-1 short-circuits everything past the allow-list check.

use std::time::Instant;

use tracing::{info, warn};
use waf_common::config::Config;
use waf_common::error::WafError;
use waf_common::model::{
    Challenge, ChallengeKind, MetricsEvent, RequestRecord, SecurityEvent, StageOutcome, ThreatLevel,
};
use waf_common::ports::{ConnectionTelemetry, KvStore, RecordStore};

use waf_detectors::PatternDetectors;

use crate::anomaly::{AnomalyDetector, AnomalyEvent};
use crate::behavioral::{BehaviorEvent, BehavioralAnalyzer};
use crate::challenge::{self, BypassCounts, ChallengeSystem, LadderLevel};
use crate::connection_guard::ConnectionStateGuard;
use crate::connection_metrics::ConnectionMetricsAnalyzer;
use crate::geo::GeoFilter;
use crate::ip_list::IpListStore;
use crate::malice::{MaliceAction, MaliceScorer};
use crate::rate_limiter::{AdaptiveRateLimiter, RateLimitSignals};
use crate::reputation::ReputationEngine;
use crate::request_analyzer::{RawRequest, RequestAnalyzer};
use crate::tls_fingerprint::{self, TlsFingerprintEngine};

/// Terminal result of running a request through the whole pipeline.
#[derive(Debug, Clone)]
pub enum PipelineDecision {
    Allow { record: RequestRecord },
    Deny { record: RequestRecord, reason: String },
    Challenge { record: RequestRecord, challenge: Challenge },
}

pub struct WafPipeline {
    analyzer: RequestAnalyzer,
    ip_list: IpListStore,
    geo: Option<GeoFilter>,
    connection_guard: ConnectionStateGuard,
    tls_engine: TlsFingerprintEngine,
    connection_metrics: ConnectionMetricsAnalyzer,
    reputation: ReputationEngine,
    behavioral: BehavioralAnalyzer,
    anomaly: AnomalyDetector,
    malice: MaliceScorer,
    rate_limiter: AdaptiveRateLimiter,
    challenge_system: ChallengeSystem,
    detectors: PatternDetectors,

    geo_filtering_enabled: bool,
    connection_state_protection_enabled: bool,
    sql_injection_enabled: bool,
    xss_protection_enabled: bool,
    headless_confidence_threshold: f64,
    challenge_bypass_threshold: u64,
    max_latency_ms: u64,
}

impl WafPipeline {
    /// `geo` is `None` when no CIDR table was configured for this
    /// deployment; geo filtering is then always skipped regardless of
    /// `geo_filtering_enabled`.
    pub fn new(config: &Config, geo: Option<GeoFilter>) -> Self {
        Self {
            analyzer: RequestAnalyzer::new(),
            ip_list: IpListStore::new(),
            geo,
            connection_guard: ConnectionStateGuard::new(
                config.max_half_open_connections,
                config.max_total_connections,
                config.connection_threshold_warning,
                config.connection_threshold_critical,
                config.syn_cookie_max_requests_per_ip,
            ),
            tls_engine: TlsFingerprintEngine::new(),
            connection_metrics: ConnectionMetricsAnalyzer::new(config.low_and_slow_bytes_per_second_threshold),
            reputation: ReputationEngine::new(
                config.reputation_malicious_threshold,
                config.reputation_suspicious_threshold,
            ),
            behavioral: BehavioralAnalyzer::new(),
            anomaly: AnomalyDetector::new(),
            malice: MaliceScorer::new(),
            rate_limiter: if config.rate_limiting_enabled {
                AdaptiveRateLimiter::new(config.rate_limit_burst as u32, config.rate_limit_requests_per_minute as u32)
            } else {
                AdaptiveRateLimiter::non_adaptive(config.rate_limit_burst as u32, config.rate_limit_requests_per_minute as u32)
            },
            challenge_system: ChallengeSystem::new(config),
            detectors: PatternDetectors::new(),

            geo_filtering_enabled: config.geo_filtering_enabled,
            connection_state_protection_enabled: config.connection_state_protection_enabled,
            sql_injection_enabled: config.sql_injection_enabled,
            xss_protection_enabled: config.xss_protection_enabled,
            headless_confidence_threshold: config.headless_confidence_threshold,
            challenge_bypass_threshold: config.challenge_bypass_threshold,
            max_latency_ms: config.max_latency_ms,
        }
    }

    pub async fn evaluate(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        telemetry: &impl ConnectionTelemetry,
        raw: &RawRequest,
    ) -> Result<PipelineDecision, WafError> {
        let start = Instant::now();
        let record = self.analyzer.analyze(raw);
        let ip = record.ip.clone();

        // IL-1: allow-listing short-circuits every later stage.
        if self.ip_list.is_allowed(kv, records, &ip).await? {
            info!(ip = %ip, endpoint = %record.endpoint, "allow-listed, skipping pipeline");
            return Ok(self.finish(record, StageOutcome::Allow));
        }

        if self.geo_filtering_enabled {
            if let Some(geo) = &self.geo {
                if let Some(region) = geo.region_for(&ip) {
                    if geo.is_blocked(kv, &region).await? {
                        return Ok(self.finish(record, StageOutcome::Deny { reason: "geo-blocked region".to_string() }));
                    }
                }
            }
        }

        if self.connection_state_protection_enabled {
            let verdict = self.connection_guard.check(kv, telemetry, &ip).await?;
            if !verdict.allowed {
                return Ok(self.finish(
                    record,
                    StageOutcome::Deny { reason: "connection state limits exceeded".to_string() },
                ));
            }
        }

        if self.ip_list.is_denied(kv, records, &ip).await? {
            return Ok(self.finish(record, StageOutcome::Deny { reason: "ip deny-listed".to_string() }));
        }

        let tls_record = match &record.tls_features {
            Some(features) => {
                let (canonical, hash) = tls_fingerprint::fingerprint_hash(features);
                let looked_up = self.tls_engine.lookup(kv, records, &hash).await?;
                if looked_up.as_ref().is_some_and(|r| r.is_blacklisted) {
                    return Ok(self.finish(
                        record,
                        StageOutcome::Deny { reason: "blacklisted tls fingerprint".to_string() },
                    ));
                }
                Some((canonical, hash, looked_up))
            }
            None => None,
        };

        let reputation = self.reputation.classify(kv, records, &ip).await?;
        if reputation.classification == crate::reputation::ReputationClassification::Malicious {
            self.record_security_event(kv, records, &record, "malicious_reputation", ThreatLevel::High, true)
                .await?;
            return Ok(self.finish(
                record,
                StageOutcome::Deny { reason: "malicious reputation score".to_string() },
            ));
        }

        let behavior_profile = self.behavioral.profile(kv, &ip).await?;
        self.behavioral
            .append(
                kv,
                &ip,
                BehaviorEvent {
                    timestamp: chrono::Utc::now(),
                    endpoint: record.endpoint.clone(),
                    method: record.method.clone(),
                    user_agent: record.user_agent.clone(),
                },
            )
            .await?;

        let connection_metrics = self.connection_metrics.metrics(kv, &ip, None).await?;
        let tls_fp_record = tls_record.as_ref().and_then(|(_, _, r)| r.as_ref());
        let malice_verdict = self.malice.score(&connection_metrics, &reputation, tls_fp_record);
        let malice_action = self.malice.action(&malice_verdict);

        // From here on every stage reports through the same `StageOutcome`
        // the design calls for; `Continue` lets the next stage run, any
        // other variant sticks and later stages are skipped.
        let mut stage_outcome = StageOutcome::Continue;

        match malice_action {
            MaliceAction::Block { reason } => {
                self.record_security_event(kv, records, &record, "malice_score", ThreatLevel::Critical, true)
                    .await?;
                stage_outcome = StageOutcome::Deny { reason };
            }
            MaliceAction::Challenge(intent) => {
                let issued = self.issue_challenge_intent(kv, &ip, intent).await?;
                stage_outcome = StageOutcome::Challenge(issued);
            }
            MaliceAction::Allow => {}
        }

        if matches!(stage_outcome, StageOutcome::Continue) {
            self.anomaly
                .append(
                    kv,
                    &ip,
                    AnomalyEvent {
                        timestamp: chrono::Utc::now(),
                        endpoint: record.endpoint.clone(),
                        method: record.method.clone(),
                        blocked: false,
                    },
                )
                .await?;
            let anomaly_score = self.anomaly.score(kv, &ip).await?;
            if anomaly_score.should_block {
                self.record_security_event(kv, records, &record, "anomaly_score", ThreatLevel::High, true)
                    .await?;
                stage_outcome = StageOutcome::Deny { reason: "anomaly score exceeded the block threshold".to_string() };
            } else {
                let rate_signals = RateLimitSignals {
                    reputation: reputation.classification,
                    is_automated: behavior_profile.is_bot || record.headless.detected,
                    anomaly_score: anomaly_score.score,
                };
                let rate_outcome = self.rate_limiter.check(kv, &ip, &record.endpoint, &rate_signals).await?;
                if !rate_outcome.allowed {
                    let bypasses = self.bypass_counts(kv, &ip, ChallengeKind::Pow).await?;
                    let base = challenge::base_level(reputation.score, anomaly_score.score, connection_metrics.requests as u64);
                    let level = challenge::escalate(
                        base,
                        record.headless.score,
                        self.headless_confidence_threshold,
                        bypasses,
                        self.challenge_bypass_threshold,
                    );
                    let issued = self.issue_for_ladder_level(kv, &ip, level).await?;
                    stage_outcome = StageOutcome::Challenge(issued);
                }
            }
        }

        if matches!(stage_outcome, StageOutcome::Continue) {
            if let Some(hit) = self.detectors.scan(&record.payload_string) {
                let enabled = match hit.threat_type {
                    "sql_injection" => self.sql_injection_enabled,
                    "xss" => self.xss_protection_enabled,
                    _ => true,
                };
                if enabled {
                    self.record_security_event(kv, records, &record, hit.threat_type, hit.threat_level, true)
                        .await?;
                    stage_outcome = StageOutcome::Deny { reason: hit.reason };
                }
            }
        }

        let decision = self.finish(record.clone(), stage_outcome);

        if let Some((canonical, hash, _)) = &tls_record {
            let blocked = matches!(decision, PipelineDecision::Deny { .. });
            self.tls_engine.record(kv, records, canonical, hash, blocked).await?;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms > self.max_latency_ms {
            warn!(
                ip = %ip,
                elapsed_ms,
                budget_ms = self.max_latency_ms,
                "{}",
                WafError::BudgetExceeded { elapsed_ms, budget_ms: self.max_latency_ms }
            );
        }

        Ok(decision)
    }

    /// Appends the post-response throughput sample; called by the HTTP
    /// layer once the response status/size are known.
    pub async fn record_response(
        &self,
        kv: &impl KvStore,
        ip: &str,
        status_code: u16,
        response_size: u64,
    ) -> Result<(), WafError> {
        self.connection_metrics
            .append(
                kv,
                ip,
                MetricsEvent {
                    timestamp: chrono::Utc::now(),
                    status_code,
                    response_size,
                },
            )
            .await
    }

    /// Converts a stage's `StageOutcome` into the terminal `PipelineDecision`
    /// the caller gets back; `Continue` (no stage fired) means allow.
    fn finish(&self, record: RequestRecord, outcome: StageOutcome) -> PipelineDecision {
        match outcome {
            StageOutcome::Allow | StageOutcome::Continue => PipelineDecision::Allow { record },
            StageOutcome::Deny { reason } => PipelineDecision::Deny { record, reason },
            StageOutcome::Challenge(challenge) => PipelineDecision::Challenge { record, challenge },
        }
    }

    /// Inserts the audit row (C16), invalidates the reputation cache
    /// (§4.7: a blocked threat forces the next request to recompute it),
    /// and feeds the geo filter's per-region attack counter (§4.14) when a
    /// high/critical threat lands from a non-local region.
    async fn record_security_event(
        &self,
        kv: &impl KvStore,
        records: &impl RecordStore,
        record: &RequestRecord,
        threat_type: &str,
        threat_level: ThreatLevel,
        blocked: bool,
    ) -> Result<(), WafError> {
        records
            .insert_security_event(SecurityEvent {
                ip: record.ip.clone(),
                endpoint: record.endpoint.clone(),
                method: record.method.clone(),
                threat_type: threat_type.to_string(),
                threat_level,
                payload_snapshot: record.payload_string.chars().take(256).collect(),
                user_agent: record.user_agent.clone(),
                blocked,
                timestamp: chrono::Utc::now(),
            })
            .await?;
        self.reputation.invalidate(kv, &record.ip).await?;

        if matches!(threat_level, ThreatLevel::High | ThreatLevel::Critical) {
            if let Some(geo) = &self.geo {
                if let Some(region) = geo.region_for(&record.ip) {
                    geo.record_attack(kv, &region).await?;
                }
            }
        }
        Ok(())
    }

    async fn bypass_counts(&self, kv: &impl KvStore, ip: &str, kind: ChallengeKind) -> Result<BypassCounts, WafError> {
        // Reading without incrementing: record_bypass is only called from
        // the verification endpoints once a challenge is actually solved
        // or skipped; here we only need the current counts to decide the
        // escalation level, so we peek via a zero-increment read.
        let total: i64 = kv.get(&format!("bypass:{ip}")).await?.and_then(|v| v.parse().ok()).unwrap_or(0);
        let kind_specific: i64 = kv
            .get(&format!("bypass:{ip}:{}", kind.as_str()))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(BypassCounts { total, kind_specific, same_fingerprint: None })
    }

    async fn issue_for_ladder_level(&self, kv: &impl KvStore, ip: &str, level: LadderLevel) -> Result<Challenge, WafError> {
        match level {
            LadderLevel::Allow | LadderLevel::SoftWarn => self.challenge_system.issue_cookie(kv, ip).await,
            LadderLevel::EncryptedCookie => self.challenge_system.issue_encrypted_cookie(kv, ip).await,
            LadderLevel::PowOrTarpit => self.challenge_system.issue_pow(kv, ip, 0).await,
            LadderLevel::HardBlock => Ok(Challenge::HardBlock { reason: "escalation ladder reached hard block".to_string() }),
        }
    }

    async fn issue_challenge_intent(
        &self,
        kv: &impl KvStore,
        ip: &str,
        intent: crate::malice::ChallengeIntent,
    ) -> Result<Challenge, WafError> {
        use crate::malice::ChallengeIntent;
        match intent {
            ChallengeIntent::EncryptedCookie => self.challenge_system.issue_encrypted_cookie(kv, ip).await,
            ChallengeIntent::Pow { .. } => self.challenge_system.issue_pow(kv, ip, 0).await,
            ChallengeIntent::PowThenTarpit { complexity, .. } => {
                self.challenge_system.issue_tarpit(kv, ip, Some(complexity)).await
            }
        }
    }
}
