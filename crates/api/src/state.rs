//! Shared application state for the admin/verification HTTP surface (C19).
//!
//! The default wiring uses the in-memory ports throughout, matching §13's
//! "default port implementation when no external KV/database URL is
//! configured" design note; a deployment with a real KV/database would
//! swap these fields for concrete backends implementing the same ports.

use std::sync::Arc;

use waf_common::config::Config;
use waf_common::memory::{InMemoryConnectionTelemetry, InMemoryKvStore, InMemoryRecordStore};
use waf_pipeline::challenge::ChallengeSystem;
use waf_pipeline::ip_list::IpListStore;
use waf_pipeline::WafPipeline;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub kv: Arc<InMemoryKvStore>,
    pub records: Arc<InMemoryRecordStore>,
    pub telemetry: Arc<InMemoryConnectionTelemetry>,
    pub pipeline: Arc<WafPipeline>,
    pub challenges: Arc<ChallengeSystem>,
    pub ip_list: Arc<IpListStore>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let pipeline = WafPipeline::new(&config, None);
        let challenges = ChallengeSystem::new(&config);
        Self {
            kv: Arc::new(InMemoryKvStore::new()),
            records: Arc::new(InMemoryRecordStore::new()),
            telemetry: Arc::new(InMemoryConnectionTelemetry::new()),
            pipeline: Arc::new(pipeline),
            challenges: Arc::new(challenges),
            ip_list: Arc::new(IpListStore::new()),
            config,
        }
    }
}
