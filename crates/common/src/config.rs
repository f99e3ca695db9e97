use std::env;
use std::fmt;

/// Wraps the process secret so it never shows up in a `{:?}` log line.
#[derive(Clone)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

/// Typed configuration for the WAF. Every tunable from the design has a
/// documented default here; only `database_url` and `secret_key` are
/// required to boot.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub kv_url: Option<String>,
    pub secret_key: SecretKey,

    pub sql_injection_enabled: bool,
    pub xss_protection_enabled: bool,
    pub headless_detection_enabled: bool,
    pub connection_state_protection_enabled: bool,
    pub syn_cookie_enabled: bool,
    pub rate_limiting_enabled: bool,
    pub geo_filtering_enabled: bool,

    pub rate_limit_requests_per_minute: u64,
    pub rate_limit_burst: u64,
    pub rate_limit_by_ip: bool,

    pub reputation_malicious_threshold: f64,
    pub reputation_suspicious_threshold: f64,

    pub pow_difficulty_min: u32,
    pub pow_difficulty_max: u32,
    pub tarpit_complexity_default: u32,
    pub tarpit_solve_time_min_ms: u64,
    pub tarpit_solve_time_max_ms: u64,
    pub challenge_bypass_threshold: u64,
    pub challenge_cookie_ttl_secs: u64,

    pub headless_confidence_threshold: f64,

    pub max_half_open_connections: u64,
    pub max_total_connections: u64,
    pub connection_threshold_warning: f64,
    pub connection_threshold_critical: f64,
    pub syn_cookie_max_requests_per_ip: u64,

    pub connection_metrics_window_minutes: i64,
    pub low_and_slow_bytes_per_second_threshold: f64,

    pub geo_attack_threshold: u64,
    pub geo_auto_block_ttl_secs: u64,

    pub max_latency_ms: u64,
}

impl Config {
    /// Loads configuration from the process environment, matching the
    /// teacher's `database::init_db` pattern of a single required
    /// `DATABASE_URL` read, generalized to the full set of WAF tunables.
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;
        let secret_key = env::var("WAF_SECRET_KEY")
            .map_err(|_| "WAF_SECRET_KEY must be set".to_string())?;

        Ok(Config {
            bind_addr: env_or("WAF_BIND_ADDR", "0.0.0.0:8080"),
            database_url,
            kv_url: env::var("WAF_KV_URL").ok(),
            secret_key: SecretKey(secret_key),

            sql_injection_enabled: env_bool("WAF_SQL_INJECTION_ENABLED", true),
            xss_protection_enabled: env_bool("WAF_XSS_PROTECTION_ENABLED", true),
            headless_detection_enabled: env_bool("WAF_HEADLESS_DETECTION_ENABLED", true),
            connection_state_protection_enabled: env_bool(
                "WAF_CONNECTION_STATE_PROTECTION_ENABLED",
                true,
            ),
            syn_cookie_enabled: env_bool("WAF_SYN_COOKIE_ENABLED", true),
            rate_limiting_enabled: env_bool("WAF_RATE_LIMITING_ENABLED", true),
            geo_filtering_enabled: env_bool("WAF_GEO_FILTERING_ENABLED", true),

            rate_limit_requests_per_minute: env_num("WAF_RATE_LIMIT_RPM", 100),
            rate_limit_burst: env_num("WAF_RATE_LIMIT_BURST", 10),
            rate_limit_by_ip: env_bool("WAF_RATE_LIMIT_BY_IP", true),

            reputation_malicious_threshold: env_f64("WAF_REPUTATION_MALICIOUS_THRESHOLD", 70.0),
            reputation_suspicious_threshold: env_f64("WAF_REPUTATION_SUSPICIOUS_THRESHOLD", 40.0),

            pow_difficulty_min: env_num("WAF_POW_DIFFICULTY_MIN", 1) as u32,
            pow_difficulty_max: env_num("WAF_POW_DIFFICULTY_MAX", 6) as u32,
            tarpit_complexity_default: env_num("WAF_TARPIT_COMPLEXITY_DEFAULT", 3) as u32,
            tarpit_solve_time_min_ms: env_num("WAF_TARPIT_SOLVE_TIME_MIN_MS", 100),
            tarpit_solve_time_max_ms: env_num("WAF_TARPIT_SOLVE_TIME_MAX_MS", 30_000),
            challenge_bypass_threshold: env_num("WAF_CHALLENGE_BYPASS_THRESHOLD", 3),
            challenge_cookie_ttl_secs: env_num("WAF_CHALLENGE_COOKIE_TTL_SECS", 300),

            headless_confidence_threshold: env_f64("WAF_HEADLESS_CONFIDENCE_THRESHOLD", 0.6),

            max_half_open_connections: env_num("WAF_MAX_HALF_OPEN_CONNECTIONS", 1000),
            max_total_connections: env_num("WAF_MAX_TOTAL_CONNECTIONS", 5000),
            connection_threshold_warning: env_f64("WAF_CONNECTION_THRESHOLD_WARNING", 0.7),
            connection_threshold_critical: env_f64("WAF_CONNECTION_THRESHOLD_CRITICAL", 0.9),
            syn_cookie_max_requests_per_ip: env_num("WAF_SYN_COOKIE_MAX_REQUESTS_PER_IP", 10),

            connection_metrics_window_minutes: env_num("WAF_CONNECTION_METRICS_WINDOW_MINUTES", 5)
                as i64,
            low_and_slow_bytes_per_second_threshold: env_f64(
                "WAF_LOW_AND_SLOW_BYTES_PER_SECOND_THRESHOLD",
                10.0,
            ),

            geo_attack_threshold: env_num("WAF_GEO_ATTACK_THRESHOLD", 10),
            geo_auto_block_ttl_secs: env_num("WAF_GEO_AUTO_BLOCK_TTL_SECS", 3600),

            max_latency_ms: env_num("WAF_MAX_LATENCY_MS", 50),
        })
    }

    /// A configuration usable in tests without any environment variables.
    pub fn for_tests() -> Self {
        Config {
            bind_addr: "127.0.0.1:0".to_string(),
            database_url: "sqlite::memory:".to_string(),
            kv_url: None,
            secret_key: SecretKey("test-secret-key-not-for-production".to_string()),

            sql_injection_enabled: true,
            xss_protection_enabled: true,
            headless_detection_enabled: true,
            connection_state_protection_enabled: true,
            syn_cookie_enabled: true,
            rate_limiting_enabled: true,
            geo_filtering_enabled: true,

            rate_limit_requests_per_minute: 100,
            rate_limit_burst: 10,
            rate_limit_by_ip: true,

            reputation_malicious_threshold: 70.0,
            reputation_suspicious_threshold: 40.0,

            pow_difficulty_min: 1,
            pow_difficulty_max: 6,
            tarpit_complexity_default: 3,
            tarpit_solve_time_min_ms: 100,
            tarpit_solve_time_max_ms: 30_000,
            challenge_bypass_threshold: 3,
            challenge_cookie_ttl_secs: 300,

            headless_confidence_threshold: 0.6,

            max_half_open_connections: 1000,
            max_total_connections: 5000,
            connection_threshold_warning: 0.7,
            connection_threshold_critical: 0.9,
            syn_cookie_max_requests_per_ip: 10,

            connection_metrics_window_minutes: 5,
            low_and_slow_bytes_per_second_threshold: 10.0,

            geo_attack_threshold: 10,
            geo_auto_block_ttl_secs: 3600,

            max_latency_ms: 50,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_num(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
