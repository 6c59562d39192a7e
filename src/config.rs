//! Configuration module for edgeprobe.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::{ProbeSettings, RankPolicy};
use crate::probe::ProbeKind;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "edgeprobe.db")
    pub db_path: String,
    /// Candidate speed tests
    pub speed: ProbeSettings,
    /// How speed test results are ordered and the best one picked (default: latency)
    pub speed_policy: RankPolicy,
    /// Service comparisons
    pub compare: ProbeSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "edgeprobe.db".to_string(),
            speed: ProbeSettings {
                kind: ProbeKind::Tcp,
                timeout: Duration::from_secs(3),
                attempts: 3,
                concurrency: 5,
            },
            speed_policy: RankPolicy::Latency,
            compare: ProbeSettings {
                kind: ProbeKind::Tls,
                timeout: Duration::from_secs(5),
                attempts: 3,
                concurrency: 8,
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `EDGEPROBE_HTTP_PORT`: HTTP port (default: 8080)
    /// - `EDGEPROBE_DB_PATH`: Database file path (default: "edgeprobe.db")
    /// - `EDGEPROBE_SPEED_{TIMEOUT_SECS,ATTEMPTS,CONCURRENCY,PROBE}`: speed test settings
    ///   (default: 3.0, 3, 5, tcp)
    /// - `EDGEPROBE_SPEED_POLICY`: `latency` or `stability` (default: latency)
    /// - `EDGEPROBE_COMPARE_{TIMEOUT_SECS,ATTEMPTS,CONCURRENCY,PROBE}`: comparison settings
    ///   (default: 5.0, 3, 8, tls)
    ///
    /// Unparseable values keep their default. Range checks are left to
    /// [`ProbeSettings::validate`].
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parsed(&lookup, "EDGEPROBE_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Some(db_path) = lookup("EDGEPROBE_DB_PATH") {
            cfg.db_path = db_path;
        }

        apply_settings(&lookup, "EDGEPROBE_SPEED", &mut cfg.speed);
        if let Some(policy) = parsed(&lookup, "EDGEPROBE_SPEED_POLICY") {
            cfg.speed_policy = policy;
        }
        apply_settings(&lookup, "EDGEPROBE_COMPARE", &mut cfg.compare);
        cfg
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    let value = raw.trim().parse().ok();
    if value.is_none() {
        tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
    }
    value
}

fn apply_settings(
    lookup: &impl Fn(&str) -> Option<String>,
    prefix: &str,
    settings: &mut ProbeSettings,
) {
    if let Some(secs) = parsed::<f64>(lookup, &format!("{}_TIMEOUT_SECS", prefix)) {
        // Negative or NaN stays invalid and is reported by validate().
        settings.timeout = Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO);
    }
    if let Some(attempts) = parsed(lookup, &format!("{}_ATTEMPTS", prefix)) {
        settings.attempts = attempts;
    }
    if let Some(concurrency) = parsed(lookup, &format!("{}_CONCURRENCY", prefix)) {
        settings.concurrency = concurrency;
    }
    if let Some(kind) = parsed(lookup, &format!("{}_PROBE", prefix)) {
        settings.kind = kind;
    }
}
