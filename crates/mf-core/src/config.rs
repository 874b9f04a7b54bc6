//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the job store, blob store, workers, telemetry, tools and
//! metrics. Every section defaults sensibly so a completely empty `{}` file
//! is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Environment variables that override file configuration.
pub const ENV_DB_PATH: &str = "MEDIAFLOW_DB_PATH";
pub const ENV_BLOB_ROOT: &str = "MEDIAFLOW_BLOB_ROOT";
pub const ENV_WORKER_ID: &str = "MEDIAFLOW_WORKER_ID";
pub const ENV_METRICS_PORT: &str = "MEDIAFLOW_METRICS_PORT";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub blob: BlobConfig,
    pub worker: WorkerConfig,
    pub telemetry: TelemetryConfig,
    pub tools: ToolsConfig,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Apply `MEDIAFLOW_*` environment overrides on top of the loaded file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_DB_PATH) {
            self.store.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_BLOB_ROOT) {
            self.blob.root = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_WORKER_ID) {
            if !v.trim().is_empty() {
                self.worker.worker_id = Some(v.trim().to_string());
            }
        }
        if let Some(v) = lookup(ENV_METRICS_PORT) {
            match v.parse::<u16>() {
                Ok(port) => self.metrics.port = port,
                Err(e) => tracing::warn!("Ignoring {ENV_METRICS_PORT}={v}: {e}"),
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.telemetry.interval_secs == 0 {
            warnings.push("telemetry.interval_secs is 0; telemetry will publish continuously".into());
        }
        if self.telemetry.ttl_secs <= self.telemetry.interval_secs {
            warnings.push(format!(
                "telemetry.ttl_secs ({}) should exceed telemetry.interval_secs ({}); \
                 workers will flap between fresh and stale",
                self.telemetry.ttl_secs, self.telemetry.interval_secs
            ));
        }
        if self.worker.own_queue_timeout_ms > self.worker.fallback_queue_timeout_ms {
            warnings.push(
                "worker.own_queue_timeout_ms exceeds fallback_queue_timeout_ms; \
                 assigned jobs lose their head start"
                    .into(),
            );
        }
        if self.worker.job_timeout_secs == 0 {
            warnings.push("worker.job_timeout_secs is 0; every conversion will time out".into());
        }
        if self.worker.stale_claim_secs <= self.worker.job_timeout_secs {
            warnings.push(format!(
                "worker.stale_claim_secs ({}) should exceed worker.job_timeout_secs ({}); \
                 live conversions may be re-claimed",
                self.worker.stale_claim_secs, self.worker.job_timeout_secs
            ));
        }
        if self.store.pool_size == 0 {
            warnings.push("store.pool_size is 0; a pool of 1 will be used".into());
        }
        if let Some(ref id) = self.worker.worker_id {
            if id.contains(char::is_whitespace) {
                warnings.push(format!("worker.worker_id '{id}' contains whitespace"));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Shared job/queue/telemetry store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub pool_size: u32,
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/mediaflow.db"),
            pool_size: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub root: PathBuf,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/blobs"),
        }
    }
}

/// Worker execution loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Explicit worker id; the hostname is used when unset.
    pub worker_id: Option<String>,
    pub own_queue_timeout_ms: u64,
    pub fallback_queue_timeout_ms: u64,
    /// Interval between queue polls while a blocking pop waits.
    pub poll_interval_ms: u64,
    /// Upper bound on a single transcode invocation.
    pub job_timeout_secs: u64,
    /// A `processing` job without a progress heartbeat for this long may be
    /// re-claimed by another worker.
    pub stale_claim_secs: u64,
    /// A `pending` job left off the fallback queue for this long is pushed
    /// back onto it by the sweeper.
    pub orphan_pending_secs: u64,
    pub sweep_interval_secs: u64,
    /// Pause after an unexpected loop error before polling again.
    pub error_backoff_secs: u64,
    /// Parent of the per-job scratch directories; the system temp dir when
    /// unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            own_queue_timeout_ms: 1_000,
            fallback_queue_timeout_ms: 5_000,
            poll_interval_ms: 100,
            job_timeout_secs: 3_600,
            stale_claim_secs: 7_200,
            orphan_pending_secs: 300,
            sweep_interval_secs: 60,
            error_backoff_secs: 5,
            scratch_dir: None,
        }
    }
}

impl WorkerConfig {
    pub fn own_queue_timeout(&self) -> Duration {
        Duration::from_millis(self.own_queue_timeout_ms)
    }

    pub fn fallback_queue_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_queue_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn stale_claim_after(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }

    pub fn orphan_pending_after(&self) -> Duration {
        Duration::from_secs(self.orphan_pending_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Telemetry push settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_secs: u64,
    pub ttl_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            ttl_secs: 15,
        }
    }
}

impl TelemetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".into(),
            port: 9101,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.telemetry.ttl_secs, 15);
        assert_eq!(cfg.metrics.port, 9101);
        assert_eq!(cfg.worker.own_queue_timeout(), Duration::from_secs(1));
        assert!(cfg.worker.worker_id.is_none());
    }

    #[test]
    fn default_config_no_warnings() {
        let warnings = Config::default().validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.store.pool_size, 4);
        assert_eq!(cfg.blob.root, PathBuf::from("./data/blobs"));
    }

    #[test]
    fn parse_partial_section() {
        let cfg = Config::from_json(r#"{"telemetry": {"ttl_secs": 30}}"#).unwrap();
        assert_eq!(cfg.telemetry.ttl_secs, 30);
        assert_eq!(cfg.telemetry.interval_secs, 5);
    }

    #[test]
    fn parse_error_is_validation() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn ttl_not_exceeding_interval_warns() {
        let mut cfg = Config::default();
        cfg.telemetry.ttl_secs = 5;
        assert!(cfg.validate().iter().any(|w| w.contains("ttl_secs")));
    }

    #[test]
    fn stale_threshold_below_job_timeout_warns() {
        let mut cfg = Config::default();
        cfg.worker.stale_claim_secs = 10;
        assert!(cfg.validate().iter().any(|w| w.contains("stale_claim_secs")));
    }

    #[test]
    fn worker_section_parses_orphan_window() {
        let cfg = Config::from_json(r#"{"worker": {"orphan_pending_secs": 30}}"#).unwrap();
        assert_eq!(cfg.worker.orphan_pending_after(), Duration::from_secs(30));
        assert_eq!(Config::default().worker.orphan_pending_secs, 300);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            (ENV_DB_PATH, "/tmp/x.db"),
            (ENV_WORKER_ID, " w-7 "),
            (ENV_METRICS_PORT, "9200"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.store.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.worker.worker_id.as_deref(), Some("w-7"));
        assert_eq!(cfg.metrics.port, 9200);
        assert_eq!(cfg.blob.root, PathBuf::from("./data/blobs"));
    }

    #[test]
    fn bad_metrics_port_is_ignored() {
        let mut cfg = Config::default();
        cfg.apply_overrides(|k| (k == ENV_METRICS_PORT).then(|| "nope".to_string()));
        assert_eq!(cfg.metrics.port, 9101);
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/mediaflow.json")));
        assert_eq!(cfg.store.pool_size, 4);
    }

    #[test]
    fn load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"worker": {"worker_id": "encoder-1"}}"#).unwrap();
        let cfg = Config::load_or_default(Some(&path));
        assert_eq!(cfg.worker.worker_id.as_deref(), Some("encoder-1"));
    }
}
