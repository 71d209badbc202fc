use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "flockport.json";

/// Ceiling for `max_concurrency`. At most this many batch calls reach the
/// store at once, whatever the request asks for.
pub const MAX_CONCURRENCY: usize = 8;

/// Settings for one import run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrateConfig {
    /// Upper bound on batch calls in flight at once, clamped to
    /// `1..=MAX_CONCURRENCY`. 1 commits strictly in sequence.
    pub max_concurrency: usize,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub validate_before_commit: bool,
    pub allow_rerun: bool,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            retry_attempts: 3,
            retry_backoff_ms: 250,
            validate_before_commit: true,
            allow_rerun: false,
        }
    }
}

impl MigrateConfig {
    /// Read `<workspace>/flockport.json` if present, defaults otherwise.
    pub fn load(workspace: &Path) -> anyhow::Result<MigrateConfig> {
        let path = workspace.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(MigrateConfig::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        let cfg: MigrateConfig = serde_json::from_str(&text)
            .with_context(|| format!("{} is invalid", path.to_string_lossy()))?;
        Ok(cfg.normalized())
    }

    /// Override fields from request params of the same (camelCase) names.
    pub fn apply_params(mut self, params: &serde_json::Value) -> MigrateConfig {
        if let Some(v) = params.get("maxConcurrency").and_then(|v| v.as_u64()) {
            self.max_concurrency = usize::try_from(v).unwrap_or(usize::MAX);
        }
        if let Some(v) = params.get("retryAttempts").and_then(|v| v.as_u64()) {
            self.retry_attempts = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = params.get("retryBackoffMs").and_then(|v| v.as_u64()) {
            self.retry_backoff_ms = v;
        }
        if let Some(v) = params.get("validateBeforeCommit").and_then(|v| v.as_bool()) {
            self.validate_before_commit = v;
        }
        if let Some(v) = params.get("allowRerun").and_then(|v| v.as_bool()) {
            self.allow_rerun = v;
        }
        self.normalized()
    }

    pub fn normalized(mut self) -> MigrateConfig {
        self.max_concurrency = self.max_concurrency.clamp(1, MAX_CONCURRENCY);
        self.retry_attempts = self.retry_attempts.max(1);
        self
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_override_and_clamp() {
        let cfg = MigrateConfig::default().apply_params(&json!({
            "maxConcurrency": 0,
            "retryAttempts": 5,
            "allowRerun": true
        }));
        assert_eq!(cfg.max_concurrency, 1);
        assert_eq!(cfg.retry_attempts, 5);
        assert!(cfg.allow_rerun);
        assert!(cfg.validate_before_commit);
    }

    #[test]
    fn huge_concurrency_is_capped() {
        let cfg = MigrateConfig::default().apply_params(&json!({ "maxConcurrency": 20000 }));
        assert_eq!(cfg.max_concurrency, MAX_CONCURRENCY);
        let cfg = MigrateConfig::default().apply_params(&json!({ "maxConcurrency": u64::MAX }));
        assert_eq!(cfg.max_concurrency, MAX_CONCURRENCY);
    }

    #[test]
    fn backoff_doubles() {
        let cfg = MigrateConfig {
            retry_backoff_ms: 100,
            ..MigrateConfig::default()
        };
        assert_eq!(cfg.backoff(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = std::env::temp_dir().join(format!("flockport-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create dir");
        std::fs::write(dir.join(CONFIG_FILE), r#"{ "maxConcurrency": 5 }"#).expect("write");
        let cfg = MigrateConfig::load(&dir).expect("load");
        assert_eq!(cfg.max_concurrency, 5);
        assert_eq!(cfg.retry_attempts, 3);
        let _ = std::fs::remove_dir_all(dir);
    }
}
