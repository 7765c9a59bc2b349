use std::path::PathBuf;
use std::time::Duration;

use alerting::{AlertPolicyConfig, ConfigError};

/// Default polling cadence.
pub const DEFAULT_POLL_SECS: u64 = 120;

/// Days of daily statistics kept in memory by default.
pub const DEFAULT_DAILY_RETENTION_DAYS: u64 = 30;

/// Runtime settings for the daemon. Defaults come from `ALERTD_*`
/// environment variables; command-line flags override them.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Alert policy TOML. `None` uses built-in defaults plus `ALERT_*` overrides.
    pub policy_path: Option<PathBuf>,
    /// JSONL file of classified events, one object per line.
    pub events_path: PathBuf,
    /// Where the event cursor is kept between runs.
    pub cursor_path: PathBuf,
    /// Dedup store snapshot.
    pub state_path: PathBuf,
    /// Append-only JSONL log of emitted notifications.
    pub decisions_path: Option<PathBuf>,
    /// Webhook receiving emitted notifications as JSON.
    pub webhook_url: Option<String>,
    pub poll_interval: Duration,
    /// Daily statistics older than this many days are dropped every tick.
    pub daily_retention_days: u64,
    /// Daily statistics rows, rewritten as JSON every tick.
    pub daily_path: Option<PathBuf>,
    /// Read events from stdin as the manual injection path.
    pub stdin_injection: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let events_path: PathBuf = std::env::var("ALERTD_EVENTS_PATH")
            .unwrap_or_else(|_| "events.jsonl".into())
            .into();
        let cursor_path = std::env::var("ALERTD_CURSOR_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| events_path.with_extension("cursor"));
        Self {
            policy_path: std::env::var("ALERTD_POLICY_PATH").ok().map(PathBuf::from),
            events_path,
            cursor_path,
            state_path: std::env::var("ALERTD_STATE_PATH")
                .unwrap_or_else(|_| "alert-state.json".into())
                .into(),
            decisions_path: std::env::var("ALERTD_DECISIONS_PATH").ok().map(PathBuf::from),
            webhook_url: std::env::var("ALERTD_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            poll_interval: Duration::from_secs(
                std::env::var("ALERTD_POLL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_POLL_SECS),
            ),
            daily_retention_days: std::env::var("ALERTD_DAILY_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|days| *days > 0)
                .unwrap_or(DEFAULT_DAILY_RETENTION_DAYS),
            daily_path: std::env::var("ALERTD_DAILY_PATH").ok().map(PathBuf::from),
            stdin_injection: false,
        }
    }
}

impl DaemonConfig {
    /// Load and validate the alert policy this daemon runs with.
    pub fn load_policy(&self) -> Result<AlertPolicyConfig, ConfigError> {
        self.load_policy_with(|var| std::env::var(var).ok())
    }

    /// Same as `load_policy`, with `ALERT_*` overrides taken from `lookup`.
    pub fn load_policy_with<F>(&self, lookup: F) -> Result<AlertPolicyConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match &self.policy_path {
            Some(path) => AlertPolicyConfig::load_with(path, lookup),
            None => {
                let mut policy = AlertPolicyConfig::default();
                policy.apply_overrides(lookup)?;
                policy.validate()?;
                Ok(policy)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
min_hits_to_send = 3

[windows]
p0 = 3600
p1 = 7200
p2 = 14400
"#;

    fn with_policy(text: &str) -> (tempfile::TempDir, DaemonConfig) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, text).unwrap();
        let config = DaemonConfig {
            policy_path: Some(path),
            ..Default::default()
        };
        (dir, config)
    }

    #[test]
    fn test_policy_from_file() {
        let (_dir, config) = with_policy(POLICY);
        let policy = config.load_policy_with(|_| None).unwrap();
        assert_eq!(policy.min_hits_to_send, 3);
        assert_eq!(policy.windows.p1, 7200);
    }

    #[test]
    fn test_builtin_policy_takes_overrides() {
        let config = DaemonConfig {
            policy_path: None,
            ..Default::default()
        };
        let policy = config
            .load_policy_with(|k| (k == "ALERT_MIN_HITS_TO_SEND").then(|| "4".to_string()))
            .unwrap();
        assert_eq!(policy.min_hits_to_send, 4);
    }

    #[test]
    fn test_invalid_policy_is_fatal() {
        let (_dir, config) = with_policy(&format!("ring_capacity = 0\n{POLICY}"));
        assert!(matches!(
            config.load_policy_with(|_| None),
            Err(ConfigError::Invalid { field: "ring_capacity", .. })
        ));

        let (_dir, config) = with_policy("ring_capacity = 4\n");
        assert!(matches!(
            config.load_policy_with(|_| None),
            Err(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert!(config.poll_interval.as_secs() > 0);
        assert!(config.daily_retention_days > 0);
        assert!(!config.stdin_injection);
    }
}
