//! Alert policy configuration.
//!
//! Loaded from TOML, optionally overridden by `ALERT_*` environment
//! variables, and validated before any engine is built. An invalid policy is
//! fatal: the pipeline refuses to start instead of degrading to
//! always-suppress or always-emit.

use crate::error::ConfigError;
use crate::event::{LevelTier, Severity};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound for any configured duration (about a century).
const MAX_CONFIG_SECS: u64 = 3_155_760_000;

fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_CONFIG_SECS) as i64)
}

/// Keys a policy file may not leave to defaults.
const REQUIRED_FILE_KEYS: [&str; 2] = ["windows", "min_hits_to_send"];

/// Seconds per window/cooldown tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDurations {
    pub p0: u64,
    pub p1: u64,
    pub p2: u64,
}

impl TierDurations {
    pub fn get(&self, tier: LevelTier) -> Duration {
        let secs = match tier {
            LevelTier::P0 => self.p0,
            LevelTier::P1 => self.p1,
            LevelTier::P2 => self.p2,
        };
        seconds(secs)
    }

    fn shortest(&self) -> u64 {
        self.p0.min(self.p1).min(self.p2)
    }
}

/// Severity bypass: events at or above `tier` notify immediately, at most
/// once per `cooldown_secs` per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassConfig {
    pub tier: Severity,
    pub cooldown_secs: u64,
}

impl BypassConfig {
    pub fn cooldown(&self) -> Duration {
        seconds(self.cooldown_secs)
    }
}

/// Hard Issue Gate thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum severity admitted without any other signal.
    pub min_severity: Severity,
    /// Risk score at which a bug-flagged event is admitted.
    pub bug_risk_threshold: u8,
    /// When false every well-formed event is admitted.
    pub process_only_hard: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_severity: Severity::S2,
            bug_risk_threshold: 80,
            process_only_hard: true,
        }
    }
}

/// Aggregate payload sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Maximum evidence lines in one payload.
    pub evidence_limit: usize,
    /// Maximum characters per evidence line.
    pub max_chars: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            evidence_limit: 5,
            max_chars: 200,
        }
    }
}

/// Full alert policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPolicyConfig {
    /// Hits within one window before a threshold emission.
    pub min_hits_to_send: u32,
    /// Recent events kept per group for the summary.
    pub ring_capacity: usize,
    /// Whether the group key also carries the severity tier.
    pub key_includes_severity: bool,
    /// Notify again when an already-notified group sees a more urgent level.
    pub escalate_on_level_upgrade: bool,
    /// Dedup window per tier, measured from the group's window start.
    pub windows: TierDurations,
    /// Minimum gap between a notification and the next threshold emission.
    pub renotify_cooldown: TierDurations,
    pub bypass: BypassConfig,
    pub gate: GateConfig,
    pub summary: SummaryConfig,
}

impl Default for AlertPolicyConfig {
    fn default() -> Self {
        Self {
            min_hits_to_send: 1,
            ring_capacity: 5,
            key_includes_severity: false,
            escalate_on_level_upgrade: true,
            windows: TierDurations {
                p0: 86_400,
                p1: 259_200,
                p2: 604_800,
            },
            renotify_cooldown: TierDurations {
                p0: 3_600,
                p1: 21_600,
                p2: 86_400,
            },
            bypass: BypassConfig {
                tier: Severity::S4,
                cooldown_secs: 600,
            },
            gate: GateConfig::default(),
            summary: SummaryConfig::default(),
        }
    }
}

impl AlertPolicyConfig {
    /// Parse a policy from TOML text. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load a policy file, apply environment overrides, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |var| std::env::var(var).ok())
    }

    /// Load a policy file with overrides taken from `lookup`.
    ///
    /// The file must set `min_hits_to_send` and the `[windows]` table
    /// itself; the remaining keys fall back to defaults.
    pub fn load_with<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |source: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let table: toml::Table = toml::from_str(&text).map_err(parse_error)?;
        if let Some(field) = REQUIRED_FILE_KEYS
            .into_iter()
            .find(|key| !table.contains_key(*key))
        {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
                field,
            });
        }

        let mut config: Self = toml::Value::Table(table)
            .try_into()
            .map_err(parse_error)?;
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ALERT_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::Env {
                var: var.to_string(),
                value,
            })
        }

        macro_rules! override_field {
            ($var:literal, $field:expr) => {
                if let Some(value) = lookup($var) {
                    $field = parse($var, value)?;
                }
            };
        }

        override_field!("ALERT_DEDUP_P0_SECONDS", self.windows.p0);
        override_field!("ALERT_DEDUP_P1_SECONDS", self.windows.p1);
        override_field!("ALERT_DEDUP_P2_SECONDS", self.windows.p2);
        override_field!("ALERT_RENOTIFY_P0_SECONDS", self.renotify_cooldown.p0);
        override_field!("ALERT_RENOTIFY_P1_SECONDS", self.renotify_cooldown.p1);
        override_field!("ALERT_RENOTIFY_P2_SECONDS", self.renotify_cooldown.p2);
        override_field!("ALERT_MIN_HITS_TO_SEND", self.min_hits_to_send);
        override_field!("ALERT_BYPASS_SEVERITY", self.bypass.tier);
        override_field!("ALERT_BYPASS_COOLDOWN_SECONDS", self.bypass.cooldown_secs);
        override_field!("ALERT_RING_CAPACITY", self.ring_capacity);
        override_field!("ALERT_KEY_INCLUDES_SEVERITY", self.key_includes_severity);
        override_field!("ALERT_ESCALATE_ON_UPGRADE", self.escalate_on_level_upgrade);
        override_field!("ALERT_HARD_MIN_SEVERITY", self.gate.min_severity);
        override_field!("ALERT_BUG_RISK_THRESHOLD", self.gate.bug_risk_threshold);
        override_field!("ALERT_PROCESS_ONLY_HARD", self.gate.process_only_hard);
        override_field!("ALERT_AGGREGATE_LIMIT", self.summary.evidence_limit);
        override_field!("ALERT_SUMMARY_LEN", self.summary.max_chars);
        Ok(())
    }

    /// Reject policies that would make the engine meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, secs) in [
            ("windows.p0", self.windows.p0),
            ("windows.p1", self.windows.p1),
            ("windows.p2", self.windows.p2),
        ] {
            if secs == 0 {
                return Err(ConfigError::invalid(field, "window must be non-zero"));
            }
        }
        if self.windows.p0 > self.windows.p1 || self.windows.p1 > self.windows.p2 {
            return Err(ConfigError::invalid(
                "windows",
                format!(
                    "more urgent tiers need shorter windows (p0={} p1={} p2={})",
                    self.windows.p0, self.windows.p1, self.windows.p2
                ),
            ));
        }
        if self.min_hits_to_send == 0 {
            return Err(ConfigError::invalid("min_hits_to_send", "must be at least 1"));
        }
        if self.bypass.cooldown_secs == 0 {
            return Err(ConfigError::invalid("bypass.cooldown_secs", "must be non-zero"));
        }
        if self.bypass.cooldown_secs >= self.windows.shortest() {
            return Err(ConfigError::invalid(
                "bypass.cooldown_secs",
                format!(
                    "{}s must be shorter than the shortest window ({}s)",
                    self.bypass.cooldown_secs,
                    self.windows.shortest()
                ),
            ));
        }
        if self.ring_capacity == 0 {
            return Err(ConfigError::invalid("ring_capacity", "must be at least 1"));
        }
        if self.gate.bug_risk_threshold > 100 {
            return Err(ConfigError::invalid("gate.bug_risk_threshold", "must be 0-100"));
        }
        if self.summary.max_chars == 0 {
            return Err(ConfigError::invalid("summary.max_chars", "must be non-zero"));
        }
        Ok(())
    }
}
