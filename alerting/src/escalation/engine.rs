//! Escalation Engine: deterministic notify/suppress decisions per event
//!
//! Consumes an admitted event and its live AlertGroup and produces an
//! EscalationDecision. The hit is recorded and, on emission, the group is
//! marked notified inside the same call, so a caller holding the store lock
//! for the whole call can never double-fire.

use super::state::{AlertGroup, GroupKey, GroupPhase};
use crate::clock::cooldown_elapsed;
use crate::config::{AlertPolicyConfig, TierDurations};
use crate::error::ConfigError;
use crate::event::{AlertLevel, ParsedEvent, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the engine decided for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Counted, nothing sent.
    Suppressed,
    /// Hit threshold reached; the window's single threshold notification.
    Emit,
    /// Urgency short-circuited the threshold.
    EmitSeverityBypass,
}

impl DecisionKind {
    pub fn is_emit(self) -> bool {
        !matches!(self, Self::Suppressed)
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suppressed => write!(f, "suppressed"),
            Self::Emit => write!(f, "emit"),
            Self::EmitSeverityBypass => write!(f, "emit_severity_bypass"),
        }
    }
}

/// Why the engine decided what it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum DecisionReason {
    SeverityBypass { severity: Severity },
    LevelUpgrade { from: AlertLevel, to: AlertLevel },
    ThresholdReached { hits: u32, threshold: u32 },
    BelowThreshold { hits: u32, threshold: u32 },
    AlreadyEscalated { hits: u32 },
    CooldownActive { remaining_secs: i64 },
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SeverityBypass { severity } => write!(f, "severity {} bypass", severity),
            Self::LevelUpgrade { from, to } => write!(f, "level upgraded {} -> {}", from, to),
            Self::ThresholdReached { hits, threshold } => {
                write!(f, "threshold reached ({}/{})", hits, threshold)
            }
            Self::BelowThreshold { hits, threshold } => {
                write!(f, "below threshold ({}/{})", hits, threshold)
            }
            Self::AlreadyEscalated { hits } => {
                write!(f, "already notified this window ({} hits)", hits)
            }
            Self::CooldownActive { remaining_secs } => {
                write!(f, "re-notify cooldown active ({}s left)", remaining_secs)
            }
        }
    }
}

/// Decision for one event, with the group state it was made against.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationDecision {
    pub kind: DecisionKind,
    pub reason: DecisionReason,
    /// Group state after the hit (and notification mark) were applied.
    pub group: AlertGroup,
}

/// The Escalation Engine. Holds only validated configuration.
#[derive(Debug, Clone)]
pub struct EscalationEngine {
    config: AlertPolicyConfig,
}

impl EscalationEngine {
    /// Build an engine. Fails when the policy does not validate.
    pub fn new(config: AlertPolicyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AlertPolicyConfig {
        &self.config
    }

    /// Dedup window lengths per tier.
    pub fn windows(&self) -> &TierDurations {
        &self.config.windows
    }

    pub fn group_key(&self, event: &ParsedEvent) -> GroupKey {
        GroupKey::derive(event, self.config.key_includes_severity)
    }

    /// Fold `event` into `group` and decide.
    ///
    /// Precedence: severity bypass, then level-upgrade bypass, then the hit
    /// threshold. At most one notification results from one call.
    pub fn decide(
        &self,
        group: &mut AlertGroup,
        event: &ParsedEvent,
        now: DateTime<Utc>,
    ) -> EscalationDecision {
        let bypass = &self.config.bypass;
        let bypass_ready = cooldown_elapsed(now, group.last_notified_at, bypass.cooldown());

        // Compared against the level before this hit raises it.
        let upgrade = match group.highest_level {
            Some(from)
                if self.config.escalate_on_level_upgrade
                    && group.last_notified_at.is_some()
                    && event.level.outranks(from) =>
            {
                Some(from)
            }
            _ => None,
        };

        group.record_hit(event, now);

        if event.severity >= bypass.tier && bypass_ready {
            group.mark_notified(now);
            return self.decision(
                DecisionKind::EmitSeverityBypass,
                DecisionReason::SeverityBypass {
                    severity: event.severity,
                },
                group,
            );
        }

        if let Some(from) = upgrade.filter(|_| bypass_ready) {
            group.mark_notified(now);
            return self.decision(
                DecisionKind::EmitSeverityBypass,
                DecisionReason::LevelUpgrade {
                    from,
                    to: event.level,
                },
                group,
            );
        }

        let threshold = self.config.min_hits_to_send;
        let hits = group.hit_count;
        if hits < threshold {
            return self.decision(
                DecisionKind::Suppressed,
                DecisionReason::BelowThreshold { hits, threshold },
                group,
            );
        }
        if group.phase == GroupPhase::Escalated {
            return self.decision(
                DecisionKind::Suppressed,
                DecisionReason::AlreadyEscalated { hits },
                group,
            );
        }

        let tier = group.highest_level.unwrap_or(event.level).tier();
        let cooldown = self.config.renotify_cooldown.get(tier);
        if !cooldown_elapsed(now, group.last_notified_at, cooldown) {
            let remaining = group
                .last_notified_at
                .map(|last| (cooldown - now.signed_duration_since(last)).num_seconds())
                .unwrap_or(0);
            return self.decision(
                DecisionKind::Suppressed,
                DecisionReason::CooldownActive {
                    remaining_secs: remaining.max(0),
                },
                group,
            );
        }

        group.phase = GroupPhase::Escalated;
        group.mark_notified(now);
        self.decision(
            DecisionKind::Emit,
            DecisionReason::ThresholdReached { hits, threshold },
            group,
        )
    }

    fn decision(
        &self,
        kind: DecisionKind,
        reason: DecisionReason,
        group: &AlertGroup,
    ) -> EscalationDecision {
        EscalationDecision {
            kind,
            reason,
            group: group.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BypassConfig;
    use crate::event::{CategoryCode, DispatchType};
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::default() + Duration::seconds(secs)
    }

    fn event(severity: Severity, risk_score: u8, at: DateTime<Utc>) -> ParsedEvent {
        ParsedEvent {
            room_id: "R1".to_string(),
            timestamp: at,
            severity,
            risk_score,
            category: CategoryCode::new("STREAMING", "PUSH_FAIL"),
            short_label: Some("push failure".to_string()),
            dispatch: DispatchType::Defect,
            level: AlertLevel::compute(severity, risk_score),
            phenomenon: None,
            key_quote: None,
        }
    }

    fn config(threshold: u32, window: u64) -> AlertPolicyConfig {
        AlertPolicyConfig {
            windows: TierDurations {
                p0: window,
                p1: window,
                p2: window,
            },
            min_hits_to_send: threshold,
            ..Default::default()
        }
    }

    fn run(engine: &EscalationEngine, group: &mut AlertGroup, e: ParsedEvent) -> DecisionKind {
        let now = e.timestamp;
        engine.decide(group, &e, now).kind
    }

    fn fresh(engine: &EscalationEngine) -> AlertGroup {
        let key = engine.group_key(&event(Severity::S2, 0, t(0)));
        AlertGroup::new(key, t(0), engine.config().ring_capacity)
    }

    #[test]
    fn test_invalid_config_refuses_to_build() {
        let result = EscalationEngine::new(AlertPolicyConfig {
            min_hits_to_send: 0,
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_threshold_emits_once_at_third_hit() {
        let engine = EscalationEngine::new(config(3, 600)).unwrap();
        let mut group = fresh(&engine);

        let kinds: Vec<_> = [0, 10, 20]
            .into_iter()
            .map(|s| run(&engine, &mut group, event(Severity::S2, 40, t(s))))
            .collect();
        assert_eq!(
            kinds,
            vec![
                DecisionKind::Suppressed,
                DecisionKind::Suppressed,
                DecisionKind::Emit
            ]
        );
        assert_eq!(group.last_notified_at, Some(t(20)));
        assert_eq!(group.phase, GroupPhase::Escalated);

        let decision = engine.decide(&mut group, &event(Severity::S2, 40, t(30)), t(30));
        assert_eq!(decision.kind, DecisionKind::Suppressed);
        assert_eq!(decision.reason, DecisionReason::AlreadyEscalated { hits: 4 });
    }

    #[test]
    fn test_severity_bypass_respects_cooldown() {
        let mut cfg = config(3, 600);
        cfg.bypass = BypassConfig {
            tier: Severity::S1,
            cooldown_secs: 60,
        };
        let engine = EscalationEngine::new(cfg).unwrap();
        let mut group = fresh(&engine);

        assert_eq!(
            run(&engine, &mut group, event(Severity::S1, 10, t(0))),
            DecisionKind::EmitSeverityBypass
        );
        assert_eq!(
            run(&engine, &mut group, event(Severity::S1, 10, t(30))),
            DecisionKind::Suppressed
        );
        assert_eq!(
            run(&engine, &mut group, event(Severity::S1, 10, t(70))),
            DecisionKind::EmitSeverityBypass
        );
        assert_eq!(group.notifications, 2);
        assert_eq!(group.hit_count, 3);
    }

    #[test]
    fn test_bypass_wins_over_threshold_in_same_call() {
        let mut cfg = config(1, 600);
        cfg.bypass.tier = Severity::S3;
        cfg.bypass.cooldown_secs = 60;
        let engine = EscalationEngine::new(cfg).unwrap();
        let mut group = fresh(&engine);

        let decision = engine.decide(&mut group, &event(Severity::S3, 0, t(0)), t(0));
        assert_eq!(decision.kind, DecisionKind::EmitSeverityBypass);
        assert_eq!(decision.group.notifications, 1);
        assert_eq!(group.phase, GroupPhase::Collecting);
    }

    #[test]
    fn test_threshold_waits_for_renotify_cooldown_after_bypass() {
        let mut cfg = config(2, 3600);
        cfg.bypass.cooldown_secs = 60;
        cfg.renotify_cooldown = TierDurations {
            p0: 300,
            p1: 300,
            p2: 300,
        };
        let engine = EscalationEngine::new(cfg).unwrap();
        let mut group = fresh(&engine);

        assert_eq!(
            run(&engine, &mut group, event(Severity::S4, 0, t(0))),
            DecisionKind::EmitSeverityBypass
        );
        let decision = engine.decide(&mut group, &event(Severity::S2, 0, t(100)), t(100));
        assert_eq!(decision.kind, DecisionKind::Suppressed);
        assert_eq!(
            decision.reason,
            DecisionReason::CooldownActive {
                remaining_secs: 200
            }
        );
        assert_eq!(
            run(&engine, &mut group, event(Severity::S2, 0, t(300))),
            DecisionKind::Emit
        );
    }

    #[test]
    fn test_level_upgrade_bypasses_after_notification() {
        let mut cfg = config(1, 3600);
        cfg.bypass.cooldown_secs = 60;
        let engine = EscalationEngine::new(cfg).unwrap();
        let mut group = fresh(&engine);

        assert_eq!(
            run(&engine, &mut group, event(Severity::S2, 10, t(0))),
            DecisionKind::Emit
        );
        let decision = engine.decide(&mut group, &event(Severity::S3, 10, t(120)), t(120));
        assert_eq!(decision.kind, DecisionKind::EmitSeverityBypass);
        assert_eq!(
            decision.reason,
            DecisionReason::LevelUpgrade {
                from: AlertLevel::P2,
                to: AlertLevel::P1
            }
        );
        // Same level again is a plain duplicate.
        assert_eq!(
            run(&engine, &mut group, event(Severity::S3, 10, t(240))),
            DecisionKind::Suppressed
        );
    }

    #[test]
    fn test_level_upgrade_disabled() {
        let mut cfg = config(1, 3600);
        cfg.bypass.cooldown_secs = 60;
        cfg.escalate_on_level_upgrade = false;
        let engine = EscalationEngine::new(cfg).unwrap();
        let mut group = fresh(&engine);

        run(&engine, &mut group, event(Severity::S2, 10, t(0)));
        assert_eq!(
            run(&engine, &mut group, event(Severity::S3, 10, t(120))),
            DecisionKind::Suppressed
        );
    }

    #[test]
    fn test_window_lookup_by_level() {
        let engine = EscalationEngine::new(AlertPolicyConfig::default()).unwrap();
        let windows = engine.windows();
        assert_eq!(windows.get(AlertLevel::P0.tier()), Duration::seconds(86_400));
        assert_eq!(windows.get(AlertLevel::P3.tier()), Duration::seconds(604_800));
    }
}
