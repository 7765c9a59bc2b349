//! Alert pipeline: gate, store, engine and summarizer behind one entry point.
//!
//! `process` is safe to call from any number of threads. The store lookup,
//! hit and decision for one event run under a single lock, which is what
//! keeps two concurrent deliveries for one group from both emitting.

use crate::clock::Clock;
use crate::config::AlertPolicyConfig;
use crate::error::{AlertResult, ConfigError, StoreError, StoreResult};
use crate::escalation::{
    AggregatePayload, AggregationSummarizer, AlertGroup, AlertStore, DecisionKind, DecisionReason,
    EscalationEngine, GroupKey, SharedAlertStore, StoreSnapshot,
};
use crate::event::{ClassifiedEvent, ParsedEvent, Severity};
use crate::gate::{GateStats, GateStatsSnapshot, GateVerdict, HardIssueGate, MalformedReason};
use crate::stats::{DailyAggregation, DailyRow};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// What an external notifier receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub key: GroupKey,
    pub kind: DecisionKind,
    pub reason: DecisionReason,
    pub payload: AggregatePayload,
    pub decided_at: DateTime<Utc>,
}

/// Why the gate turned an event away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Routine { severity: Severity },
    Malformed(MalformedReason),
}

/// Result of processing one event.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Rejected(Rejection),
    Suppressed {
        key: GroupKey,
        reason: DecisionReason,
        hits: u32,
    },
    Notify(Notification),
}

impl PipelineOutcome {
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            Self::Notify(n) => Some(n),
            _ => None,
        }
    }

    /// Decision kind for admitted events; `None` for rejections.
    pub fn decision_kind(&self) -> Option<DecisionKind> {
        match self {
            Self::Rejected(_) => None,
            Self::Suppressed { .. } => Some(DecisionKind::Suppressed),
            Self::Notify(n) => Some(n.kind),
        }
    }
}

/// The event-processing core.
pub struct AlertPipeline {
    gate: HardIssueGate,
    engine: EscalationEngine,
    summarizer: AggregationSummarizer,
    store: SharedAlertStore,
    gate_stats: GateStats,
    daily: Mutex<DailyAggregation>,
    clock: Arc<dyn Clock>,
}

/// Shared reference to an AlertPipeline
pub type SharedAlertPipeline = Arc<AlertPipeline>;

impl AlertPipeline {
    /// Build a pipeline with an empty store.
    pub fn new(config: AlertPolicyConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let store = AlertStore::new(config.ring_capacity);
        Self::with_store(config, store, clock)
    }

    /// Build a pipeline around an existing (e.g. restored) store.
    pub fn with_store(
        config: AlertPolicyConfig,
        store: AlertStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let engine = EscalationEngine::new(config)?;
        let config = engine.config();
        Ok(Self {
            gate: HardIssueGate::new(config.gate),
            summarizer: AggregationSummarizer::new(config.summary),
            engine,
            store: store.shared(),
            gate_stats: GateStats::default(),
            daily: Mutex::new(DailyAggregation::new()),
            clock,
        })
    }

    /// Build a pipeline whose store is restored from a snapshot file.
    pub fn restore(
        config: AlertPolicyConfig,
        snapshot_path: &Path,
        clock: Arc<dyn Clock>,
    ) -> AlertResult<Self> {
        config.validate()?;
        let store = AlertStore::load(
            snapshot_path,
            config.ring_capacity,
            clock.now(),
            &config.windows,
        )?;
        Ok(Self::with_store(config, store, clock)?)
    }

    pub fn engine(&self) -> &EscalationEngine {
        &self.engine
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Process one event at the clock's current time.
    pub fn process(&self, event: &ClassifiedEvent) -> StoreResult<PipelineOutcome> {
        self.process_at(event, self.clock.now())
    }

    /// Process one event as if the time were `now`.
    pub fn process_at(
        &self,
        event: &ClassifiedEvent,
        now: DateTime<Utc>,
    ) -> StoreResult<PipelineOutcome> {
        let verdict = self.gate.evaluate(event);
        self.gate_stats.record(&verdict);

        let parsed = match verdict {
            GateVerdict::Admitted { event, reason } => {
                debug!(room = %event.room_id, ?reason, "Event admitted");
                event
            }
            GateVerdict::Routine { event } => {
                self.record_daily(&event, false, false)?;
                return Ok(PipelineOutcome::Rejected(Rejection::Routine {
                    severity: event.severity,
                }));
            }
            GateVerdict::Malformed(reason) => {
                warn!(
                    event_id = event.event_id.as_deref().unwrap_or("-"),
                    room = %event.room_id,
                    %reason,
                    "Rejected malformed event"
                );
                return Ok(PipelineOutcome::Rejected(Rejection::Malformed(reason)));
            }
        };

        let key = self.engine.group_key(&parsed);
        let decision = {
            let mut store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
            let group =
                store.lookup_or_create(&key, now, parsed.level.tier(), self.engine.windows());
            self.engine.decide(group, &parsed, now)
        };

        self.record_daily(&parsed, true, decision.kind.is_emit())?;

        if !decision.kind.is_emit() {
            debug!(
                key = %key,
                hits = decision.group.hit_count,
                reason = %decision.reason,
                "Alert suppressed"
            );
            return Ok(PipelineOutcome::Suppressed {
                key,
                reason: decision.reason,
                hits: decision.group.hit_count,
            });
        }

        let payload = self.summarizer.summarize(&decision.group);
        info!(
            key = %key,
            kind = %decision.kind,
            reason = %decision.reason,
            hits = payload.occurrence_count,
            priority = %payload.priority,
            "Alert emitted"
        );
        Ok(PipelineOutcome::Notify(Notification {
            key,
            kind: decision.kind,
            reason: decision.reason,
            payload,
            decided_at: now,
        }))
    }

    fn record_daily(&self, event: &ParsedEvent, hard: bool, alerted: bool) -> StoreResult<()> {
        let mut daily = self.daily.lock().map_err(|_| StoreError::LockPoisoned)?;
        daily.record(event, hard, alerted);
        Ok(())
    }

    /// Evict groups past their own window. Returns how many were dropped.
    pub fn prune(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(store.prune_expired(now, self.engine.windows()))
    }

    /// Current state of one group, if tracked.
    pub fn group(&self, key: &GroupKey) -> StoreResult<Option<AlertGroup>> {
        let store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(store.get(key).cloned())
    }

    pub fn live_groups(&self) -> StoreResult<usize> {
        let store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(store.len())
    }

    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(store.snapshot(self.clock.now()))
    }

    /// Persist the store to `path`.
    pub fn save_snapshot(&self, path: &Path) -> StoreResult<()> {
        let store = self.store.lock().map_err(|_| StoreError::LockPoisoned)?;
        store.save(path, self.clock.now())
    }

    pub fn gate_stats(&self) -> GateStatsSnapshot {
        self.gate_stats.snapshot()
    }

    /// Count an input record that could not be decoded as an event.
    pub fn record_unparsable(&self) {
        self.gate_stats.record_unparsable();
    }

    pub fn daily_rows(&self) -> StoreResult<Vec<DailyRow>> {
        let daily = self.daily.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(daily.rows())
    }

    pub fn prune_daily_before(&self, date: NaiveDate) -> StoreResult<usize> {
        let mut daily = self.daily.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(daily.prune_before(date))
    }
}
