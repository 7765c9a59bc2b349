//! Alerting core library
//!
//! Turns a stream of classified conversation events into notification
//! decisions while keeping alert fatigue down:
//! - `gate`: Hard Issue Gate, separates alert-worthy events from routine and
//!   malformed ones
//! - `escalation`: windowed dedup store, escalation engine and aggregate
//!   summarizer
//! - `pipeline`: one thread-safe entry point wiring the above together
//! - `stats`: daily counters for reporting
//!
//! The core does no network I/O. Delivery of notifications belongs to the
//! caller.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use alerting::{AlertPipeline, AlertPolicyConfig, SystemClock};
//!
//! let pipeline = AlertPipeline::new(AlertPolicyConfig::default(), Arc::new(SystemClock))?;
//! # Ok::<(), alerting::ConfigError>(())
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod clock;
pub mod config;
pub mod error;
pub mod escalation;
pub mod event;
pub mod gate;
pub mod pipeline;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AlertPolicyConfig, BypassConfig, GateConfig, SummaryConfig, TierDurations};
pub use error::{AlertError, AlertResult, ConfigError, StoreError, StoreResult};
pub use escalation::{
    AggregatePayload, AlertGroup, AlertStore, DecisionKind, DecisionReason, EscalationDecision,
    EscalationEngine, GroupKey, GroupPhase, Priority,
};
pub use event::{
    AlertLevel, CategoryCode, ClassifiedEvent, DispatchType, LevelTier, ParsedEvent, Severity,
};
pub use gate::{GateStatsSnapshot, GateVerdict, HardIssueGate, MalformedReason};
pub use pipeline::{AlertPipeline, Notification, PipelineOutcome, Rejection, SharedAlertPipeline};
pub use stats::{DailyAggregation, DailyRow};
