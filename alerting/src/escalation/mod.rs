//! Alert deduplication and escalation
//!
//! Admitted events are folded into alert groups keyed by room and category.
//! Each group lives for the dedup window of the tier it was created under; within it the engine emits at most
//! one threshold notification, plus severity bypasses on their own cooldown.
//!
//! ```text
//! ParsedEvent
//!     │
//!     ▼
//! AlertStore::lookup_or_create(key, now, tier, windows)   fresh group once its own window elapsed
//!     │
//!     ▼
//! EscalationEngine::decide(group, event, now)
//!     │  record_hit
//!     ├─ severity >= bypass tier, bypass cooldown elapsed → EmitSeverityBypass
//!     ├─ notified group, level upgraded                   → EmitSeverityBypass
//!     ├─ hits >= threshold, collecting, cooldown elapsed  → Emit
//!     └─ otherwise                                        → Suppressed
//!     │
//!     ▼  (on emit)
//! AggregationSummarizer::summarize(group) → AggregatePayload
//! ```

pub mod engine;
pub mod state;
pub mod store;
pub mod summarizer;

pub use engine::{DecisionKind, DecisionReason, EscalationDecision, EscalationEngine};
pub use state::{AlertGroup, GroupKey, GroupPhase};
pub use store::{AlertStore, SharedAlertStore, StoreSnapshot, SNAPSHOT_SCHEMA_VERSION};
pub use summarizer::{AggregatePayload, AggregationSummarizer, Priority};
