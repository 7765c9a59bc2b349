//! Hard Issue Gate: decides whether a classified event is alert-worthy.
//!
//! Pure and stateless: the verdict depends only on the event's own
//! classification fields and the gate thresholds. Malformed events fail
//! closed with a verdict distinct from routine rejection.

use crate::config::GateConfig;
use crate::event::{
    AlertLevel, CategoryCode, ClassifiedEvent, DispatchType, ParsedEvent, Severity,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Why an event could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedReason {
    MissingField { field: String },
    UnknownSeverity { value: String },
    RiskOutOfRange { value: i64 },
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { field } => write!(f, "missing field `{}`", field),
            Self::UnknownSeverity { value } => write!(f, "unknown severity `{}`", value),
            Self::RiskOutOfRange { value } => write!(f, "risk score {} outside 0-100", value),
        }
    }
}

/// Which rule admitted the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmitReason {
    Unresolved,
    SeverityAtLeast(Severity),
    BugWithRisk(u8),
    AllEventsProcessed,
}

/// Gate outcome. Rejections are expected results, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Admitted {
        event: ParsedEvent,
        reason: AdmitReason,
    },
    /// Well-formed but routine: answered, low severity, no bug signal.
    Routine { event: ParsedEvent },
    /// Required classification is missing or invalid.
    Malformed(MalformedReason),
}

impl GateVerdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// The Hard Issue Gate.
#[derive(Debug, Clone, Copy)]
pub struct HardIssueGate {
    config: GateConfig,
}

impl HardIssueGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Boolean form of [`HardIssueGate::evaluate`].
    pub fn admit(&self, event: &ClassifiedEvent) -> bool {
        self.evaluate(event).is_admitted()
    }

    /// Evaluate one event.
    pub fn evaluate(&self, event: &ClassifiedEvent) -> GateVerdict {
        let parsed = match parse_classification(event) {
            Ok(parsed) => parsed,
            Err(reason) => return GateVerdict::Malformed(reason),
        };

        let reason = if !self.config.process_only_hard {
            Some(AdmitReason::AllEventsProcessed)
        } else if event.unresolved {
            Some(AdmitReason::Unresolved)
        } else if parsed.severity >= self.config.min_severity {
            Some(AdmitReason::SeverityAtLeast(self.config.min_severity))
        } else if event.is_bug && parsed.risk_score >= self.config.bug_risk_threshold {
            Some(AdmitReason::BugWithRisk(parsed.risk_score))
        } else {
            None
        };

        match reason {
            Some(reason) => GateVerdict::Admitted {
                event: parsed,
                reason,
            },
            None => GateVerdict::Routine { event: parsed },
        }
    }
}

/// Parse the classification fields into a [`ParsedEvent`].
pub(crate) fn parse_classification(
    event: &ClassifiedEvent,
) -> Result<ParsedEvent, MalformedReason> {
    fn required<'a>(value: Option<&'a String>, field: &str) -> Result<&'a str, MalformedReason> {
        match value.map(|v| v.trim()) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(MalformedReason::MissingField {
                field: field.to_string(),
            }),
        }
    }

    let room_id = event.room_id.trim();
    if room_id.is_empty() {
        return Err(MalformedReason::MissingField {
            field: "room_id".to_string(),
        });
    }
    let severity_raw = required(event.severity.as_ref(), "severity")?;
    let severity = Severity::parse(severity_raw).ok_or_else(|| MalformedReason::UnknownSeverity {
        value: severity_raw.to_string(),
    })?;
    let top = required(event.category_l1.as_ref(), "category_l1")?;
    let sub = required(event.category_l2.as_ref(), "category_l2")?;
    let risk_score = match event.risk_score {
        None => 0,
        Some(value) => u8::try_from(value)
            .ok()
            .filter(|v| *v <= 100)
            .ok_or(MalformedReason::RiskOutOfRange { value })?,
    };

    Ok(ParsedEvent {
        room_id: room_id.to_string(),
        timestamp: event.timestamp,
        severity,
        risk_score,
        category: CategoryCode::new(top, sub),
        short_label: non_empty(event.short_label.as_deref()),
        dispatch: DispatchType::normalize(event.dispatch_type.as_deref()),
        level: AlertLevel::compute(severity, risk_score),
        phenomenon: non_empty(event.phenomenon.as_deref()),
        key_quote: non_empty(event.key_quote.as_deref()),
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parallel counters for gate outcomes.
#[derive(Debug, Default)]
pub struct GateStats {
    admitted: AtomicU64,
    routine: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`GateStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStatsSnapshot {
    pub admitted: u64,
    pub routine: u64,
    pub malformed: u64,
}

impl GateStats {
    pub fn record(&self, verdict: &GateVerdict) {
        let counter = match verdict {
            GateVerdict::Admitted { .. } => &self.admitted,
            GateVerdict::Routine { .. } => &self.routine,
            GateVerdict::Malformed(_) => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a record that never parsed into an event at all.
    pub fn record_unparsable(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GateStatsSnapshot {
        GateStatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            routine: self.routine.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}
