//! Classified Event: one analyzed conversation turn as handed over by the
//! upstream classifier, plus the typed vocabulary the gate parses it into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity tier assigned by the classifier, ordered by urgency (S4 highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    S0,
    S1,
    S2,
    S3,
    S4,
}

impl Severity {
    /// Parse a classifier severity code such as `"S2"`.
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "S0" => Some(Self::S0),
            "S1" => Some(Self::S1),
            "S2" => Some(Self::S2),
            "S3" => Some(Self::S3),
            "S4" => Some(Self::S4),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Self::S0 => "S0",
            Self::S1 => "S1",
            Self::S2 => "S2",
            Self::S3 => "S3",
            Self::S4 => "S4",
        };
        write!(f, "{}", code)
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown severity code: {s}"))
    }
}

/// Alert level derived from severity and risk score.
///
/// P0 is the most urgent. Window and cooldown configuration is keyed by
/// [`AlertLevel::tier`], where P3 shares the P2 tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    P0,
    P1,
    P2,
    P3,
}

/// Risk score at or above which an event is P0 regardless of severity.
pub const CRITICAL_RISK_SCORE: u8 = 90;

impl AlertLevel {
    /// Compute the alert level for a severity/risk pair.
    pub fn compute(severity: Severity, risk_score: u8) -> Self {
        if risk_score >= CRITICAL_RISK_SCORE {
            return Self::P0;
        }
        match severity {
            Severity::S4 => Self::P0,
            Severity::S3 => Self::P1,
            Severity::S2 => Self::P2,
            _ => Self::P3,
        }
    }

    /// Urgency rank, lower is more urgent.
    pub fn rank(self) -> u8 {
        match self {
            Self::P0 => 0,
            Self::P1 => 1,
            Self::P2 => 2,
            Self::P3 => 3,
        }
    }

    /// Whether `self` is strictly more urgent than `other`.
    pub fn outranks(self, other: AlertLevel) -> bool {
        self.rank() < other.rank()
    }

    /// The window/cooldown tier this level is configured under.
    pub fn tier(self) -> LevelTier {
        match self {
            Self::P0 => LevelTier::P0,
            Self::P1 => LevelTier::P1,
            Self::P2 | Self::P3 => LevelTier::P2,
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.rank())
    }
}

/// The three configuration tiers for windows and cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LevelTier {
    P0,
    P1,
    #[default]
    P2,
}

/// Two-level technical category code, e.g. `STREAMING/PUSH_FAIL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryCode {
    pub top: String,
    pub sub: String,
}

impl CategoryCode {
    pub fn new(top: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            top: top.into(),
            sub: sub.into(),
        }
    }
}

impl std::fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.top, self.sub)
    }
}

/// Business dispatch type. Unknown values normalise to [`DispatchType::Feedback`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DispatchType {
    Consultation,
    #[default]
    Feedback,
    FeatureRequest,
    Defect,
}

impl DispatchType {
    /// Normalise a classifier label. Accepts the snake_case names and the
    /// labels the upstream ticketing system uses.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("consultation") | Some("使用咨询") => Self::Consultation,
            Some("feature_request") | Some("产品需求") => Self::FeatureRequest,
            Some("defect") | Some("产品缺陷") => Self::Defect,
            _ => Self::Feedback,
        }
    }
}

impl std::fmt::Display for DispatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Consultation => write!(f, "consultation"),
            Self::Feedback => write!(f, "feedback"),
            Self::FeatureRequest => write!(f, "feature_request"),
            Self::Defect => write!(f, "defect"),
        }
    }
}

/// One classified conversation turn, as produced upstream.
///
/// Classification fields are optional on the wire: a missing required field
/// makes the event malformed, which the gate reports separately from a
/// routine rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default)]
    pub room_id: String,
    pub timestamp: DateTime<Utc>,
    /// 0–100; missing is treated as 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_l1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_l2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_label: Option<String>,
    #[serde(default)]
    pub unresolved: bool,
    #[serde(default)]
    pub is_bug: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phenomenon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_quote: Option<String>,
}

impl ClassifiedEvent {
    /// Minimal well-formed event; the remaining fields are set by the caller.
    pub fn new(
        room_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        severity: Severity,
        category: CategoryCode,
    ) -> Self {
        Self {
            event_id: None,
            room_id: room_id.into(),
            timestamp,
            risk_score: None,
            severity: Some(severity.to_string()),
            category_l1: Some(category.top),
            category_l2: Some(category.sub),
            short_label: None,
            unresolved: false,
            is_bug: false,
            dispatch_type: None,
            phenomenon: None,
            key_quote: None,
        }
    }
}

/// A well-formed event with its classification parsed.
///
/// Produced by the Hard Issue Gate; the store and engine only ever receive
/// these, so they never see a malformed event.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub room_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub risk_score: u8,
    pub category: CategoryCode,
    pub short_label: Option<String>,
    pub dispatch: DispatchType,
    pub level: AlertLevel,
    pub phenomenon: Option<String>,
    pub key_quote: Option<String>,
}

impl ParsedEvent {
    /// Compact copy for an alert group's recent-events ring.
    pub fn digest(&self) -> EventDigest {
        EventDigest {
            timestamp: self.timestamp,
            severity: self.severity,
            risk_score: self.risk_score,
            category: self.category.clone(),
            short_label: self.short_label.clone(),
            dispatch: self.dispatch,
            phenomenon: self.phenomenon.clone(),
            key_quote: self.key_quote.clone(),
        }
    }
}

/// Member event as retained in an alert group's ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDigest {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub risk_score: u8,
    pub category: CategoryCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_label: Option<String>,
    pub dispatch: DispatchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phenomenon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_quote: Option<String>,
}
