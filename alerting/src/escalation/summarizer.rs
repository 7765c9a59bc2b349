//! Aggregation Summarizer: builds a notification payload from a group's
//! recent-events ring.
//!
//! Pure function of group state. Only ring members contribute, so payload
//! size is bounded by the ring capacity and the evidence limit.

use super::state::AlertGroup;
use crate::config::SummaryConfig;
use crate::event::{AlertLevel, CategoryCode, DispatchType, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// Ticket priority derived from the peak risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    Urgent,
    VeryUrgent,
}

impl Priority {
    pub fn from_risk_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => Self::VeryUrgent,
            60..=79 => Self::Urgent,
            30..=59 => Self::Normal,
            _ => Self::Low,
        }
    }

    /// Label used by the downstream ticketing system.
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "较低",
            Self::Normal => "普通",
            Self::Urgent => "紧急",
            Self::VeryUrgent => "非常紧急",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::Urgent => write!(f, "urgent"),
            Self::VeryUrgent => write!(f, "very_urgent"),
        }
    }
}

/// Evidence and counters for one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatePayload {
    pub room_id: String,
    /// Most frequent category in the ring (ties go to the most recent).
    pub category: CategoryCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_label: Option<String>,
    pub dispatch: DispatchType,
    /// Most recent non-empty phenomenon in the ring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phenomenon: Option<String>,
    /// Most recent non-empty key quote in the ring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_quote: Option<String>,
    pub occurrence_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub peak_severity: Option<Severity>,
    pub peak_risk_score: u8,
    pub priority: Priority,
    pub level: Option<AlertLevel>,
    /// Notifications sent for this group in the current window, this one included.
    pub notifications: u32,
    /// Newest first, one line per ring member with usable text.
    pub evidence: Vec<String>,
}

/// The Aggregation Summarizer.
#[derive(Debug, Clone, Copy)]
pub struct AggregationSummarizer {
    config: SummaryConfig,
}

impl AggregationSummarizer {
    pub fn new(config: SummaryConfig) -> Self {
        Self { config }
    }

    pub fn summarize(&self, group: &AlertGroup) -> AggregatePayload {
        let category = dominant(group.recent().map(|d| &d.category))
            .cloned()
            .unwrap_or_else(|| group.key.category.clone());
        let short_label = dominant(group.recent().filter_map(|d| d.short_label.as_ref())).cloned();
        let dispatch = dominant(group.recent().map(|d| d.dispatch)).unwrap_or_default();

        let phenomenon = group.recent().rev().find_map(|d| d.phenomenon.clone());
        let key_quote = group.recent().rev().find_map(|d| d.key_quote.clone());

        let peak_severity = group.recent().map(|d| d.severity).max();
        let peak_risk_score = group.recent().map(|d| d.risk_score).max().unwrap_or(0);

        let evidence = group
            .recent()
            .rev()
            .filter_map(|d| d.phenomenon.as_deref().or(d.key_quote.as_deref()))
            .take(self.config.evidence_limit)
            .map(|text| format!("- {}", truncate_chars(text, self.config.max_chars)))
            .collect();

        AggregatePayload {
            room_id: group.key.room_id.clone(),
            category,
            short_label,
            dispatch,
            phenomenon,
            key_quote,
            occurrence_count: group.hit_count,
            first_seen: group.window_start,
            last_seen: group.last_event_at.unwrap_or(group.window_start),
            peak_severity,
            peak_risk_score,
            priority: Priority::from_risk_score(peak_risk_score),
            level: group.highest_level,
            notifications: group.notifications,
            evidence,
        }
    }
}

/// Most frequent item; among equals, the one seen last.
fn dominant<T: Eq + Hash>(items: impl Iterator<Item = T>) -> Option<T> {
    let mut tally: HashMap<T, (usize, usize)> = HashMap::new();
    for (position, item) in items.enumerate() {
        let entry = tally.entry(item).or_insert((0, position));
        entry.0 += 1;
        entry.1 = position;
    }
    tally
        .into_iter()
        .max_by_key(|(_, (count, last))| (*count, *last))
        .map(|(item, _)| item)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
