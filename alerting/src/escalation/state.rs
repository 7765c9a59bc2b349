//! Alert Group: per-key dedup state tracked across one window

use crate::clock::window_expired;
use crate::config::TierDurations;
use crate::event::{AlertLevel, CategoryCode, EventDigest, LevelTier, ParsedEvent, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Identity of an alert group: which events count as duplicates of each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub room_id: String,
    pub category: CategoryCode,
    /// Present only when the policy keys groups by severity as well.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl GroupKey {
    /// Derive the key for an event. Pure: same room and category fields
    /// always yield the same key.
    pub fn derive(event: &ParsedEvent, include_severity: bool) -> Self {
        Self {
            room_id: event.room_id.clone(),
            category: event.category.clone(),
            severity: include_severity.then_some(event.severity),
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.room_id, self.category.top, self.category.sub
        )?;
        if let Some(severity) = self.severity {
            write!(f, ":{}", severity)?;
        }
        Ok(())
    }
}

/// Escalation phase of a group within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPhase {
    /// Hits are accumulating; no threshold notification yet.
    #[default]
    Collecting,
    /// The window's single threshold notification has been sent.
    Escalated,
}

impl std::fmt::Display for GroupPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collecting => write!(f, "collecting"),
            Self::Escalated => write!(f, "escalated"),
        }
    }
}

/// Dedup state for one group key within one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertGroup {
    pub key: GroupKey,
    /// Admitted events folded into this window.
    pub hit_count: u32,
    pub window_start: DateTime<Utc>,
    /// Tier whose window length this group lives under, fixed at creation.
    #[serde(default)]
    pub window_tier: LevelTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    /// `None` until the group first notifies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Most urgent level seen this window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highest_level: Option<AlertLevel>,
    #[serde(default)]
    pub phase: GroupPhase,
    /// Notifications (threshold and bypass) sent this window.
    #[serde(default)]
    pub notifications: u32,
    recent: VecDeque<EventDigest>,
    capacity: usize,
}

impl AlertGroup {
    /// Fresh group with no hits, its window opening at `now`.
    pub fn new(key: GroupKey, now: DateTime<Utc>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            key,
            hit_count: 0,
            window_start: now,
            window_tier: LevelTier::default(),
            last_event_at: None,
            last_notified_at: None,
            highest_level: None,
            phase: GroupPhase::Collecting,
            notifications: 0,
            recent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Set the tier whose window this group lives under.
    pub fn with_window_tier(mut self, tier: LevelTier) -> Self {
        self.window_tier = tier;
        self
    }

    /// Fold one admitted event into the group.
    pub fn record_hit(&mut self, event: &ParsedEvent, now: DateTime<Utc>) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.last_event_at = Some(now);
        self.highest_level = Some(match self.highest_level {
            Some(current) if !event.level.outranks(current) => current,
            _ => event.level,
        });
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(event.digest());
    }

    /// Whether this group's own window has elapsed at `now`.
    pub fn window_elapsed(&self, now: DateTime<Utc>, windows: &TierDurations) -> bool {
        window_expired(now, self.window_start, windows.get(self.window_tier))
    }

    /// Record that a notification went out at `now`.
    pub fn mark_notified(&mut self, now: DateTime<Utc>) {
        self.last_notified_at = Some(now);
        self.notifications = self.notifications.saturating_add(1);
    }

    /// Recent member events, oldest first.
    pub fn recent(&self) -> impl DoubleEndedIterator<Item = &EventDigest> + ExactSizeIterator {
        self.recent.iter()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrink or grow the ring bound, dropping the oldest members if needed.
    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.recent.len() > self.capacity {
            self.recent.pop_front();
        }
    }

    /// Compact one-line summary for logging
    pub fn summary(&self) -> String {
        format!(
            "key={} hits={} phase={} notified={} since={}",
            self.key,
            self.hit_count,
            self.phase,
            self.notifications,
            self.window_start.to_rfc3339(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DispatchType;
    use chrono::Duration;

    fn parsed(label: &str, severity: Severity, at: DateTime<Utc>) -> ParsedEvent {
        ParsedEvent {
            room_id: "R1".to_string(),
            timestamp: at,
            severity,
            risk_score: 10,
            category: CategoryCode::new("STREAMING", "PUSH_FAIL"),
            short_label: Some(label.to_string()),
            dispatch: DispatchType::Feedback,
            level: AlertLevel::compute(severity, 10),
            phenomenon: None,
            key_quote: None,
        }
    }

    #[test]
    fn test_key_derivation() {
        let now = Utc::now();
        let a = parsed("a", Severity::S2, now);
        let b = parsed("b", Severity::S3, now);
        assert_eq!(GroupKey::derive(&a, false), GroupKey::derive(&b, false));
        assert_ne!(GroupKey::derive(&a, true), GroupKey::derive(&b, true));
        assert_eq!(GroupKey::derive(&a, false).to_string(), "R1:STREAMING:PUSH_FAIL");
        assert_eq!(GroupKey::derive(&b, true).to_string(), "R1:STREAMING:PUSH_FAIL:S3");
    }

    #[test]
    fn test_ring_is_fifo_bounded() {
        let start = Utc::now();
        let key = GroupKey::derive(&parsed("x", Severity::S2, start), false);
        let mut group = AlertGroup::new(key, start, 3);
        for i in 0..7 {
            let at = start + Duration::seconds(i);
            group.record_hit(&parsed(&format!("e{i}"), Severity::S2, at), at);
        }
        assert_eq!(group.hit_count, 7);
        let labels: Vec<_> = group
            .recent()
            .map(|d| d.short_label.clone().unwrap())
            .collect();
        assert_eq!(labels, vec!["e4", "e5", "e6"]);
    }

    #[test]
    fn test_highest_level_only_rises() {
        let now = Utc::now();
        let key = GroupKey::derive(&parsed("x", Severity::S2, now), false);
        let mut group = AlertGroup::new(key, now, 5);
        group.record_hit(&parsed("a", Severity::S3, now), now);
        group.record_hit(&parsed("b", Severity::S2, now), now);
        assert_eq!(group.highest_level, Some(AlertLevel::P1));
        group.record_hit(&parsed("c", Severity::S4, now), now);
        assert_eq!(group.highest_level, Some(AlertLevel::P0));
    }

    #[test]
    fn test_set_capacity_keeps_newest() {
        let now = Utc::now();
        let key = GroupKey::derive(&parsed("x", Severity::S2, now), false);
        let mut group = AlertGroup::new(key, now, 4);
        for label in ["a", "b", "c", "d"] {
            group.record_hit(&parsed(label, Severity::S2, now), now);
        }
        group.set_capacity(2);
        let labels: Vec<_> = group
            .recent()
            .filter_map(|d| d.short_label.as_deref())
            .collect();
        assert_eq!(labels, vec!["c", "d"]);
    }
}
