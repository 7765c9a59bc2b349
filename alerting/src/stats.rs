//! Daily issue aggregation for reporting.

use crate::event::{CategoryCode, DispatchType, ParsedEvent, Severity};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Row identity: one UTC day, room, category, dispatch type and severity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DailyKey {
    pub date: NaiveDate,
    pub room_id: String,
    pub category: CategoryCode,
    pub dispatch: DispatchType,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounts {
    /// Every well-formed event.
    pub total_count: u64,
    /// Events the gate admitted.
    pub hard_count: u64,
    /// Events that produced a notification.
    pub alert_count: u64,
    pub risk_sum: u64,
}

impl DailyCounts {
    pub fn average_risk(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.risk_sum as f64 / self.total_count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRow {
    #[serde(flatten)]
    pub key: DailyKey,
    #[serde(flatten)]
    pub counts: DailyCounts,
}

/// Per-day counters, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct DailyAggregation {
    rows: BTreeMap<DailyKey, DailyCounts>,
}

impl DailyAggregation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one well-formed event on the day of its own timestamp.
    pub fn record(&mut self, event: &ParsedEvent, hard: bool, alerted: bool) {
        let key = DailyKey {
            date: event.timestamp.date_naive(),
            room_id: event.room_id.clone(),
            category: event.category.clone(),
            dispatch: event.dispatch,
            severity: event.severity,
        };
        let counts = self.rows.entry(key).or_default();
        counts.total_count += 1;
        counts.risk_sum += u64::from(event.risk_score);
        if hard {
            counts.hard_count += 1;
        }
        if alerted {
            counts.alert_count += 1;
        }
    }

    pub fn rows(&self) -> Vec<DailyRow> {
        self.rows
            .iter()
            .map(|(key, counts)| DailyRow {
                key: key.clone(),
                counts: *counts,
            })
            .collect()
    }

    /// Totals for one day across all rooms and categories.
    pub fn day_totals(&self, date: NaiveDate) -> DailyCounts {
        self.rows
            .iter()
            .filter(|(key, _)| key.date == date)
            .fold(DailyCounts::default(), |mut acc, (_, c)| {
                acc.total_count += c.total_count;
                acc.hard_count += c.hard_count;
                acc.alert_count += c.alert_count;
                acc.risk_sum += c.risk_sum;
                acc
            })
    }

    /// Drop rows older than `date`. Returns how many were removed.
    pub fn prune_before(&mut self, date: NaiveDate) -> usize {
        let before = self.rows.len();
        self.rows.retain(|key, _| key.date >= date);
        before - self.rows.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AlertLevel;
    use chrono::{DateTime, Duration, Utc};

    fn event(at: DateTime<Utc>, severity: Severity, risk: u8) -> ParsedEvent {
        ParsedEvent {
            room_id: "R1".to_string(),
            timestamp: at,
            severity,
            risk_score: risk,
            category: CategoryCode::new("STREAMING", "PUSH_FAIL"),
            short_label: None,
            dispatch: DispatchType::Feedback,
            level: AlertLevel::compute(severity, risk),
            phenomenon: None,
            key_quote: None,
        }
    }

    #[test]
    fn test_counts_split_by_outcome() {
        let day = DateTime::<Utc>::default();
        let mut stats = DailyAggregation::new();
        stats.record(&event(day, Severity::S2, 40), true, true);
        stats.record(&event(day + Duration::hours(1), Severity::S2, 20), true, false);
        stats.record(&event(day, Severity::S0, 5), false, false);

        let rows = stats.rows();
        assert_eq!(rows.len(), 2);
        let s2 = rows.iter().find(|r| r.key.severity == Severity::S2).unwrap();
        assert_eq!(s2.counts.total_count, 2);
        assert_eq!(s2.counts.hard_count, 2);
        assert_eq!(s2.counts.alert_count, 1);
        assert_eq!(s2.counts.risk_sum, 60);
        assert_eq!(s2.counts.average_risk(), 30.0);

        let totals = stats.day_totals(day.date_naive());
        assert_eq!(totals.total_count, 3);
        assert_eq!(totals.hard_count, 2);
    }

    #[test]
    fn test_prune_before() {
        let day = DateTime::<Utc>::default();
        let mut stats = DailyAggregation::new();
        stats.record(&event(day, Severity::S2, 0), true, false);
        stats.record(&event(day + Duration::days(2), Severity::S2, 0), true, false);

        let cutoff = (day + Duration::days(1)).date_naive();
        assert_eq!(stats.prune_before(cutoff), 1);
        assert_eq!(stats.len(), 1);
    }
}
