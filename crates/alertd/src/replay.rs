//! Offline replay of an event log.
//!
//! Each event is processed with the manual clock set to the event's own
//! timestamp, so a replay reproduces the decisions the live daemon would
//! have made for the same log.

use alerting::{AlertPipeline, ManualClock, PipelineOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::DaemonResult;
use crate::runner::TickReport;
use crate::sink::NotificationSink;
use crate::source::SourceRecord;

/// Counts for one replayed log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    #[serde(flatten)]
    pub counts: TickReport,
    /// Events whose timestamp is earlier than an event before them.
    pub out_of_order: usize,
}

/// Replay JSONL `text` through `pipeline`, driving `clock` from the events.
/// `name` prefixes record origins in log lines.
pub async fn replay_lines(
    pipeline: &AlertPipeline,
    clock: &ManualClock,
    name: &str,
    text: &str,
    sink: Option<&dyn NotificationSink>,
) -> DaemonResult<ReplayReport> {
    let mut report = ReplayReport::default();
    let mut latest: Option<DateTime<Utc>> = None;

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        report.counts.records += 1;
        let origin = format!("{}:{}", name, idx + 1);
        let event = match SourceRecord::from_json_line(line, origin.clone()) {
            SourceRecord::Event(event) => event,
            SourceRecord::Unparsable { origin, error } => {
                warn!(%origin, %error, "Skipping undecodable record");
                pipeline.record_unparsable();
                report.counts.unparsable += 1;
                continue;
            }
        };

        match latest {
            Some(previous) if event.timestamp < previous => {
                warn!(
                    %origin,
                    timestamp = %event.timestamp.to_rfc3339(),
                    previous = %previous.to_rfc3339(),
                    "Out-of-order event, replay clock moves backwards"
                );
                report.out_of_order += 1;
            }
            _ => latest = Some(event.timestamp),
        }

        clock.set(event.timestamp);
        match pipeline.process(&event)? {
            PipelineOutcome::Rejected(_) => report.counts.rejected += 1,
            PipelineOutcome::Suppressed { .. } => report.counts.suppressed += 1,
            PipelineOutcome::Notify(notification) => {
                report.counts.notified += 1;
                if let Some(sink) = sink {
                    sink.deliver(&notification).await?;
                }
            }
        }
    }

    if let Some(latest) = latest {
        clock.set(latest);
    }
    report.counts.pruned = pipeline.prune()?;
    Ok(report)
}
