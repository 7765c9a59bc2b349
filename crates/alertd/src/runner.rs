//! Polling runner.
//!
//! One pipeline instance serves two paths: the fixed-cadence poll of the
//! event source and events injected on demand through a channel. Both go
//! through `Runner::handle`, so they share the pipeline's serialization.
//!
//! ```text
//! interval tick ──► source.poll() ──┐
//!                                   ├──► pipeline.process ──► spawn sink deliveries
//! manual channel ───────────────────┘
//! ```
//!
//! A tick commits the source cursor only after the whole batch is processed
//! and the store snapshot is on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use alerting::{DailyRow, Notification, PipelineOutcome, SharedAlertPipeline};
use chrono::Days;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, DaemonResult};
use crate::sink::NotificationSink;
use crate::source::{EventSource, SourceRecord};

/// Counts for one batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub records: usize,
    pub unparsable: usize,
    pub rejected: usize,
    pub suppressed: usize,
    pub notified: usize,
    pub pruned: usize,
    /// Daily statistics rows dropped by retention.
    pub daily_pruned: usize,
    /// Daily statistics rows still held.
    pub daily_rows: usize,
}

impl TickReport {
    fn count(&mut self, outcome: &PipelineOutcome) {
        match outcome {
            PipelineOutcome::Rejected(_) => self.rejected += 1,
            PipelineOutcome::Suppressed { .. } => self.suppressed += 1,
            PipelineOutcome::Notify(_) => self.notified += 1,
        }
    }
}

/// Drives a pipeline from a source and a manual channel.
pub struct Runner {
    pipeline: SharedAlertPipeline,
    sinks: Vec<Arc<dyn NotificationSink>>,
    state_path: Option<PathBuf>,
    daily_path: Option<PathBuf>,
    daily_retention_days: Option<u64>,
    poll_interval: Duration,
}

impl Runner {
    pub fn new(pipeline: SharedAlertPipeline, poll_interval: Duration) -> Self {
        Self {
            pipeline,
            sinks: Vec::new(),
            state_path: None,
            daily_path: None,
            daily_retention_days: None,
            poll_interval,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Snapshot the store to `path` after every tick and on shutdown.
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Drop daily statistics older than `days` on every tick.
    pub fn with_daily_retention(mut self, days: u64) -> Self {
        self.daily_retention_days = Some(days);
        self
    }

    /// Rewrite the daily statistics rows to `path` on every tick.
    pub fn with_daily_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.daily_path = Some(path.into());
        self
    }

    pub fn pipeline(&self) -> &SharedAlertPipeline {
        &self.pipeline
    }

    /// Process one record and hand any notification to the sinks.
    pub fn handle(&self, record: SourceRecord) -> DaemonResult<Option<PipelineOutcome>> {
        let event = match record {
            SourceRecord::Event(event) => event,
            SourceRecord::Unparsable { origin, error } => {
                warn!(%origin, %error, "Skipping undecodable record");
                self.pipeline.record_unparsable();
                return Ok(None);
            }
        };

        let outcome = self.pipeline.process(&event)?;
        if let PipelineOutcome::Notify(notification) = &outcome {
            self.dispatch(notification);
        }
        Ok(Some(outcome))
    }

    /// Spawn one delivery task per sink. Failures are logged only.
    pub fn dispatch(&self, notification: &Notification) -> Vec<JoinHandle<()>> {
        self.sinks
            .iter()
            .map(|sink| {
                let sink = Arc::clone(sink);
                let notification = notification.clone();
                tokio::spawn(async move {
                    match sink.deliver(&notification).await {
                        Ok(()) => debug!(sink = sink.name(), key = %notification.key, "Delivered"),
                        Err(e) => warn!(
                            sink = sink.name(),
                            key = %notification.key,
                            "Notification delivery failed: {e}"
                        ),
                    }
                })
            })
            .collect()
    }

    /// Poll the source once, process what arrived, prune, snapshot, then
    /// commit the source cursor. An error leaves the batch uncommitted.
    pub async fn tick(&self, source: &mut dyn EventSource) -> DaemonResult<TickReport> {
        let records = source.poll().await?;
        let mut report = TickReport {
            records: records.len(),
            ..Default::default()
        };
        for record in records {
            match self.handle(record)? {
                Some(outcome) => report.count(&outcome),
                None => report.unparsable += 1,
            }
        }
        report.pruned = self.pipeline.prune()?;
        self.save_snapshot()?;
        source.commit().await?;

        report.daily_pruned = self.prune_daily()?;
        let rows = self.pipeline.daily_rows()?;
        report.daily_rows = rows.len();
        if let Some(path) = &self.daily_path {
            if let Err(e) = write_daily_rows(path, &rows).await {
                warn!(path = %path.display(), "Failed to write daily statistics: {e}");
            }
        }

        if report.records > 0 {
            info!(
                source = source.name(),
                records = report.records,
                notified = report.notified,
                suppressed = report.suppressed,
                rejected = report.rejected,
                unparsable = report.unparsable,
                daily_rows = report.daily_rows,
                "Poll complete"
            );
        }
        Ok(report)
    }

    fn save_snapshot(&self) -> DaemonResult<()> {
        if let Some(path) = &self.state_path {
            self.pipeline.save_snapshot(path)?;
        }
        Ok(())
    }

    fn prune_daily(&self) -> DaemonResult<usize> {
        let Some(days) = self.daily_retention_days else {
            return Ok(0);
        };
        let today = self.pipeline.clock().now().date_naive();
        match today.checked_sub_days(Days::new(days)) {
            Some(cutoff) => Ok(self.pipeline.prune_daily_before(cutoff)?),
            None => Ok(0),
        }
    }

    /// Run until `cancel` fires. Source errors are logged and retried on the
    /// next tick; store errors stop the runner.
    pub async fn run(
        &self,
        mut source: Box<dyn EventSource>,
        mut manual: mpsc::Receiver<SourceRecord>,
        cancel: CancellationToken,
    ) -> DaemonResult<()> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut manual_open = true;

        info!(
            source = source.name(),
            interval_secs = self.poll_interval.as_secs(),
            sinks = self.sinks.len(),
            "Runner started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick(source.as_mut()).await {
                        Ok(_) => {}
                        Err(DaemonError::Store(e)) => return Err(e.into()),
                        Err(e) => warn!("Poll failed, retrying next tick: {e}"),
                    }
                }
                record = manual.recv(), if manual_open => {
                    match record {
                        Some(record) => {
                            self.handle(record)?;
                        }
                        None => {
                            debug!("Manual injection channel closed");
                            manual_open = false;
                        }
                    }
                }
            }
        }

        self.save_snapshot()?;
        info!("Runner stopped");
        Ok(())
    }
}

/// Replace `path` with the rows as pretty JSON (temp file, then rename).
async fn write_daily_rows(path: &Path, rows: &[DailyRow]) -> DaemonResult<()> {
    let json = serde_json::to_vec_pretty(rows)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| DaemonError::output_io(tmp.clone(), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| DaemonError::output_io(path, e))?;
    Ok(())
}
