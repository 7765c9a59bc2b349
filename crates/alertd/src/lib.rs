//! alertd: polling daemon around the alerting core
//!
//! Tails a JSONL file of classified events on a fixed cadence, accepts
//! manually injected events on stdin, and hands emitted notifications to
//! log, JSONL and webhook sinks.

pub mod config;
pub mod error;
pub mod replay;
pub mod runner;
pub mod sink;
pub mod source;

pub use config::DaemonConfig;
pub use error::{DaemonError, DaemonResult};
pub use replay::{replay_lines, ReplayReport};
pub use runner::{Runner, TickReport};
pub use sink::{JsonlSink, LogSink, NotificationSink, WebhookSink};
pub use source::{EventSource, JsonlEventSource, SourceRecord};
