//! In-memory ring buffer of recent log lines, tailed by the control plane's
//! `/api/v1/logs` endpoint (§6.4, §10) so the UI doesn't need direct
//! filesystem access to the rolling log files.

use shared::api::LogLine;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

pub struct LogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<LogLine>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    fn push(&self, line: LogLine) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Most recent `limit` lines, newest last, optionally filtered by the
    /// `task_id` field the task dispatch wrapper attaches to its spans.
    pub fn recent(&self, task_id: Option<&str>, limit: usize) -> Vec<LogLine> {
        let lines = self.lines.lock().unwrap();
        let filtered: Vec<LogLine> = match task_id {
            Some(id) => lines
                .iter()
                .filter(|l| l.message.contains(id) || l.target.contains(id))
                .cloned()
                .collect(),
            None => lines.iter().cloned().collect(),
        };
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].to_vec()
    }
}

/// A [`tracing_subscriber::Layer`] that mirrors each event into a
/// [`LogBuffer`] as a flattened [`LogLine`].
pub struct BufferLayer {
    buffer: std::sync::Arc<LogBuffer>,
}

impl BufferLayer {
    pub fn new(buffer: std::sync::Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

impl<S> Layer<S> for BufferLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let line = LogLine {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message,
        };
        self.buffer.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_enforced() {
        let buf = LogBuffer::new(2);
        buf.push(LogLine {
            timestamp: "t1".into(),
            level: "INFO".into(),
            target: "x".into(),
            message: "one".into(),
        });
        buf.push(LogLine {
            timestamp: "t2".into(),
            level: "INFO".into(),
            target: "x".into(),
            message: "two".into(),
        });
        buf.push(LogLine {
            timestamp: "t3".into(),
            level: "INFO".into(),
            target: "x".into(),
            message: "three".into(),
        });

        let recent = buf.recent(None, 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "two");
        assert_eq!(recent[1].message, "three");
    }

    #[test]
    fn test_filters_by_task_id() {
        let buf = LogBuffer::new(10);
        buf.push(LogLine {
            timestamp: "t1".into(),
            level: "INFO".into(),
            target: "x".into(),
            message: "task abc123 finished".into(),
        });
        buf.push(LogLine {
            timestamp: "t2".into(),
            level: "INFO".into(),
            target: "x".into(),
            message: "unrelated".into(),
        });

        let recent = buf.recent(Some("abc123"), 10);
        assert_eq!(recent.len(), 1);
    }
}
