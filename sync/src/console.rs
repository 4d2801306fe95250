//! Per-run append-only console and the registry of consoles visible to the UI

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::events::{EventReporter, RunEvent};
use crate::run::RunId;

/// Classification of a console line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineKind {
    Info,
    Copied,
    UpToDate,
    Failed,
    Warning,
    Summary,
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineKind::Info => write!(f, "INFO"),
            LineKind::Copied => write!(f, "COPY"),
            LineKind::UpToDate => write!(f, "SKIP"),
            LineKind::Failed => write!(f, "FAIL"),
            LineKind::Warning => write!(f, "WARN"),
            LineKind::Summary => write!(f, "DONE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub timestamp: DateTime<Utc>,
    pub kind: LineKind,
    pub text: String,
}

impl fmt::Display for ConsoleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.format("%H:%M:%S"),
            self.kind,
            self.text
        )
    }
}

/// Ordered log bound to exactly one run.
///
/// The owning run is the single writer; any number of readers may take
/// [`ConsoleSink::lines`] concurrently. Removal only hides the sink from the
/// UI: a run still holding it keeps appending until it terminates.
#[derive(Debug)]
pub struct ConsoleSink {
    run_id: RunId,
    lines: RwLock<Vec<ConsoleLine>>,
    removed: AtomicBool,
    events: EventReporter,
}

impl ConsoleSink {
    pub fn new(run_id: RunId, events: EventReporter) -> Self {
        Self {
            run_id,
            lines: RwLock::new(Vec::new()),
            removed: AtomicBool::new(false),
            events,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn append(&self, kind: LineKind, text: impl Into<String>) {
        let line = ConsoleLine {
            timestamp: Utc::now(),
            kind,
            text: text.into(),
        };
        self.lines.write().push(line.clone());
        self.events.send(RunEvent::Line {
            run_id: self.run_id,
            line,
        });
    }

    pub fn lines(&self) -> Vec<ConsoleLine> {
        self.lines.read().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.read().is_empty()
    }

    /// Truncate; the run keeps appending afterwards
    pub fn clear(&self) {
        self.lines.write().clear();
        self.events.send(RunEvent::ConsoleCleared { run_id: self.run_id });
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }
}

/// Consoles currently visible to the UI, in creation order
#[derive(Debug, Default)]
pub struct ConsoleRegistry {
    sinks: RwLock<IndexMap<RunId, Arc<ConsoleSink>>>,
}

impl ConsoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sink: Arc<ConsoleSink>) {
        self.sinks.write().insert(sink.run_id(), sink);
    }

    pub fn get(&self, run_id: RunId) -> Option<Arc<ConsoleSink>> {
        self.sinks.read().get(&run_id).cloned()
    }

    /// Detach a console from the visible set
    pub fn remove(&self, run_id: RunId) -> Option<Arc<ConsoleSink>> {
        let sink = self.sinks.write().shift_remove(&run_id)?;
        sink.mark_removed();
        Some(sink)
    }

    pub fn visible(&self) -> Vec<Arc<ConsoleSink>> {
        self.sinks.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventChannel;

    #[test]
    fn test_append_preserves_order_and_publishes() {
        let (reporter, mut channel) = EventChannel::new();
        let run_id = RunId::new();
        let sink = ConsoleSink::new(run_id, reporter);

        sink.append(LineKind::Info, "first");
        sink.append(LineKind::Copied, "second");

        let texts: Vec<_> = sink.lines().into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["first", "second"]);

        match channel.try_recv() {
            Some(RunEvent::Line { run_id: id, line }) => {
                assert_eq!(id, run_id);
                assert_eq!(line.text, "first");
            }
            other => panic!("Expected Line event, got {:?}", other),
        }
    }

    #[test]
    fn test_clear_then_continue_appending() {
        let sink = ConsoleSink::new(RunId::new(), EventReporter::detached());
        sink.append(LineKind::Info, "old");
        sink.clear();
        assert!(sink.is_empty());

        sink.append(LineKind::Info, "new");
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.lines()[0].text, "new");
    }

    #[test]
    fn test_clear_publishes_event() {
        let (reporter, mut channel) = EventChannel::new();
        let run_id = RunId::new();
        let sink = ConsoleSink::new(run_id, reporter);
        sink.append(LineKind::Info, "old");
        sink.clear();

        assert!(matches!(channel.try_recv(), Some(RunEvent::Line { .. })));
        assert!(matches!(
            channel.try_recv(),
            Some(RunEvent::ConsoleCleared { run_id: id }) if id == run_id
        ));
    }

    #[test]
    fn test_removed_sink_still_accepts_lines() {
        let registry = ConsoleRegistry::new();
        let sink = Arc::new(ConsoleSink::new(RunId::new(), EventReporter::detached()));
        registry.insert(sink.clone());

        let removed = registry.remove(sink.run_id()).unwrap();
        assert!(removed.is_removed());
        assert!(registry.is_empty());

        sink.append(LineKind::Info, "orphaned");
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_registry_keeps_creation_order() {
        let registry = ConsoleRegistry::new();
        let ids: Vec<_> = (0..3).map(|_| RunId::new()).collect();
        for id in &ids {
            registry.insert(Arc::new(ConsoleSink::new(*id, EventReporter::detached())));
        }
        registry.remove(ids[1]);

        let visible: Vec<_> = registry.visible().iter().map(|s| s.run_id()).collect();
        assert_eq!(visible, vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_line_display() {
        let line = ConsoleLine {
            timestamp: Utc::now(),
            kind: LineKind::Failed,
            text: "a.class: disk full".to_string(),
        };
        assert!(line.to_string().ends_with("FAIL a.class: disk full"));
    }
}
