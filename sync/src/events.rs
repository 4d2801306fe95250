//! Run events pushed to a single console-rendering consumer

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::console::ConsoleLine;
use crate::run::{RunId, RunStatus, RunSummary, Trigger};

/// Event types emitted by synchronization runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    /// Tasks were resolved and the run is about to copy
    RunStarted {
        run_id: RunId,
        trigger: Trigger,
        total_tasks: usize,
    },
    /// A line was appended to the run's console
    Line { run_id: RunId, line: ConsoleLine },
    /// The run changed state
    StatusChanged { run_id: RunId, status: RunStatus },
    /// The run reached a terminal state
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        summary: RunSummary,
    },
    /// Every line of the run's console was discarded
    ConsoleCleared { run_id: RunId },
    /// The run's console left the visible set
    ConsoleRemoved { run_id: RunId },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::Line { run_id, .. }
            | RunEvent::StatusChanged { run_id, .. }
            | RunEvent::RunFinished { run_id, .. }
            | RunEvent::ConsoleCleared { run_id }
            | RunEvent::ConsoleRemoved { run_id } => *run_id,
        }
    }
}

/// Receiving half handed to the console UI
pub struct EventChannel {
    receiver: mpsc::UnboundedReceiver<RunEvent>,
}

impl EventChannel {
    /// Create a new event channel
    pub fn new() -> (EventReporter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (EventReporter { sender }, Self { receiver })
    }

    /// Receive the next event
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.receiver.recv().await
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.receiver.try_recv().ok()
    }

    /// Close the channel; runs keep working without a consumer
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Sending half shared by every run of an engine
#[derive(Debug, Clone)]
pub struct EventReporter {
    sender: mpsc::UnboundedSender<RunEvent>,
}

impl EventReporter {
    /// A reporter whose events go nowhere
    pub fn detached() -> Self {
        EventChannel::new().0
    }

    pub fn send(&self, event: RunEvent) {
        if self.sender.send(event).is_err() {
            trace!("Event consumer gone, dropping run event");
        }
    }
}
