use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    pub sequence_no: u64,
    pub timestamp: String,
    pub kind: RuntimeEventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RuntimeEventKind {
    Run(RunEvent),
    Node(NodeEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: String,
        targets: Vec<String>,
        node_count: usize,
    },
    SetupFailed {
        run_id: String,
        error_count: usize,
    },
    Completed {
        run_id: String,
    },
    Failed {
        run_id: String,
        error_count: usize,
    },
    Cancelled {
        run_id: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeEvent {
    SetupCompleted {
        run_id: String,
        target: String,
        node_id: String,
    },
    Started {
        run_id: String,
        target: String,
        node_id: String,
    },
    Completed {
        run_id: String,
        target: String,
        node_id: String,
        status: String,
        asset_count: usize,
        failure_count: usize,
    },
    CacheHit {
        run_id: String,
        target: String,
        node_id: String,
    },
    Failed {
        run_id: String,
        target: String,
        node_id: String,
        phase: String,
        message: String,
    },
    Blocked {
        run_id: String,
        target: String,
        node_id: String,
        upstream_node_id: String,
    },
}

pub trait RuntimeEventObserver: Send + Sync {
    fn on_event(&self, event: &RuntimeEvent);
}

impl<F> RuntimeEventObserver for F
where
    F: Fn(&RuntimeEvent) + Send + Sync,
{
    fn on_event(&self, event: &RuntimeEvent) {
        self(event);
    }
}

pub type SharedRuntimeEventObserver = Arc<dyn RuntimeEventObserver>;
pub type RuntimeEventSender = mpsc::UnboundedSender<RuntimeEvent>;
pub type RuntimeEventReceiver = mpsc::UnboundedReceiver<RuntimeEvent>;

#[derive(Clone, Default)]
pub struct RuntimeEventSink {
    observer: Option<SharedRuntimeEventObserver>,
    sender: Option<RuntimeEventSender>,
}

impl RuntimeEventSink {
    pub fn with_observer(observer: SharedRuntimeEventObserver) -> Self {
        Self {
            observer: Some(observer),
            sender: None,
        }
    }

    pub fn with_sender(sender: RuntimeEventSender) -> Self {
        Self {
            observer: None,
            sender: Some(sender),
        }
    }

    pub fn observer(mut self, observer: SharedRuntimeEventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn sender(mut self, sender: RuntimeEventSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.observer.is_some() || self.sender.is_some()
    }

    pub fn emit(&self, event: RuntimeEvent) {
        if let Some(observer) = self.observer.as_ref() {
            observer.on_event(&event);
        }
        if let Some(sender) = self.sender.as_ref() {
            let _ = sender.send(event);
        }
    }
}

pub fn runtime_event_channel() -> (RuntimeEventSender, RuntimeEventReceiver) {
    mpsc::unbounded_channel()
}

/// Stamps events with a run-wide sequence number. Clones share the counter,
/// so per-target tasks keep one ordering.
#[derive(Clone)]
pub(crate) struct EventEmitter {
    sink: RuntimeEventSink,
    sequence_no: Arc<AtomicU64>,
}

impl EventEmitter {
    pub(crate) fn new(sink: RuntimeEventSink) -> Self {
        Self {
            sink,
            sequence_no: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn run(&self, event: RunEvent) {
        self.emit(RuntimeEventKind::Run(event));
    }

    pub(crate) fn node(&self, event: NodeEvent) {
        self.emit(RuntimeEventKind::Node(event));
    }

    fn emit(&self, kind: RuntimeEventKind) {
        if !self.sink.is_enabled() {
            return;
        }
        let sequence_no = self.sequence_no.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.emit(RuntimeEvent {
            sequence_no,
            timestamp: timestamp_now(),
            kind,
        });
    }
}

fn timestamp_now() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "{}.{:03}Z",
        since_epoch.as_secs(),
        since_epoch.subsec_millis()
    )
}
