use std::time::{SystemTime, UNIX_EPOCH};

use crate::ids::{ActorId, ObjectId};
use crate::message::MessageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    Local,
    Remote,
}

impl ReplayMode {
    fn as_str(self) -> &'static str {
        match self {
            ReplayMode::Local => "local",
            ReplayMode::Remote => "remote",
        }
    }
}

/// Lifecycle events of one plan, in the order they happened.
#[derive(Debug, Clone)]
pub struct PlanTrace {
    pub plan_id: ObjectId,
    pub name: String,
    pub events: Vec<TraceEvent>,
    replay_started_ms: Option<u128>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Built {
        ts_ms: u128,
        messages: usize,
        arguments: usize,
        results: usize,
    },
    ForcedExecution {
        ts_ms: u128,
        query: MessageKind,
        pending: usize,
    },
    Relocated {
        ts_ms: u128,
        location: ActorId,
    },
    Recalled {
        ts_ms: u128,
    },
    ReplayStarted {
        ts_ms: u128,
        mode: ReplayMode,
        target: ActorId,
        messages: usize,
    },
    MessageDelivered {
        ts_ms: u128,
        index: usize,
        kind: MessageKind,
    },
    ReplayFinished {
        ts_ms: u128,
        success: bool,
        elapsed_ms: u128,
    },
}

impl TraceEvent {
    pub fn summarize(&self) -> String {
        match self {
            TraceEvent::Built {
                ts_ms,
                messages,
                arguments,
                results,
            } => format!(
                "{ts_ms} Built messages={messages} arguments={arguments} results={results}"
            ),
            TraceEvent::ForcedExecution {
                ts_ms,
                query,
                pending,
            } => format!("{ts_ms} ForcedExecution query={query} pending={pending}"),
            TraceEvent::Relocated { ts_ms, location } => {
                format!("{ts_ms} Relocated location={location}")
            }
            TraceEvent::Recalled { ts_ms } => format!("{ts_ms} Recalled"),
            TraceEvent::ReplayStarted {
                ts_ms,
                mode,
                target,
                messages,
            } => format!(
                "{ts_ms} ReplayStarted mode={} target={target} messages={messages}",
                mode.as_str()
            ),
            TraceEvent::MessageDelivered { ts_ms, index, kind } => {
                format!("{ts_ms} MessageDelivered index={index} kind={kind}")
            }
            TraceEvent::ReplayFinished {
                ts_ms,
                success,
                elapsed_ms,
            } => format!(
                "{ts_ms} ReplayFinished success={success} elapsed_ms={elapsed_ms} elapsed={}",
                format_elapsed_ms(*elapsed_ms)
            ),
        }
    }
}

impl PlanTrace {
    pub fn new(plan_id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            plan_id,
            name: name.into(),
            events: Vec::new(),
            replay_started_ms: None,
        }
    }

    fn now_ms() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    pub fn built(&mut self, messages: usize, arguments: usize, results: usize) {
        self.events.push(TraceEvent::Built {
            ts_ms: Self::now_ms(),
            messages,
            arguments,
            results,
        });
    }

    pub fn forced_execution(&mut self, query: MessageKind, pending: usize) {
        self.events.push(TraceEvent::ForcedExecution {
            ts_ms: Self::now_ms(),
            query,
            pending,
        });
    }

    pub fn relocated(&mut self, location: &ActorId) {
        self.events.push(TraceEvent::Relocated {
            ts_ms: Self::now_ms(),
            location: location.clone(),
        });
    }

    pub fn recalled(&mut self) {
        self.events.push(TraceEvent::Recalled {
            ts_ms: Self::now_ms(),
        });
    }

    pub fn replay_started(&mut self, mode: ReplayMode, target: &ActorId, messages: usize) {
        let ts_ms = Self::now_ms();
        self.replay_started_ms = Some(ts_ms);
        self.events.push(TraceEvent::ReplayStarted {
            ts_ms,
            mode,
            target: target.clone(),
            messages,
        });
    }

    pub fn message_delivered(&mut self, index: usize, kind: MessageKind) {
        self.events.push(TraceEvent::MessageDelivered {
            ts_ms: Self::now_ms(),
            index,
            kind,
        });
    }

    pub fn replay_finished(&mut self, success: bool) {
        let ts_ms = Self::now_ms();
        let elapsed_ms = self
            .replay_started_ms
            .take()
            .map(|started| ts_ms.saturating_sub(started))
            .unwrap_or(0);
        self.events.push(TraceEvent::ReplayFinished {
            ts_ms,
            success,
            elapsed_ms,
        });
    }
}

/// Print a human-readable trace to stdout (stable + diff-friendly).
pub fn print_trace(tr: &PlanTrace) {
    println!("TRACE plan_id={} name={}", tr.plan_id, tr.name);
    for ev in &tr.events {
        println!("{}", ev.summarize());
    }
}

fn format_elapsed_ms(elapsed_ms: u128) -> String {
    let secs = elapsed_ms as f64 / 1000.0;
    format!("{secs:.2}s")
}
