use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::message::{Message, OutputSet};
use crate::error::{ErrorCode, ErrorContext};

/// Log levels available to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Visible status of a unit, as drawn by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl NodeStatus {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            fill: None,
            shape: None,
            text: Some(text.into()),
        }
    }

    /// The yellow dot used for profiling and timing displays.
    pub fn yellow_dot(text: impl Into<String>) -> Self {
        Self {
            fill: Some("yellow".to_string()),
            shape: Some("dot".to_string()),
            text: Some(text.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fill.is_none() && self.shape.is_none() && self.text.is_none()
    }
}

/// Unit event, delivered to the host over the event bus.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UnitEvent {
    /// Messages leaving the unit, one list per output channel
    Output {
        unit_id: String,
        outputs: OutputSet,
    },

    /// A log line written by the script
    Log {
        unit_id: String,
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Visible status changed; `None` clears it
    Status {
        unit_id: String,
        status: Option<NodeStatus>,
    },

    /// A diagnostic on the unit's error channel
    Error {
        unit_id: String,
        error: ErrorContext,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
        timestamp: DateTime<Utc>,
    },

    /// Processing of one inbound message finished
    Completed {
        unit_id: String,
        msgid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A named measurement for one inbound message
    Metric {
        unit_id: String,
        name: String,
        msgid: String,
        value: f64,
    },
}

impl UnitEvent {
    pub fn unit_id(&self) -> &str {
        match self {
            UnitEvent::Output { unit_id, .. }
            | UnitEvent::Log { unit_id, .. }
            | UnitEvent::Status { unit_id, .. }
            | UnitEvent::Error { unit_id, .. }
            | UnitEvent::Completed { unit_id, .. }
            | UnitEvent::Metric { unit_id, .. } => unit_id,
        }
    }
}

/// Event sender
pub type EventSender = mpsc::UnboundedSender<UnitEvent>;

/// Event receiver
pub type EventReceiver = mpsc::UnboundedReceiver<UnitEvent>;

/// Create an event channel
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A unit's reporting handle: every unit → host interaction goes through it.
///
/// Cheap to clone; all clones share the "status was set" flag.
#[derive(Clone, Debug)]
pub struct UnitEvents {
    unit_id: Arc<str>,
    tx: EventSender,
    status_set: Arc<AtomicBool>,
}

impl UnitEvents {
    pub fn new(unit_id: impl Into<Arc<str>>, tx: EventSender) -> Self {
        Self {
            unit_id: unit_id.into(),
            tx,
            status_set: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn emit(&self, event: UnitEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Emit a structured log line tagged with the unit id and forward it to the host.
    pub fn log(&self, level: LogLevel, message: &str) {
        let unit_id = &*self.unit_id;
        match level {
            LogLevel::Trace => tracing::trace!(unit_id = %unit_id, message = %message),
            LogLevel::Debug => tracing::debug!(unit_id = %unit_id, message = %message),
            LogLevel::Info => tracing::info!(unit_id = %unit_id, message = %message),
            LogLevel::Warn => tracing::warn!(unit_id = %unit_id, message = %message),
            LogLevel::Error => tracing::error!(unit_id = %unit_id, message = %message),
        }
        self.emit(UnitEvent::Log {
            unit_id: self.unit_id.to_string(),
            level,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Report a diagnostic on the unit's error channel.
    pub fn error(&self, code: ErrorCode, diagnostic: &str, message: Option<&Message>) {
        tracing::error!(unit_id = %self.unit_id, code = ?code, "{}", diagnostic);
        self.emit(UnitEvent::Error {
            unit_id: self.unit_id.to_string(),
            error: ErrorContext::new(code, diagnostic),
            message: message.cloned(),
            timestamp: Utc::now(),
        });
    }

    /// Update the visible status; `None` clears it.
    pub fn status(&self, status: Option<NodeStatus>) {
        if status.is_some() {
            self.status_set.store(true, Ordering::SeqCst);
        }
        self.emit(UnitEvent::Status {
            unit_id: self.unit_id.to_string(),
            status,
        });
    }

    pub fn status_was_set(&self) -> bool {
        self.status_set.load(Ordering::SeqCst)
    }

    /// Clear the visible status if anything ever set it.
    pub fn clear_status_if_set(&self) -> bool {
        if self.status_set.swap(false, Ordering::SeqCst) {
            self.emit(UnitEvent::Status {
                unit_id: self.unit_id.to_string(),
                status: None,
            });
            true
        } else {
            false
        }
    }

    pub fn completed(&self, msgid: &str, error: Option<String>) {
        self.emit(UnitEvent::Completed {
            unit_id: self.unit_id.to_string(),
            msgid: msgid.to_string(),
            error,
            timestamp: Utc::now(),
        });
    }

    pub fn metric(&self, name: &str, msgid: &str, value: f64) {
        tracing::debug!(unit_id = %self.unit_id, msgid = %msgid, metric = name, value);
        self.emit(UnitEvent::Metric {
            unit_id: self.unit_id.to_string(),
            name: name.to_string(),
            msgid: msgid.to_string(),
            value,
        });
    }

    /// Forward an output set; fails only when the host dropped its receiver.
    pub fn output(&self, outputs: OutputSet) -> bool {
        self.emit(UnitEvent::Output {
            unit_id: self.unit_id.to_string(),
            outputs,
        })
    }
}
