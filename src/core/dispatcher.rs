//! Message dispatcher: validates, tags and fans out one invocation's results.

use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;

use super::event_bus::UnitEvents;
use super::message::{Message, Outbound, OutputSet, MSGID_KEY};
use crate::error::{DeliveryError, ErrorCode, ValidationError};

/// Downstream send function of a unit.
pub trait OutputSink: Send + Sync {
    fn deliver(&self, outputs: OutputSet) -> Result<(), DeliveryError>;
}

impl OutputSink for UnitEvents {
    fn deliver(&self, outputs: OutputSet) -> Result<(), DeliveryError> {
        if self.output(outputs) {
            Ok(())
        } else {
            Err(DeliveryError::ChannelClosed)
        }
    }
}

impl<F> OutputSink for F
where
    F: Fn(OutputSet) -> Result<(), DeliveryError> + Send + Sync,
{
    fn deliver(&self, outputs: OutputSet) -> Result<(), DeliveryError> {
        self(outputs)
    }
}

/// How accepted messages reach the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// The whole output set in one synchronous call.
    #[default]
    Immediate,
    /// One deferred task per message, each with a single populated channel.
    Deferred,
}

/// Outcome of one `send_results` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Number of accepted (stamped and forwarded) messages.
    pub delivered: usize,
    pub rejected: Vec<ValidationError>,
}

/// Per-unit dispatcher.
pub struct MessageDispatcher {
    outputs: usize,
    mode: DeliveryMode,
    sink: Arc<dyn OutputSink>,
    reporter: UnitEvents,
    runtime: Option<Handle>,
}

impl MessageDispatcher {
    pub fn new(
        outputs: usize,
        mode: DeliveryMode,
        sink: Arc<dyn OutputSink>,
        reporter: UnitEvents,
    ) -> Self {
        Self {
            outputs,
            mode,
            sink,
            reporter,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Dispatch through the unit's own sink.
    pub fn send_results(
        &self,
        result: &mut Outbound,
        msgid: &Value,
        clone_first: bool,
    ) -> Result<DispatchReport, DeliveryError> {
        self.send_results_with(result, msgid, clone_first, self.sink.clone())
    }

    /// Dispatch through an explicit sink.
    ///
    /// Accepted records are stamped with `msgid` in place. With `clone_first`
    /// the first accepted record is stamped on a deep copy instead, so the
    /// caller's value is left untouched.
    pub fn send_results_with(
        &self,
        result: &mut Outbound,
        msgid: &Value,
        clone_first: bool,
        sink: Arc<dyn OutputSink>,
    ) -> Result<DispatchReport, DeliveryError> {
        let mut report = DispatchReport::default();
        if result.is_null() {
            return Ok(report);
        }

        let mut outputs = OutputSet::with_channels(self.outputs);
        let mut first = true;

        let slots: Vec<&mut Outbound> = match result {
            Outbound::List(items) => items.iter_mut().collect(),
            other => vec![other],
        };

        for (channel, slot) in slots.into_iter().enumerate() {
            if channel >= self.outputs {
                if !slot.is_null() {
                    tracing::debug!(
                        unit_id = %self.reporter.unit_id(),
                        channel,
                        "dropping result for undeclared output"
                    );
                }
                continue;
            }

            let candidates: Vec<&mut Outbound> = match slot {
                Outbound::Null => continue,
                Outbound::List(items) => items.iter_mut().collect(),
                other => vec![other],
            };

            for candidate in candidates {
                match candidate {
                    Outbound::Record(map) => {
                        let message = if first && clone_first {
                            let mut copy = Message::from_map(map.clone());
                            copy.set_msgid(msgid.clone());
                            copy
                        } else {
                            map.insert(MSGID_KEY.to_string(), msgid.clone());
                            Message::from_map(map.clone())
                        };
                        first = false;
                        outputs.push(channel, message);
                    }
                    Outbound::Null => {
                        report.rejected.push(ValidationError::Missing { output: channel })
                    }
                    other => report.rejected.push(ValidationError::NotARecord {
                        output: channel,
                        kind: other.type_name(),
                    }),
                }
            }
        }

        for rejection in &report.rejected {
            self.reporter
                .error(ErrorCode::ValidationError, &rejection.to_string(), None);
        }

        report.delivered = outputs.message_count();
        if report.delivered == 0 {
            return Ok(report);
        }

        match self.mode {
            DeliveryMode::Immediate => sink.deliver(outputs)?,
            DeliveryMode::Deferred => self.defer(outputs, sink),
        }
        Ok(report)
    }

    fn defer(&self, outputs: OutputSet, sink: Arc<dyn OutputSink>) {
        let channels = outputs.channels();
        for (channel, slot) in outputs.into_inner().into_iter().enumerate() {
            for message in slot {
                let single = OutputSet::single(channels, channel, message);
                let sink = sink.clone();
                let reporter = self.reporter.clone();
                match &self.runtime {
                    Some(handle) => {
                        handle.spawn(async move {
                            tokio::task::yield_now().await;
                            deliver_one(sink.as_ref(), &reporter, single);
                        });
                    }
                    None => deliver_one(sink.as_ref(), &reporter, single),
                }
            }
        }
    }
}

fn deliver_one(sink: &dyn OutputSink, reporter: &UnitEvents, outputs: OutputSet) {
    if let Err(e) = sink.deliver(outputs) {
        reporter.error(ErrorCode::DeliveryError, &e.to_string(), None);
    }
}
