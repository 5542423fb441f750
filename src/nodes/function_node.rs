//! The function unit: a host handle plus the dedicated thread that owns the
//! unit's script engine.
//!
//! The engine context is not `Send`, so it never leaves the thread that
//! created it. [`FunctionNode`] talks to that thread over an unbounded command
//! channel, and timer wake-ups arrive on the same channel, which keeps input,
//! timer callbacks and teardown strictly serialized.

use std::sync::Arc;

use boa_engine::Context;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::execution::{CloseReport, ExecutionHandler, UnitSetup, UnitSnapshot};
use crate::config::FunctionRuntimeConfig;
use crate::core::context_store::ContextStore;
use crate::core::dispatcher::OutputSink;
use crate::core::event_bus::{EventSender, UnitEvents};
use crate::core::message::Message;
use crate::dsl::schema::{FlowInfo, UnitDefinition};
use crate::error::{CompileError, ErrorCode, UnitError, UnitResult};
use crate::sandbox::capability::{UnitInfo, Waker};
use crate::sandbox::timers::TimerId;

/// Work item for a unit's runtime thread.
pub enum UnitCommand {
    Input {
        message: Message,
        ack: Option<oneshot::Sender<()>>,
    },
    TimerFired(TimerId),
    Inspect(oneshot::Sender<UnitSnapshot>),
    Close(Option<oneshot::Sender<CloseReport>>),
}

/// Host-side services a unit is deployed with.
#[derive(Clone)]
pub struct UnitServices {
    pub events: EventSender,
    pub store: Arc<dyn ContextStore>,
    pub flow: FlowInfo,
    pub config: FunctionRuntimeConfig,
    /// Downstream send function; `None` forwards outputs as `Output` events.
    pub sink: Option<Arc<dyn OutputSink>>,
}

enum UnitState {
    Running(mpsc::UnboundedSender<UnitCommand>),
    Inert(CompileError),
    Closed,
}

pub struct FunctionNode {
    id: String,
    state: UnitState,
    async_receive: bool,
}

impl FunctionNode {
    /// Start the unit's runtime thread and compile its source there.
    ///
    /// A compile error is reported once on the event channel and leaves the
    /// unit inert; it is not an `Err` of this call.
    pub async fn deploy(definition: &UnitDefinition, services: UnitServices) -> UnitResult<Self> {
        let UnitServices {
            events,
            store,
            flow,
            config,
            sink,
        } = services;

        let events = UnitEvents::new(definition.id.clone(), events);
        let sink = sink.unwrap_or_else(|| Arc::new(events.clone()) as Arc<dyn OutputSink>);
        let (tx, rx) = mpsc::unbounded_channel();

        let timer_tx = tx.downgrade();
        let waker: Waker = Arc::new(move |id| {
            if let Some(tx) = timer_tx.upgrade() {
                let _ = tx.send(UnitCommand::TimerFired(id));
            }
        });

        let async_receive = config.async_receive;
        let setup = UnitSetup {
            info: UnitInfo {
                id: definition.id.clone(),
                name: definition.display_name().to_string(),
                node_type: definition.node_type.clone(),
                flow_id: flow.id,
                flow_name: flow.name,
            },
            source: definition.func.clone(),
            outputs: definition.outputs,
            events: events.clone(),
            sink,
            store,
            env: flow.env,
            config,
            waker,
            runtime: Handle::current(),
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || run_unit(setup, rx, ready_tx));

        let state = match ready_rx.await {
            Ok(Ok(())) => {
                tracing::info!(unit_id = %definition.id, outputs = definition.outputs, "unit deployed");
                UnitState::Running(tx)
            }
            Ok(Err(err)) => {
                events.error(ErrorCode::CompileError, &err.to_string(), None);
                UnitState::Inert(err)
            }
            Err(_) => {
                return Err(UnitError::Setup(format!(
                    "runtime thread of unit {} exited during start-up",
                    definition.id
                )))
            }
        };

        Ok(Self {
            id: definition.id.clone(),
            state,
            async_receive,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_inert(&self) -> bool {
        matches!(self.state, UnitState::Inert(_))
    }

    pub fn compile_error(&self) -> Option<&CompileError> {
        match &self.state {
            UnitState::Inert(err) => Some(err),
            _ => None,
        }
    }

    fn sender(&self) -> UnitResult<&mpsc::UnboundedSender<UnitCommand>> {
        match &self.state {
            UnitState::Running(tx) => Ok(tx),
            UnitState::Inert(_) => Err(UnitError::Inert(self.id.clone())),
            UnitState::Closed => Err(UnitError::Closed(self.id.clone())),
        }
    }

    /// Hand one message to the unit.
    ///
    /// Waits until the script's synchronous part has run, unless the unit was
    /// deployed with `async_receive`.
    pub async fn receive(&self, message: Message) -> UnitResult<()> {
        let tx = self.sender()?;
        if self.async_receive {
            return tx
                .send(UnitCommand::Input { message, ack: None })
                .map_err(|_| UnitError::Closed(self.id.clone()));
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(UnitCommand::Input {
            message,
            ack: Some(ack_tx),
        })
        .map_err(|_| UnitError::Closed(self.id.clone()))?;
        ack_rx.await.map_err(|_| UnitError::Closed(self.id.clone()))
    }

    pub async fn inspect(&self) -> UnitResult<UnitSnapshot> {
        let tx = self.sender()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(UnitCommand::Inspect(reply_tx))
            .map_err(|_| UnitError::Closed(self.id.clone()))?;
        reply_rx.await.map_err(|_| UnitError::Closed(self.id.clone()))
    }

    /// Tear the unit down. Inert and already-closed units report nothing cancelled.
    pub async fn close(&mut self) -> UnitResult<CloseReport> {
        let tx = match std::mem::replace(&mut self.state, UnitState::Closed) {
            UnitState::Running(tx) => tx,
            other => {
                self.state = other;
                return Ok(CloseReport::default());
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(UnitCommand::Close(Some(reply_tx)))
            .map_err(|_| UnitError::Closed(self.id.clone()))?;
        reply_rx.await.map_err(|_| UnitError::Closed(self.id.clone()))
    }
}

impl Drop for FunctionNode {
    fn drop(&mut self) {
        if let UnitState::Running(tx) = &self.state {
            let _ = tx.send(UnitCommand::Close(None));
        }
    }
}

/// Body of a unit's runtime thread.
fn run_unit(
    setup: UnitSetup,
    mut commands: mpsc::UnboundedReceiver<UnitCommand>,
    ready: oneshot::Sender<Result<(), CompileError>>,
) {
    // Declared first so the handler (and every engine handle it holds) drops before it.
    let mut context = Context::default();

    let mut handler = match ExecutionHandler::build(setup, &mut context) {
        Ok(handler) => {
            let _ = ready.send(Ok(()));
            handler
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    let mut closed = false;
    while let Some(command) = commands.blocking_recv() {
        match command {
            UnitCommand::Input { message, ack } => {
                handler.handle_input(message, &mut context);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            UnitCommand::TimerFired(id) => handler.fire_timer(id, &mut context),
            UnitCommand::Inspect(reply) => {
                let _ = reply.send(handler.snapshot());
            }
            UnitCommand::Close(reply) => {
                let report = handler.close(&mut context);
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
                closed = true;
                break;
            }
        }
    }

    if !closed {
        handler.close(&mut context);
    }
    tracing::trace!(unit_id = %handler.unit_id(), "unit runtime thread finished");
}
