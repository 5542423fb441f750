//! Per-message orchestration of a compiled unit.
//!
//! [`ExecutionHandler`] lives on the unit's runtime thread next to the engine
//! context. It runs the script for each inbound message, fires timer
//! callbacks, and tears the unit down on close.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::{js_string, Context, JsObject, JsResult, JsValue, NativeFunction};
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use uuid::Uuid;

use super::profiling::{duration_millis, ProfilingStats, StatusThrottle};
use crate::config::FunctionRuntimeConfig;
use crate::core::context_store::ContextStore;
use crate::core::dispatcher::{MessageDispatcher, OutputSink};
use crate::core::event_bus::{NodeStatus, UnitEvents};
use crate::core::message::Message;
use crate::error::CompileError;
use crate::sandbox::capability::{
    build_capabilities, invocation_callbacks, Invocation, UnitInfo, UnitScope, Waker, CLOSE_EVENT,
};
use crate::sandbox::compiler::{CodeCompiler, CompiledScript};
use crate::sandbox::convert::JsonBridge;
use crate::sandbox::timers::{TimerId, TimerRegistry};

/// Name of the per-message duration metric.
pub const DURATION_METRIC: &str = "duration";

/// Everything needed to bring one unit up on its runtime thread.
pub struct UnitSetup {
    pub info: UnitInfo,
    pub source: String,
    pub outputs: usize,
    pub events: UnitEvents,
    pub sink: Arc<dyn OutputSink>,
    pub store: Arc<dyn ContextStore>,
    pub env: HashMap<String, Value>,
    pub config: FunctionRuntimeConfig,
    pub waker: Waker,
    pub runtime: Handle,
}

/// Point-in-time view of a running unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnitSnapshot {
    pub outstanding_timeouts: usize,
    pub outstanding_intervals: usize,
    pub profiling: ProfilingStats,
}

/// What tearing a unit down cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    pub cancelled_timeouts: usize,
    pub cancelled_intervals: usize,
    pub close_listeners: usize,
    pub status_cleared: bool,
}

pub struct ExecutionHandler {
    scope: Rc<UnitScope>,
    script: CompiledScript,
    config: FunctionRuntimeConfig,
    profiling: ProfilingStats,
    throttle: Option<StatusThrottle>,
}

impl ExecutionHandler {
    /// Bind the capabilities and compile the unit's source.
    pub fn build(setup: UnitSetup, context: &mut Context) -> Result<Self, CompileError> {
        let UnitSetup {
            info,
            source,
            outputs,
            events,
            sink,
            store,
            env,
            config,
            waker,
            runtime,
        } = setup;

        let json = JsonBridge::capture(context).map_err(|e| CompileError::Sandbox(e.to_string()))?;
        let dispatcher = MessageDispatcher::new(outputs, config.delivery_mode(), sink, events.clone());
        let scope = Rc::new(UnitScope::new(
            info,
            events.clone(),
            dispatcher,
            store,
            env,
            json,
            TimerRegistry::new(runtime.clone()),
            waker,
        ));

        let capabilities = build_capabilities(&scope, context);
        let script = CodeCompiler::new(&config.sandbox).compile(
            &scope.info.id,
            &source,
            &capabilities,
            context,
        )?;

        let throttle = config.shows_durations().then(|| {
            StatusThrottle::new(Duration::from_millis(config.status_interval_ms), events, runtime)
        });

        Ok(Self {
            scope,
            script,
            config,
            profiling: ProfilingStats::default(),
            throttle,
        })
    }

    pub fn unit_id(&self) -> &str {
        &self.scope.info.id
    }

    /// Process one inbound message. Script errors never escape this call.
    pub fn handle_input(&mut self, mut message: Message, context: &mut Context) {
        // Only an absent id is generated; any present value is propagated as is.
        let correlation = match message.msgid_value() {
            Some(value) => value.clone(),
            None => {
                let generated = Value::String(Uuid::new_v4().to_string());
                message.set_msgid(generated.clone());
                generated
            }
        };
        let invocation = Rc::new(Invocation::new(correlation, message));
        tracing::trace!(unit_id = %self.unit_id(), msgid = %invocation.msgid, "input received");
        let started = Instant::now();

        match self.run(&invocation, context) {
            Ok(()) => {
                if !self.script.manages_completion() {
                    self.scope.complete(&invocation, None);
                }
                self.record_duration(&invocation.msgid, started.elapsed());
            }
            Err(e) => {
                let error = self.script.diagnose(&e, &self.scope.json, context);
                self.scope.complete(&invocation, Some(error));
            }
        }
        let _ = context.run_jobs();
    }

    /// Invoke the script and forward whatever it returned synchronously.
    fn run(&self, invocation: &Rc<Invocation>, context: &mut Context) -> JsResult<()> {
        let msg = self.scope.json.message_to_js(&invocation.message, context)?;
        let (send, done) = invocation_callbacks(&self.scope, invocation, context);
        let result = self.script.invoke(msg, send, done, context)?;
        self.scope
            .send(&result, &invocation.correlation, false, context)?;
        Ok(())
    }

    fn record_duration(&mut self, msgid: &str, elapsed: Duration) {
        let millis = duration_millis(elapsed);
        self.profiling.record(elapsed);
        self.scope.events.metric(DURATION_METRIC, msgid, millis);

        let Some(throttle) = &self.throttle else {
            return;
        };
        let text = if self.config.profiling {
            self.profiling.status_text()
        } else {
            millis.to_string()
        };
        throttle.update(NodeStatus::yellow_dot(text));
    }

    /// Run the callback behind a woken timer handle.
    ///
    /// Handles cleared after their wake-up was posted are ignored.
    pub fn fire_timer(&mut self, id: TimerId, context: &mut Context) {
        let callback = {
            let mut timers = self.scope.timers.borrow_mut();
            match timers.take_fired_timeout(id) {
                Some(callback) => Some(callback),
                None => timers.interval_callback(id),
            }
        };
        let Some(callback) = callback else {
            tracing::trace!(unit_id = %self.unit_id(), timer_id = id, "stale timer wake-up ignored");
            return;
        };

        if let Err(e) = callback
            .func
            .call(&JsValue::undefined(), &callback.args, context)
        {
            let error = self.script.diagnose(&e, &self.scope.json, context);
            self.scope.report_runtime_error(&error, None);
        }
        let _ = context.run_jobs();
    }

    /// Run close listeners, cancel every timer and clear any status the unit drew.
    pub fn close(&mut self, context: &mut Context) -> CloseReport {
        let listeners = self.scope.take_listeners(CLOSE_EVENT);
        for listener in &listeners {
            if let Err(e) = call_close_listener(listener, context) {
                let error = self.script.diagnose(&e, &self.scope.json, context);
                self.scope.report_runtime_error(&error, None);
            }
        }
        let _ = context.run_jobs();

        let (cancelled_timeouts, cancelled_intervals) = self.scope.timers.borrow_mut().drain();
        if let Some(throttle) = &self.throttle {
            throttle.stop();
        }
        let status_cleared = self.scope.events.clear_status_if_set();

        tracing::debug!(
            unit_id = %self.unit_id(),
            cancelled_timeouts,
            cancelled_intervals,
            "unit closed"
        );

        CloseReport {
            cancelled_timeouts,
            cancelled_intervals,
            close_listeners: listeners.len(),
            status_cleared,
        }
    }

    pub fn snapshot(&self) -> UnitSnapshot {
        let timers = self.scope.timers.borrow();
        UnitSnapshot {
            outstanding_timeouts: timers.outstanding_timeouts(),
            outstanding_intervals: timers.outstanding_intervals(),
            profiling: self.profiling,
        }
    }
}

/// Close listeners get `(removed, done)`, `(done)` or nothing, by declared arity.
fn call_close_listener(listener: &JsObject, context: &mut Context) -> JsResult<JsValue> {
    let arity = listener.get(js_string!("length"), context)?.to_number(context)?;
    let done: JsValue = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_fn_ptr(|_, _, _| Ok(JsValue::undefined())),
    )
    .name(js_string!("done"))
    .length(0)
    .constructor(false)
    .build()
    .into();

    let args = if arity >= 2.0 {
        vec![JsValue::from(true), done]
    } else if arity >= 1.0 {
        vec![done]
    } else {
        Vec::new()
    };
    listener.call(&JsValue::undefined(), &args, context)
}
