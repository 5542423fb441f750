//! Capability context: the restricted API handed to a unit's script.
//!
//! Every capability is a native function closing over the unit's [`UnitScope`];
//! nothing else of the host is reachable from script code.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsNativeError, JsObject, JsResult, JsValue, NativeFunction};
use boa_gc::{Finalize, Trace};
use serde_json::Value;

use super::convert::{self, display_value, JsonBridge};
use super::error_translator;
use super::timers::{delay_from_millis, TimerId, TimerRegistry};
use crate::core::context_store::{ContextScope, ContextStore, ContextStoreError};
use crate::core::dispatcher::{DispatchReport, MessageDispatcher};
use crate::core::event_bus::{LogLevel, NodeStatus, UnitEvents};
use crate::core::message::{msgid_text, Message};
use crate::error::{ErrorCode, ReservedCapabilityError, RuntimeError};

/// Event name the host keeps for itself.
pub const INPUT_EVENT: &str = "input";

/// Event fired while the unit is torn down.
pub const CLOSE_EVENT: &str = "close";

/// Properties shared by every per-message `node` view.
const NODE_VIEW_KEYS: [&str; 10] = [
    "id", "name", "type", "log", "warn", "error", "debug", "trace", "status", "on",
];

/// Identity of a unit and its enclosing flow.
#[derive(Debug, Clone, Default)]
pub struct UnitInfo {
    pub id: String,
    pub name: String,
    pub node_type: String,
    pub flow_id: String,
    pub flow_name: String,
}

/// Posts a fired timer back to the unit's runtime thread.
pub type Waker = Arc<dyn Fn(TimerId) + Send + Sync>;

/// A scheduled script callback and its extra arguments.
#[derive(Clone)]
pub struct TimerCallback {
    pub func: JsObject,
    pub args: Vec<JsValue>,
}

/// One inbound message being processed.
#[derive(Debug)]
pub struct Invocation {
    /// Text form of the correlation id, used in host events.
    pub msgid: String,
    /// The correlation id exactly as received, stamped onto every output.
    pub correlation: Value,
    pub message: Message,
    finished: Cell<bool>,
}

impl Invocation {
    pub fn new(correlation: impl Into<Value>, message: Message) -> Self {
        let correlation = correlation.into();
        Self {
            msgid: msgid_text(&correlation),
            correlation,
            message,
            finished: Cell::new(false),
        }
    }

    /// Mark the invocation done; `false` if it already was.
    pub fn finish(&self) -> bool {
        !self.finished.replace(true)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.get()
    }
}

/// Which state-store mapping a `get`/`set`/`keys` object talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTarget {
    Node,
    Flow,
    Global,
}

/// Unit-scoped services the capabilities forward to.
pub struct UnitScope {
    pub info: UnitInfo,
    pub events: UnitEvents,
    pub dispatcher: MessageDispatcher,
    pub store: Arc<dyn ContextStore>,
    pub env: HashMap<String, Value>,
    pub json: JsonBridge,
    pub timers: RefCell<TimerRegistry<TimerCallback>>,
    listeners: RefCell<HashMap<String, Vec<JsObject>>>,
    waker: Waker,
}

impl UnitScope {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        info: UnitInfo,
        events: UnitEvents,
        dispatcher: MessageDispatcher,
        store: Arc<dyn ContextStore>,
        env: HashMap<String, Value>,
        json: JsonBridge,
        timers: TimerRegistry<TimerCallback>,
        waker: Waker,
    ) -> Self {
        Self {
            info,
            events,
            dispatcher,
            store,
            env,
            json,
            timers: RefCell::new(timers),
            listeners: RefCell::new(HashMap::new()),
            waker,
        }
    }

    pub fn context_scope(&self, target: StoreTarget) -> ContextScope {
        match target {
            StoreTarget::Node => ContextScope::Node {
                flow_id: self.info.flow_id.clone(),
                node_id: self.info.id.clone(),
            },
            StoreTarget::Flow => ContextScope::Flow(self.info.flow_id.clone()),
            StoreTarget::Global => ContextScope::Global,
        }
    }

    /// Dispatch a script value and mirror the applied stamps back onto it.
    pub fn send(
        &self,
        value: &JsValue,
        msgid: &Value,
        clone_first: bool,
        context: &mut Context,
    ) -> JsResult<DispatchReport> {
        let (mut outbound, records) = self.json.to_outbound(value, context)?;
        let report = self
            .dispatcher
            .send_results(&mut outbound, msgid, clone_first)
            .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
        convert::stamp_back(&outbound, &records, context)?;
        Ok(report)
    }

    /// Report a script error on the unit's error channel.
    pub fn report_runtime_error(&self, error: &RuntimeError, message: Option<&Message>) {
        self.events
            .error(ErrorCode::RuntimeError, &error.diagnostic, message);
    }

    /// Finish an invocation, reporting `error` against its message.
    ///
    /// Errors are always reported; only the first completion is forwarded.
    pub fn complete(&self, invocation: &Invocation, error: Option<RuntimeError>) {
        if let Some(error) = &error {
            self.report_runtime_error(error, Some(&invocation.message));
        }
        if invocation.finish() {
            self.events
                .completed(&invocation.msgid, error.map(|e| e.diagnostic));
        } else {
            self.events.log(
                LogLevel::Warn,
                &format!("done() called more than once for message {}", invocation.msgid),
            );
        }
    }

    pub fn take_listeners(&self, event: &str) -> Vec<JsObject> {
        self.listeners.borrow_mut().remove(event).unwrap_or_default()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.borrow().get(event).map_or(0, Vec::len)
    }
}

#[derive(Clone, Trace, Finalize)]
struct UnitRef {
    #[unsafe_ignore_trace]
    scope: Rc<UnitScope>,
}

#[derive(Clone, Trace, Finalize)]
struct StoreRef {
    #[unsafe_ignore_trace]
    scope: Rc<UnitScope>,
    #[unsafe_ignore_trace]
    target: StoreTarget,
}

#[derive(Clone, Trace, Finalize)]
struct InvocationRef {
    #[unsafe_ignore_trace]
    scope: Rc<UnitScope>,
    #[unsafe_ignore_trace]
    invocation: Rc<Invocation>,
}

type UnitFn = fn(&JsValue, &[JsValue], &UnitRef, &mut Context) -> JsResult<JsValue>;
type StoreFn = fn(&JsValue, &[JsValue], &StoreRef, &mut Context) -> JsResult<JsValue>;

fn unit_fn(f: UnitFn, unit: &UnitRef) -> NativeFunction {
    NativeFunction::from_copy_closure_with_captures(f, unit.clone())
}

/// The capability values bound to the template parameters.
pub struct Capabilities {
    node: JsValue,
    context: JsValue,
    flow: JsValue,
    global: JsValue,
    env: JsValue,
    set_timeout: JsValue,
    clear_timeout: JsValue,
    set_interval: JsValue,
    clear_interval: JsValue,
}

impl Capabilities {
    /// Arguments in template parameter order.
    pub fn as_args(&self) -> Vec<JsValue> {
        vec![
            self.node.clone(),
            self.context.clone(),
            self.flow.clone(),
            self.global.clone(),
            self.env.clone(),
            self.set_timeout.clone(),
            self.clear_timeout.clone(),
            self.set_interval.clone(),
            self.clear_interval.clone(),
        ]
    }
}

/// Build every unit-level capability for `scope`.
pub fn build_capabilities(scope: &Rc<UnitScope>, context: &mut Context) -> Capabilities {
    let unit = UnitRef {
        scope: scope.clone(),
    };

    let node = build_node(&unit, context);
    let global = build_store(scope, StoreTarget::Global, &[], context);

    let info = {
        let mut initializer = ObjectInitializer::new(context);
        initializer
            .property(
                js_string!("id"),
                js_string!(scope.info.flow_id.as_str()),
                Attribute::ENUMERABLE,
            )
            .property(
                js_string!("name"),
                js_string!(scope.info.flow_name.as_str()),
                Attribute::ENUMERABLE,
            );
        initializer.build()
    };
    let flow = build_store(
        scope,
        StoreTarget::Flow,
        &[("info", info.into(), Attribute::ENUMERABLE)],
        context,
    );
    let local = build_store(
        scope,
        StoreTarget::Node,
        &[
            ("flow", flow.clone().into(), Attribute::empty()),
            ("global", global.clone().into(), Attribute::empty()),
        ],
        context,
    );

    let env = {
        let mut initializer = ObjectInitializer::new(context);
        initializer.function(unit_fn(env_get, &unit), js_string!("get"), 1);
        initializer.build()
    };

    let timer = |f: UnitFn, name: &'static str, length: usize, context: &mut Context| -> JsValue {
        FunctionObjectBuilder::new(context.realm(), unit_fn(f, &unit))
            .name(js_string!(name))
            .length(length)
            .constructor(false)
            .build()
            .into()
    };

    Capabilities {
        node: node.into(),
        context: local.into(),
        flow: flow.into(),
        global: global.into(),
        env: env.into(),
        set_timeout: timer(set_timeout, "setTimeout", 2, context),
        clear_timeout: timer(clear_timeout, "clearTimeout", 1, context),
        set_interval: timer(set_interval, "setInterval", 2, context),
        clear_interval: timer(clear_interval, "clearInterval", 1, context),
    }
}

fn build_node(unit: &UnitRef, context: &mut Context) -> JsObject {
    let info = &unit.scope.info;
    let mut initializer = ObjectInitializer::new(context);
    initializer
        .property(js_string!("id"), js_string!(info.id.as_str()), Attribute::ENUMERABLE)
        .property(js_string!("name"), js_string!(info.name.as_str()), Attribute::ENUMERABLE)
        .property(
            js_string!("type"),
            js_string!(info.node_type.as_str()),
            Attribute::ENUMERABLE,
        )
        .function(unit_fn(node_log, unit), js_string!("log"), 1)
        .function(unit_fn(node_warn, unit), js_string!("warn"), 1)
        .function(unit_fn(node_error, unit), js_string!("error"), 2)
        .function(unit_fn(node_debug, unit), js_string!("debug"), 1)
        .function(unit_fn(node_trace, unit), js_string!("trace"), 1)
        .function(unit_fn(node_status, unit), js_string!("status"), 1)
        .function(unit_fn(node_on, unit), js_string!("on"), 2)
        .function(unit_fn(node_scope, unit), js_string!("scope"), 2);
    initializer.build()
}

/// A `get`/`set`/`keys` object over one store mapping, plus read-only `extra` properties.
fn build_store(
    scope: &Rc<UnitScope>,
    target: StoreTarget,
    extra: &[(&str, JsValue, Attribute)],
    context: &mut Context,
) -> JsObject {
    let store = StoreRef {
        scope: scope.clone(),
        target,
    };
    let native = |f: StoreFn| NativeFunction::from_copy_closure_with_captures(f, store.clone());
    let mut initializer = ObjectInitializer::new(context);
    initializer
        .function(native(store_get), js_string!("get"), 1)
        .function(native(store_set), js_string!("set"), 2)
        .function(native(store_keys), js_string!("keys"), 0);
    for (key, value, attribute) in extra {
        initializer.property(js_string!(*key), value.clone(), *attribute);
    }
    initializer.build()
}

/// Per-message `send` and `done` callbacks.
pub fn invocation_callbacks(
    scope: &Rc<UnitScope>,
    invocation: &Rc<Invocation>,
    context: &mut Context,
) -> (JsValue, JsValue) {
    let captures = InvocationRef {
        scope: scope.clone(),
        invocation: invocation.clone(),
    };
    let send = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(invocation_send, captures.clone()),
    )
    .name(js_string!("send"))
    .length(2)
    .constructor(false)
    .build();
    let done = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(invocation_done, captures),
    )
    .name(js_string!("done"))
    .length(1)
    .constructor(false)
    .build();
    (send.into(), done.into())
}

fn invocation_send(
    _this: &JsValue,
    args: &[JsValue],
    call: &InvocationRef,
    context: &mut Context,
) -> JsResult<JsValue> {
    let value = args.first().cloned().unwrap_or_default();
    let clone_first = match args.get(1) {
        Some(flag) if !flag.is_undefined() => flag.to_boolean(),
        _ => true,
    };
    call.scope
        .send(&value, &call.invocation.correlation, clone_first, context)?;
    Ok(JsValue::undefined())
}

fn invocation_done(
    _this: &JsValue,
    args: &[JsValue],
    call: &InvocationRef,
    context: &mut Context,
) -> JsResult<JsValue> {
    let error = match args.first() {
        Some(err) if !err.is_null_or_undefined() => Some(RuntimeError::new(
            error_translator::translate(&call.scope.json.thrown_from_value(err, context)),
        )),
        _ => None,
    };
    call.scope.complete(&call.invocation, error);
    Ok(JsValue::undefined())
}

fn log_at(level: LogLevel, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> String {
    let text = args
        .first()
        .map(|value| display_value(&unit.scope.json, value, context))
        .unwrap_or_default();
    unit.scope.events.log(level, &text);
    text
}

fn node_log(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    log_at(LogLevel::Info, args, unit, context);
    Ok(JsValue::undefined())
}

fn node_warn(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    log_at(LogLevel::Warn, args, unit, context);
    Ok(JsValue::undefined())
}

fn node_debug(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    log_at(LogLevel::Debug, args, unit, context);
    Ok(JsValue::undefined())
}

fn node_trace(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    log_at(LogLevel::Trace, args, unit, context);
    Ok(JsValue::undefined())
}

/// `node.error(err, msg?)`: logs and raises an error event carrying `msg`.
fn node_error(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    let text = log_at(LogLevel::Error, args, unit, context);
    let message = match args.get(1) {
        Some(msg) if msg.is_object() => unit
            .scope
            .json
            .to_json(msg, context)?
            .and_then(Message::from_value),
        _ => None,
    };
    unit.scope
        .events
        .error(ErrorCode::RuntimeError, &text, message.as_ref());
    Ok(JsValue::undefined())
}

fn node_status(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    let status = match args.first() {
        None => None,
        Some(value) if value.is_null_or_undefined() => None,
        Some(value) if value.is_object() => unit
            .scope
            .json
            .to_json(value, context)?
            .and_then(|json| status_from_json(&json)),
        Some(value) => Some(NodeStatus::text(display_value(&unit.scope.json, value, context))),
    };
    unit.scope.events.status(status);
    Ok(JsValue::undefined())
}

/// Read a status object; an empty object means "clear".
pub fn status_from_json(value: &Value) -> Option<NodeStatus> {
    let object = value.as_object()?;
    let field = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
    let text = match object.get("text") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    };
    let status = NodeStatus {
        fill: field("fill"),
        shape: field("shape"),
        text,
    };
    (!status.is_empty()).then_some(status)
}

fn node_on(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    let event = match args.first() {
        Some(event) => event.to_string(context)?.to_std_string_escaped(),
        None => String::new(),
    };
    if event == INPUT_EVENT {
        let err = ReservedCapabilityError::InputListener;
        unit.scope
            .events
            .error(ErrorCode::ReservedCapability, &err.to_string(), None);
        return Err(JsNativeError::error().with_message(err.to_string()).into());
    }
    let handler = args
        .get(1)
        .and_then(JsValue::as_callable)
        .cloned()
        .ok_or_else(|| JsNativeError::typ().with_message("listener must be a function"))?;
    unit.scope
        .listeners
        .borrow_mut()
        .entry(event)
        .or_default()
        .push(handler);
    Ok(JsValue::undefined())
}

/// `__node__.scope(send, done)`: the `node` object seen by one invocation.
fn node_scope(this: &JsValue, args: &[JsValue], _unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    let base = this
        .as_object()
        .cloned()
        .ok_or_else(|| JsNativeError::typ().with_message("node scope requires the node object"))?;
    let view = JsObject::with_object_proto(context.intrinsics());
    for key in NODE_VIEW_KEYS {
        let value = base.get(js_string!(key), context)?;
        view.set(js_string!(key), value, false, context)?;
    }
    view.set(js_string!("send"), args.first().cloned().unwrap_or_default(), false, context)?;
    view.set(js_string!("done"), args.get(1).cloned().unwrap_or_default(), false, context)?;
    Ok(view.into())
}

fn env_get(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    let name = match args.first() {
        Some(name) => name.to_string(context)?.to_std_string_escaped(),
        None => return Ok(JsValue::undefined()),
    };
    match unit.scope.env.get(&name) {
        Some(value) => unit.scope.json.from_json(value, context),
        None => Ok(JsValue::undefined()),
    }
}

fn key_arg(args: &[JsValue], context: &mut Context) -> JsResult<String> {
    match args.first() {
        Some(key) if !key.is_null_or_undefined() => {
            Ok(key.to_string(context)?.to_std_string_escaped())
        }
        _ => Err(JsNativeError::typ()
            .with_message("context key is required")
            .into()),
    }
}

/// Last callable argument at or after `from`: the optional node-style callback.
fn trailing_callback(args: &[JsValue], from: usize) -> Option<JsObject> {
    args.iter()
        .skip(from)
        .rev()
        .find_map(|arg| arg.as_callable().cloned())
}

fn store_failure(
    scope: &UnitScope,
    error: ContextStoreError,
    callback: Option<JsObject>,
    context: &mut Context,
) -> JsResult<JsValue> {
    let text = error.to_string();
    scope
        .events
        .error(ErrorCode::ContextStoreError, &text, None);
    match callback {
        Some(callback) => {
            let err = JsNativeError::error().with_message(text).to_opaque(context);
            callback.call(&JsValue::undefined(), &[err.into()], context)?;
            Ok(JsValue::undefined())
        }
        None => Err(JsNativeError::error().with_message(text).into()),
    }
}

fn store_get(_this: &JsValue, args: &[JsValue], store: &StoreRef, context: &mut Context) -> JsResult<JsValue> {
    let key = key_arg(args, context)?;
    let scope = &store.scope;
    let callback = trailing_callback(args, 1);
    match scope.store.get(&scope.context_scope(store.target), &key) {
        Ok(value) => {
            let value = match value {
                Some(value) => scope.json.from_json(&value, context)?,
                None => JsValue::undefined(),
            };
            match callback {
                Some(callback) => {
                    callback.call(&JsValue::undefined(), &[JsValue::null(), value], context)?;
                    Ok(JsValue::undefined())
                }
                None => Ok(value),
            }
        }
        Err(e) => store_failure(scope, e, callback, context),
    }
}

/// `set(key, value[, store][, cb])`; `undefined` deletes the key.
fn store_set(_this: &JsValue, args: &[JsValue], store: &StoreRef, context: &mut Context) -> JsResult<JsValue> {
    let key = key_arg(args, context)?;
    let scope = &store.scope;
    let value = args.get(1).cloned().unwrap_or_default();
    let callback = trailing_callback(args, 2);

    let json = if value.is_undefined() {
        Ok(None)
    } else {
        scope
            .json
            .to_json(&value, context)
            .map_err(|e| ContextStoreError::NotStorable {
                key: key.clone(),
                reason: e.to_string(),
            })
    };
    let result = json.and_then(|json| scope.store.set(&scope.context_scope(store.target), &key, json));

    match result {
        Ok(()) => {
            if let Some(callback) = callback {
                callback.call(&JsValue::undefined(), &[JsValue::null()], context)?;
            }
            Ok(JsValue::undefined())
        }
        Err(e) => store_failure(scope, e, callback, context),
    }
}

fn store_keys(_this: &JsValue, args: &[JsValue], store: &StoreRef, context: &mut Context) -> JsResult<JsValue> {
    let scope = &store.scope;
    let callback = trailing_callback(args, 0);
    match scope.store.keys(&scope.context_scope(store.target)) {
        Ok(keys) => {
            let keys = scope.json.from_json(&Value::from(keys), context)?;
            match callback {
                Some(callback) => {
                    callback.call(&JsValue::undefined(), &[JsValue::null(), keys], context)?;
                    Ok(JsValue::undefined())
                }
                None => Ok(keys),
            }
        }
        Err(e) => store_failure(scope, e, callback, context),
    }
}

fn timer_args(args: &[JsValue], context: &mut Context) -> JsResult<(JsObject, Option<f64>, Vec<JsValue>)> {
    let func = args
        .first()
        .and_then(JsValue::as_callable)
        .cloned()
        .ok_or_else(|| JsNativeError::typ().with_message("timer callback must be a function"))?;
    let delay = match args.get(1) {
        Some(delay) if !delay.is_undefined() => Some(delay.to_number(context)?),
        _ => None,
    };
    Ok((func, delay, args.iter().skip(2).cloned().collect()))
}

fn timer_id_arg(args: &[JsValue], context: &mut Context) -> JsResult<Option<TimerId>> {
    match args.first() {
        Some(id) if !id.is_null_or_undefined() => {
            let id = id.to_number(context)?;
            Ok((id.is_finite() && id >= 1.0 && id <= f64::from(TimerId::MAX)).then(|| id as TimerId))
        }
        _ => Ok(None),
    }
}

fn set_timeout(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    let (func, delay, rest) = timer_args(args, context)?;
    let waker = unit.scope.waker.clone();
    let id = unit.scope.timers.borrow_mut().set_timeout(
        TimerCallback { func, args: rest },
        delay_from_millis(delay),
        move |id| waker(id),
    );
    Ok(JsValue::from(id))
}

fn set_interval(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    let (func, delay, rest) = timer_args(args, context)?;
    let waker = unit.scope.waker.clone();
    let id = unit.scope.timers.borrow_mut().set_interval(
        TimerCallback { func, args: rest },
        delay_from_millis(delay),
        move |id| waker(id),
    );
    Ok(JsValue::from(id))
}

fn clear_timeout(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    if let Some(id) = timer_id_arg(args, context)? {
        unit.scope.timers.borrow_mut().clear_timeout(id);
    }
    Ok(JsValue::undefined())
}

fn clear_interval(_this: &JsValue, args: &[JsValue], unit: &UnitRef, context: &mut Context) -> JsResult<JsValue> {
    if let Some(id) = timer_id_arg(args, context)? {
        unit.scope.timers.borrow_mut().clear_interval(id);
    }
    Ok(JsValue::undefined())
}
