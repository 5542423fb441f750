use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use xworkflow_function::core::{ContextStoreError, LogLevel};
use xworkflow_function::{
    ContextScope, ContextStore, ErrorCode, FlowInfo, FunctionRuntimeConfig, InMemoryContextStore,
    NodeStatus, UnitDefinition, UnitEvent,
};

use super::helpers::*;

#[tokio::test]
async fn test_flow_context_shared_local_context_private() {
    let store: Arc<dyn ContextStore> = Arc::new(InMemoryContextStore::new());
    let config = FunctionRuntimeConfig::default();

    let writer = deploy_full(
        UnitDefinition::function(
            "writer",
            "context.set('local', 1); flow.set('shared', msg.payload); global.set('g', 'x'); return null;",
            1,
        ),
        test_flow(),
        store.clone(),
        config.clone(),
    )
    .await;
    let mut reader = deploy_full(
        UnitDefinition::function(
            "reader",
            "return {local: context.get('local') === undefined, shared: flow.get('shared'), alias: context.flow.get('shared'), g: context.global.get('g')};",
            1,
        ),
        test_flow(),
        store.clone(),
        config,
    )
    .await;

    writer.send(json!({"_msgid": "w", "payload": 5})).await;
    reader.send(json!({"_msgid": "r"})).await;

    let sets = outputs(&reader.drain());
    assert_eq!(
        only_message(&sets[0]),
        json!({"_msgid": "r", "local": true, "shared": 5, "alias": 5, "g": "x"})
    );

    let local = ContextScope::Node {
        flow_id: "flow-1".into(),
        node_id: "writer".into(),
    };
    assert_eq!(store.get(&local, "local").unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn test_context_keys_delete_and_callbacks() {
    let script = r#"
context.set('a', {nested: [1, 2]});
context.set('b', 2);
context.set('a', undefined);
var viaCallback;
context.get('b', function(err, value) { viaCallback = value; });
var setErr = 'unset';
context.set('c', 3, function(err) { setErr = err; });
return {keys: context.keys(), viaCallback: viaCallback, setErr: setErr};
"#;
    let mut unit = deploy(script, 1).await;
    unit.send(json!({"_msgid": "k"})).await;

    let sets = outputs(&unit.drain());
    assert_eq!(
        only_message(&sets[0]),
        json!({"_msgid": "k", "keys": ["b", "c"], "viaCallback": 2, "setErr": null})
    );
}

struct BrokenStore;

impl ContextStore for BrokenStore {
    fn get(&self, _: &ContextScope, _: &str) -> Result<Option<Value>, ContextStoreError> {
        Err(ContextStoreError::Unavailable("backend offline".into()))
    }

    fn set(&self, _: &ContextScope, _: &str, _: Option<Value>) -> Result<(), ContextStoreError> {
        Err(ContextStoreError::Unavailable("backend offline".into()))
    }

    fn keys(&self, _: &ContextScope) -> Result<Vec<String>, ContextStoreError> {
        Err(ContextStoreError::Unavailable("backend offline".into()))
    }
}

#[tokio::test]
async fn test_store_failure_reaches_callback_or_throws() {
    let script = r#"
var seen = null;
context.get('k', function(err) { seen = err.message; });
var thrown = null;
try { flow.keys(); } catch (e) { thrown = e.message; }
return {seen: seen, thrown: thrown};
"#;
    let mut unit = deploy_full(
        UnitDefinition::function("fn1", script, 1),
        test_flow(),
        Arc::new(BrokenStore),
        FunctionRuntimeConfig::default(),
    )
    .await;
    unit.send(json!({"_msgid": "s"})).await;

    let events = unit.drain();
    let reported = errors(&events);
    assert_eq!(reported.len(), 2);
    assert!(reported.iter().all(|(err, _)| err.code == ErrorCode::ContextStoreError));

    let out = only_message(&outputs(&events)[0]);
    assert!(out["seen"].as_str().unwrap().contains("backend offline"));
    assert!(out["thrown"].as_str().unwrap().contains("backend offline"));
}

#[tokio::test]
async fn test_env_flow_info_and_identity() {
    let mut env = HashMap::new();
    env.insert("REGION".to_string(), json!("eu"));
    let flow = FlowInfo {
        id: "flow-9".into(),
        name: "Orders".into(),
        env,
    };
    let mut definition = UnitDefinition::function(
        "fn-id",
        "return {region: env.get('REGION'), missing: env.get('NOPE') === undefined, flowId: flow.info.id, flowName: flow.info.name, id: node.id, name: node.name, type: node.type};",
        1,
    );
    definition.name = "Enricher".into();

    let mut unit = deploy_full(
        definition,
        flow,
        Arc::new(InMemoryContextStore::new()),
        FunctionRuntimeConfig::default(),
    )
    .await;
    unit.send(json!({"_msgid": "e"})).await;

    let sets = outputs(&unit.drain());
    assert_eq!(
        only_message(&sets[0]),
        json!({
            "_msgid": "e",
            "region": "eu",
            "missing": true,
            "flowId": "flow-9",
            "flowName": "Orders",
            "id": "fn-id",
            "name": "Enricher",
            "type": "function"
        })
    );
}

#[tokio::test]
async fn test_log_levels_forwarded() {
    let mut unit = deploy(
        "node.log('hello'); node.warn({a: 1}); node.debug(3); node.trace('t'); return null;",
        1,
    )
    .await;
    unit.send(json!({"_msgid": "l"})).await;

    assert_eq!(
        logs(&unit.drain()),
        vec![
            (LogLevel::Info, "hello".to_string()),
            (LogLevel::Warn, r#"{"a":1}"#.to_string()),
            (LogLevel::Debug, "3".to_string()),
            (LogLevel::Trace, "t".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_node_error_attaches_message() {
    let mut unit = deploy("node.error('went wrong', msg); return null;", 1).await;
    unit.send(json!({"_msgid": "ne", "payload": 7})).await;

    let events = unit.drain();
    let reported = errors(&events);
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0.code, ErrorCode::RuntimeError);
    assert_eq!(reported[0].0.message, "went wrong");
    assert_eq!(
        reported[0].1.as_ref().map(|m| m.clone().into_value()),
        Some(json!({"_msgid": "ne", "payload": 7}))
    );
    assert!(logs(&events).contains(&(LogLevel::Error, "went wrong".to_string())));
}

#[tokio::test]
async fn test_caught_error_object_is_described() {
    let script = r#"
try {
    null.x;
} catch (e) {
    node.error(e, msg);
}
node.warn(new Error('w'));
return null;
"#;
    let mut unit = deploy(script, 1).await;
    unit.send(json!({"_msgid": "ce", "payload": 3})).await;

    let events = unit.drain();
    let reported = errors(&events);
    assert_eq!(reported.len(), 1);
    assert!(reported[0].0.message.starts_with("TypeError: "));
    assert_ne!(reported[0].0.message, "TypeError: ");
    assert_eq!(
        reported[0].1.as_ref().and_then(|m| m.msgid()),
        Some("ce")
    );

    let logged = logs(&events);
    assert!(logged
        .iter()
        .any(|(level, text)| *level == LogLevel::Error && text.starts_with("TypeError: ")));
    assert!(logged.contains(&(LogLevel::Warn, "Error: w".to_string())));
}

#[tokio::test]
async fn test_status_updates() {
    let mut unit = deploy(
        "node.status({fill: 'red', shape: 'ring', text: 'down'}); node.status({}); node.status('plain'); return null;",
        1,
    )
    .await;
    unit.send(json!({"_msgid": "st"})).await;

    let statuses: Vec<Option<NodeStatus>> = unit
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            UnitEvent::Status { status, .. } => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            Some(NodeStatus {
                fill: Some("red".into()),
                shape: Some("ring".into()),
                text: Some("down".into()),
            }),
            None,
            Some(NodeStatus::text("plain")),
        ]
    );
}

#[tokio::test]
async fn test_profiling_status_and_snapshot() {
    let config = FunctionRuntimeConfig {
        profiling: true,
        status_interval_ms: 10,
        ..FunctionRuntimeConfig::default()
    };
    let mut unit = deploy_with("return null;", 1, config).await;
    unit.send(json!({"_msgid": "p1"})).await;
    unit.send(json!({"_msgid": "p2"})).await;

    let UnitEvent::Status { status, .. } = unit
        .wait_for("profiling status", |e| matches!(e, UnitEvent::Status { .. }))
        .await
    else {
        unreachable!()
    };
    let status = status.expect("status drawn");
    assert_eq!(status.fill.as_deref(), Some("yellow"));
    assert!(status.text.unwrap().starts_with("max: "));

    let snapshot = unit.node.inspect().await.unwrap();
    assert_eq!(snapshot.profiling.count, 2);
}

#[tokio::test]
async fn test_timing_status_shows_last_duration() {
    let config = FunctionRuntimeConfig {
        timing: true,
        profiling: false,
        status_interval_ms: 10,
        ..FunctionRuntimeConfig::default()
    };
    let mut unit = deploy_with("return null;", 1, config).await;
    unit.send(json!({"_msgid": "tm"})).await;

    let UnitEvent::Status { status, .. } = unit
        .wait_for("timing status", |e| matches!(e, UnitEvent::Status { .. }))
        .await
    else {
        unreachable!()
    };
    let status = status.expect("status drawn");
    assert_eq!(status.fill.as_deref(), Some("yellow"));
    assert_eq!(status.shape.as_deref(), Some("dot"));
    let millis: f64 = status.text.unwrap().parse().expect("numeric duration");
    assert!(millis >= 0.0);
}
