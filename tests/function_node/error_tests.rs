use serde_json::json;

use xworkflow_function::config::SandboxConfig;
use xworkflow_function::core::LogLevel;
use xworkflow_function::{CompileError, ErrorCode, FunctionRuntimeConfig, UnitError};

use super::helpers::*;

#[tokio::test]
async fn test_reference_error_reports_location() {
    let mut unit = deploy("var y = 1;\nreturn x + y;", 1).await;
    unit.send(json!({"_msgid": "b"})).await;

    let events = unit.drain();
    let reported = errors(&events);
    assert_eq!(reported.len(), 1);
    let (error, message) = &reported[0];
    assert_eq!(error.code, ErrorCode::RuntimeError);
    assert!(error.message.contains("ReferenceError"));
    assert_eq!(
        error.message,
        "ReferenceError: x is not defined (line 2, col 8)"
    );
    assert_eq!(message.as_ref().and_then(|m| m.msgid()), Some("b"));

    let done = completions(&events);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].1.as_deref(), Some(error.message.as_str()));
    assert!(outputs(&events).is_empty());
}

#[tokio::test]
async fn test_compile_error_makes_unit_inert() {
    let mut unit = deploy("return {;", 1).await;
    assert!(unit.node.is_inert());
    assert!(matches!(unit.node.compile_error(), Some(CompileError::Syntax(_))));

    let events = unit.drain();
    assert_eq!(events.len(), 1);
    let reported = errors(&events);
    assert_eq!(reported[0].0.code, ErrorCode::CompileError);

    let refused = unit.node.receive(msg(json!({"_msgid": "n"}))).await;
    assert!(matches!(refused, Err(UnitError::Inert(_))));
    assert!(unit.drain().is_empty());

    let report = unit.node.close().await.unwrap();
    assert_eq!(report.cancelled_timeouts, 0);
    assert!(unit.node.is_inert());
}

#[tokio::test]
async fn test_oversized_source_is_a_compile_error() {
    let config = FunctionRuntimeConfig {
        sandbox: SandboxConfig {
            max_code_length: 8,
            ..SandboxConfig::default()
        },
        ..FunctionRuntimeConfig::default()
    };
    let unit = deploy_with("return msg.payload;", 1, config).await;
    assert_eq!(
        unit.node.compile_error(),
        Some(&CompileError::CodeTooLarge { max: 8, actual: 19 })
    );
}

#[tokio::test]
async fn test_runtime_error_does_not_affect_next_message() {
    let mut unit = deploy(
        "if (msg.fail) { throw new TypeError('bad input'); } return msg;",
        1,
    )
    .await;
    unit.send(json!({"_msgid": "f1", "fail": true})).await;
    unit.send(json!({"_msgid": "f2"})).await;

    let events = unit.drain();
    let reported = errors(&events);
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0.message, "TypeError: bad input");
    assert_eq!(
        reported[0].1.as_ref().map(|m| m.clone().into_value()),
        Some(json!({"_msgid": "f1", "fail": true}))
    );

    let sets = outputs(&events);
    assert_eq!(sets.len(), 1);
    assert_eq!(only_message(&sets[0]), json!({"_msgid": "f2"}));
    assert_eq!(
        completions(&events),
        vec![
            ("f1".to_string(), Some("TypeError: bad input".to_string())),
            ("f2".to_string(), None)
        ]
    );
}

#[tokio::test]
async fn test_input_listener_is_reserved() {
    let script = r#"
try {
    node.on('input', function() {});
} catch (e) {
    return {caught: e.message};
}
return {caught: null};
"#;
    let mut unit = deploy(script, 1).await;
    unit.send(json!({"_msgid": "r1"})).await;

    let events = unit.drain();
    let reported = errors(&events);
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].0.code, ErrorCode::ReservedCapability);

    let sets = outputs(&events);
    let caught = only_message(&sets[0])["caught"].clone();
    assert!(caught.as_str().unwrap().starts_with("InputListenerReserved"));
}

#[tokio::test]
async fn test_uncaught_reserved_listener_fails_invocation() {
    let mut unit = deploy("node.on('input', function() {}); return msg;", 1).await;
    unit.send(json!({"_msgid": "r2"})).await;

    let events = unit.drain();
    assert!(outputs(&events).is_empty());
    let done = completions(&events);
    assert_eq!(done.len(), 1);
    assert!(done[0].1.as_deref().unwrap().contains("InputListenerReserved"));
}

#[tokio::test]
async fn test_done_with_error_and_repeated_done() {
    let mut unit = deploy("done('plain failure'); done(); return null;", 1).await;
    unit.send(json!({"_msgid": "dd"})).await;

    let events = unit.drain();
    assert_eq!(
        completions(&events),
        vec![("dd".to_string(), Some("plain failure".to_string()))]
    );
    assert_eq!(errors(&events).len(), 1);
    assert!(logs(&events)
        .iter()
        .any(|(level, text)| *level == LogLevel::Warn && text.contains("more than once")));
}

#[tokio::test]
async fn test_done_with_thrown_object_is_serialized() {
    let mut unit = deploy("done({code: 42}); return null;", 1).await;
    unit.send(json!({"_msgid": "obj"})).await;

    let events = unit.drain();
    assert_eq!(
        completions(&events),
        vec![("obj".to_string(), Some(r#"{"code":42}"#.to_string()))]
    );
}

#[tokio::test]
async fn test_host_globals_are_not_reachable() {
    let mut unit = deploy(
        "return {e: typeof eval, f: typeof Function, r: typeof require, p: typeof process, j: typeof JSON};",
        1,
    )
    .await;
    unit.send(json!({"_msgid": "g"})).await;

    let sets = outputs(&unit.drain());
    assert_eq!(
        only_message(&sets[0]),
        json!({"_msgid": "g", "e": "undefined", "f": "undefined", "r": "undefined", "p": "undefined", "j": "object"})
    );
}

#[tokio::test]
async fn test_runaway_loop_is_stopped() {
    let config = FunctionRuntimeConfig {
        sandbox: SandboxConfig {
            loop_iteration_limit: Some(1_000),
            ..SandboxConfig::default()
        },
        ..FunctionRuntimeConfig::default()
    };
    let mut unit = deploy_with("if (msg.spin) { while (true) {} } return msg;", 1, config).await;
    unit.send(json!({"_msgid": "spin", "spin": true})).await;
    unit.send(json!({"_msgid": "calm"})).await;

    let events = unit.drain();
    assert_eq!(errors(&events).len(), 1);
    assert_eq!(outputs(&events).len(), 1);
}
