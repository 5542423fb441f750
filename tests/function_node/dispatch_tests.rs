use serde_json::json;

use xworkflow_function::{ErrorCode, FunctionRuntimeConfig, UnitEvent};

use super::helpers::*;

#[tokio::test]
async fn test_returned_record_carries_correlation_id() {
    let mut unit = deploy("return {payload: 2};", 1).await;
    unit.send(json!({"_msgid": "a", "payload": 1})).await;

    let events = unit.drain();
    let sets = outputs(&events);
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].channels(), 1);
    assert_eq!(only_message(&sets[0]), json!({"_msgid": "a", "payload": 2}));
    assert_eq!(completions(&events), vec![("a".to_string(), None)]);
}

#[tokio::test]
async fn test_duration_metric_per_invocation() {
    let mut unit = deploy("return msg;", 1).await;
    unit.send(json!({"_msgid": "m1"})).await;

    let metric = unit
        .drain()
        .into_iter()
        .find_map(|event| match event {
            UnitEvent::Metric { name, msgid, value, .. } => Some((name, msgid, value)),
            _ => None,
        })
        .expect("duration metric");
    assert_eq!(metric.0, "duration");
    assert_eq!(metric.1, "m1");
    assert!(metric.2 >= 0.0);
}

#[tokio::test]
async fn test_two_outputs_with_null_slot() {
    let mut unit = deploy("return [{payload: 1}, null];", 2).await;
    unit.send(json!({"_msgid": "c"})).await;

    let sets = outputs(&unit.drain());
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].channels(), 2);
    assert_eq!(sets[0].channel(0).len(), 1);
    assert!(sets[0].channel(1).is_empty());
    assert_eq!(sets[0].channel(0)[0].msgid(), Some("c"));
}

#[tokio::test]
async fn test_null_and_empty_results_deliver_nothing() {
    let mut unit = deploy(
        "if (msg.kind === 'null') { return null; } if (msg.kind === 'empty') { return []; } return [[]];",
        1,
    )
    .await;
    for kind in ["null", "empty", "nested"] {
        unit.send(json!({"_msgid": kind, "kind": kind})).await;
    }

    let events = unit.drain();
    assert!(outputs(&events).is_empty());
    assert!(errors(&events).is_empty());
    assert_eq!(completions(&events).len(), 3);
}

#[tokio::test]
async fn test_invalid_slot_rejected_siblings_delivered() {
    let mut unit = deploy("return [new Date(0), {payload: 1}, 'text'];", 3).await;
    unit.send(json!({"_msgid": "v"})).await;

    let events = unit.drain();
    let sets = outputs(&events);
    assert_eq!(sets.len(), 1);
    assert!(sets[0].channel(0).is_empty());
    assert_eq!(sets[0].channel(1).len(), 1);
    assert!(sets[0].channel(2).is_empty());

    let rejected = errors(&events);
    assert_eq!(rejected.len(), 2);
    assert!(rejected.iter().all(|(err, _)| err.code == ErrorCode::ValidationError));
    assert!(rejected[0].0.message.contains("output 0"));
    assert!(rejected[1].0.message.contains("string"));
}

#[tokio::test]
async fn test_send_fans_out_with_correlation_id() {
    let mut unit = deploy(
        "node.send({n: 1}); node.send([[{n: 2}, {n: 3}], {n: 4}]); return null;",
        2,
    )
    .await;
    unit.send(json!({"_msgid": "fan"})).await;

    let sets = outputs(&unit.drain());
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].message_count(), 1);
    assert_eq!(sets[1].channel(0).len(), 2);
    assert_eq!(sets[1].channel(1).len(), 1);
    for set in &sets {
        for (_, message) in set.iter() {
            assert_eq!(message.msgid(), Some("fan"));
        }
    }
}

#[tokio::test]
async fn test_clone_first_leaves_caller_value_untouched() {
    let script = r#"
var first = {payload: 1};
node.send(first);
var second = {payload: 2};
node.send(second, false);
return {clonedUntouched: first._msgid === undefined, stampedInPlace: second._msgid};
"#;
    let mut unit = deploy(script, 1).await;
    unit.send(json!({"_msgid": "cf"})).await;

    let sets = outputs(&unit.drain());
    assert_eq!(sets.len(), 3);
    assert_eq!(only_message(&sets[0]), json!({"_msgid": "cf", "payload": 1}));
    assert_eq!(
        only_message(&sets[2]),
        json!({"_msgid": "cf", "clonedUntouched": true, "stampedInPlace": "cf"})
    );
}

#[tokio::test]
async fn test_missing_msgid_is_assigned() {
    let mut unit = deploy("return msg;", 1).await;
    unit.send(json!({"payload": "x"})).await;

    let events = unit.drain();
    let sets = outputs(&events);
    let msgid = sets[0].channel(0)[0].msgid().expect("msgid").to_string();
    assert_eq!(msgid.len(), 36);
    assert_eq!(completions(&events), vec![(msgid, None)]);
}

#[tokio::test]
async fn test_async_send_delivers_one_event_per_message() {
    let config = FunctionRuntimeConfig {
        async_send: true,
        ..FunctionRuntimeConfig::default()
    };
    let mut unit = deploy_with("return [[{n: 1}, {n: 2}], {n: 3}];", 2, config).await;
    unit.send(json!({"_msgid": "as"})).await;

    let mut delivered = Vec::new();
    for _ in 0..3 {
        if let UnitEvent::Output { outputs, .. } = unit.wait_for("deferred output", is_output).await {
            delivered.push(outputs);
        }
    }
    for set in &delivered {
        assert_eq!(set.channels(), 2);
        assert_eq!(set.message_count(), 1);
        assert_eq!(only_message(set)["_msgid"], json!("as"));
    }
    let on_second = delivered.iter().filter(|set| set.channel(1).len() == 1).count();
    assert_eq!(on_second, 1);
}

#[tokio::test]
async fn test_non_string_msgid_propagates_unchanged() {
    let mut unit = deploy(
        "var o = {n: 1}; node.send(o, false); return {seen: o._msgid};",
        1,
    )
    .await;
    unit.send(json!({"_msgid": 42})).await;

    let events = unit.drain();
    let sets = outputs(&events);
    assert_eq!(sets.len(), 2);
    assert_eq!(only_message(&sets[0]), json!({"_msgid": 42, "n": 1}));
    assert_eq!(only_message(&sets[1]), json!({"_msgid": 42, "seen": 42}));
    assert_eq!(completions(&events), vec![("42".to_string(), None)]);
}

#[tokio::test]
async fn test_async_receive_processes_after_return() {
    let config = FunctionRuntimeConfig {
        async_receive: true,
        ..FunctionRuntimeConfig::default()
    };
    let mut unit = deploy_with("return {payload: msg.payload + 1};", 1, config).await;
    with_timeout(
        "queue input",
        WAIT,
        unit.node.receive(msg(json!({"_msgid": "ar", "payload": 1}))),
    )
    .await
    .unwrap();

    let UnitEvent::Output { outputs, .. } = unit.wait_for("queued output", is_output).await else {
        unreachable!()
    };
    assert_eq!(only_message(&outputs), json!({"_msgid": "ar", "payload": 2}));

    let UnitEvent::Completed { msgid, error, .. } = unit.wait_for("completion", is_completed).await
    else {
        unreachable!()
    };
    assert_eq!(msgid, "ar");
    assert_eq!(error, None);
}
