use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use xworkflow_function::error::DeliveryError;
use xworkflow_function::{
    parse_flow, DslFormat, ErrorCode, FlowError, FlowRunner, OutputSet, OutputSink, UnitEvent,
};

use super::helpers::*;

const FLOW_YAML: &str = r#"
version: "0.1.0"
flow:
  id: orders
  name: Orders
  env:
    FACTOR: 3
nodes:
  - id: scale
    name: Scale
    func: |
      return {payload: msg.payload * env.get('FACTOR')};
  - id: broken
    func: "return {;"
"#;

#[tokio::test]
async fn test_runner_routes_and_closes() {
    let schema = parse_flow(FLOW_YAML, DslFormat::Yaml).unwrap();
    let mut runner = with_timeout("deploy", WAIT, FlowRunner::builder(schema).deploy())
        .await
        .unwrap();
    let mut events = runner.take_events().unwrap();
    assert!(runner.take_events().is_none());
    assert_eq!(runner.unit_ids().collect::<Vec<_>>(), vec!["scale", "broken"]);
    assert!(runner.unit("broken").unwrap().is_inert());

    runner
        .receive("scale", msg(json!({"_msgid": "o1", "payload": 2})))
        .await
        .unwrap();
    assert!(matches!(
        runner.receive("missing", msg(json!({}))).await,
        Err(FlowError::NodeNotFound(_))
    ));
    assert!(matches!(
        runner.receive("broken", msg(json!({}))).await,
        Err(FlowError::Unit(_))
    ));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let compile_errors: Vec<_> = errors(&seen)
        .into_iter()
        .filter(|(err, _)| err.code == ErrorCode::CompileError)
        .collect();
    assert_eq!(compile_errors.len(), 1);

    let delivered: Vec<_> = seen
        .iter()
        .filter_map(|event| match event {
            UnitEvent::Output { unit_id, outputs } => Some((unit_id.clone(), outputs.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, "scale");
    assert_eq!(only_message(&delivered[0].1), json!({"_msgid": "o1", "payload": 6}));

    let reports = runner.close_all().await.unwrap();
    assert_eq!(reports.len(), 2);
}

#[derive(Default)]
struct Recorder {
    delivered: Mutex<Vec<OutputSet>>,
}

#[tokio::test]
async fn test_runner_with_custom_sink() {
    let recorder = Arc::new(Recorder::default());
    let captured = recorder.clone();
    let sink: Arc<dyn OutputSink> = Arc::new(move |outputs: OutputSet| -> Result<(), DeliveryError> {
        captured.delivered.lock().push(outputs);
        Ok(())
    });

    let schema = parse_flow(
        r#"{"flow": {"id": "f"}, "nodes": [{"id": "echo", "func": "return msg;"}]}"#,
        DslFormat::Json,
    )
    .unwrap();
    let mut runner = FlowRunner::builder(schema)
        .output_sink(sink)
        .deploy()
        .await
        .unwrap();

    runner
        .receive("echo", msg(json!({"_msgid": "e1", "payload": true})))
        .await
        .unwrap();

    let delivered = recorder.delivered.lock().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(only_message(&delivered[0]), json!({"_msgid": "e1", "payload": true}));
    runner.close_all().await.unwrap();
}

#[tokio::test]
async fn test_runner_rejects_invalid_flow() {
    let schema = parse_flow(
        r#"{"flow": {"id": "f"}, "nodes": [{"id": "a"}, {"id": "a"}]}"#,
        DslFormat::Json,
    )
    .unwrap();
    assert!(matches!(
        FlowRunner::builder(schema).deploy().await,
        Err(FlowError::DuplicateNode(_))
    ));
}
