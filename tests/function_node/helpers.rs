#![allow(unused)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use xworkflow_function::core::{create_event_channel, EventReceiver, LogLevel};
use xworkflow_function::error::ErrorContext;
use xworkflow_function::{
    ContextStore, FlowInfo, FunctionNode, FunctionRuntimeConfig, InMemoryContextStore, Message,
    OutputSet, UnitDefinition, UnitEvent, UnitServices,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub async fn with_timeout<F, T>(label: &str, duration: Duration, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, f)
        .await
        .unwrap_or_else(|_| panic!("'{}' timed out after {:?}", label, duration))
}

pub fn msg(value: Value) -> Message {
    Message::from_value(value).expect("test message must be a JSON object")
}

pub fn test_flow() -> FlowInfo {
    FlowInfo {
        id: "flow-1".into(),
        name: "Test Flow".into(),
        env: HashMap::new(),
    }
}

/// A deployed unit plus the receiving end of its event channel.
pub struct TestUnit {
    pub node: FunctionNode,
    pub events: EventReceiver,
}

pub async fn deploy(func: &str, outputs: usize) -> TestUnit {
    deploy_with(func, outputs, FunctionRuntimeConfig::default()).await
}

pub async fn deploy_with(func: &str, outputs: usize, config: FunctionRuntimeConfig) -> TestUnit {
    deploy_full(
        UnitDefinition::function("fn1", func, outputs),
        test_flow(),
        Arc::new(InMemoryContextStore::new()),
        config,
    )
    .await
}

pub async fn deploy_full(
    definition: UnitDefinition,
    flow: FlowInfo,
    store: Arc<dyn ContextStore>,
    config: FunctionRuntimeConfig,
) -> TestUnit {
    let (tx, events) = create_event_channel();
    let services = UnitServices {
        events: tx,
        store,
        flow,
        config,
        sink: None,
    };
    let node = with_timeout("deploy", WAIT, FunctionNode::deploy(&definition, services))
        .await
        .expect("deploy failed");
    TestUnit { node, events }
}

impl TestUnit {
    pub async fn send(&self, value: Value) {
        with_timeout("receive", WAIT, self.node.receive(msg(value)))
            .await
            .expect("receive failed");
    }

    /// Every event already queued.
    pub fn drain(&mut self) -> Vec<UnitEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the first event matching `pred`, discarding the ones before it.
    pub async fn wait_for<F>(&mut self, label: &str, pred: F) -> UnitEvent
    where
        F: Fn(&UnitEvent) -> bool,
    {
        with_timeout(label, WAIT, async {
            loop {
                match self.events.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event channel closed while waiting for {}", label),
                }
            }
        })
        .await
    }

    /// Every event arriving within `window`.
    pub async fn collect_for(&mut self, window: Duration) -> Vec<UnitEvent> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            events.push(event);
        }
        events
    }
}

pub fn outputs(events: &[UnitEvent]) -> Vec<OutputSet> {
    events
        .iter()
        .filter_map(|event| match event {
            UnitEvent::Output { outputs, .. } => Some(outputs.clone()),
            _ => None,
        })
        .collect()
}

pub fn errors(events: &[UnitEvent]) -> Vec<(ErrorContext, Option<Message>)> {
    events
        .iter()
        .filter_map(|event| match event {
            UnitEvent::Error { error, message, .. } => Some((error.clone(), message.clone())),
            _ => None,
        })
        .collect()
}

pub fn completions(events: &[UnitEvent]) -> Vec<(String, Option<String>)> {
    events
        .iter()
        .filter_map(|event| match event {
            UnitEvent::Completed { msgid, error, .. } => Some((msgid.clone(), error.clone())),
            _ => None,
        })
        .collect()
}

pub fn logs(events: &[UnitEvent]) -> Vec<(LogLevel, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            UnitEvent::Log { level, message, .. } => Some((*level, message.clone())),
            _ => None,
        })
        .collect()
}

pub fn is_output(event: &UnitEvent) -> bool {
    matches!(event, UnitEvent::Output { .. })
}

pub fn is_error(event: &UnitEvent) -> bool {
    matches!(event, UnitEvent::Error { .. })
}

pub fn is_completed(event: &UnitEvent) -> bool {
    matches!(event, UnitEvent::Completed { .. })
}

/// The only message of a single-message output set.
pub fn only_message(set: &OutputSet) -> Value {
    assert_eq!(set.message_count(), 1, "expected exactly one message in {:?}", set);
    set.iter()
        .next()
        .map(|(_, message)| message.clone().into_value())
        .expect("one message")
}
