//! In-process flow host.
//!
//! [`FlowRunner`] (constructed via [`FlowRunnerBuilder`]) deploys every unit
//! of a parsed flow schema against one shared context store and one event
//! channel, then routes inbound messages to units by id.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::FunctionRuntimeConfig;
use crate::core::context_store::{ContextStore, InMemoryContextStore};
use crate::core::dispatcher::OutputSink;
use crate::core::event_bus::{create_event_channel, EventReceiver};
use crate::core::message::Message;
use crate::dsl::schema::{FlowInfo, FlowSchema};
use crate::dsl::validator::validate_flow_schema;
use crate::error::FlowError;
use crate::nodes::execution::{CloseReport, UnitSnapshot};
use crate::nodes::function_node::{FunctionNode, UnitServices};

/// Deployed flow.
///
/// Use [`FlowRunner::builder(schema)`](Self::builder) to obtain a
/// [`FlowRunnerBuilder`].
pub struct FlowRunner {
    flow: FlowInfo,
    units: Vec<FunctionNode>,
    index: HashMap<String, usize>,
    store: Arc<dyn ContextStore>,
    events: Option<EventReceiver>,
}

impl FlowRunner {
    /// Create a new builder from a parsed flow schema.
    pub fn builder(schema: FlowSchema) -> FlowRunnerBuilder {
        FlowRunnerBuilder {
            schema,
            store: None,
            config: None,
            env_overrides: false,
            sink: None,
        }
    }

    pub fn flow(&self) -> &FlowInfo {
        &self.flow
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|unit| unit.id())
    }

    pub fn unit(&self, node_id: &str) -> Option<&FunctionNode> {
        self.index.get(node_id).map(|&i| &self.units[i])
    }

    pub fn context_store(&self) -> Arc<dyn ContextStore> {
        self.store.clone()
    }

    /// Take the receiving end of the unit event channel.
    ///
    /// Returns `None` once taken. Outputs forwarded as events fail to deliver
    /// after the receiver is dropped.
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    fn find(&self, node_id: &str) -> Result<&FunctionNode, FlowError> {
        self.unit(node_id)
            .ok_or_else(|| FlowError::NodeNotFound(node_id.to_string()))
    }

    /// Route one message to a unit.
    pub async fn receive(&self, node_id: &str, message: Message) -> Result<(), FlowError> {
        Ok(self.find(node_id)?.receive(message).await?)
    }

    pub async fn inspect(&self, node_id: &str) -> Result<UnitSnapshot, FlowError> {
        Ok(self.find(node_id)?.inspect().await?)
    }

    /// Close every unit, in deployment order.
    pub async fn close_all(&mut self) -> Result<Vec<(String, CloseReport)>, FlowError> {
        let mut reports = Vec::with_capacity(self.units.len());
        for unit in &mut self.units {
            let report = unit.close().await?;
            reports.push((unit.id().to_string(), report));
        }
        tracing::info!(flow_id = %self.flow.id, units = reports.len(), "flow closed");
        Ok(reports)
    }
}

/// Builder for configuring and deploying a [`FlowRunner`].
pub struct FlowRunnerBuilder {
    schema: FlowSchema,
    store: Option<Arc<dyn ContextStore>>,
    config: Option<FunctionRuntimeConfig>,
    env_overrides: bool,
    sink: Option<Arc<dyn OutputSink>>,
}

impl FlowRunnerBuilder {
    /// Share a context store with other flows; defaults to a fresh in-memory store.
    pub fn context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the schema's `runtime` section.
    pub fn config(mut self, config: FunctionRuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Apply `XWORKFLOW_FUNCTION_*` environment overrides on top of the config.
    pub fn env_overrides(mut self, enabled: bool) -> Self {
        self.env_overrides = enabled;
        self
    }

    /// Deliver outputs of every unit to `sink` instead of the event channel.
    pub fn output_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the schema and deploy every unit.
    ///
    /// Units failing to compile are deployed inert; their compile error is the
    /// first event they emit.
    pub async fn deploy(self) -> Result<FlowRunner, FlowError> {
        validate_flow_schema(&self.schema)?;

        let FlowSchema {
            flow,
            runtime,
            nodes,
            ..
        } = self.schema;
        let mut config = self.config.unwrap_or(runtime);
        if self.env_overrides {
            config = config.with_env_overrides();
        }
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryContextStore::new()) as Arc<dyn ContextStore>);
        let (tx, rx) = create_event_channel();

        let services = UnitServices {
            events: tx,
            store: store.clone(),
            flow: flow.clone(),
            config,
            sink: self.sink,
        };

        let mut units = Vec::with_capacity(nodes.len());
        let mut index = HashMap::with_capacity(nodes.len());
        for definition in &nodes {
            let unit = FunctionNode::deploy(definition, services.clone()).await?;
            index.insert(definition.id.clone(), units.len());
            units.push(unit);
        }
        tracing::info!(flow_id = %flow.id, units = units.len(), "flow deployed");

        Ok(FlowRunner {
            flow,
            units,
            index,
            store,
            events: Some(rx),
        })
    }
}
