//! Message model: inbound messages, raw script results and normalized output sets.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which the correlation id travels.
pub const MSGID_KEY: &str = "_msgid";

/// Key under which an error payload travels.
pub const ERROR_KEY: &str = "error";

/// A message flowing between units: a JSON record plus its correlation id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build a message from any JSON value; only objects are accepted.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn msgid(&self) -> Option<&str> {
        self.0.get(MSGID_KEY).and_then(|v| v.as_str())
    }

    /// The correlation id whatever its JSON type.
    pub fn msgid_value(&self) -> Option<&Value> {
        self.0.get(MSGID_KEY)
    }

    pub fn set_msgid(&mut self, msgid: impl Into<Value>) {
        self.0.insert(MSGID_KEY.to_string(), msgid.into());
    }

    pub fn error(&self) -> Option<&Value> {
        self.0.get(ERROR_KEY)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Text form of a correlation id: strings as-is, anything else as JSON.
pub fn msgid_text(msgid: &Value) -> String {
    match msgid {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Values that exist in the script world but have no plain-record form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpaqueKind {
    Buffer,
    Date,
    Function,
    Symbol,
    BigInt,
}

impl OpaqueKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            OpaqueKind::Buffer => "Buffer",
            OpaqueKind::Date => "Date",
            OpaqueKind::Function => "function",
            OpaqueKind::Symbol => "symbol",
            OpaqueKind::BigInt => "bigint",
        }
    }
}

/// A raw, not yet validated result as produced by one script invocation.
///
/// The top level is either a single message or one slot per output channel;
/// each slot is either a single message or a list of messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Null,
    Record(Map<String, Value>),
    List(Vec<Outbound>),
    Opaque(OpaqueKind),
    Scalar(Value),
}

impl Outbound {
    pub fn is_null(&self) -> bool {
        matches!(self, Outbound::Null)
    }

    /// Type name used in validation diagnostics.
    pub fn type_name(&self) -> String {
        match self {
            Outbound::Null => "null".to_string(),
            Outbound::Record(_) => "object".to_string(),
            Outbound::List(_) => "Array".to_string(),
            Outbound::Opaque(kind) => kind.type_name().to_string(),
            Outbound::Scalar(Value::Bool(_)) => "boolean".to_string(),
            Outbound::Scalar(Value::Number(_)) => "number".to_string(),
            Outbound::Scalar(Value::String(_)) => "string".to_string(),
            Outbound::Scalar(other) => format!("{:?}", other),
        }
    }
}

impl From<Value> for Outbound {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Outbound::Null,
            Value::Object(map) => Outbound::Record(map),
            Value::Array(items) => Outbound::List(items.into_iter().map(Outbound::from).collect()),
            other => Outbound::Scalar(other),
        }
    }
}

impl From<Message> for Outbound {
    fn from(message: Message) -> Self {
        Outbound::Record(message.0)
    }
}

/// A normalized result: one list of messages per declared output channel.
///
/// An empty list means "no message for that channel".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputSet(Vec<Vec<Message>>);

impl OutputSet {
    pub fn with_channels(channels: usize) -> Self {
        Self(vec![Vec::new(); channels])
    }

    /// An output set carrying exactly one message on one channel.
    pub fn single(channels: usize, channel: usize, message: Message) -> Self {
        let mut set = Self::with_channels(channels);
        if let Some(slot) = set.0.get_mut(channel) {
            slot.push(message);
        }
        set
    }

    pub fn push(&mut self, channel: usize, message: Message) {
        if let Some(slot) = self.0.get_mut(channel) {
            slot.push(message);
        }
    }

    pub fn channels(&self) -> usize {
        self.0.len()
    }

    pub fn channel(&self, index: usize) -> &[Message] {
        self.0.get(index).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn message_count(&self) -> usize {
        self.0.iter().map(|slot| slot.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.message_count() == 0
    }

    /// Iterate `(channel, message)` pairs in channel order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Message)> {
        self.0
            .iter()
            .enumerate()
            .flat_map(|(channel, slot)| slot.iter().map(move |m| (channel, m)))
    }

    pub fn into_inner(self) -> Vec<Vec<Message>> {
        self.0
    }
}
