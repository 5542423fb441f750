pub mod context_store;
pub mod dispatcher;
pub mod event_bus;
pub mod message;

pub use context_store::{ContextScope, ContextStore, ContextStoreError, InMemoryContextStore};
pub use dispatcher::{DeliveryMode, DispatchReport, MessageDispatcher, OutputSink};
pub use event_bus::{
    create_event_channel, EventReceiver, EventSender, LogLevel, NodeStatus, UnitEvent, UnitEvents,
};
pub use message::{msgid_text, Message, OpaqueKind, Outbound, OutputSet, ERROR_KEY, MSGID_KEY};
