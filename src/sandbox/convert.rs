//! Conversions between script values and the host message model.

use boa_engine::object::builtins::{JsArray, JsArrayBuffer, JsDate, JsTypedArray};
use boa_engine::{js_string, Context, JsError, JsNativeError, JsObject, JsResult, JsValue};
use boa_gc::{Finalize, Trace};
use serde_json::{Map, Value};

use super::error_translator::{self, Thrown};
use crate::core::message::{Message, OpaqueKind, Outbound, MSGID_KEY};

/// Nesting depth down to which script arrays are read as slots / message lists.
const OUTBOUND_LIST_DEPTH: usize = 2;

/// `JSON.stringify`, captured before the global whitelist is applied so
/// conversions keep working whatever the script may reach.
#[derive(Clone, Trace, Finalize)]
pub struct JsonBridge {
    stringify: JsObject,
}

impl JsonBridge {
    pub fn capture(context: &mut Context) -> JsResult<Self> {
        let global = context.global_object();
        let json = global.get(js_string!("JSON"), context)?;
        let json = json
            .as_object()
            .cloned()
            .ok_or_else(|| JsNativeError::typ().with_message("JSON is not available"))?;
        let stringify = json.get(js_string!("stringify"), context)?;
        let stringify = stringify
            .as_callable()
            .cloned()
            .ok_or_else(|| JsNativeError::typ().with_message("JSON.stringify is not callable"))?;
        Ok(Self { stringify })
    }

    /// JSON form of a script value; `None` where JSON has no representation.
    pub fn to_json(&self, value: &JsValue, context: &mut Context) -> JsResult<Option<Value>> {
        let text = self
            .stringify
            .call(&JsValue::undefined(), &[value.clone()], context)?;
        match text.as_string() {
            Some(text) => serde_json::from_str(&text.to_std_string_escaped())
                .map(Some)
                .map_err(|e| JsNativeError::typ().with_message(e.to_string()).into()),
            None => Ok(None),
        }
    }

    pub fn from_json(&self, value: &Value, context: &mut Context) -> JsResult<JsValue> {
        JsValue::from_json(value, context)
    }

    pub fn message_to_js(&self, message: &Message, context: &mut Context) -> JsResult<JsValue> {
        JsValue::from_json(&Value::Object(message.as_map().clone()), context)
    }

    /// Read a `send`/return value into an [`Outbound`].
    ///
    /// Also returns the script objects behind every record, in the same
    /// pre-order the records appear in the result, for [`stamp_back`].
    pub fn to_outbound(
        &self,
        value: &JsValue,
        context: &mut Context,
    ) -> JsResult<(Outbound, Vec<JsObject>)> {
        let mut records = Vec::new();
        let outbound = self.outbound_at(value, 0, &mut records, context)?;
        Ok((outbound, records))
    }

    fn outbound_at(
        &self,
        value: &JsValue,
        depth: usize,
        records: &mut Vec<JsObject>,
        context: &mut Context,
    ) -> JsResult<Outbound> {
        if value.is_null_or_undefined() {
            return Ok(Outbound::Null);
        }
        if value.is_symbol() {
            return Ok(Outbound::Opaque(OpaqueKind::Symbol));
        }
        if value.is_bigint() {
            return Ok(Outbound::Opaque(OpaqueKind::BigInt));
        }

        let Some(object) = value.as_object() else {
            return Ok(self
                .to_json(value, context)?
                .map(Outbound::Scalar)
                .unwrap_or(Outbound::Null));
        };

        if object.is_callable() {
            return Ok(Outbound::Opaque(OpaqueKind::Function));
        }
        if object.is_array() {
            if depth >= OUTBOUND_LIST_DEPTH {
                return Ok(Outbound::List(Vec::new()));
            }
            let array = JsArray::from_object(object.clone())?;
            let length = array.length(context)?;
            let mut items = Vec::with_capacity(length as usize);
            for index in 0..length {
                let item = array.get(index as u32, context)?;
                items.push(self.outbound_at(&item, depth + 1, records, context)?);
            }
            return Ok(Outbound::List(items));
        }
        if JsDate::from_object(object.clone()).is_ok() {
            return Ok(Outbound::Opaque(OpaqueKind::Date));
        }
        if JsArrayBuffer::from_object(object.clone()).is_ok()
            || JsTypedArray::from_object(object.clone()).is_ok()
        {
            return Ok(Outbound::Opaque(OpaqueKind::Buffer));
        }

        match self.to_json(value, context)? {
            Some(Value::Object(map)) => {
                records.push(object.clone());
                Ok(Outbound::Record(map))
            }
            Some(other) => Ok(Outbound::Scalar(other)),
            None => Ok(Outbound::Null),
        }
    }

    /// Engine-independent form of a raised error.
    pub fn thrown_from_error(&self, error: &JsError, context: &mut Context) -> Thrown {
        if let Some(value) = error.as_opaque() {
            if let Some(text) = value.as_string() {
                return Thrown::Text(text.to_std_string_escaped());
            }
        }
        match error.try_native(context) {
            Ok(native) => Thrown::error(native.kind.to_string(), native.message()),
            Err(_) => match error.as_opaque() {
                Some(value) => match self.to_json(value, context) {
                    Ok(Some(json)) => Thrown::Value(json),
                    _ => Thrown::Text(error.to_string()),
                },
                None => Thrown::Text(error.to_string()),
            },
        }
    }

    /// Engine-independent form of a value handed to `done(err)`.
    pub fn thrown_from_value(&self, value: &JsValue, context: &mut Context) -> Thrown {
        self.thrown_from_error(&JsError::from_opaque(value.clone()), context)
    }
}

/// Mirror correlation-id stamps applied by the dispatcher onto the script's objects.
pub fn stamp_back(outbound: &Outbound, records: &[JsObject], context: &mut Context) -> JsResult<()> {
    let mut maps = Vec::with_capacity(records.len());
    collect_records(outbound, &mut maps);
    for (map, object) in maps.into_iter().zip(records) {
        if let Some(msgid) = map.get(MSGID_KEY) {
            let msgid = JsValue::from_json(msgid, context)?;
            object.set(js_string!(MSGID_KEY), msgid, false, context)?;
        }
    }
    Ok(())
}

fn collect_records<'a>(outbound: &'a Outbound, acc: &mut Vec<&'a Map<String, Value>>) {
    match outbound {
        Outbound::Record(map) => acc.push(map),
        Outbound::List(items) => items.iter().for_each(|item| collect_records(item, acc)),
        _ => {}
    }
}

/// Text form of a log argument.
///
/// Strings are used as-is and `Error` instances read `Name: message`;
/// everything else is JSON where possible.
pub fn display_value(json: &JsonBridge, value: &JsValue, context: &mut Context) -> String {
    if let Some(text) = value.as_string() {
        return text.to_std_string_escaped();
    }
    if value.is_object() {
        if let Ok(native) = JsError::from_opaque(value.clone()).try_native(context) {
            let thrown = Thrown::error(native.kind.to_string(), native.message());
            return error_translator::translate(&thrown);
        }
    }
    match json.to_json(value, context) {
        Ok(Some(json)) => json.to_string(),
        _ => value.display().to_string(),
    }
}
