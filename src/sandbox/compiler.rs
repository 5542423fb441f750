//! Code compiler: wraps a source fragment in the capability template and
//! evaluates it once into a callable [`CompiledScript`].

use std::rc::Rc;
use std::sync::OnceLock;

use boa_engine::{Context, JsError, JsObject, JsResult, JsValue, Source};
use regex::Regex;

use super::capability::Capabilities;
use super::convert::JsonBridge;
use super::error_translator::{self, Thrown, REFERENCE_MARKER};
use super::prelude;
use crate::config::SandboxConfig;
use crate::error::{CompileError, RuntimeError};

/// Capability parameters of the outer template function, in binding order.
pub const CAPABILITY_PARAMETERS: [&str; 9] = [
    "__node__",
    "context",
    "flow",
    "global",
    "env",
    "setTimeout",
    "clearTimeout",
    "setInterval",
    "clearInterval",
];

/// Lines the template places in front of the user source.
pub const TEMPLATE_PROLOGUE_LINES: usize = 1;

/// Wrap a source fragment in the template.
///
/// The outer function binds the capabilities; the inner one is called once
/// per message with `(msg, send, done)` and sees `node` bound to that call.
pub fn wrap_source(source: &str) -> String {
    format!(
        "(function({params}) {{ return function(msg, send, done) {{ var node = __node__.scope(send, done);\n{source}\n}}; }})",
        params = CAPABILITY_PARAMETERS.join(", "),
        source = source,
    )
}

fn done_call_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\bdone\s*\(").ok()).as_ref()
}

/// Whether a source calls `done(...)` itself.
pub fn manages_completion(source: &str) -> bool {
    done_call_pattern().is_some_and(|re| re.is_match(source))
}

pub struct CodeCompiler<'a> {
    config: &'a SandboxConfig,
}

impl<'a> CodeCompiler<'a> {
    pub fn new(config: &'a SandboxConfig) -> Self {
        Self { config }
    }

    fn validate_code(&self, source: &str) -> Result<(), CompileError> {
        if source.len() > self.config.max_code_length {
            return Err(CompileError::CodeTooLarge {
                max: self.config.max_code_length,
                actual: source.len(),
            });
        }
        Ok(())
    }

    /// Harden the context, evaluate the template and bind the capabilities.
    pub fn compile(
        &self,
        unit_id: &str,
        source: &str,
        capabilities: &Capabilities,
        context: &mut Context,
    ) -> Result<CompiledScript, CompileError> {
        self.validate_code(source)?;
        prelude::harden(context, self.config)?;

        let wrapped = wrap_source(source);
        let factory = context
            .eval(Source::from_bytes(&wrapped))
            .map_err(|e| CompileError::Syntax(e.to_string()))?;
        let factory = factory.as_callable().ok_or(CompileError::NotCallable)?;

        let handler = factory
            .call(&JsValue::undefined(), &capabilities.as_args(), context)
            .map_err(|e| CompileError::Sandbox(e.to_string()))?;
        let handler = handler
            .as_callable()
            .cloned()
            .ok_or(CompileError::NotCallable)?;

        tracing::debug!(unit_id = %unit_id, bytes = source.len(), "script compiled");

        Ok(CompiledScript {
            unit_id: unit_id.into(),
            wrapped_source: wrapped.into(),
            handler,
            manages_completion: manages_completion(source),
        })
    }
}

/// The per-message callable of one unit.
pub struct CompiledScript {
    unit_id: Rc<str>,
    wrapped_source: Rc<str>,
    handler: JsObject,
    manages_completion: bool,
}

impl CompiledScript {
    pub fn manages_completion(&self) -> bool {
        self.manages_completion
    }

    pub fn wrapped_source(&self) -> &str {
        &self.wrapped_source
    }

    pub fn invoke(
        &self,
        message: JsValue,
        send: JsValue,
        done: JsValue,
        context: &mut Context,
    ) -> JsResult<JsValue> {
        self.handler
            .call(&JsValue::undefined(), &[message, send, done], context)
    }

    /// Diagnostic for an error raised while running this script.
    pub fn diagnose(&self, error: &JsError, json: &JsonBridge, context: &mut Context) -> RuntimeError {
        let thrown = match json.thrown_from_error(error, context) {
            Thrown::Error { name, message, .. } if name == REFERENCE_MARKER => {
                let stack = error_translator::synthesize_reference_stack(
                    &self.unit_id,
                    &self.wrapped_source,
                    &message,
                );
                Thrown::Error {
                    name,
                    message,
                    stack,
                }
            }
            other => other,
        };
        RuntimeError::new(error_translator::translate(&thrown))
    }
}
