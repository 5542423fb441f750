//! Engine hardening applied before a unit's template is evaluated.

use boa_engine::{Context, Source};

use crate::config::SandboxConfig;
use crate::error::CompileError;

/// Apply runtime limits and reduce the global object to the configured whitelist.
pub fn harden(context: &mut Context, config: &SandboxConfig) -> Result<(), CompileError> {
    apply_runtime_limits(context, config);
    context
        .eval(Source::from_bytes(&global_whitelist(config)))
        .map_err(|e| CompileError::Sandbox(e.to_string()))?;
    Ok(())
}

fn apply_runtime_limits(context: &mut Context, config: &SandboxConfig) {
    let limits = context.runtime_limits_mut();
    if let Some(limit) = config.loop_iteration_limit {
        limits.set_loop_iteration_limit(limit);
    }
    if let Some(limit) = config.recursion_limit {
        limits.set_recursion_limit(limit);
    }
}

/// Script deleting every non-whitelisted global, then optionally freezing.
///
/// Runs inside its own function so none of its helpers survive as globals.
pub fn global_whitelist(config: &SandboxConfig) -> String {
    let mut allowed = config.allowed_globals.clone();
    allowed.sort();
    allowed.dedup();
    let allowed_list = allowed
        .iter()
        .map(|s| serde_json::Value::String(s.clone()).to_string())
        .collect::<Vec<_>>()
        .join(",");

    let freeze = if config.freeze_globals {
        "O.freeze(g); O.freeze(O.prototype); O.freeze(A.prototype); if (typeof F !== 'undefined') { O.freeze(F.prototype); }"
    } else {
        ""
    };

    format!(
        r#"(function() {{
    var g = (typeof globalThis !== 'undefined') ? globalThis : this;
    var O = g.Object;
    var A = g.Array;
    var F = g.Function;
    var allowed = [{allowed_list}];
    O.getOwnPropertyNames(g).forEach(function(key) {{
        if (allowed.indexOf(key) === -1) {{
            try {{ delete g[key]; }} catch (e) {{ g[key] = undefined; }}
        }}
    }});
    {freeze}
}})();"#,
        allowed_list = allowed_list,
        freeze = freeze,
    )
}
