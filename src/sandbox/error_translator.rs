//! Turns a raised script error into a concise single-line diagnostic.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::compiler::TEMPLATE_PROLOGUE_LINES;

/// Frame separating script frames from host frames.
pub const BOUNDARY_FRAME: &str = "at CompiledScript.invoke";

/// Marker of the only error kind whose stack is located.
pub const REFERENCE_MARKER: &str = "ReferenceError";

const NOT_DEFINED_SUFFIX: &str = " is not defined";

/// A value raised by a script, in engine-independent form.
#[derive(Debug, Clone, PartialEq)]
pub enum Thrown {
    /// An `Error` instance (or engine error).
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
    /// A thrown plain string.
    Text(String),
    /// Any other thrown value, in JSON form.
    Value(Value),
}

impl Thrown {
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Thrown::Error {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }
}

fn location_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r":(\d+):(\d+)$").ok())
        .as_ref()
}

/// Build the diagnostic for a thrown value.
pub fn translate(thrown: &Thrown) -> String {
    match thrown {
        Thrown::Error {
            name,
            message,
            stack,
        } => {
            let fallback = if message.is_empty() {
                name.clone()
            } else {
                format!("{}: {}", name, message)
            };
            stack
                .as_deref()
                .and_then(locate_reference_error)
                .unwrap_or(fallback)
        }
        Thrown::Text(text) => text.clone(),
        Thrown::Value(value) => value.to_string(),
    }
}

fn locate_reference_error(stack: &str) -> Option<String> {
    let lines: Vec<&str> = stack
        .lines()
        .take_while(|line| !line.trim_start().starts_with(BOUNDARY_FRAME))
        .collect();

    let index = lines
        .iter()
        .position(|line| line.starts_with(REFERENCE_MARKER))?;
    let mut diagnostic = lines[index].to_string();

    let location = lines
        .get(index + 1)
        .and_then(|frame| location_pattern()?.captures(frame.trim_end()))
        .and_then(|caps| {
            let line: usize = caps.get(1)?.as_str().parse().ok()?;
            let col: usize = caps.get(2)?.as_str().parse().ok()?;
            Some((line.saturating_sub(TEMPLATE_PROLOGUE_LINES), col))
        });
    if let Some((line, col)) = location {
        diagnostic.push_str(&format!(" (line {}, col {})", line, col));
    }
    Some(diagnostic)
}

/// Build a stack for a `ReferenceError` raised while running `wrapped_source`.
///
/// The engine does not track source positions for unresolved bindings, so the
/// frame points at the first plain reference to the missing identifier after
/// the template prologue. Comments and string literals are not searched.
pub fn synthesize_reference_stack(
    unit_id: &str,
    wrapped_source: &str,
    message: &str,
) -> Option<String> {
    let identifier = message.strip_suffix(NOT_DEFINED_SUFFIX)?;
    if identifier.is_empty() {
        return None;
    }
    let pattern = Regex::new(&format!(
        r"(?:^|[^\w$.]){}(?:[^\w$]|$)",
        regex::escape(identifier)
    ))
    .ok()?;

    let mut frame = format!("    {}", BOUNDARY_FRAME);
    let mut state = ScanState::Code;
    for (index, text) in wrapped_source.lines().enumerate().skip(TEMPLATE_PROLOGUE_LINES) {
        let code = mask_non_code(text, &mut state);
        if let Some(found) = pattern.find(&code) {
            let start = found.start() + found.as_str().find(identifier).unwrap_or(0);
            let col = code[..start].chars().count() + 1;
            frame = format!("    at {}:{}:{}\n{}", unit_id, index + 1, col, frame);
            break;
        }
    }

    Some(format!("{}: {}\n{} (native)", REFERENCE_MARKER, message, frame))
}

/// Lexical context carried from one source line to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    BlockComment,
    Template,
}

/// Blank out comments and string literals of one line, keeping one char per char.
fn mask_non_code(line: &str, state: &mut ScanState) -> String {
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (*state, quote) {
            (ScanState::BlockComment, _) => {
                out.push(' ');
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push(' ');
                    *state = ScanState::Code;
                }
            }
            (ScanState::Template, _) | (ScanState::Code, Some(_)) => {
                out.push(' ');
                if c == '\\' {
                    if chars.next().is_some() {
                        out.push(' ');
                    }
                } else if *state == ScanState::Template && c == '`' {
                    *state = ScanState::Code;
                } else if quote == Some(c) {
                    quote = None;
                }
            }
            (ScanState::Code, None) => match c {
                '/' if chars.peek() == Some(&'/') => {
                    out.extend(std::iter::repeat(' ').take(1 + chars.by_ref().count()));
                    break;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    *state = ScanState::BlockComment;
                }
                '\'' | '"' => {
                    out.push(' ');
                    quote = Some(c);
                }
                '`' => {
                    out.push(' ');
                    *state = ScanState::Template;
                }
                _ => out.push(c),
            },
        }
    }
    out
}
