//! Command token scanning
//!
//! A command is written `!name` optionally followed by a parenthesised
//! argument list of numbers, booleans and double-quoted strings, e.g.
//! `!goToPlayer("steve", 3)`. Only the first command in a text counts.

use regex::Regex;
use std::sync::LazyLock;

static COMMAND_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    const ARG: &str = r#"(?:-?\d+(?:\.\d+)?|true|false|"[^"]*")"#;
    let pattern = format!(r"!(\w+)(?:\(({ARG}(?:\s*,\s*{ARG})*)\))?");
    Regex::new(&pattern).expect("command pattern is valid")
});

/// The first command invocation found in a text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandToken<'a> {
    /// Command name including the leading `!`
    pub name: String,
    /// Raw argument list without parentheses
    pub args: Option<&'a str>,
    /// Byte offset of the `!`
    pub start: usize,
    /// Byte offset just past the invocation (after `)` when arguments are present)
    pub end: usize,
}

/// Find the first command invocation in `text`
pub fn find_command(text: &str) -> Option<CommandToken<'_>> {
    let captures = COMMAND_PATTERN.captures(text)?;
    let whole = captures.get(0)?;
    let name = captures.get(1)?;
    Some(CommandToken {
        name: format!("!{}", name.as_str()),
        args: captures.get(2).map(|m| m.as_str()),
        start: whole.start(),
        end: whole.end(),
    })
}

/// Cut everything after the first command invocation
pub fn truncate_at_command(text: &str) -> &str {
    match find_command(text) {
        Some(token) => &text[..token.end],
        None => text,
    }
}

/// Split text into the prose before the first command and the command tail
pub fn split_command_tail(text: &str) -> (&str, &str) {
    match find_command(text) {
        Some(token) => text.split_at(token.start),
        None => (text, ""),
    }
}
