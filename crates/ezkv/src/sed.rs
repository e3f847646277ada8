/*
 * sed.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! A tiny sed dialect for the `sed` filter.
//!
//! Supported commands, optionally guarded by an address regex:
//!
//! - `s/pattern/replacement/` substitute first match (`g` for all)
//! - `d` delete the entry
//! - `/addr/ s/.../.../` or `/addr/ d` apply only where `addr` matches
//!
//! The `s` delimiter can be any character. Anything else is a
//! [`Error::BadFilterExpression`].

use regex::Regex;

use crate::error::{Error, Result};

/// A parsed sed command.
#[derive(Debug, Clone)]
pub(crate) enum SedCommand {
    Substitute {
        address: Option<Regex>,
        pattern: Regex,
        replacement: String,
        global: bool,
    },
    Delete {
        address: Option<Regex>,
    },
}

impl SedCommand {
    /// Run the command. `None` means "drop this entry".
    pub(crate) fn execute(&self, input: &str) -> Option<String> {
        match self {
            SedCommand::Delete { address } => match address {
                Some(addr) if !addr.is_match(input) => Some(input.to_string()),
                _ => None,
            },
            SedCommand::Substitute {
                address,
                pattern,
                replacement,
                global,
            } => {
                if let Some(addr) = address {
                    if !addr.is_match(input) {
                        return Some(input.to_string());
                    }
                }
                let replaced = if *global {
                    pattern.replace_all(input, replacement.as_str())
                } else {
                    pattern.replace(input, replacement.as_str())
                };
                Some(replaced.into_owned())
            }
        }
    }
}

/// Parse a sed expression.
pub(crate) fn parse(expression: &str) -> Result<SedCommand> {
    let bad = |why: &str| {
        Error::BadFilterExpression(format!("Invalid sed expression '{expression}': {why}"))
    };
    let mut rest = expression.trim();

    let address = if let Some(after) = rest.strip_prefix('/') {
        let (addr, after) = take_until_delimiter(after, '/')
            .ok_or_else(|| bad("unterminated address"))?;
        rest = after.trim_start();
        Some(compile(&addr, expression)?)
    } else {
        None
    };

    let mut chars = rest.chars();
    match chars.next() {
        Some('d') => {
            if !chars.as_str().trim().is_empty() {
                return Err(bad("trailing characters after 'd'"));
            }
            Ok(SedCommand::Delete { address })
        }
        Some('s') => {
            let delimiter = chars.next().ok_or_else(|| bad("missing delimiter"))?;
            let body = chars.as_str();
            let (pattern, body) = take_until_delimiter(body, delimiter)
                .ok_or_else(|| bad("unterminated pattern"))?;
            let (replacement, flags) = take_until_delimiter(body, delimiter)
                .ok_or_else(|| bad("unterminated replacement"))?;
            let mut global = false;
            for flag in flags.trim().chars() {
                match flag {
                    'g' => global = true,
                    other => return Err(bad(&format!("unsupported flag '{other}'"))),
                }
            }
            Ok(SedCommand::Substitute {
                address,
                pattern: compile(&pattern, expression)?,
                replacement,
                global,
            })
        }
        Some(other) => Err(bad(&format!("unsupported command '{other}'"))),
        None => Err(bad("missing command")),
    }
}

/// Scan up to the next unescaped `delimiter`, unescaping `\<delimiter>`.
/// Returns the consumed text and the remainder after the delimiter.
fn take_until_delimiter(input: &str, delimiter: char) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some((_, next)) if next == delimiter => out.push(delimiter),
                Some((_, next)) => {
                    out.push('\\');
                    out.push(next);
                }
                None => {
                    out.push('\\');
                    break;
                }
            }
        } else if c == delimiter {
            return Some((out, &input[i + c.len_utf8()..]));
        } else {
            out.push(c);
        }
    }
    None
}

fn compile(pattern: &str, expression: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        Error::BadFilterExpression(format!(
            "Invalid regex in sed expression '{expression}': {e}"
        ))
    })
}
