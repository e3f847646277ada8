/*
 * properties.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The flat properties format.
//!
//! Key/value lines with `=`, `:`, or whitespace separators, `#`/`!`
//! comments, trailing-backslash continuation, and `\n` `\r` `\t` `\f`
//! `\uXXXX` escapes in keys and values. The formatter emits canonical
//! escaped `key=value` pairs, one per line, with no header.
//!
//! The escape rules are encoding-agnostic: non-ASCII characters pass
//! through untouched rather than being transcoded.

use crate::error::{Error, Result};
use crate::kvs::KeyValues;

/// Parse properties text, emitting each pair in order.
pub fn parse(input: &str, emit: &mut dyn FnMut(String, String)) -> Result<()> {
    let mut logical = String::new();
    let mut continuing = false;

    for line in input.lines() {
        if !continuing {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                continue;
            }
            logical.clear();
            logical.push_str(trimmed);
        } else {
            logical.push_str(line.trim_start());
        }
        if ends_with_odd_backslashes(&logical) {
            logical.pop();
            continuing = true;
            continue;
        }
        continuing = false;
        parse_logical_line(&logical, emit)?;
    }
    // A dangling continuation at EOF still yields its pair.
    if continuing && !logical.is_empty() {
        parse_logical_line(&logical, emit)?;
    }
    Ok(())
}

/// Format each pair as an escaped `key=value` line.
pub fn format(out: &mut String, kvs: &KeyValues) -> Result<()> {
    for kv in kvs {
        escape_into(out, kv.key(), true);
        out.push('=');
        escape_into(out, kv.expanded(), false);
        out.push('\n');
    }
    Ok(())
}

fn ends_with_odd_backslashes(s: &str) -> bool {
    s.bytes().rev().take_while(|b| *b == b'\\').count() % 2 == 1
}

fn is_separator_ws(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\u{c}'
}

fn parse_logical_line(line: &str, emit: &mut dyn FnMut(String, String)) -> Result<()> {
    let chars: Vec<char> = line.chars().collect();
    let len = chars.len();

    let mut i = 0;
    let mut separator = None;
    while i < len {
        let c = chars[i];
        if c == '\\' {
            i += 2;
            continue;
        }
        if c == '=' || c == ':' || is_separator_ws(c) {
            separator = Some(i);
            break;
        }
        i += 1;
    }

    let (key_chars, value_chars) = match separator {
        None => (&chars[..], &chars[len..]),
        Some(pos) => {
            let mut j = pos;
            if is_separator_ws(chars[pos]) {
                while j < len && is_separator_ws(chars[j]) {
                    j += 1;
                }
                // Whitespace may precede the real `=` or `:` separator.
                if j < len && (chars[j] == '=' || chars[j] == ':') {
                    j += 1;
                }
            } else {
                j += 1;
            }
            while j < len && is_separator_ws(chars[j]) {
                j += 1;
            }
            (&chars[..pos], &chars[j..])
        }
    };

    let key = unescape(key_chars)?;
    let value = unescape(value_chars)?;
    emit(key, value);
    Ok(())
}

fn unescape(chars: &[char]) -> Result<String> {
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }
        i += 1;
        let Some(&escaped) = chars.get(i) else {
            break;
        };
        i += 1;
        match escaped {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'f' => out.push('\u{c}'),
            'u' => {
                let hex: String = chars.get(i..i + 4).map(|w| w.iter().collect()).unwrap_or_default();
                let code = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32);
                match code {
                    Some(decoded) => {
                        out.push(decoded);
                        i += 4;
                    }
                    None => {
                        return Err(Error::Media(format!(
                            "Malformed \\u escape in properties: '\\u{hex}'"
                        )))
                    }
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn escape_into(out: &mut String, s: &str, escape_all_spaces: bool) {
    let mut leading = true;
    for c in s.chars() {
        if c != ' ' {
            leading = false;
        }
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{c}' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            ' ' if escape_all_spaces || leading => out.push_str("\\ "),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04X}", c as u32));
            }
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_pairs(input: &str) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        parse(input, &mut |k, v| pairs.push((k, v))).unwrap();
        pairs
    }

    #[test]
    fn test_separators() {
        let pairs = parse_pairs("a=1\nb:2\nc 3\nd\t4\ne = 5\nf : 6\ng\t=\t7\n");
        let expected: Vec<(String, String)> = [
            ("a", "1"),
            ("b", "2"),
            ("c", "3"),
            ("d", "4"),
            ("e", "5"),
            ("f", "6"),
            ("g", "7"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_comments_and_blanks() {
        let pairs = parse_pairs("# comment\n  ! also comment\n\na=1\n");
        assert_eq!(pairs, vec![("a".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_continuation() {
        let pairs = parse_pairs("fruits=apple, \\\n    banana, \\\n    pear\n");
        assert_eq!(
            pairs,
            vec![("fruits".to_string(), "apple, banana, pear".to_string())]
        );
    }

    #[test]
    fn test_escaped_backslash_is_not_continuation() {
        let pairs = parse_pairs("path=C\\\\\nnext=1\n");
        assert_eq!(
            pairs,
            vec![
                ("path".to_string(), "C\\".to_string()),
                ("next".to_string(), "1".to_string())
            ]
        );
    }

    #[test]
    fn test_escapes() {
        let pairs = parse_pairs("tab=a\\tb\nnl=a\\nb\nuni=\\u0041\nkey\\ with\\ space=v\n");
        assert_eq!(pairs[0].1, "a\tb");
        assert_eq!(pairs[1].1, "a\nb");
        assert_eq!(pairs[2].1, "A");
        assert_eq!(pairs[3].0, "key with space");
    }

    #[test]
    fn test_bad_unicode_escape() {
        let mut sink = |_k: String, _v: String| {};
        let err = parse("a=\\uZZZZ\n", &mut sink).unwrap_err();
        assert!(matches!(err, Error::Media(_)));
    }

    #[test]
    fn test_key_only_line() {
        let pairs = parse_pairs("lonely\n");
        assert_eq!(pairs, vec![("lonely".to_string(), String::new())]);
    }

    #[test]
    fn test_duplicates_preserved_in_order() {
        let pairs = parse_pairs("a=1\nb=2\na=3\n");
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2], ("a".to_string(), "3".to_string()));
    }

    #[test]
    fn test_format_escapes() {
        let mut b = KeyValues::builder();
        b.add("a key", "v=1");
        b.add("uri", "system:///");
        let mut out = String::new();
        format(&mut out, &b.build()).unwrap();
        assert_eq!(out, "a\\ key=v\\=1\nuri=system\\:///\n");
    }

    #[test]
    fn test_format_preserves_duplicates() {
        let mut b = KeyValues::builder();
        b.add("a", "1");
        b.add("a", "2");
        let mut out = String::new();
        format(&mut out, &b.build()).unwrap();
        assert_eq!(out, "a=1\na=2\n");
    }

    #[test]
    fn test_roundtrip_value_with_leading_space() {
        let mut b = KeyValues::builder();
        b.add("k", "  padded");
        let mut out = String::new();
        format(&mut out, &b.build()).unwrap();
        assert_eq!(out, "k=\\ \\ padded\n");
        let pairs = parse_pairs(&out);
        assert_eq!(pairs[0].1, "  padded");
    }
}
