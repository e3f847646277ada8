/*
 * uri.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! A minimal URI representation.
//!
//! The loader only needs the scheme (handler selection), the path (resource
//! location or key selector), and the query (resource metadata), so this is
//! a deliberately small split of the generic `scheme://authority/path?query`
//! shape plus the percent codecs the URL-encoded media shares.

use std::fmt;

/// A parsed URI. Parsing never fails: anything that does not look like it
/// has a scheme is treated as a bare (file) path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    raw: String,
    scheme: Option<String>,
    authority: Option<String>,
    path: String,
    query: Option<String>,
}

impl Uri {
    /// Parse a URI string into its parts.
    pub fn parse(input: &str) -> Uri {
        let raw = input.to_string();
        let mut rest = input;

        let query = match rest.find('?') {
            Some(i) => {
                let q = &rest[i + 1..];
                rest = &rest[..i];
                Some(q.to_string())
            }
            None => None,
        };

        let scheme = split_scheme(rest).map(|(s, r)| {
            rest = r;
            s.to_string()
        });

        let authority = if let Some(stripped) = rest.strip_prefix("//") {
            match stripped.find('/') {
                Some(i) => {
                    let a = &stripped[..i];
                    rest = &stripped[i..];
                    Some(a.to_string())
                }
                None => {
                    let a = stripped;
                    rest = "";
                    Some(a.to_string())
                }
            }
        } else {
            None
        };

        Uri {
            raw,
            scheme,
            authority,
            path: rest.to_string(),
            query,
        }
    }

    /// The scheme, if present. Absence means `file`.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// The path portion, exactly as written (possibly empty).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The path with a leading `/` removed; `""` for `/` or empty paths.
    ///
    /// Schemes like `system`, `env`, and `stdin` use this as a key
    /// selector, and `classpath` uses it as the lookup path.
    pub fn normalized_path(&self) -> &str {
        let p = self.path.as_str();
        if p == "/" {
            ""
        } else {
            p.strip_prefix('/').unwrap_or(p)
        }
    }

    /// The file extension of the last path segment, if any.
    pub fn file_ext(&self) -> Option<&str> {
        let last = self.path.rsplit('/').next()?;
        let (_, ext) = last.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext)
        }
    }

    /// Rebuild this URI with a different (or removed) query string.
    pub fn with_query(&self, query: Option<&str>) -> Uri {
        let mut s = String::new();
        if let Some(scheme) = &self.scheme {
            s.push_str(scheme);
            s.push(':');
        }
        if let Some(authority) = &self.authority {
            s.push_str("//");
            s.push_str(authority);
        }
        s.push_str(&self.path);
        if let Some(q) = query {
            s.push('?');
            s.push_str(q);
        }
        Uri::parse(&s)
    }

    /// The full URI string as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split off a leading `scheme:` if the prefix is a valid scheme name.
fn split_scheme(input: &str) -> Option<(&str, &str)> {
    let colon = input.find(':')?;
    if colon == 0 {
        return None;
    }
    let candidate = &input[..colon];
    let mut chars = candidate.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    // A slash before the colon means the colon is part of a path.
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.') {
        return None;
    }
    Some((candidate, &input[colon + 1..]))
}

/// Percent-decode a URL-encoded component. `+` decodes to a space.
pub(crate) fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = bytes.get(i + 1..i + 3);
                match hex.and_then(|h| {
                    std::str::from_utf8(h).ok().and_then(|h| u8::from_str_radix(h, 16).ok())
                }) {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encode a component for the URL-encoded media. Spaces become `+`.
pub(crate) fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'*' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let u = Uri::parse("classpath:/app.properties?_flags=optional");
        assert_eq!(u.scheme(), Some("classpath"));
        assert_eq!(u.path(), "/app.properties");
        assert_eq!(u.query(), Some("_flags=optional"));
        assert_eq!(u.normalized_path(), "app.properties");
        assert_eq!(u.file_ext(), Some("properties"));
    }

    #[test]
    fn test_parse_authority() {
        let u = Uri::parse("system:///");
        assert_eq!(u.scheme(), Some("system"));
        assert_eq!(u.authority.as_deref(), Some(""));
        assert_eq!(u.path(), "/");
        assert_eq!(u.normalized_path(), "");
    }

    #[test]
    fn test_parse_bare_path() {
        let u = Uri::parse("conf/app.properties");
        assert_eq!(u.scheme(), None);
        assert_eq!(u.path(), "conf/app.properties");
    }

    #[test]
    fn test_dotted_scheme() {
        let u = Uri::parse("profile.classpath:/app-__PROFILE__.properties");
        assert_eq!(u.scheme(), Some("profile.classpath"));
    }

    #[test]
    fn test_with_query() {
        let u = Uri::parse("env:///?_filter_grep=^X");
        let stripped = u.with_query(None);
        assert_eq!(stripped.as_str(), "env:///");
        let replaced = u.with_query(Some("a=b"));
        assert_eq!(replaced.as_str(), "env:///?a=b");
    }

    #[test]
    fn test_percent_roundtrip() {
        assert_eq!(percent_decode("a%3Db+c"), "a=b c");
        assert_eq!(percent_encode("a=b c"), "a%3Db+c");
        assert_eq!(percent_decode("plain"), "plain");
    }

    #[test]
    fn test_colon_in_path_is_not_scheme() {
        let u = Uri::parse("some/dir:file");
        assert_eq!(u.scheme(), None);
        assert_eq!(u.path(), "some/dir:file");
    }
}
