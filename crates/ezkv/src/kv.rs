/*
 * kv.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The key-value record.
//!
//! A [`KeyValue`] is an immutable (key, raw, expanded) triple with
//! provenance. `raw` is the value exactly as parsed; `expanded` is the
//! value after interpolation and equals `raw` until interpolation runs.
//! Provenance records the source URI, a 1-based index within that source,
//! and optionally the key-value that declared the source (forming a chain
//! back to a root resource).

use std::fmt;

use crate::uri::Uri;

/// Value printed in place of sensitive values.
pub const REDACTED_MESSAGE: &str = "REDACTED";

bitflags::bitflags! {
    /// Per-entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyValueFlags: u8 {
        /// The value is a secret: global interpolation passes it through
        /// and redacted views print `REDACTED` instead of the value.
        const SENSITIVE = 1 << 0;
        /// The value is never interpolated; `expanded` stays `raw`.
        const NO_INTERPOLATION = 1 << 1;
    }
}

/// Provenance of a key-value: where it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// URI of the resource that produced the entry.
    pub uri: Uri,
    /// The key-value that declared the resource, when the resource was
    /// chained from another one. Boxed because references chain.
    pub reference: Option<Box<KeyValue>>,
    /// 1-based position within the declaring resource; 0 when unsourced.
    pub index: usize,
}

impl Source {
    /// The URI used for entries that have no real source.
    pub fn null_uri() -> Uri {
        Uri::parse("null:///")
    }

    /// An empty source.
    pub fn empty() -> Source {
        Source {
            uri: Source::null_uri(),
            reference: None,
            index: 0,
        }
    }
}

/// Metadata attached to a key-value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// The key as originally parsed, before any filter renamed it.
    pub original_key: String,
    /// Where the entry came from.
    pub source: Source,
    /// Entry flags.
    pub flags: KeyValueFlags,
}

/// An immutable key-value pair with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    key: String,
    raw: String,
    expanded: String,
    meta: Meta,
}

impl KeyValue {
    /// Create a key-value with the given metadata. `expanded` starts as
    /// `raw`.
    pub fn new(key: impl Into<String>, raw: impl Into<String>, meta: Meta) -> KeyValue {
        let raw = raw.into();
        KeyValue {
            key: key.into(),
            expanded: raw.clone(),
            raw,
            meta,
        }
    }

    /// Create a key-value with no source.
    pub fn of(key: impl Into<String>, raw: impl Into<String>) -> KeyValue {
        let key = key.into();
        KeyValue::new(
            key.clone(),
            raw,
            Meta {
                original_key: key,
                source: Source::empty(),
                flags: KeyValueFlags::empty(),
            },
        )
    }

    /// The key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The current value: the expanded value.
    pub fn value(&self) -> &str {
        &self.expanded
    }

    /// The value as originally parsed, before interpolation.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The value after interpolation.
    pub fn expanded(&self) -> &str {
        &self.expanded
    }

    /// Entry metadata.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Entry flags.
    pub fn flags(&self) -> KeyValueFlags {
        self.meta.flags
    }

    /// Whether the entry is flagged sensitive.
    pub fn is_sensitive(&self) -> bool {
        self.meta.flags.contains(KeyValueFlags::SENSITIVE)
    }

    /// Whether the entry is flagged to never interpolate.
    pub fn is_no_interpolation(&self) -> bool {
        self.meta.flags.contains(KeyValueFlags::NO_INTERPOLATION)
    }

    /// Copy with a different key. The original key is kept in the
    /// metadata.
    pub fn with_key(&self, key: impl Into<String>) -> KeyValue {
        let mut kv = self.clone();
        kv.key = key.into();
        kv
    }

    /// Copy with a different expanded value; `raw` is untouched.
    pub fn with_expanded(&self, expanded: impl Into<String>) -> KeyValue {
        let mut kv = self.clone();
        kv.expanded = expanded.into();
        kv
    }

    /// Copy with both raw and expanded replaced, so the new value survives
    /// later re-interpolation. Used by value-rewriting filters.
    pub fn with_sealed_value(&self, value: impl Into<String>) -> KeyValue {
        let mut kv = self.clone();
        kv.raw = value.into();
        kv.expanded = kv.raw.clone();
        kv
    }

    /// Copy with the source URI replaced. Used to attribute inline named
    /// sources.
    pub(crate) fn with_source_uri(&self, uri: Uri) -> KeyValue {
        let mut kv = self.clone();
        kv.meta.source.uri = uri;
        kv
    }

    /// Copy with extra flags added.
    pub fn with_added_flags(&self, flags: KeyValueFlags) -> KeyValue {
        let mut kv = self.clone();
        kv.meta.flags |= flags;
        kv
    }

    /// Redacted copy: sensitive entries have raw and expanded replaced by
    /// [`REDACTED_MESSAGE`]. Non-sensitive entries are returned as-is.
    pub fn redact(&self) -> KeyValue {
        if !self.is_sensitive() {
            return self.clone();
        }
        let mut kv = self.clone();
        kv.raw = REDACTED_MESSAGE.to_string();
        kv.expanded = REDACTED_MESSAGE.to_string();
        kv
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (raw, expanded) = if self.is_sensitive() {
            (REDACTED_MESSAGE, REDACTED_MESSAGE)
        } else {
            (self.raw.as_str(), self.expanded.as_str())
        };
        write!(f, "KeyValue[key='{}', ", self.key)?;
        if self.meta.original_key != self.key {
            write!(f, "originalKey='{}', ", self.meta.original_key)?;
        }
        write!(f, "raw='{raw}', expanded='{expanded}', ")?;
        let source = &self.meta.source;
        write!(f, "source=Source[uri={}, ", source.uri)?;
        if let Some(reference) = &source.reference {
            write!(
                f,
                "reference=[key='{}', in='{}'], ",
                reference.key(),
                reference.meta().source.uri
            )?;
        }
        write!(f, "index={}]]", source.index)
    }
}
