/*
 * media.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Media types: parsers and formatters for key-value documents.
//!
//! A [`KeyValuesMedia`] pairs a parser with an optional formatter under a
//! media-type string and optional file extension. [`MediaFinder`]s locate
//! media by media type, extension, or URI; finders registered on the
//! system are consulted in `order()` order, first match winning.
//!
//! Two media are built in: the flat properties format and the URL-encoded
//! form format. Everything else (JSON5, XML, dotenv, ...) plugs in through
//! these traits.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::kvs::KeyValues;
use crate::properties;
use crate::system::BUILTIN_ORDER_START;
use crate::uri::{percent_decode, percent_encode, Uri};

/// Media type of the built-in properties media.
pub const MEDIA_TYPE_PROPERTIES: &str = "text/x-java-properties";

/// Media type of the built-in URL-encoded media.
pub const MEDIA_TYPE_URLENCODED: &str = "application/x-www-form-urlencoded";

/// A parser/formatter pair for one key-value document format.
pub trait KeyValuesMedia: Send + Sync {
    /// The canonical media-type string.
    fn media_type(&self) -> &str;

    /// The file extension this media claims, if any.
    fn file_ext(&self) -> Option<&str> {
        None
    }

    /// Parse a document, emitting pairs in document order.
    fn parse(&self, input: &str, emit: &mut dyn FnMut(String, String)) -> Result<()>;

    /// Format key-values in order. Media without a formatter return a
    /// media error.
    fn format(&self, out: &mut String, kvs: &KeyValues) -> Result<()> {
        let _ = (out, kvs);
        Err(Error::Media(format!(
            "Formatting is not supported by media '{}'",
            self.media_type()
        )))
    }
}

/// Locates media by media type, file extension, or URI.
pub trait MediaFinder: Send + Sync {
    /// Registration order; lower binds first. Built-ins start at
    /// [`BUILTIN_ORDER_START`].
    fn order(&self) -> i32 {
        0
    }

    /// Find by media-type string.
    fn find_by_media_type(&self, media_type: &str) -> Option<Arc<dyn KeyValuesMedia>>;

    /// Find by file extension (no leading dot).
    fn find_by_ext(&self, ext: &str) -> Option<Arc<dyn KeyValuesMedia>>;

    /// Find by URI; the default sniffs the path's file extension.
    fn find_by_uri(&self, uri: &Uri) -> Option<Arc<dyn KeyValuesMedia>> {
        uri.file_ext().and_then(|ext| self.find_by_ext(ext))
    }
}

/// The flat properties media.
#[derive(Debug, Default)]
pub struct PropertiesMedia;

impl KeyValuesMedia for PropertiesMedia {
    fn media_type(&self) -> &str {
        MEDIA_TYPE_PROPERTIES
    }

    fn file_ext(&self) -> Option<&str> {
        Some("properties")
    }

    fn parse(&self, input: &str, emit: &mut dyn FnMut(String, String)) -> Result<()> {
        properties::parse(input, emit)
    }

    fn format(&self, out: &mut String, kvs: &KeyValues) -> Result<()> {
        properties::format(out, kvs)
    }
}

/// The URL-encoded (`key=value&key=value`) media.
#[derive(Debug, Default)]
pub struct UrlEncodedMedia;

impl KeyValuesMedia for UrlEncodedMedia {
    fn media_type(&self) -> &str {
        MEDIA_TYPE_URLENCODED
    }

    fn parse(&self, input: &str, emit: &mut dyn FnMut(String, String)) -> Result<()> {
        parse_uri_query(input, emit);
        Ok(())
    }

    fn format(&self, out: &mut String, kvs: &KeyValues) -> Result<()> {
        let mut first = true;
        for kv in kvs {
            if !first {
                out.push('&');
            }
            first = false;
            out.push_str(&percent_encode(kv.key()));
            out.push('=');
            out.push_str(&percent_encode(kv.expanded()));
        }
        Ok(())
    }
}

/// Parse an `&`-delimited query string, percent-decoding both sides.
/// Blank keys are skipped; duplicate keys are retained; a bare `key`
/// becomes `key=`.
pub(crate) fn parse_uri_query(query: &str, emit: &mut dyn FnMut(String, String)) {
    for pair in query.split('&') {
        let (key, value) = match pair.find('=') {
            Some(0) => continue,
            Some(i) => (&pair[..i], &pair[i + 1..]),
            None => (pair, ""),
        };
        let key = percent_decode(key);
        if key.trim().is_empty() {
            continue;
        }
        emit(key, percent_decode(value));
    }
}

/// The finder that serves the two built-in media. The bare name
/// `properties` is accepted as a media-type alias.
pub struct BuiltinMediaFinder {
    properties: Arc<dyn KeyValuesMedia>,
    urlencoded: Arc<dyn KeyValuesMedia>,
}

impl std::fmt::Debug for BuiltinMediaFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinMediaFinder")
            .field("properties", &self.properties.media_type())
            .field("urlencoded", &self.urlencoded.media_type())
            .finish()
    }
}

impl Default for BuiltinMediaFinder {
    fn default() -> Self {
        BuiltinMediaFinder {
            properties: Arc::new(PropertiesMedia),
            urlencoded: Arc::new(UrlEncodedMedia),
        }
    }
}

impl MediaFinder for BuiltinMediaFinder {
    fn order(&self) -> i32 {
        BUILTIN_ORDER_START
    }

    fn find_by_media_type(&self, media_type: &str) -> Option<Arc<dyn KeyValuesMedia>> {
        match media_type {
            MEDIA_TYPE_PROPERTIES | "properties" => Some(self.properties.clone()),
            MEDIA_TYPE_URLENCODED => Some(self.urlencoded.clone()),
            _ => None,
        }
    }

    fn find_by_ext(&self, ext: &str) -> Option<Arc<dyn KeyValuesMedia>> {
        if ext == "properties" {
            Some(self.properties.clone())
        } else {
            None
        }
    }
}

/// First-match composition over the registered finders, sorted by order.
pub(crate) struct CompositeMediaFinder {
    finders: Vec<Arc<dyn MediaFinder>>,
}

impl CompositeMediaFinder {
    pub(crate) fn new(finders: Vec<Arc<dyn MediaFinder>>) -> CompositeMediaFinder {
        CompositeMediaFinder { finders }
    }

    pub(crate) fn find_by_media_type(&self, media_type: &str) -> Option<Arc<dyn KeyValuesMedia>> {
        self.finders.iter().find_map(|f| f.find_by_media_type(media_type))
    }

    pub(crate) fn find_by_uri(&self, uri: &Uri) -> Option<Arc<dyn KeyValuesMedia>> {
        self.finders.iter().find_map(|f| f.find_by_uri(uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_finder_lookups() {
        let finder = BuiltinMediaFinder::default();
        assert!(finder.find_by_media_type(MEDIA_TYPE_PROPERTIES).is_some());
        assert!(finder.find_by_media_type("properties").is_some());
        assert!(finder.find_by_media_type(MEDIA_TYPE_URLENCODED).is_some());
        assert!(finder.find_by_media_type("application/json").is_none());
        assert!(finder.find_by_ext("properties").is_some());
        assert!(finder.find_by_ext("json").is_none());
        let uri = Uri::parse("classpath:/app.properties");
        assert!(finder.find_by_uri(&uri).is_some());
    }

    #[test]
    fn test_urlencoded_parse() {
        let media = UrlEncodedMedia;
        let mut pairs = Vec::new();
        media
            .parse("a=1&b=two%20words&=skipped&bare&a=2", &mut |k, v| {
                pairs.push((k, v))
            })
            .unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two words".to_string()),
                ("bare".to_string(), String::new()),
                ("a".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_urlencoded_format() {
        let mut b = KeyValues::builder();
        b.add("a b", "1&2");
        b.add("c", "3");
        let mut out = String::new();
        UrlEncodedMedia.format(&mut out, &b.build()).unwrap();
        assert_eq!(out, "a+b=1%262&c=3");
    }

    #[test]
    fn test_properties_media_roundtrip() {
        let media = PropertiesMedia;
        let mut b = KeyValues::builder();
        b.add("a", "1");
        b.add("b", "2");
        let mut out = String::new();
        media.format(&mut out, &b.build()).unwrap();

        let mut pairs = Vec::new();
        media.parse(&out, &mut |k, v| pairs.push((k, v))).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }
}
