/*
 * resource_parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The resource-key DSL.
//!
//! Within a key-value stream, reserved underscore-prefixed keys declare
//! child resources and their metadata:
//!
//! | key | purpose |
//! |-----|---------|
//! | `_load_<name>` | declares a child resource; value is the URI |
//! | `_flags_<name>` / `_flag_<name>` | CSV of load-flag names |
//! | `_mediaType_<name>` / `_mime_<name>` | media-type override |
//! | `_param_<name>_<k>` / `_p_<name>_<k>` | named parameter |
//! | `_filter_<name>_<id>` | appends a filter; value is the expression |
//!
//! The same metadata can ride on a resource URI's query string using the
//! nameless forms (`_flags`, `_mediaType`, `_param_<k>`, `_filter_<id>`);
//! [`normalize`] merges those into the resource and rewrites the remaining
//! query back onto the URI.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::kv::KeyValue;
use crate::kvs::KeyValues;
use crate::resource::{Filter, LoadFlags, Resource};
use crate::uri::percent_decode;

/// A recognized meta-key from a resource body.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MetaKey {
    Load { name: String },
    Flags { name: String },
    MediaType { name: String },
    Param { name: String, param: String },
    Filter { name: String, filter_id: String },
}

impl MetaKey {
    fn name(&self) -> &str {
        match self {
            MetaKey::Load { name }
            | MetaKey::Flags { name }
            | MetaKey::MediaType { name }
            | MetaKey::Param { name, .. }
            | MetaKey::Filter { name, .. } => name,
        }
    }
}

/// A recognized meta-key from a URI query string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryMetaKey {
    Flags,
    MediaType,
    Param { param: String },
    Filter { filter_id: String },
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Parse a body key. `None` means the key is plain data; `Some(Err)`
/// means it uses a reserved stem but is malformed.
fn parse_meta_key(key: &str) -> Option<Result<MetaKey>> {
    let rest = key.strip_prefix('_')?;
    let (stem, remainder) = rest.split_once('_')?;
    let malformed = || {
        Some(Err(Error::ResourceKeyInvalid(format!(
            "Malformed resource key: '{key}'"
        ))))
    };
    match stem {
        "load" | "flags" | "flag" | "mediaType" | "mime" => {
            if !valid_name(remainder) {
                return malformed();
            }
            let name = remainder.to_string();
            let meta = match stem {
                "load" => MetaKey::Load { name },
                "flags" | "flag" => MetaKey::Flags { name },
                _ => MetaKey::MediaType { name },
            };
            Some(Ok(meta))
        }
        "param" | "p" => {
            let Some((name, param)) = remainder.split_once('_') else {
                return malformed();
            };
            if !valid_name(name) || param.is_empty() {
                return malformed();
            }
            Some(Ok(MetaKey::Param {
                name: name.to_string(),
                param: param.to_string(),
            }))
        }
        "filter" => {
            let Some((name, filter_id)) = remainder.split_once('_') else {
                return malformed();
            };
            if !valid_name(name) || filter_id.is_empty() {
                return malformed();
            }
            Some(Ok(MetaKey::Filter {
                name: name.to_string(),
                filter_id: filter_id.to_string(),
            }))
        }
        _ => None,
    }
}

/// Parse a nameless query meta-key. `None` means the pair is not resource
/// metadata and stays on the URI.
fn parse_query_meta_key(key: &str) -> Option<Result<QueryMetaKey>> {
    let rest = key.strip_prefix('_')?;
    match rest {
        "flags" | "flag" => return Some(Ok(QueryMetaKey::Flags)),
        "mediaType" | "mime" => return Some(Ok(QueryMetaKey::MediaType)),
        _ => {}
    }
    let (stem, remainder) = rest.split_once('_')?;
    match stem {
        "param" | "p" => {
            if remainder.is_empty() {
                Some(Err(Error::ResourceKeyInvalid(format!(
                    "Malformed resource key in URI query: '{key}'"
                ))))
            } else {
                Some(Ok(QueryMetaKey::Param {
                    param: remainder.to_string(),
                }))
            }
        }
        "filter" => {
            if remainder.is_empty() {
                Some(Err(Error::ResourceKeyInvalid(format!(
                    "Malformed resource key in URI query: '{key}'"
                ))))
            } else {
                Some(Ok(QueryMetaKey::Filter {
                    filter_id: remainder.to_string(),
                }))
            }
        }
        _ => None,
    }
}

/// Whether a key-value is a resource DSL key.
pub(crate) fn is_resource_key(kv: &KeyValue) -> bool {
    parse_meta_key(kv.key()).is_some()
}

/// Whether the stream declares any child resources.
pub(crate) fn has_load_keys(kvs: &KeyValues) -> bool {
    kvs.iter()
        .any(|kv| matches!(parse_meta_key(kv.key()), Some(Ok(MetaKey::Load { .. }))))
}

/// Remove all resource DSL keys from the stream.
pub(crate) fn strip_resource_keys(kvs: &KeyValues) -> KeyValues {
    kvs.filter(|kv| !is_resource_key(kv))
}

#[derive(Default)]
struct Group<'a> {
    load: Option<&'a KeyValue>,
    flags_csv: Vec<&'a str>,
    media_type: Option<&'a str>,
    parameters: IndexMap<String, String>,
    filters: Vec<Filter>,
    first_key: Option<&'a str>,
}

/// Extract child resources declared in the stream, in `_load_` key order.
///
/// `parent` supplies flag inheritance: when it carries `PROPAGATE`, its
/// flag set is unioned into every child.
pub(crate) fn parse_resources(kvs: &KeyValues, parent: Option<&Resource>) -> Result<Vec<Resource>> {
    let mut groups: IndexMap<String, Group<'_>> = IndexMap::new();
    let mut load_order: Vec<String> = Vec::new();

    for kv in kvs {
        let meta = match parse_meta_key(kv.key()) {
            None => continue,
            Some(meta) => meta?,
        };
        let name = meta.name().to_string();
        let group = groups.entry(name.clone()).or_default();
        if group.first_key.is_none() {
            group.first_key = Some(kv.key());
        }
        match meta {
            MetaKey::Load { .. } => {
                if group.load.is_some() {
                    return Err(Error::ResourceNameDuplicate(name));
                }
                group.load = Some(kv);
                load_order.push(name);
            }
            MetaKey::Flags { .. } => group.flags_csv.push(kv.value()),
            MetaKey::MediaType { .. } => group.media_type = Some(kv.value()),
            MetaKey::Param { param, .. } => {
                group.parameters.insert(param, kv.value().to_string());
            }
            MetaKey::Filter { filter_id, .. } => group.filters.push(Filter {
                id: filter_id,
                expression: kv.value().to_string(),
                label: name,
            }),
        }
    }

    // Every meta-key needs its _load_ anchor.
    for (name, group) in &groups {
        if group.load.is_none() {
            return Err(Error::ResourceKeyInvalid(format!(
                "Resource key '{}' has no matching _load_{name} key.",
                group.first_key.unwrap_or_default()
            )));
        }
    }

    let mut resources = Vec::with_capacity(load_order.len());
    for name in load_order {
        let group = &groups[&name];
        let load_kv = group.load.expect("validated above");
        let mut builder = Resource::builder(load_kv.value()).name(&name);
        for csv in &group.flags_csv {
            builder = builder.flag(LoadFlags::parse_csv(csv)?);
        }
        if let Some(media_type) = group.media_type {
            builder = builder.media_type(media_type);
        }
        for (k, v) in &group.parameters {
            builder = builder.parameter(k.clone(), v.clone());
        }
        for filter in &group.filters {
            builder = builder.filter(filter.clone());
        }
        if let Some(parent) = parent {
            if parent.flags().contains(LoadFlags::PROPAGATE) {
                builder = builder.flag(parent.flags());
            }
        }
        builder = builder.reference(load_kv.clone());
        resources.push(builder.build()?);
    }
    Ok(resources)
}

/// Merge URI-query metadata into the resource and mark it normalized.
///
/// Query-derived flags union with existing flags, parameters override
/// same-named keys, and filters append in URI order after any
/// programmatically-set filters. Pairs that are not resource metadata are
/// rewritten back onto the URI.
pub(crate) fn normalize(resource: Resource) -> Result<Resource> {
    if resource.normalized() {
        return Ok(resource);
    }
    let Some(query) = resource.uri().query().map(str::to_string) else {
        return resource.to_builder().normalized(true).build();
    };

    let mut flags = LoadFlags::empty();
    let mut media_type: Option<String> = None;
    let mut parameters: IndexMap<String, String> = IndexMap::new();
    let mut filters: Vec<Filter> = Vec::new();
    let mut retained: Vec<&str> = Vec::new();

    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = match pair.find('=') {
            Some(i) => (&pair[..i], &pair[i + 1..]),
            None => (pair, ""),
        };
        let key = percent_decode(raw_key);
        let meta = match parse_query_meta_key(&key) {
            None => {
                retained.push(pair);
                continue;
            }
            Some(meta) => meta?,
        };
        let value = percent_decode(raw_value);
        match meta {
            QueryMetaKey::Flags => flags |= LoadFlags::parse_csv(&value)?,
            QueryMetaKey::MediaType => media_type = Some(value),
            QueryMetaKey::Param { param } => {
                parameters.insert(param, value);
            }
            QueryMetaKey::Filter { filter_id } => filters.push(Filter {
                id: filter_id,
                expression: value,
                label: resource.name().to_string(),
            }),
        }
    }

    let new_query = if retained.is_empty() {
        None
    } else {
        Some(retained.join("&"))
    };
    let uri = resource.uri().with_query(new_query.as_deref());

    let mut builder = resource.to_builder().uri(uri).flag(flags);
    if let Some(media_type) = media_type {
        builder = builder.media_type(media_type);
    }
    for (k, v) in parameters {
        builder = builder.parameter(k, v);
    }
    for filter in filters {
        builder = builder.filter(filter);
    }
    builder.normalized(true).build()
}

/// Render a resource as the DSL key-value pairs that would declare it.
pub(crate) fn format_resource(resource: &Resource, emit: &mut dyn FnMut(String, String)) {
    let name = resource.name();
    emit(format!("_load_{name}"), resource.uri().as_str().to_string());
    if !resource.flags().is_empty() {
        emit(format!("_flags_{name}"), resource.flags().to_csv());
    }
    if let Some(media_type) = resource.media_type() {
        emit(format!("_mediaType_{name}"), media_type.to_string());
    }
    for (k, v) in resource.parameters() {
        emit(format!("_param_{name}_{k}"), v.clone());
    }
    for filter in resource.filters() {
        emit(format!("_filter_{name}_{}", filter.id), filter.expression.clone());
    }
}

/// The body key under which a resource parameter would be declared.
pub(crate) fn format_parameter_key(resource: &Resource, param: &str) -> String {
    format!("_param_{}_{param}", resource.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kvs(pairs: &[(&str, &str)]) -> KeyValues {
        let mut b = KeyValues::builder();
        for (k, v) in pairs {
            b.add(*k, *v);
        }
        b.build()
    }

    #[test]
    fn test_parse_resources_groups_by_name() {
        let kvs = kvs(&[
            ("_load_sys", "system:///"),
            ("_flags_sys", "NO_ADD, NO_INTERPOLATE"),
            ("_load_app", "mem:/app"),
            ("port", "5672"),
        ]);
        let resources = parse_resources(&kvs, None).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].name(), "sys");
        assert_eq!(
            resources[0].flags(),
            LoadFlags::NO_ADD | LoadFlags::NO_INTERPOLATE
        );
        assert_eq!(resources[1].name(), "app");
        assert_eq!(resources[0].reference().unwrap().key(), "_load_sys");
    }

    #[test]
    fn test_parse_resources_full_metadata() {
        let kvs = kvs(&[
            ("_load_db", "classpath:/db.conf"),
            ("_mediaType_db", "properties"),
            ("_param_db_custom_key", "v"),
            ("_filter_db_sed", "s/^db_//"),
            ("_filter_db_grep", "^db"),
        ]);
        let resources = parse_resources(&kvs, None).unwrap();
        let r = &resources[0];
        assert_eq!(r.media_type(), Some("properties"));
        assert_eq!(r.parameters().get("custom_key").map(String::as_str), Some("v"));
        let ids: Vec<_> = r.filters().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["sed", "grep"]);
    }

    #[test]
    fn test_short_aliases() {
        let kvs = kvs(&[
            ("_load_s", "stdin:///"),
            ("_flag_s", "sensitive"),
            ("_p_s_stdin_arg", "--passwords"),
            ("_mime_s", "properties"),
        ]);
        let r = parse_resources(&kvs, None).unwrap().remove(0);
        assert_eq!(r.flags(), LoadFlags::SENSITIVE);
        assert_eq!(r.parameters().get("stdin_arg").map(String::as_str), Some("--passwords"));
        assert_eq!(r.media_type(), Some("properties"));
    }

    #[test]
    fn test_duplicate_load_is_error() {
        let kvs = kvs(&[("_load_a", "mem:/1"), ("_load_a", "mem:/2")]);
        let err = parse_resources(&kvs, None).unwrap_err();
        assert!(matches!(err, Error::ResourceNameDuplicate(_)));
    }

    #[test]
    fn test_orphan_meta_key_is_error() {
        let kvs = kvs(&[("_flags_ghost", "optional")]);
        let err = parse_resources(&kvs, None).unwrap_err();
        assert!(matches!(err, Error::ResourceKeyInvalid(_)));
    }

    #[test]
    fn test_malformed_meta_key_is_error() {
        let kvs = kvs(&[("_load_bad-name", "mem:/x")]);
        assert!(parse_resources(&kvs, None).is_err());
    }

    #[test]
    fn test_unrelated_underscore_keys_pass_through() {
        let kvs = kvs(&[("_private", "1"), ("_loader_thing", "2")]);
        assert!(parse_resources(&kvs, None).unwrap().is_empty());
        assert_eq!(strip_resource_keys(&kvs).len(), 2);
    }

    #[test]
    fn test_propagate_inherits_parent_flags() {
        let parent = Resource::builder("mem:/parent")
            .name("parent")
            .flag(LoadFlags::SENSITIVE | LoadFlags::PROPAGATE)
            .build()
            .unwrap();
        let kvs = kvs(&[("_load_child", "mem:/child")]);
        let child = parse_resources(&kvs, Some(&parent)).unwrap().remove(0);
        assert!(child.flags().contains(LoadFlags::SENSITIVE));
        assert!(child.flags().contains(LoadFlags::PROPAGATE));

        // No PROPAGATE: children start clean.
        let plain = Resource::builder("mem:/parent")
            .name("parent")
            .flag(LoadFlags::SENSITIVE)
            .build()
            .unwrap();
        let child = parse_resources(&kvs, Some(&plain)).unwrap().remove(0);
        assert!(child.flags().is_empty());
    }

    #[test]
    fn test_normalize_merges_query() {
        let resource = Resource::builder(
            "env:///?_flags=optional&_filter_grep_key=%5EMY_APP_&_filter_sed_key=s/%5EMY_APP_/myapp./&other=kept",
        )
        .name("env")
        .flag(LoadFlags::NO_ADD)
        .build()
        .unwrap();
        let normalized = normalize(resource).unwrap();
        assert!(normalized.normalized());
        assert_eq!(
            normalized.flags(),
            LoadFlags::NO_ADD | LoadFlags::NO_REQUIRE
        );
        let ids: Vec<_> = normalized.filters().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["grep_key", "sed_key"]);
        assert_eq!(normalized.filters()[0].expression, "^MY_APP_");
        assert_eq!(normalized.uri().as_str(), "env:///?other=kept");
    }

    #[test]
    fn test_normalize_query_param_overrides() {
        let resource = Resource::builder("stdin:///?_p_stdin_arg=--passwords&_mime=properties")
            .name("stdin")
            .parameter("stdin_arg", "--old")
            .build()
            .unwrap();
        let normalized = normalize(resource).unwrap();
        assert_eq!(
            normalized.parameters().get("stdin_arg").map(String::as_str),
            Some("--passwords")
        );
        assert_eq!(normalized.media_type(), Some("properties"));
        assert_eq!(normalized.uri().as_str(), "stdin:///");
    }

    #[test]
    fn test_flag_symmetry_between_body_and_query() {
        // _flags_b in a body and ?_flags= on the URI configure identically.
        let body = kvs(&[("_load_b", "mem:/b"), ("_flags_b", "NO_REPLACE")]);
        let from_body = parse_resources(&body, None).unwrap().remove(0);

        let from_query = normalize(
            Resource::builder("mem:/b?_flags=NO_REPLACE").name("b").build().unwrap(),
        )
        .unwrap();

        assert_eq!(from_body.flags(), from_query.flags());
        assert_eq!(from_query.uri().as_str(), "mem:/b");
    }

    #[test]
    fn test_format_resource_roundtrip() {
        let resource = Resource::builder("system:///")
            .name("system")
            .flag(LoadFlags::NO_ADD | LoadFlags::NO_INTERPOLATE)
            .build()
            .unwrap();
        let mut pairs = Vec::new();
        format_resource(&resource, &mut |k, v| pairs.push((k, v)));
        assert_eq!(
            pairs,
            vec![
                ("_load_system".to_string(), "system:///".to_string()),
                ("_flags_system".to_string(), "NO_ADD,NO_INTERPOLATE".to_string()),
            ]
        );

        let mut b = KeyValues::builder();
        for (k, v) in pairs {
            b.add(k, v);
        }
        let reparsed = parse_resources(&b.build(), None).unwrap().remove(0);
        assert_eq!(reparsed.flags(), resource.flags());
        assert_eq!(reparsed.uri().as_str(), resource.uri().as_str());
    }

    #[test]
    fn test_format_parameter_key() {
        let r = Resource::builder("mem:/x").name("mem").build().unwrap();
        assert_eq!(format_parameter_key(&r, "profile"), "_param_mem_profile");
    }
}
