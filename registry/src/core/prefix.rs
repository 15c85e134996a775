//! Name and URI prefixing for composed registries.
//!
//! Tool and prompt keys are joined as `{prefix}_{key}`. Resource URIs are
//! prefixed according to [`PrefixFormat`]:
//!
//! - `Path`: `scheme://path` becomes `scheme://{prefix}/path`
//! - `Protocol`: `scheme://path` becomes `{prefix}+scheme://path`
//!
//! An empty resource prefix leaves URIs unchanged and matches every URI.

use std::sync::LazyLock;

use regex::Regex;

use super::config::PrefixFormat;
use crate::error::{RegistryError, RegistryResult};

/// Separator between a mount prefix and a tool or prompt key.
pub const NAME_DELIMITER: &str = "_";

/// Separator used by the protocol resource prefix format.
pub const PROTOCOL_DELIMITER: &str = "+";

static URI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^([^:]+://)(.*)$").expect("URI pattern is valid"));

pub fn prefix_name(prefix: &str, key: &str) -> String {
    format!("{prefix}{NAME_DELIMITER}{key}")
}

/// Strip `{prefix}_` from `key`, if present.
pub fn strip_name_prefix<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix)?.strip_prefix(NAME_DELIMITER)
}

fn split_uri(uri: &str) -> Option<(&str, &str)> {
    let caps = URI_PATTERN.captures(uri)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

pub fn add_resource_prefix(
    uri: &str,
    prefix: &str,
    format: PrefixFormat,
) -> RegistryResult<String> {
    if prefix.is_empty() {
        return Ok(uri.to_string());
    }
    match format {
        PrefixFormat::Protocol => Ok(format!("{prefix}{PROTOCOL_DELIMITER}{uri}")),
        PrefixFormat::Path => {
            let (scheme, path) = split_uri(uri).ok_or_else(|| RegistryError::InvalidPrefix {
                prefix: prefix.to_string(),
                reason: format!("'{uri}' is not of the form scheme://path"),
            })?;
            Ok(format!("{scheme}{prefix}/{path}"))
        }
    }
}

pub fn has_resource_prefix(uri: &str, prefix: &str, format: PrefixFormat) -> bool {
    strip_resource_prefix(uri, prefix, format).is_some()
}

/// Remove the prefix from `uri`, or `None` when `uri` doesn't carry it.
pub fn strip_resource_prefix(uri: &str, prefix: &str, format: PrefixFormat) -> Option<String> {
    if prefix.is_empty() {
        return Some(uri.to_string());
    }
    match format {
        PrefixFormat::Protocol => uri
            .strip_prefix(prefix)?
            .strip_prefix(PROTOCOL_DELIMITER)
            .map(str::to_string),
        PrefixFormat::Path => {
            let (scheme, path) = split_uri(uri)?;
            let rest = path.strip_prefix(prefix)?.strip_prefix('/')?;
            Some(format!("{scheme}{rest}"))
        }
    }
}

/// Like [`strip_resource_prefix`] but returns `uri` unchanged when the prefix
/// is absent.
pub fn remove_resource_prefix(uri: &str, prefix: &str, format: PrefixFormat) -> String {
    strip_resource_prefix(uri, prefix, format).unwrap_or_else(|| uri.to_string())
}

/// Reject prefixes that would turn a valid resource URI into an invalid one.
pub fn validate_resource_prefix(prefix: &str, format: PrefixFormat) -> RegistryResult<()> {
    let sample = add_resource_prefix("resource://path/to/resource", prefix, format)?;
    url::Url::parse(&sample)
        .map(|_| ())
        .map_err(|e| RegistryError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: format!("would produce an invalid resource URI ('{sample}'): {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_prefixing() {
        assert_eq!(prefix_name("weather", "forecast"), "weather_forecast");
        assert_eq!(prefix_name("", "forecast"), "_forecast");
        assert_eq!(strip_name_prefix("weather", "weather_forecast"), Some("forecast"));
        assert_eq!(strip_name_prefix("weather", "weatherforecast"), None);
        assert_eq!(strip_name_prefix("weather", "forecast"), None);
        assert_eq!(strip_name_prefix("", "_forecast"), Some("forecast"));
    }

    #[test]
    fn test_path_format() {
        let uri = add_resource_prefix("data://items/1", "shop", PrefixFormat::Path).unwrap();
        assert_eq!(uri, "data://shop/items/1");
        assert!(has_resource_prefix(&uri, "shop", PrefixFormat::Path));
        assert_eq!(
            strip_resource_prefix(&uri, "shop", PrefixFormat::Path).as_deref(),
            Some("data://items/1")
        );
        assert!(!has_resource_prefix("data://shopping/x", "shop", PrefixFormat::Path));
        assert!(add_resource_prefix("no-scheme", "shop", PrefixFormat::Path).is_err());
    }

    #[test]
    fn test_protocol_format() {
        let uri = add_resource_prefix("data://items/1", "shop", PrefixFormat::Protocol).unwrap();
        assert_eq!(uri, "shop+data://items/1");
        assert_eq!(
            remove_resource_prefix(&uri, "shop", PrefixFormat::Protocol),
            "data://items/1"
        );
        assert!(!has_resource_prefix("data://items/1", "shop", PrefixFormat::Protocol));
        assert_eq!(
            remove_resource_prefix("data://items/1", "shop", PrefixFormat::Protocol),
            "data://items/1"
        );
    }

    #[test]
    fn test_templates_prefix_like_uris() {
        let key = add_resource_prefix("data://items/{id}", "shop", PrefixFormat::Path).unwrap();
        assert_eq!(key, "data://shop/items/{id}");
    }

    #[test]
    fn test_empty_prefix_is_identity() {
        for format in [PrefixFormat::Path, PrefixFormat::Protocol] {
            assert_eq!(add_resource_prefix("a://b", "", format).unwrap(), "a://b");
            assert!(has_resource_prefix("a://b", "", format));
            assert_eq!(remove_resource_prefix("a://b", "", format), "a://b");
        }
    }

    #[test]
    fn test_validate_resource_prefix() {
        assert!(validate_resource_prefix("weather", PrefixFormat::Path).is_ok());
        assert!(validate_resource_prefix("weather", PrefixFormat::Protocol).is_ok());
        assert!(validate_resource_prefix("bad prefix", PrefixFormat::Path).is_err());
        assert!(validate_resource_prefix("1bad", PrefixFormat::Protocol).is_err());
    }
}
