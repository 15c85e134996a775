//! URI template matching.
//!
//! Templates use `{name}` placeholders that capture a single non-empty path
//! segment and an optional trailing `{name*}` that captures the rest of the
//! URI, slashes included. Literal text between placeholders must match
//! exactly. Extracted values are percent-decoded, and [`UriTemplate::expand`]
//! encodes them again so that `expand(matches(uri))` addresses the same
//! resource.

use std::{collections::HashMap, fmt, sync::LazyLock};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

use crate::error::{RegistryError, RegistryResult};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(\*)?\}").expect("placeholder pattern is valid")
});

/// Everything outside the RFC 3986 unreserved set.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Like [`SEGMENT`], but a wildcard value keeps its slashes.
const PATH: &AsciiSet = &SEGMENT.remove(b'/');

#[derive(Debug, Clone, PartialEq, Eq)]
struct Param {
    name: String,
    wildcard: bool,
}

/// A compiled URI template.
#[derive(Clone)]
pub struct UriTemplate {
    template: String,
    regex: Regex,
    params: Vec<Param>,
}

impl UriTemplate {
    pub fn compile(template: &str) -> RegistryResult<Self> {
        let invalid = |reason: String| RegistryError::InvalidTemplate {
            template: template.to_string(),
            reason,
        };

        let mut pattern = String::from("^");
        let mut params: Vec<Param> = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if params.last().is_some_and(|p| p.wildcard) {
                return Err(invalid(
                    "a wildcard parameter must be the last placeholder".to_string(),
                ));
            }
            if params.iter().any(|p| p.name == name.as_str()) {
                return Err(invalid(format!("duplicate parameter '{}'", name.as_str())));
            }

            let literal = &template[last..whole.start()];
            if literal.contains('{') || literal.contains('}') {
                return Err(invalid(format!("malformed placeholder near '{literal}'")));
            }
            pattern.push_str(&regex::escape(literal));

            let wildcard = caps.get(2).is_some();
            if wildcard {
                pattern.push_str(&format!("(?P<{}>.*)", name.as_str()));
            } else {
                pattern.push_str(&format!("(?P<{}>[^/]+)", name.as_str()));
            }
            params.push(Param {
                name: name.as_str().to_string(),
                wildcard,
            });
            last = whole.end();
        }

        let tail = &template[last..];
        if tail.contains('{') || tail.contains('}') {
            return Err(invalid(format!("malformed placeholder near '{tail}'")));
        }
        if !tail.is_empty() && params.last().is_some_and(|p| p.wildcard) {
            return Err(invalid(
                "a wildcard parameter must end the template".to_string(),
            ));
        }
        pattern.push_str(&regex::escape(tail));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            template: template.to_string(),
            regex,
            params,
        })
    }

    /// Whether `s` contains at least one placeholder.
    pub fn is_template(s: &str) -> bool {
        PLACEHOLDER.is_match(s)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    /// Extract parameters from a concrete URI, or `None` if it doesn't match.
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(uri)?;
        let mut values = HashMap::with_capacity(self.params.len());
        for param in &self.params {
            let raw = caps.name(&param.name).map_or("", |m| m.as_str());
            let decoded = percent_decode_str(raw).decode_utf8_lossy().into_owned();
            values.insert(param.name.clone(), decoded);
        }
        Some(values)
    }

    /// Substitute parameters back into the template, percent-encoding each
    /// value. `{name}` values have `/` encoded; `{name*}` values keep it.
    pub fn expand(&self, values: &HashMap<String, String>) -> RegistryResult<String> {
        let mut missing = Vec::new();
        let expanded = PLACEHOLDER.replace_all(&self.template, |caps: &regex::Captures<'_>| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            let set = if caps.get(2).is_some() { PATH } else { SEGMENT };
            match values.get(name) {
                Some(v) => utf8_percent_encode(v, set).to_string(),
                None => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        });
        if missing.is_empty() {
            Ok(expanded.into_owned())
        } else {
            Err(RegistryError::InvalidArguments(format!(
                "missing template parameters {missing:?} for '{}'",
                self.template
            )))
        }
    }
}

impl fmt::Debug for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UriTemplate").field(&self.template).finish()
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}
