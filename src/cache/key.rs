//! Cache Key Module
//!
//! Builds deterministic cache keys of the form `{prefix}:{operation}:{params}`
//! from a call's identity and its named arguments.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cache::MAX_PARAMS_LENGTH;

/// Encoding used when no parameter participates in the key.
pub const EMPTY_PARAMS: &str = "all";

const DIGEST_MARK: &str = "h=";
const DIGEST_LEN: usize = 32;

// == Call Args ==
/// Named arguments of a wrapped call.
///
/// Positional arguments are named by the caller when the args are built, so
/// every parameter can take part in keys, conditions and chain bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    params: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds a set-valued parameter. Members are sorted and de-duplicated so
    /// that two calls with the same members in a different order share a key.
    pub fn with_set<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut members: Vec<(String, Value)> = values
            .into_iter()
            .map(Into::into)
            .map(|v| (encode_value(&v), v))
            .collect();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        members.dedup_by(|a, b| a.0 == b.0);

        let array = members.into_iter().map(|(_, v)| v).collect::<Vec<_>>();
        self.insert(name, Value::Array(array));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Returns the parameter rendered the same way it appears inside a key.
    pub fn get_encoded(&self, name: &str) -> Option<String> {
        self.params.get(name).map(encode_value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

// == Key Params ==
/// Selects which arguments participate in the key.
///
/// `include` wins over `exclude` when both are given.
#[derive(Debug, Clone, Default)]
pub struct KeyParams {
    include: Option<Vec<String>>,
    exclude: Vec<String>,
}

impl KeyParams {
    /// Every non-null argument participates.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn include<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = names.into_iter().map(Into::into).collect();
        self
    }

    fn participates(&self, name: &str) -> bool {
        match &self.include {
            Some(include) => include.iter().any(|n| n == name),
            None => !self.exclude.iter().any(|n| n == name),
        }
    }
}

// == Build Key ==
/// Builds the cache key for a call.
///
/// Parameters are sorted by name, null parameters are skipped, and each is
/// rendered as `name=value` joined by `:`. Oversized encodings are replaced by
/// a digest so keys stay bounded.
pub fn build_key(prefix: &str, operation: &str, args: &CallArgs, params: &KeyParams) -> String {
    let encoded: Vec<String> = args
        .iter()
        .filter(|(name, value)| params.participates(name) && !value.is_null())
        .map(|(name, value)| format!("{}={}", urlencoding::encode(name), encode_value(value)))
        .collect();

    let encoded = if encoded.is_empty() {
        EMPTY_PARAMS.to_string()
    } else {
        encoded.join(":")
    };

    // A literal `h=<hex>` is hashed too, so it cannot pose as a digest
    let encoded = if encoded.len() > MAX_PARAMS_LENGTH || is_digest(&encoded) {
        let digest = Sha256::digest(encoded.as_bytes());
        format!("{}{}", DIGEST_MARK, &hex::encode(digest)[..DIGEST_LEN])
    } else {
        encoded
    };

    format!("{}:{}:{}", prefix, operation, encoded)
}

/// Renders a value for use inside a key.
///
/// Strings are percent-encoded, so plain identifiers such as `light.kitchen`
/// pass through unchanged while `:`, `=`, `,`, brackets and `*` never leak
/// into the key structure. A string that would read as a number, bool or
/// null is quoted (`"3"` vs `3`), as is the empty string. Objects go through
/// serde_json, whose map type keeps keys sorted, with the key separators
/// escaped.
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => encode_string(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(encode_value).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(_) => escape_reserved(&value.to_string()),
    }
}

fn encode_string(s: &str) -> String {
    let encoded = urlencoding::encode(s);
    let ambiguous = s.is_empty()
        || matches!(
            serde_json::from_str::<Value>(s),
            Ok(Value::Number(_) | Value::Bool(_) | Value::Null)
        );
    if ambiguous {
        format!("\"{}\"", encoded)
    } else {
        encoded.into_owned()
    }
}

/// Escapes the characters that carry meaning inside a key or pattern.
fn escape_reserved(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '=' => out.push_str("%3D"),
            ',' => out.push_str("%2C"),
            '*' => out.push_str("%2A"),
            _ => out.push(c),
        }
    }
    out
}

fn is_digest(encoded: &str) -> bool {
    encoded.strip_prefix(DIGEST_MARK).is_some_and(|hex| {
        hex.len() == DIGEST_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit())
    })
}

/// Returns the `{prefix}.{operation}` name used by TTL overrides and
/// per-operation statistics.
pub fn operation_name(prefix: &str, operation: &str) -> String {
    format!("{}.{}", prefix, operation)
}
