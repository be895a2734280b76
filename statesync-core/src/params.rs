//! Operation parameters
//!
//! Parameters keep their insertion order (the query string is serialized
//! in caller order), while cache and dedup keys use a sorted, stable
//! serialization so that `{a, b}` and `{b, a}` coalesce.
//!
//! The reserved `_force` parameter only controls cache bypass. It is
//! normalized and stripped exactly once, at the `get`/`get_one` call
//! boundary; dedup keys, cache keys and URLs never see it.

use serde_json::Value;

/// Reserved cache-bypass parameter.
pub const FORCE_PARAM: &str = "_force";

/// An insertion-ordered set of named parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, Value)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for the common single-id parameter set.
    pub fn id(id: impl ToString) -> Self {
        let mut params = Self::new();
        params.insert("id", Value::String(id.to_string()));
        params
    }

    /// Insert or replace a parameter, preserving first-insertion order.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(
        &mut self,
        key: &str,
    ) -> Option<Value> {
        let position = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(position).1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Remove `_force` and report whether it was truthy.
    ///
    /// Any value other than `false`, `null` and `0` counts as a bypass
    /// request.
    pub fn take_force(&mut self) -> bool {
        match self.remove(FORCE_PARAM) {
            None => false,
            Some(Value::Bool(b)) => b,
            Some(Value::Null) => false,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Some(_) => true,
        }
    }

    /// The record id parameter, in its normalized string form.
    pub fn id_value(&self) -> Option<String> {
        self.get("id").map(value_id_form)
    }

    /// Stable serialization for cache and dedup keys: keys sorted,
    /// values in compact JSON.
    pub fn stable_key(&self) -> String {
        let mut sorted: Vec<&(String, Value)> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::from("{");
        for (i, (key, value)) in sorted.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(key);
            out.push('=');
            out.push_str(&compact_value(value));
        }
        out.push('}');
        out
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// The string form of a parameter value, matching record-id
/// normalization: strings stay verbatim, everything else renders as
/// compact JSON (so numeric ids become their decimal form).
pub(crate) fn value_id_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => compact_value(other),
    }
}

fn compact_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
