//! YAML-to-JSON conversion and lenient scalar deserializers.
//!
//! YAML documents are converted to JSON values with every scalar emitted
//! as a string, and the typed model parses numbers from either form. This
//! keeps YAML and JSON inputs on one code path and makes the runtime
//! independent of YAML's number type inference.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// Convert a YAML value to a JSON value, emitting all scalars as strings.
pub(crate) fn yaml_to_json(node: serde_yaml::Value) -> serde_json::Value {
    match node {
        serde_yaml::Value::Null => serde_json::Value::Null,
        serde_yaml::Value::Bool(b) => serde_json::Value::String(b.to_string()),
        serde_yaml::Value::Number(n) => serde_json::Value::String(n.to_string()),
        serde_yaml::Value::String(s) => serde_json::Value::String(s),
        serde_yaml::Value::Sequence(seq) => {
            serde_json::Value::Array(seq.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let mut object = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                object.insert(scalar_key(key), yaml_to_json(value));
            }
            serde_json::Value::Object(object)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn scalar_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// A scalar that may arrive as its native JSON type or as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar<T> {
    Value(T),
    Text(String),
}

impl<T> Scalar<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    fn resolve<E: serde::de::Error>(self) -> Result<T, E> {
        match self {
            Scalar::Value(v) => Ok(v),
            Scalar::Text(s) => s.trim().parse::<T>().map_err(serde::de::Error::custom),
        }
    }
}

/// Deserialize a `u32` from a number or a numeric string.
pub(crate) fn u32_lenient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    Scalar::<u32>::deserialize(deserializer)?.resolve()
}

/// Deserialize an optional `i32` from a number, a numeric string, or null.
pub(crate) fn opt_i32_lenient<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i32>, D::Error> {
    Option::<Scalar<i32>>::deserialize(deserializer)?
        .map(Scalar::resolve)
        .transpose()
}

/// Deserialize a stage-name to CPU-list map whose ids may be strings.
pub(crate) fn cpu_pinning_lenient<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<HashMap<String, Vec<u32>>, D::Error> {
    let raw: HashMap<String, Vec<Scalar<u32>>> = HashMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(stage, cpus)| {
            let cpus = cpus
                .into_iter()
                .map(Scalar::resolve)
                .collect::<Result<Vec<u32>, D::Error>>()?;
            Ok((stage, cpus))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_become_strings() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("a: 1\nb: true\nc: text\nd: null").unwrap();
        let json = yaml_to_json(yaml);
        assert_eq!(json["a"], serde_json::Value::String("1".into()));
        assert_eq!(json["b"], serde_json::Value::String("true".into()));
        assert_eq!(json["c"], serde_json::Value::String("text".into()));
        assert_eq!(json["d"], serde_json::Value::Null);
    }

    #[test]
    fn sequences_and_maps_recurse() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("items:\n  - 1\n  - name: x").unwrap();
        let json = yaml_to_json(yaml);
        assert_eq!(json["items"][0], serde_json::Value::String("1".into()));
        assert_eq!(json["items"][1]["name"], serde_json::Value::String("x".into()));
    }
}
