//! Builtin stages, available without a plugin library.
//!
//! These mirror what a minimal out-of-tree plugin would provide and are
//! registered under their bare type names by the CLI.

mod noop_source;
mod noop_transform;
mod stdout_sink;

pub use noop_source::NoopSource;
pub use noop_transform::NoopTransform;
pub use stdout_sink::StdoutSink;

use weir_core::stage::{StageConfig, StageError, StageResult, StageRole};

use crate::registry::StageRegistry;

/// Register every builtin stage type.
pub fn register_builtins(registry: &StageRegistry) {
    registry.register_builtin("noop_source", || {
        StageRole::Source(Box::new(NoopSource::default()))
    });
    registry.register_builtin("noop_transform", || {
        StageRole::Transform(Box::new(NoopTransform))
    });
    registry.register_builtin("stdout_sink", || StageRole::Sink(Box::new(StdoutSink)));
}

/// Read an unsigned integer config value that may arrive as a JSON number
/// or as a string scalar (the YAML loader emits strings).
pub(crate) fn config_u64(config: &StageConfig, key: &str) -> StageResult<Option<u64>> {
    let Some(value) = config.get(key) else {
        return Ok(None);
    };

    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed.map(Some).ok_or_else(|| {
        StageError::new(format!("config value '{key}' must be a non-negative integer"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_u64_accepts_numbers_and_strings() {
        let mut config = StageConfig::new();
        config.insert("n".into(), serde_json::json!(5));
        config.insert("s".into(), serde_json::json!("7"));
        config.insert("bad".into(), serde_json::json!(true));

        assert_eq!(config_u64(&config, "n").unwrap(), Some(5));
        assert_eq!(config_u64(&config, "s").unwrap(), Some(7));
        assert_eq!(config_u64(&config, "missing").unwrap(), None);
        assert!(config_u64(&config, "bad").is_err());
    }
}
