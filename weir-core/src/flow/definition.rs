//! Flow definition - the top-level flow document.

use super::convert;
use super::validation::{FlowValidator, ValidationError};
use crate::error::{Result, WeirError};
use crate::stage::StageConfig;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::Path;

/// Execution mode of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Run until an external stop request.
    #[default]
    Streaming,
    /// Stop once all workers terminate naturally.
    Job,
}

impl<'de> Deserialize<'de> for ExecMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_uppercase().as_str() {
            "STREAMING" => Ok(Self::Streaming),
            "JOB" => Ok(Self::Job),
            other => Err(serde::de::Error::custom(format!(
                "unknown execution mode '{other}', expected JOB or STREAMING"
            ))),
        }
    }
}

/// The `execution` block of a flow.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionSpec {
    /// Execution mode (defaults to streaming).
    #[serde(default)]
    pub mode: ExecMode,
}

/// Schema attachment for a queue.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaSpec {
    /// The schema identifier payloads on this queue must carry.
    #[serde(default)]
    pub schema_id: String,
}

/// Declaration of one queue.
///
/// # Example
///
/// ```yaml
/// queues:
///   - name: parsed
///     capacity: 256
///     schema:
///       schema_id: orders.v1
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSpec {
    /// Queue name, unique within the flow.
    pub name: String,

    /// Maximum number of queued payloads.
    #[serde(default = "default_capacity", deserialize_with = "convert::u32_lenient")]
    pub capacity: u32,

    /// Queue implementation selector; empty selects the in-memory queue.
    #[serde(rename = "type", default)]
    pub queue_type: String,

    /// Optional schema contract enforced by the stage runners.
    #[serde(default)]
    pub schema: Option<SchemaSpec>,
}

impl QueueSpec {
    /// True when this spec selects the in-memory queue implementation.
    pub fn is_in_memory(&self) -> bool {
        matches!(
            self.queue_type.to_ascii_lowercase().as_str(),
            "" | "memory" | "in_memory" | "in-memory"
        )
    }

    /// The schema id payloads must carry, or empty when unconstrained.
    pub fn schema_id(&self) -> &str {
        self.schema.as_ref().map_or("", |s| s.schema_id.as_str())
    }
}

/// Declaration of one stage.
#[derive(Debug, Clone, Deserialize)]
pub struct StageSpec {
    /// Stage name, used in logs, metrics and CPU pinning hints.
    pub name: String,

    /// Stage type; selects a builtin or derives the plugin library name.
    #[serde(rename = "type")]
    pub stage_type: String,

    /// Explicit plugin path or name; overrides the type-derived default.
    #[serde(default)]
    pub plugin: Option<String>,

    /// Number of worker threads (each owns its own stage instance).
    #[serde(default = "default_threads", deserialize_with = "convert::u32_lenient")]
    pub threads: u32,

    /// Queue this stage consumes from (transforms and sinks).
    #[serde(default)]
    pub input_queue: Option<String>,

    /// Queue this stage produces into (sources and transforms).
    #[serde(default)]
    pub output_queue: Option<String>,

    /// Opaque configuration forwarded to the stage instance.
    #[serde(default)]
    pub config: Option<StageConfig>,

    /// Realtime scheduling priority hint for this stage's workers.
    #[serde(default, deserialize_with = "convert::opt_i32_lenient")]
    pub realtime_priority: Option<i32>,
}

impl StageSpec {
    /// Resolve the plugin reference: an explicit plugin wins, otherwise
    /// the conventional `libstage_<type>.so` name is derived.
    pub fn plugin_ref(&self) -> String {
        match &self.plugin {
            Some(plugin) => plugin.clone(),
            None => format!("libstage_{}.so", self.stage_type),
        }
    }
}

/// Kubernetes execution hints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KubernetesSpec {
    /// Map from stage name to the CPU ids its workers are pinned to.
    #[serde(default, deserialize_with = "convert::cpu_pinning_lenient")]
    pub cpu_pinning: HashMap<String, Vec<u32>>,
}

/// A complete flow specification.
///
/// # Example
///
/// ```yaml
/// name: csv_pipeline
///
/// execution:
///   mode: JOB
///
/// queues:
///   - name: raw
///     capacity: 256
///   - name: parsed
///     capacity: 256
///
/// stages:
///   - name: reader
///     type: csv_reader
///     output_queue: raw
///     config:
///       path: /data/input.csv
///   - name: parser
///     type: csv_parser
///     threads: 2
///     input_queue: raw
///     output_queue: parsed
///   - name: printer
///     type: stdout_sink
///     input_queue: parsed
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSpec {
    /// Flow name.
    pub name: String,

    /// Execution settings.
    #[serde(default)]
    pub execution: ExecutionSpec,

    /// Declared queues.
    #[serde(default)]
    pub queues: Vec<QueueSpec>,

    /// Declared stages.
    #[serde(default)]
    pub stages: Vec<StageSpec>,

    /// Optional Kubernetes execution hints.
    #[serde(default)]
    pub kubernetes: Option<KubernetesSpec>,

    /// Observability settings, forwarded opaquely to the collaborator
    /// that configures exporters.
    #[serde(default)]
    pub observability: Option<serde_json::Value>,
}

impl FlowSpec {
    /// Load a flow specification from a file; the extension selects the
    /// format (`.yaml`/`.yml` or `.json`).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| WeirError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let parsed = match extension.as_str() {
            "yaml" | "yml" => Self::parse_yaml(&content),
            "json" => Self::parse_json(&content),
            other => Err(format!(
                "unsupported flow file extension '{other}', expected yaml, yml or json"
            )),
        };

        parsed.map_err(|cause| WeirError::SpecParse {
            path: path.to_path_buf(),
            cause,
        })
    }

    /// Parse a flow specification from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::parse_yaml(yaml).map_err(|cause| WeirError::SpecParse {
            path: "<yaml>".into(),
            cause,
        })
    }

    /// Parse a flow specification from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::parse_json(json).map_err(|cause| WeirError::SpecParse {
            path: "<json>".into(),
            cause,
        })
    }

    fn parse_yaml(yaml: &str) -> std::result::Result<Self, String> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
        let json = convert::yaml_to_json(value);
        serde_json::from_value(json).map_err(|e| e.to_string())
    }

    fn parse_json(json: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(json).map_err(|e| e.to_string())
    }

    /// Validate this specification, collecting every problem found.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        FlowValidator::new().validate(self)
    }
}

fn default_capacity() -> u32 {
    1024
}

fn default_threads() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO_FLOW: &str = r#"
name: demo
execution:
  mode: JOB
queues:
  - name: q1
    capacity: 256
  - name: q2
    capacity: 128
    schema:
      schema_id: lines.v1
stages:
  - name: src
    type: noop_source
    output_queue: q1
    config:
      count: "5"
  - name: xf
    type: noop_transform
    threads: 2
    input_queue: q1
    output_queue: q2
  - name: out
    type: stdout_sink
    input_queue: q2
"#;

    #[test]
    fn parses_yaml_flow() {
        let spec = FlowSpec::from_yaml(DEMO_FLOW).unwrap();
        assert_eq!(spec.name, "demo");
        assert_eq!(spec.execution.mode, ExecMode::Job);
        assert_eq!(spec.queues.len(), 2);
        assert_eq!(spec.queues[0].capacity, 256);
        assert_eq!(spec.queues[1].schema_id(), "lines.v1");
        assert_eq!(spec.stages[1].threads, 2);
        assert_eq!(spec.stages[0].plugin_ref(), "libstage_noop_source.so");
    }

    #[test]
    fn yaml_and_json_produce_the_same_spec() {
        let json = r#"{
            "name": "demo",
            "execution": {"mode": "JOB"},
            "queues": [{"name": "q1", "capacity": 256}],
            "stages": [
                {"name": "src", "type": "noop_source", "output_queue": "q1"},
                {"name": "out", "type": "stdout_sink", "input_queue": "q1", "threads": 2}
            ]
        }"#;
        let yaml = r#"
name: demo
execution:
  mode: JOB
queues:
  - name: q1
    capacity: 256
stages:
  - name: src
    type: noop_source
    output_queue: q1
  - name: out
    type: stdout_sink
    input_queue: q1
    threads: 2
"#;

        let from_json = FlowSpec::from_json(json).unwrap();
        let from_yaml = FlowSpec::from_yaml(yaml).unwrap();
        assert_eq!(from_json.name, from_yaml.name);
        assert_eq!(from_json.queues[0].capacity, from_yaml.queues[0].capacity);
        assert_eq!(from_json.stages[1].threads, from_yaml.stages[1].threads);
        assert_eq!(from_json.execution.mode, from_yaml.execution.mode);
    }

    #[test]
    fn numeric_fields_accept_yaml_strings() {
        let spec = FlowSpec::from_yaml(
            "name: n\nqueues:\n  - name: q\n    capacity: \"32\"\nstages:\n  - name: s\n    type: t\n    threads: \"4\"\n    output_queue: q\n    realtime_priority: 10\n",
        )
        .unwrap();
        assert_eq!(spec.queues[0].capacity, 32);
        assert_eq!(spec.stages[0].threads, 4);
        assert_eq!(spec.stages[0].realtime_priority, Some(10));
    }

    #[test]
    fn defaults_apply() {
        let spec = FlowSpec::from_yaml("name: n\nqueues:\n  - name: q\n").unwrap();
        assert_eq!(spec.execution.mode, ExecMode::Streaming);
        assert_eq!(spec.queues[0].capacity, 1024);
        assert!(spec.queues[0].is_in_memory());
        assert_eq!(spec.queues[0].schema_id(), "");
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(FlowSpec::from_yaml("name: n\nexecution:\n  mode: BATCH\n").is_err());
    }

    #[test]
    fn cpu_pinning_parses() {
        let spec = FlowSpec::from_yaml(
            "name: n\nkubernetes:\n  cpu_pinning:\n    src:\n      - 0\n      - 1\n",
        )
        .unwrap();
        let pinning = &spec.kubernetes.unwrap().cpu_pinning;
        assert_eq!(pinning["src"], vec![0, 1]);
    }
}
