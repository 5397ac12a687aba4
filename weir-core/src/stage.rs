//! Stage traits, roles and the plugin ABI.
//!
//! A stage implements exactly one of the three role traits. The factory
//! hands the runtime a [`StageRole`] — a tagged variant carrying the
//! capability directly — so the orchestrator classifies each stage once at
//! construction instead of probing on every loop iteration.
//!
//! Stage code stays trivial: a source produces one payload per call (or
//! signals end-of-stream), a transform produces one output from one input,
//! a sink consumes one input. Looping, queue I/O, timing, schema checks
//! and tracing all live in the stage runner.

use crate::payload::Payload;
use crate::token::StopToken;
use thiserror::Error;

/// Opaque configuration forwarded to stages that want it.
pub type StageConfig = serde_json::Map<String, serde_json::Value>;

/// Error escaping a stage call. The runner treats it as fatal for that
/// worker: an error metric is recorded and the worker unwinds.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StageError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StageError {
    /// Create a stage error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a stage error wrapping an underlying error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source("I/O error in stage", err)
    }
}

/// Result type for stage calls.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Context handed to every stage call.
#[derive(Clone, Debug)]
pub struct StageContext {
    /// The flow-wide cancellation token. Long-running stage calls should
    /// observe it and return early.
    pub stop: StopToken,
}

impl StageContext {
    /// Create a context observing the given token.
    pub fn new(stop: StopToken) -> Self {
        Self { stop }
    }
}

/// Behaviour shared by all stage roles.
pub trait Stage: Send {
    /// Human-readable stage name, used in logs and metrics.
    fn name(&self) -> &str;

    /// Deliver the opaque configuration to the stage. Called once, right
    /// after creation. Returning an error rejects the instance and the
    /// registry destroys it.
    fn configure(&mut self, _config: &StageConfig) -> StageResult<()> {
        Ok(())
    }
}

/// A stage that emits payloads into its output queue.
pub trait SourceStage: Stage {
    /// Produce one payload, or `Ok(None)` to signal end-of-stream.
    fn produce(&mut self, ctx: &StageContext) -> StageResult<Option<Payload>>;
}

/// A stage that maps one input payload to one output payload.
pub trait TransformStage: Stage {
    /// Produce the output payload for `input`.
    fn process(&mut self, ctx: &StageContext, input: &Payload) -> StageResult<Payload>;
}

/// A stage that terminates the pipeline.
pub trait SinkStage: Stage {
    /// Consume one input payload.
    fn consume(&mut self, ctx: &StageContext, input: &Payload) -> StageResult<()>;
}

/// The role a stage instance fulfils.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// No input queue, one output queue.
    Source,
    /// One input queue, one output queue.
    Transform,
    /// One input queue, no output queue.
    Sink,
}

impl StageKind {
    /// Lower-case label for logs and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Transform => "transform",
            Self::Sink => "sink",
        }
    }
}

/// A stage instance tagged with its role.
pub enum StageRole {
    /// A source stage.
    Source(Box<dyn SourceStage>),
    /// A transform stage.
    Transform(Box<dyn TransformStage>),
    /// A sink stage.
    Sink(Box<dyn SinkStage>),
}

impl StageRole {
    /// The role this instance fulfils.
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Source(_) => StageKind::Source,
            Self::Transform(_) => StageKind::Transform,
            Self::Sink(_) => StageKind::Sink,
        }
    }

    /// The stage's name.
    pub fn name(&self) -> &str {
        match self {
            Self::Source(s) => s.name(),
            Self::Transform(s) => s.name(),
            Self::Sink(s) => s.name(),
        }
    }

    /// Forward configuration to the underlying stage.
    pub fn configure(&mut self, config: &StageConfig) -> StageResult<()> {
        match self {
            Self::Source(s) => s.configure(config),
            Self::Transform(s) => s.configure(config),
            Self::Sink(s) => s.configure(config),
        }
    }
}

impl std::fmt::Debug for StageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRole")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Plugin ABI
// ---------------------------------------------------------------------------

/// FFI-safe owner of a stage role, allocated and freed by the library that
/// created it. Plugins hand the runtime `*mut StageBox` through the
/// exported factory symbols.
pub struct StageBox {
    /// The wrapped stage instance.
    pub role: StageRole,
}

/// Name of the factory symbol every stage plugin must export.
pub const CREATE_STAGE_SYMBOL: &[u8] = b"weir_create_stage";

/// Name of the destructor symbol every stage plugin must export.
pub const DESTROY_STAGE_SYMBOL: &[u8] = b"weir_destroy_stage";

/// Signature of the exported factory. A null return means the factory
/// failed to build an instance.
pub type CreateStageFn = unsafe extern "C" fn() -> *mut StageBox;

/// Signature of the exported destructor. Instance destruction must go
/// through the library that created the instance.
pub type DestroyStageFn = unsafe extern "C" fn(*mut StageBox);

/// Export the two plugin symbols for a stage constructor.
///
/// ```ignore
/// use weir_core::{export_stage, stage::StageRole};
///
/// weir_core::export_stage!(|| StageRole::Sink(Box::new(MySink::default())));
/// ```
#[macro_export]
macro_rules! export_stage {
    ($ctor:expr) => {
        #[no_mangle]
        pub extern "C" fn weir_create_stage() -> *mut $crate::stage::StageBox {
            let ctor: fn() -> $crate::stage::StageRole = $ctor;
            Box::into_raw(Box::new($crate::stage::StageBox { role: ctor() }))
        }

        /// # Safety
        /// `stage` must be a pointer previously returned by
        /// `weir_create_stage` from this library, not yet destroyed.
        #[no_mangle]
        pub unsafe extern "C" fn weir_destroy_stage(stage: *mut $crate::stage::StageBox) {
            if !stage.is_null() {
                drop(Box::from_raw(stage));
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSource {
        remaining: u32,
    }

    impl Stage for CountingSource {
        fn name(&self) -> &str {
            "counting_source"
        }

        fn configure(&mut self, config: &StageConfig) -> StageResult<()> {
            if let Some(count) = config.get("count") {
                self.remaining = count
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .or_else(|| count.as_u64().map(|n| n as u32))
                    .ok_or_else(|| StageError::new("count must be a number"))?;
            }
            Ok(())
        }
    }

    impl SourceStage for CountingSource {
        fn produce(&mut self, _ctx: &StageContext) -> StageResult<Option<Payload>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(Payload::default()))
        }
    }

    #[test]
    fn role_reports_kind_and_name() {
        let role = StageRole::Source(Box::new(CountingSource { remaining: 1 }));
        assert_eq!(role.kind(), StageKind::Source);
        assert_eq!(role.name(), "counting_source");
    }

    #[test]
    fn configure_accepts_string_scalars() {
        let mut role = StageRole::Source(Box::new(CountingSource { remaining: 0 }));
        let mut config = StageConfig::new();
        config.insert("count".into(), serde_json::Value::String("3".into()));
        role.configure(&config).unwrap();

        let ctx = StageContext::new(StopToken::new());
        let StageRole::Source(source) = &mut role else {
            unreachable!()
        };
        let mut produced = 0;
        while source.produce(&ctx).unwrap().is_some() {
            produced += 1;
        }
        assert_eq!(produced, 3);
    }

    #[test]
    fn configure_rejects_bad_values() {
        let mut role = StageRole::Source(Box::new(CountingSource { remaining: 0 }));
        let mut config = StageConfig::new();
        config.insert("count".into(), serde_json::Value::String("many".into()));
        assert!(role.configure(&config).is_err());
    }
}
