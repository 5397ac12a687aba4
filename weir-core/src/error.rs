//! Error types for weir.
//!
//! Errors are strongly typed and coded: configuration problems are
//! `W0xx`, plugin lifecycle problems `W1xx`, stage lifecycle problems
//! `W2xx`, worker/runtime problems `W3xx`, and I/O `W9xx`. Every variant
//! carries the identifiers needed to act on it.

use crate::flow::validation::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for weir operations.
#[derive(Error, Debug)]
pub enum WeirError {
    // =========================================================================
    // Configuration Errors (W001-W099)
    // =========================================================================
    /// The flow specification file could not be parsed.
    #[error("W001: Failed to parse flow specification at {path}: {cause}")]
    SpecParse {
        /// The specification file path.
        path: PathBuf,
        /// Reason for the parse failure.
        cause: String,
    },

    /// The flow specification failed validation.
    #[error("W002: Flow specification is invalid:{}", format_validation_errors(.errors))]
    SpecValidation {
        /// The individual validation errors found.
        errors: Vec<ValidationError>,
    },

    /// A stage's declared queues do not match its role.
    #[error("W003: Invalid {kind} stage wiring for '{stage}': {cause}")]
    InvalidWiring {
        /// The stage with mismatched wiring.
        stage: String,
        /// The role the stage instance reported.
        kind: &'static str,
        /// What is wrong with the declared queues.
        cause: String,
    },

    /// A CPU pinning hint references an unusable CPU set.
    #[error("W004: Invalid CPU pinning for stage '{stage}': {cause}")]
    InvalidCpuPinning {
        /// The stage the pinning was configured for.
        stage: String,
        /// Why the CPU list was rejected.
        cause: String,
    },

    /// A realtime priority hint is outside the scheduler's range.
    #[error(
        "W005: Invalid realtime priority {priority} for stage '{stage}': valid range is {min}-{max}"
    )]
    InvalidRealtimePriority {
        /// The stage the priority was configured for.
        stage: String,
        /// The configured priority.
        priority: i32,
        /// Minimum priority accepted by the scheduler.
        min: i32,
        /// Maximum priority accepted by the scheduler.
        max: i32,
    },

    // =========================================================================
    // Plugin Errors (W101-W199)
    // =========================================================================
    /// A plugin library could not be resolved or loaded.
    #[error("W101: Failed to load plugin '{plugin}': {cause}")]
    PluginLoad {
        /// The plugin name or path.
        plugin: String,
        /// Reason for the load failure.
        cause: String,
    },

    /// A required symbol is missing from a plugin library.
    #[error("W102: Plugin '{plugin}' is missing required symbol '{symbol}': {cause}")]
    PluginSymbol {
        /// The plugin name or path.
        plugin: String,
        /// The symbol that could not be resolved.
        symbol: String,
        /// Reason for the resolution failure.
        cause: String,
    },

    // =========================================================================
    // Stage Lifecycle Errors (W201-W299)
    // =========================================================================
    /// A stage factory returned no instance.
    #[error("W201: Plugin '{plugin}' returned no stage instance")]
    StageCreate {
        /// The plugin whose factory failed.
        plugin: String,
    },

    /// A stage instance rejected its configuration.
    #[error("W202: Stage from plugin '{plugin}' rejected configuration: {cause}")]
    StageConfigRejected {
        /// The plugin that created the instance.
        plugin: String,
        /// The rejection reason reported by the stage.
        cause: String,
    },

    // =========================================================================
    // Runtime Errors (W301-W399)
    // =========================================================================
    /// A worker thread could not be spawned.
    #[error("W301: Failed to spawn worker thread for stage '{stage}': {cause}")]
    WorkerSpawn {
        /// The stage whose worker failed to start.
        stage: String,
        /// The underlying spawn error.
        cause: String,
    },

    // =========================================================================
    // I/O Errors (W901-W999)
    // =========================================================================
    /// File I/O error.
    #[error("W901: I/O error at {path}: {cause}")]
    Io {
        /// The path where the I/O error occurred.
        path: PathBuf,
        /// Description of the I/O error.
        cause: String,
    },
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    let mut out = String::new();
    for error in errors {
        out.push_str("\n  - ");
        out.push_str(&error.to_string());
    }
    out
}

impl WeirError {
    /// Get the error code (e.g. "W001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SpecParse { .. } => "W001",
            Self::SpecValidation { .. } => "W002",
            Self::InvalidWiring { .. } => "W003",
            Self::InvalidCpuPinning { .. } => "W004",
            Self::InvalidRealtimePriority { .. } => "W005",
            Self::PluginLoad { .. } => "W101",
            Self::PluginSymbol { .. } => "W102",
            Self::StageCreate { .. } => "W201",
            Self::StageConfigRejected { .. } => "W202",
            Self::WorkerSpawn { .. } => "W301",
            Self::Io { .. } => "W901",
        }
    }

    /// Check if this error is a configuration error, i.e. it is reported
    /// before any worker starts and the flow refuses to run.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::SpecParse { .. }
                | Self::SpecValidation { .. }
                | Self::InvalidWiring { .. }
                | Self::InvalidCpuPinning { .. }
                | Self::InvalidRealtimePriority { .. }
        )
    }
}

/// Result type alias using [`WeirError`].
pub type Result<T> = std::result::Result<T, WeirError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::validation::{ValidationError, ValidationErrorKind};

    #[test]
    fn error_codes_are_correct() {
        let err = WeirError::PluginLoad {
            plugin: "libstage_demo.so".to_string(),
            cause: "not found".to_string(),
        };
        assert_eq!(err.code(), "W101");
        assert!(!err.is_config_error());

        let err = WeirError::InvalidWiring {
            stage: "src".to_string(),
            kind: "source",
            cause: "source stages must not declare an input queue".to_string(),
        };
        assert_eq!(err.code(), "W003");
        assert!(err.is_config_error());
    }

    #[test]
    fn validation_errors_are_listed_in_display() {
        let err = WeirError::SpecValidation {
            errors: vec![
                ValidationError::new(
                    ValidationErrorKind::InvalidValue,
                    "queues[0]",
                    "capacity must be at least 1",
                ),
                ValidationError::duplicate_name("queues[1]", "q1"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("W002"));
        assert!(msg.contains("queues[0]"));
        assert!(msg.contains("q1"));
    }
}
