//! Flow specification validation.
//!
//! Every problem is collected and reported together, before any queue is
//! materialised or worker started. Checks that need a live stage instance
//! (role-versus-wiring) are performed by the orchestrator at
//! instantiation.

use std::collections::HashSet;

use super::definition::FlowSpec;

/// A validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The type of error.
    pub kind: ValidationErrorKind,
    /// The location in the flow (e.g. "stages[2]").
    pub location: String,
    /// Human-readable error message.
    pub message: String,
}

/// Types of validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Missing required field.
    MissingField,
    /// Invalid value for a field.
    InvalidValue,
    /// Duplicate name.
    DuplicateName,
    /// Reference to an undeclared queue.
    InvalidReference,
    /// Queue type the runtime cannot materialise.
    UnsupportedQueueType,
    /// A queue no stage produces into.
    MissingProducer,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.location, self.message)
    }
}

impl std::fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingField => "MISSING_FIELD",
            Self::InvalidValue => "INVALID_VALUE",
            Self::DuplicateName => "DUPLICATE_NAME",
            Self::InvalidReference => "INVALID_REFERENCE",
            Self::UnsupportedQueueType => "UNSUPPORTED_QUEUE_TYPE",
            Self::MissingProducer => "MISSING_PRODUCER",
        };
        write!(f, "{}", s)
    }
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(
        kind: ValidationErrorKind,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a missing field error.
    pub fn missing_field(location: impl Into<String>, field: &str) -> Self {
        Self::new(
            ValidationErrorKind::MissingField,
            location,
            format!("missing required field '{}'", field),
        )
    }

    /// Create an invalid value error.
    pub fn invalid_value(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationErrorKind::InvalidValue, location, message)
    }

    /// Create a duplicate name error.
    pub fn duplicate_name(location: impl Into<String>, name: &str) -> Self {
        Self::new(
            ValidationErrorKind::DuplicateName,
            location,
            format!("duplicate name '{}'", name),
        )
    }

    /// Create an invalid queue reference error.
    pub fn invalid_reference(location: impl Into<String>, queue: &str) -> Self {
        Self::new(
            ValidationErrorKind::InvalidReference,
            location,
            format!("reference to undeclared queue '{}'", queue),
        )
    }
}

/// Validator for flow specifications.
pub struct FlowValidator {
    errors: Vec<ValidationError>,
}

impl FlowValidator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Validate a flow specification, returning every error found.
    pub fn validate(mut self, flow: &FlowSpec) -> Result<(), Vec<ValidationError>> {
        self.validate_metadata(flow);
        self.validate_queues(flow);
        self.validate_stages(flow);
        self.validate_producers(flow);

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    fn validate_metadata(&mut self, flow: &FlowSpec) {
        if flow.name.is_empty() {
            self.add_error(ValidationError::missing_field("flow", "name"));
        }
    }

    fn validate_queues(&mut self, flow: &FlowSpec) {
        let mut seen = HashSet::new();

        for (idx, queue) in flow.queues.iter().enumerate() {
            let location = format!("queues[{}]", idx);

            if queue.name.is_empty() {
                self.add_error(ValidationError::missing_field(&location, "name"));
            }

            if !seen.insert(&queue.name) {
                self.add_error(ValidationError::duplicate_name(&location, &queue.name));
            }

            if queue.capacity == 0 {
                self.add_error(ValidationError::invalid_value(
                    &location,
                    "capacity must be at least 1",
                ));
            }

            if let Some(schema) = &queue.schema {
                if schema.schema_id.is_empty() {
                    self.add_error(ValidationError::missing_field(
                        format!("{}.schema", location),
                        "schema_id",
                    ));
                }
            }

            if !queue.is_in_memory() {
                self.add_error(ValidationError::new(
                    ValidationErrorKind::UnsupportedQueueType,
                    &location,
                    format!("unsupported queue type '{}'", queue.queue_type),
                ));
            }
        }
    }

    fn validate_stages(&mut self, flow: &FlowSpec) {
        let queue_names: HashSet<&str> = flow.queues.iter().map(|q| q.name.as_str()).collect();
        let mut seen = HashSet::new();

        for (idx, stage) in flow.stages.iter().enumerate() {
            let location = format!("stages[{}]", idx);

            if stage.name.is_empty() {
                self.add_error(ValidationError::missing_field(&location, "name"));
            }

            if !seen.insert(&stage.name) {
                self.add_error(ValidationError::duplicate_name(&location, &stage.name));
            }

            if stage.stage_type.is_empty() {
                self.add_error(ValidationError::missing_field(&location, "type"));
            }

            if stage.threads < 1 {
                self.add_error(ValidationError::invalid_value(
                    &location,
                    "threads must be at least 1",
                ));
            }

            if stage.input_queue.is_none() && stage.output_queue.is_none() {
                self.add_error(ValidationError::invalid_value(
                    &location,
                    "stage must declare an input queue, an output queue, or both",
                ));
            }

            for queue in [&stage.input_queue, &stage.output_queue].into_iter().flatten() {
                if !queue_names.contains(queue.as_str()) {
                    self.add_error(ValidationError::invalid_reference(&location, queue));
                }
            }
        }
    }

    fn validate_producers(&mut self, flow: &FlowSpec) {
        for (idx, queue) in flow.queues.iter().enumerate() {
            let produced = flow
                .stages
                .iter()
                .any(|s| s.output_queue.as_deref() == Some(queue.name.as_str()));
            if !produced {
                self.add_error(ValidationError::new(
                    ValidationErrorKind::MissingProducer,
                    format!("queues[{}]", idx),
                    format!("queue '{}' has no producer stage", queue.name),
                ));
            }
        }
    }
}

impl Default for FlowValidator {
    fn default() -> Self {
        Self::new()
    }
}
