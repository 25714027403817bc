use appconf_core_types::{RequestId, TraceId};
use thiserror::Error;

/// Result type alias using AppConfError
pub type Result<T> = std::result::Result<T, AppConfError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every failure surfaced by the store or the snapshot engine is classified
/// by exactly one kind. Kinds never overlap: a locked key is `KeyLocked`,
/// never `Concurrency`, and a deadline miss is `Timeout`, never `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Validation
    InvalidInput,
    SearchQuery,
    Format,

    // Lookup
    NotFound,
    AlreadyExists,

    // Concurrency and guards
    Concurrency,
    KeyLocked,
    SnapshotState,

    // Conditional request outcomes
    PreconditionFailed,
    NotModified,

    // Paging
    RangeNotSatisfiable,

    // Access
    Forbidden,

    // Integration/IO
    Timeout,
    Cancelled,
    Io,
    Serialization,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::SearchQuery => "ERR_SEARCH_QUERY",
            ExErrorKind::Format => "ERR_FORMAT",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
            ExErrorKind::Concurrency => "ERR_CONCURRENCY",
            ExErrorKind::KeyLocked => "ERR_KEY_LOCKED",
            ExErrorKind::SnapshotState => "ERR_SNAPSHOT_STATE",
            ExErrorKind::PreconditionFailed => "ERR_PRECONDITION_FAILED",
            ExErrorKind::NotModified => "ERR_NOT_MODIFIED",
            ExErrorKind::RangeNotSatisfiable => "ERR_RANGE_NOT_SATISFIABLE",
            ExErrorKind::Forbidden => "ERR_FORBIDDEN",
            ExErrorKind::Timeout => "ERR_TIMEOUT",
            ExErrorKind::Cancelled => "ERR_CANCELLED",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// HTTP status the transport layer reports for this kind
    pub fn http_status(&self) -> u16 {
        match self {
            ExErrorKind::InvalidInput | ExErrorKind::SearchQuery | ExErrorKind::Format => 400,
            ExErrorKind::Forbidden => 403,
            ExErrorKind::NotFound => 404,
            ExErrorKind::AlreadyExists | ExErrorKind::Concurrency | ExErrorKind::SnapshotState => {
                409
            }
            ExErrorKind::PreconditionFailed => 412,
            ExErrorKind::RangeNotSatisfiable => 416,
            ExErrorKind::KeyLocked => 423,
            ExErrorKind::NotModified => 304,
            ExErrorKind::Cancelled => 499,
            ExErrorKind::Timeout => 504,
            ExErrorKind::Io | ExErrorKind::Serialization | ExErrorKind::Internal => 500,
        }
    }
}

/// Canonical structured error type
///
/// Carries the classification plus whatever context the failing operation
/// had at hand: the key/label pair, the snapshot name, or the query
/// parameter and character offset of a malformed search expression.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    key: Option<String>,
    label: Option<String>,
    entity_id: Option<String>,
    param: Option<String>,
    position: Option<usize>,
    request_id: Option<RequestId>,
    trace_id: Option<TraceId>,
    message: String,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            key: None,
            label: None,
            entity_id: None,
            param: None,
            position: None,
            request_id: None,
            trace_id: None,
            message: String::new(),
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add the key/label pair the operation targeted
    pub fn with_key(mut self, key: impl Into<String>, label: Option<String>) -> Self {
        self.key = Some(key.into());
        self.label = label;
        self
    }

    /// Add entity ID context (snapshot name, file name)
    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// Add the query parameter and offset of a malformed expression
    pub fn with_position(mut self, param: impl Into<String>, position: usize) -> Self {
        self.param = Some(param.into());
        self.position = Some(position);
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn param(&self) -> Option<&str> {
        self.param.as_deref()
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether a caller may retry the operation after a backoff delay
    pub fn is_transient(&self) -> bool {
        self.kind == ExErrorKind::Timeout
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(key) = &self.key {
            write!(
                f,
                " (key={},label={})",
                key,
                self.label.as_deref().unwrap_or_default()
            )?;
        }
        if let Some(entity_id) = &self.entity_id {
            write!(f, " (entity_id: {})", entity_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {}

// ========== End Error Facility ==========

/// Domain error taxonomy raised by the pure engine pieces
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppConfError {
    /// A required field is missing or malformed
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    /// Malformed search expression, rendered the way clients see it
    #[error("{param}({position}): {message}")]
    SearchQuery {
        param: String,
        message: String,
        position: usize,
    },

    /// Continuation token that does not decode to a cursor
    #[error("Invalid continuation token: {reason}")]
    InvalidContinuationToken { reason: String },

    #[error("Key-value not found: key={key},label={}", .label.as_deref().unwrap_or_default())]
    KeyValueNotFound { key: String, label: Option<String> },

    /// Supplied etag does not match the live revision
    #[error("Etag mismatch: key={key},label={}", .label.as_deref().unwrap_or_default())]
    Conflict { key: String, label: Option<String> },

    #[error("Key is locked: key={key},label={}", .label.as_deref().unwrap_or_default())]
    KeyLocked { key: String, label: Option<String> },

    #[error("Snapshot not found: {name}")]
    SnapshotNotFound { name: String },

    #[error("Snapshot already exists: {name}")]
    SnapshotAlreadyExists { name: String },

    /// Supplied etag does not match the stored snapshot record
    #[error("Snapshot etag mismatch: {name}")]
    SnapshotConflict { name: String },

    #[error("Snapshot {name} is {status}, cannot {operation}")]
    InvalidSnapshotState {
        name: String,
        status: String,
        operation: String,
    },

    #[error("Snapshot update requires an etag: {name}")]
    MissingEtag { name: String },

    #[error("Range {offset}.. not satisfiable for {total} items")]
    RangeNotSatisfiable { offset: usize, total: usize },

    #[error("{principal} is not allowed to perform {action}")]
    Forbidden { action: String, principal: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl From<AppConfError> for ExError {
    fn from(err: AppConfError) -> Self {
        let message = err.to_string();
        match err {
            AppConfError::InvalidInput { field, .. } => ExError::new(ExErrorKind::InvalidInput)
                .with_entity_id(field)
                .with_message(message),

            AppConfError::SearchQuery {
                param, position, ..
            } => ExError::new(ExErrorKind::SearchQuery)
                .with_position(param, position)
                .with_message(message),

            AppConfError::InvalidContinuationToken { .. } => {
                ExError::new(ExErrorKind::Format).with_message(message)
            }

            AppConfError::KeyValueNotFound { key, label } => ExError::new(ExErrorKind::NotFound)
                .with_key(key, label)
                .with_message("Key-value not found"),

            AppConfError::Conflict { key, label } => ExError::new(ExErrorKind::Concurrency)
                .with_key(key, label)
                .with_message("Etag mismatch"),

            AppConfError::KeyLocked { key, label } => ExError::new(ExErrorKind::KeyLocked)
                .with_key(key, label)
                .with_message("Key is locked"),

            AppConfError::SnapshotNotFound { name } => ExError::new(ExErrorKind::NotFound)
                .with_entity_id(name)
                .with_message("Snapshot not found"),

            AppConfError::SnapshotAlreadyExists { name } => {
                ExError::new(ExErrorKind::AlreadyExists)
                    .with_entity_id(name)
                    .with_message("Snapshot already exists")
            }

            AppConfError::SnapshotConflict { name } => ExError::new(ExErrorKind::Concurrency)
                .with_entity_id(name)
                .with_message("Snapshot etag mismatch"),

            AppConfError::InvalidSnapshotState {
                name, operation, ..
            } => ExError::new(ExErrorKind::SnapshotState)
                .with_op(operation)
                .with_entity_id(name)
                .with_message(message),

            AppConfError::MissingEtag { name } => ExError::new(ExErrorKind::SnapshotState)
                .with_entity_id(name)
                .with_message("Snapshot update requires an etag"),

            AppConfError::RangeNotSatisfiable { .. } => {
                ExError::new(ExErrorKind::RangeNotSatisfiable).with_message(message)
            }

            AppConfError::Forbidden { action, .. } => ExError::new(ExErrorKind::Forbidden)
                .with_op(action)
                .with_message(message),

            AppConfError::Serialization { .. } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }
        }
    }
}

/// Conversion from serde_json::Error to AppConfError
impl From<serde_json::Error> for AppConfError {
    fn from(err: serde_json::Error) -> Self {
        AppConfError::Serialization {
            message: err.to_string(),
        }
    }
}
