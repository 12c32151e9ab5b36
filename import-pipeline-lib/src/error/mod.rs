use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("A request is already in flight; wait for it to finish or cancel it")]
    Busy,
    #[error("Transition not allowed: {0}")]
    NotAllowed(String),
    #[error("No files have been added to the import batch")]
    EmptyBatch,
    #[error("At least one column must be mapped before continuing")]
    NothingMapped,
    #[error("The import is complete; reset the pipeline to start another")]
    Terminal,
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("Request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("Unknown source column: {0}")]
    UnknownColumn(String),
    #[error("Unknown target field: {0}")]
    UnknownTarget(String),
    #[error("Target field '{target}' is already mapped from column '{column}'")]
    DuplicateTarget { target: String, column: String },
}

/// Failures reported by an [`ImportService`](crate::ImportService) collaborator.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),
    #[error("Unknown import: {0}")]
    UnknownImport(Uuid),
    #[error("Processing error: {0}")]
    Processing(String),
}

#[derive(Debug, Clone)]
pub struct ProcessingMessage {
    pub message: String,
    pub source: Option<String>,
}

impl ProcessingMessage {
    pub fn new(message: impl Into<String>, source: Option<String>) -> Self {
        Self {
            message: message.into(),
            source,
        }
    }
}

impl std::fmt::Display for ProcessingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", source, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Non-fatal findings collected while a collaborator reads or transforms data.
#[derive(Debug, Default, Clone)]
pub struct ProcessingState {
    warnings: Vec<ProcessingMessage>,
}

impl ProcessingState {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    pub fn add_warning(&mut self, message: impl Into<String>, source: Option<String>) {
        let message = ProcessingMessage::new(message, source);
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn get_warnings(&self) -> &[ProcessingMessage] {
        &self.warnings
    }

    pub fn merge(&mut self, other: ProcessingState) {
        self.warnings.extend(other.warnings);
    }

    pub fn into_messages(self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}
