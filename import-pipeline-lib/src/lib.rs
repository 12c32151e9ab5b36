//! Import Pipeline Library
//!
//! Client-side state machine for a multi-file, column-mapping import wizard:
//! file intake, server analysis, mapping edits, preview and commit.

mod config;
mod error;
mod excel;
mod intake;
mod mapping;
mod pipeline;
mod service;
mod steps;
mod types;
mod utils;

pub use config::{
    EntityDefinition, FieldDefinition, PipelineConfig, Template, BASIC_CONFIG, FULL_CONFIG,
};
pub use error::{MappingError, PipelineError, ProcessingMessage, ProcessingState, ServiceError};
pub use intake::{
    CandidateFile, FileIntake, ImportBatch, IntakeConfig, IntakeOutcome, Rejection,
    RejectionReason, DEFAULT_ALLOWED_EXTENSIONS, DEFAULT_MAX_FILES, DEFAULT_MAX_FILE_SIZE,
};
pub use mapping::{ColumnMapping, DuplicateTargetPolicy, MappingEditor};
pub use pipeline::{
    Completion, ImportPipeline, PendingRequest, PipelineHandle, RequestKind, RequestPayload,
    Response, Transition,
};
pub use service::{ImportService, LocalImportService};
pub use steps::{
    default_steps, StepDescriptor, StepIndicator, StepState, StepStatus, StepperView, ANALYZE,
    COMMIT, MAP, PREVIEW, UPLOAD,
};
pub use types::{AnalysisResult, CommitResult, ExtraParams, PreviewResult, Row, TargetSchema};
pub use utils::format_size;
