//! File intake: admission rules for the files a user queues for one import.
//!
//! Validation only looks at metadata (name, size, extension). File contents
//! are never read here; that is the analysis collaborator's job.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::utils::{extension_of, format_size};

pub const DEFAULT_MAX_FILES: usize = 20;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 4] = ["csv", "xlsx", "xls", "txt"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFile {
    pub name: String,
    pub size: u64,
    pub extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        let name = name.into();
        let extension = extension_of(&name);
        Self {
            name,
            size,
            extension,
            path: None,
        }
    }

    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Build a candidate from filesystem metadata.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(PipelineError::NotAllowed(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PipelineError::NotAllowed(format!("{} has no file name", path.display()))
            })?;
        Ok(Self::new(name, metadata.len()).with_path(path))
    }
}

/// Ordered files queued for one import; insertion order is display order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportBatch {
    files: Vec<CandidateFile>,
}

impl ImportBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &[CandidateFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.files.iter().any(|f| f.name == name)
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CandidateFile> {
        self.files.iter()
    }
}

impl<'a> IntoIterator for &'a ImportBatch {
    type Item = &'a CandidateFile;
    type IntoIter = std::slice::Iter<'a, CandidateFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    InvalidType,
    TooLarge,
    Duplicate,
    BatchLimitExceeded,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidType => "invalid_type",
            Self::TooLarge => "too_large",
            Self::Duplicate => "duplicate",
            Self::BatchLimitExceeded => "batch_limit_exceeded",
        }
    }
}

/// A candidate (or, for the batch limit, a group of candidates) that was not
/// admitted, with a message suitable for display next to the file picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub filename: Option<String>,
    pub reason: RejectionReason,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeOutcome {
    pub accepted: Vec<CandidateFile>,
    pub rejections: Vec<Rejection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IntakeConfig {
    pub max_files: usize,
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

impl IntakeConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_files == 0 {
            return Err(PipelineError::InvalidConfig(
                "intake.max_files must be greater than zero".into(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "intake.max_file_size must be greater than zero".into(),
            ));
        }
        if self.allowed_extensions.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "intake.allowed_extensions must list at least one extension".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileIntake {
    config: IntakeConfig,
}

impl FileIntake {
    pub fn new(config: IntakeConfig) -> Self {
        // Extensions are compared lower-cased and without a leading dot.
        let allowed_extensions = config
            .allowed_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        Self {
            config: IntakeConfig {
                allowed_extensions,
                ..config
            },
        }
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    /// Split `candidates` into the files that may join `existing` and the
    /// rejections to show the user. Does not touch `existing`.
    pub fn validate(
        &self,
        candidates: Vec<CandidateFile>,
        existing: &ImportBatch,
    ) -> IntakeOutcome {
        let mut outcome = IntakeOutcome::default();
        let mut seen: HashSet<String> = existing.iter().map(|f| f.name.clone()).collect();

        for candidate in candidates {
            match self.check(&candidate, &seen) {
                Some(rejection) => {
                    tracing::warn!(
                        "Rejected {} ({}): {}",
                        candidate.name,
                        rejection.reason.as_str(),
                        rejection.message
                    );
                    outcome.rejections.push(rejection);
                }
                None => {
                    tracing::debug!("Accepted {} ({} bytes)", candidate.name, candidate.size);
                    seen.insert(candidate.name.clone());
                    outcome.accepted.push(candidate);
                }
            }
        }

        let capacity = self.config.max_files.saturating_sub(existing.len());
        if outcome.accepted.len() > capacity {
            let dropped = outcome.accepted.split_off(capacity);
            tracing::warn!(
                "Batch limit of {} files reached; dropping {} file(s)",
                self.config.max_files,
                dropped.len()
            );
            outcome.rejections.push(Rejection {
                filename: None,
                reason: RejectionReason::BatchLimitExceeded,
                message: format!(
                    "A batch can hold at most {} files; {} file(s) were not added: {}",
                    self.config.max_files,
                    dropped.len(),
                    dropped
                        .iter()
                        .map(|f| f.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            });
        }

        outcome
    }

    fn check(&self, candidate: &CandidateFile, seen: &HashSet<String>) -> Option<Rejection> {
        let reject = |reason, message: String| {
            Some(Rejection {
                filename: Some(candidate.name.clone()),
                reason,
                message,
            })
        };

        let extension = extension_of(&candidate.name);
        if !self.config.allowed_extensions.contains(&extension) {
            return reject(
                RejectionReason::InvalidType,
                format!(
                    "{}: unsupported file type. Allowed types: {}",
                    candidate.name,
                    self.config.allowed_extensions.join(", ")
                ),
            );
        }
        if candidate.size > self.config.max_file_size {
            return reject(
                RejectionReason::TooLarge,
                format!(
                    "{}: file is too large ({}, maximum {})",
                    candidate.name,
                    format_size(candidate.size),
                    format_size(self.config.max_file_size)
                ),
            );
        }
        if seen.contains(&candidate.name) {
            return reject(
                RejectionReason::Duplicate,
                format!("{}: a file with this name is already in the batch", candidate.name),
            );
        }
        None
    }

    pub fn add(&self, batch: &mut ImportBatch, accepted: Vec<CandidateFile>) {
        batch.files.extend(accepted);
    }

    pub fn remove(&self, batch: &mut ImportBatch, index: usize) -> Option<CandidateFile> {
        if index < batch.files.len() {
            Some(batch.files.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&self, batch: &mut ImportBatch) {
        batch.files.clear();
    }
}
