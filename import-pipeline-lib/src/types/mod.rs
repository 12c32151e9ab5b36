use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use uuid::Uuid;

/// Target field identifier → human-readable description, in display order.
pub type TargetSchema = IndexMap<String, String>;

/// One record keyed by column (or target field) name, in column order.
pub type Row = IndexMap<String, Value>;

/// Additional request parameters forwarded to preview and commit.
pub type ExtraParams = serde_json::Map<String, Value>;

/// Schema, mapping proposal and sample rows computed for an uploaded batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub import_id: Uuid,
    pub entity_type: String,
    pub source_columns: Vec<String>,
    pub target_schema: TargetSchema,
    /// Source column → proposed target field. Columns without a proposal are absent.
    #[serde(default)]
    pub suggested_mapping: IndexMap<String, String>,
    #[serde(default)]
    pub sample_data: Vec<Row>,
    pub total_rows: usize,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub import_id: Uuid,
    /// Effective target fields, in schema order.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub total_rows: usize,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    pub import_id: Uuid,
    pub entity_type: String,
    pub imported_rows: usize,
    pub skipped_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub committed_at: DateTime<Utc>,
}
