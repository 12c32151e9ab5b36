//! Collaborators that analyse, preview and commit an import on the pipeline's behalf.

mod local;

pub use local::LocalImportService;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::intake::ImportBatch;
use crate::mapping::ColumnMapping;
use crate::types::{AnalysisResult, CommitResult, ExtraParams, PreviewResult};

/// The three remote operations the pipeline depends on. Implementations own
/// transport, authorization and timeouts; the pipeline only sees outcomes.
#[async_trait]
pub trait ImportService: Send + Sync {
    /// Upload the batch and infer its schema plus a proposed column mapping.
    async fn analyze(&self, batch: &ImportBatch) -> Result<AnalysisResult, ServiceError>;

    /// Validate the mapping and render the first rows as they would be imported.
    async fn preview(
        &self,
        analysis: &AnalysisResult,
        mapping: &ColumnMapping,
        extra_params: &ExtraParams,
    ) -> Result<PreviewResult, ServiceError>;

    /// Perform the import with the confirmed mapping.
    async fn commit(
        &self,
        analysis: &AnalysisResult,
        mapping: &ColumnMapping,
        extra_params: &ExtraParams,
    ) -> Result<CommitResult, ServiceError>;

    /// Forget an analysed import that will never be previewed or committed,
    /// e.g. after re-analysis or a reset.
    async fn discard(&self, _import_id: Uuid) {}
}
