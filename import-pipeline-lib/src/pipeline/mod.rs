//! The import orchestrator.
//!
//! [`ImportPipeline`] is the synchronous state core: it owns the batch, the
//! step position, the analysis and the mapping, and decides which transitions
//! are legal. Collaborator calls are split into two halves so that no lock is
//! held while a request is in flight:
//!
//! 1. [`ImportPipeline::begin_advance`] checks the exit criteria of the current
//!    step, marks the pipeline busy and hands back a [`PendingRequest`].
//! 2. [`ImportPipeline::complete`] applies the collaborator's outcome, but only
//!    if the request is still the live one.
//!
//! [`PipelineHandle`] drives both halves against an [`ImportService`](crate::ImportService).

mod handle;

pub use handle::PipelineHandle;

use std::fmt;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::intake::{CandidateFile, FileIntake, ImportBatch, Rejection};
use crate::mapping::{ColumnMapping, MappingEditor};
use crate::steps::{StepDescriptor, StepState, StepperView, ANALYZE, COMMIT, MAP, PREVIEW, UPLOAD};
use crate::types::{AnalysisResult, CommitResult, ExtraParams, PreviewResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Analyze,
    Preview,
    Commit,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Analyze => "analyze",
            RequestKind::Preview => "preview",
            RequestKind::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Snapshot of everything a collaborator call needs, taken when the request starts.
#[derive(Debug, Clone)]
pub enum RequestPayload {
    Analyze {
        batch: ImportBatch,
    },
    Preview {
        analysis: AnalysisResult,
        mapping: ColumnMapping,
        extra_params: ExtraParams,
    },
    Commit {
        analysis: AnalysisResult,
        mapping: ColumnMapping,
        extra_params: ExtraParams,
    },
}

impl RequestPayload {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestPayload::Analyze { .. } => RequestKind::Analyze,
            RequestPayload::Preview { .. } => RequestKind::Preview,
            RequestPayload::Commit { .. } => RequestKind::Commit,
        }
    }
}

#[derive(Debug)]
pub struct PendingRequest {
    pub seq: u64,
    pub token: CancellationToken,
    pub payload: RequestPayload,
}

#[derive(Debug, Clone)]
pub enum Response {
    Analyzed(AnalysisResult),
    Previewed(PreviewResult),
    Committed(CommitResult),
}

#[derive(Debug)]
pub enum Transition {
    /// The step had no collaborator call and the pipeline has already moved.
    Advanced,
    Request(PendingRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The response was applied; `step` is the key of the new current step.
    Applied { step: String },
    /// The response belonged to a request that is no longer live and was dropped.
    Stale,
}

#[derive(Debug)]
struct InFlight {
    seq: u64,
    kind: RequestKind,
    token: CancellationToken,
}

#[derive(Debug)]
pub struct ImportPipeline {
    intake: FileIntake,
    editor: MappingEditor,
    steps: StepState,
    batch: ImportBatch,
    analysis: Option<AnalysisResult>,
    mapping: ColumnMapping,
    preview: Option<PreviewResult>,
    commit: Option<CommitResult>,
    extra_params: ExtraParams,
    last_error: Option<String>,
    in_flight: Option<InFlight>,
    next_seq: u64,
    /// Bumped on every batch change; an analysis is reused while it matches.
    batch_generation: u64,
    analyzed_generation: Option<u64>,
    /// Imports the collaborator may forget: replaced by re-analysis or reset.
    discarded: Vec<Uuid>,
    shutdown: CancellationToken,
}

impl ImportPipeline {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self::with_parts(
            FileIntake::new(config.intake.clone()),
            MappingEditor::new(config.duplicate_targets),
            StepState::new(config.steps.clone())?,
        ))
    }

    pub fn with_parts(intake: FileIntake, editor: MappingEditor, steps: StepState) -> Self {
        Self {
            intake,
            editor,
            steps,
            batch: ImportBatch::new(),
            analysis: None,
            mapping: ColumnMapping::default(),
            preview: None,
            commit: None,
            extra_params: ExtraParams::new(),
            last_error: None,
            in_flight: None,
            next_seq: 1,
            batch_generation: 0,
            analyzed_generation: None,
            discarded: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn batch(&self) -> &ImportBatch {
        &self.batch
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.analysis.as_ref()
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn mapped_count(&self) -> usize {
        self.mapping.mapped_count()
    }

    pub fn preview(&self) -> Option<&PreviewResult> {
        self.preview.as_ref()
    }

    pub fn commit_result(&self) -> Option<&CommitResult> {
        self.commit.as_ref()
    }

    pub fn extra_params(&self) -> &ExtraParams {
        &self.extra_params
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn current_step(&self) -> &StepDescriptor {
        self.steps.current()
    }

    pub fn steps(&self) -> &StepState {
        &self.steps
    }

    pub fn stepper(&self) -> StepperView {
        StepperView::render(&self.steps)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Kind of the request currently in flight, if any.
    pub fn pending(&self) -> Option<RequestKind> {
        self.in_flight.as_ref().map(|f| f.kind)
    }

    /// Import ids whose collaborator-side state is no longer needed. Draining
    /// hands them to the caller, which passes them to
    /// [`ImportService::discard`](crate::ImportService::discard).
    pub fn take_discarded(&mut self) -> Vec<Uuid> {
        std::mem::take(&mut self.discarded)
    }

    /// Whether the stored analysis was taken from the batch as it is now.
    fn analysis_is_current(&self) -> bool {
        self.analysis.is_some() && self.analyzed_generation == Some(self.batch_generation)
    }

    fn discard_analysis(&mut self) {
        if let Some(analysis) = self.analysis.take() {
            self.discarded.push(analysis.import_id);
        }
        self.analyzed_generation = None;
    }

    /// Token cancelled when the owning handle goes away.
    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn ensure_idle(&self) -> Result<(), PipelineError> {
        if self.is_busy() {
            return Err(PipelineError::Busy);
        }
        Ok(())
    }

    fn ensure_step(&self, key: &str, action: &str) -> Result<(), PipelineError> {
        if self.steps.current_key() != key {
            return Err(PipelineError::NotAllowed(format!(
                "Cannot {} during step '{}'",
                action,
                self.steps.current_key()
            )));
        }
        Ok(())
    }

    /// Validate `candidates` and append the accepted ones to the batch.
    /// Returns the rejections to display.
    pub fn add_files(
        &mut self,
        candidates: Vec<CandidateFile>,
    ) -> Result<Vec<Rejection>, PipelineError> {
        self.ensure_idle()?;
        self.ensure_step(UPLOAD, "add files")?;
        let outcome = self.intake.validate(candidates, &self.batch);
        tracing::info!(
            "Added {} file(s) to the batch, rejected {}",
            outcome.accepted.len(),
            outcome.rejections.len()
        );
        if !outcome.accepted.is_empty() {
            self.batch_generation += 1;
        }
        self.intake.add(&mut self.batch, outcome.accepted);
        Ok(outcome.rejections)
    }

    pub fn remove_file(&mut self, index: usize) -> Result<Option<CandidateFile>, PipelineError> {
        self.ensure_idle()?;
        self.ensure_step(UPLOAD, "remove files")?;
        let removed = self.intake.remove(&mut self.batch, index);
        if removed.is_some() {
            self.batch_generation += 1;
        }
        Ok(removed)
    }

    pub fn clear_files(&mut self) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.ensure_step(UPLOAD, "clear files")?;
        if !self.batch.is_empty() {
            self.batch_generation += 1;
        }
        self.intake.clear(&mut self.batch);
        Ok(())
    }

    /// Assign `column` to `target`, or unset it with `None`.
    pub fn set_mapping(&mut self, column: &str, target: Option<&str>) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.ensure_step(MAP, "edit the mapping")?;
        let analysis = self
            .analysis
            .as_ref()
            .ok_or_else(|| PipelineError::NotAllowed("No analysis has been received".into()))?;
        self.mapping =
            self.editor
                .set_mapping(&self.mapping, &analysis.target_schema, column, target)?;
        // An older preview no longer reflects the mapping
        self.preview = None;
        tracing::debug!("Mapped '{}' to {:?}", column, target);
        Ok(())
    }

    /// Replace the extra params. A changed value drops the stored preview, so
    /// the import has to be previewed again before it can be committed.
    pub fn set_extra_params(&mut self, extra_params: ExtraParams) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        if self.extra_params != extra_params {
            self.preview = None;
            self.extra_params = extra_params;
        }
        Ok(())
    }

    /// Whether the advance action should be enabled right now.
    pub fn can_advance(&self) -> bool {
        if self.is_busy() || self.steps.is_terminal() {
            return false;
        }
        match self.steps.current_key() {
            UPLOAD | ANALYZE => !self.batch.is_empty(),
            MAP => self.analysis.is_some() && self.mapped_count() > 0,
            PREVIEW => self.preview.is_some(),
            _ => true,
        }
    }

    pub fn can_retreat(&self) -> bool {
        !self.is_busy() && !self.steps.is_initial()
    }

    /// Start leaving the current step. Steps backed by a collaborator yield a
    /// [`PendingRequest`] and leave the pipeline busy until [`complete`](Self::complete).
    pub fn begin_advance(&mut self) -> Result<Transition, PipelineError> {
        self.ensure_idle()?;
        if self.steps.is_terminal() {
            return Err(PipelineError::Terminal);
        }

        let key = self.steps.current_key().to_string();
        let payload = match key.as_str() {
            UPLOAD | ANALYZE => {
                if self.batch.is_empty() {
                    return Err(PipelineError::EmptyBatch);
                }
                if self.analysis_is_current() {
                    tracing::info!("Batch unchanged since the last analysis; keeping the mapping");
                    self.advance_to(MAP)?;
                    return Ok(Transition::Advanced);
                }
                RequestPayload::Analyze {
                    batch: self.batch.clone(),
                }
            }
            MAP => {
                let analysis = self.analysis.clone().ok_or_else(|| {
                    PipelineError::NotAllowed("No analysis has been received".into())
                })?;
                if self.mapping.mapped_count() == 0 {
                    return Err(PipelineError::NothingMapped);
                }
                RequestPayload::Preview {
                    analysis,
                    mapping: self.mapping.clone(),
                    extra_params: self.extra_params.clone(),
                }
            }
            PREVIEW => {
                let analysis = self.analysis.clone().ok_or_else(|| {
                    PipelineError::NotAllowed("No analysis has been received".into())
                })?;
                if self.preview.is_none() {
                    return Err(PipelineError::NotAllowed(
                        "Preview the import before committing it".into(),
                    ));
                }
                RequestPayload::Commit {
                    analysis,
                    mapping: self.mapping.clone(),
                    extra_params: self.extra_params.clone(),
                }
            }
            _ => {
                self.steps.advance(true)?;
                tracing::info!("Moved to step '{}'", self.steps.current_key());
                return Ok(Transition::Advanced);
            }
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        let token = self.shutdown.child_token();
        let kind = payload.kind();
        self.in_flight = Some(InFlight {
            seq,
            kind,
            token: token.clone(),
        });
        tracing::info!("Starting {} request #{}", kind, seq);

        Ok(Transition::Request(PendingRequest {
            seq,
            token,
            payload,
        }))
    }

    /// Apply the outcome of request `seq`. Outcomes of requests that are no
    /// longer live are discarded and reported as [`Completion::Stale`].
    pub fn complete(
        &mut self,
        seq: u64,
        outcome: Result<Response, PipelineError>,
    ) -> Result<Completion, PipelineError> {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) if in_flight.seq == seq => in_flight,
            other => {
                self.in_flight = other;
                tracing::warn!("Discarding stale response for request #{}", seq);
                return match outcome {
                    Err(PipelineError::Cancelled) => Err(PipelineError::Cancelled),
                    _ => Ok(Completion::Stale),
                };
            }
        };

        match outcome {
            Ok(response) => self.apply(in_flight.kind, response),
            Err(PipelineError::Cancelled) => {
                tracing::info!("{} request #{} was cancelled", in_flight.kind, seq);
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                tracing::error!("{} request #{} failed: {}", in_flight.kind, seq, e);
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn apply(&mut self, kind: RequestKind, response: Response) -> Result<Completion, PipelineError> {
        match (kind, response) {
            (RequestKind::Analyze, Response::Analyzed(analysis)) => {
                self.discard_analysis();
                self.mapping = self.editor.seed(&analysis);
                tracing::info!(
                    "Analysis {} ready: {} column(s), {} row(s), {} mapped",
                    analysis.import_id,
                    analysis.source_columns.len(),
                    analysis.total_rows,
                    self.mapping.mapped_count()
                );
                self.analysis = Some(analysis);
                self.analyzed_generation = Some(self.batch_generation);
                self.preview = None;
                self.commit = None;
                self.advance_to(MAP)?;
            }
            (RequestKind::Preview, Response::Previewed(preview)) => {
                self.preview = Some(preview);
                self.advance_to(PREVIEW)?;
            }
            (RequestKind::Commit, Response::Committed(commit)) => {
                tracing::info!(
                    "Committed {} row(s) ({} skipped)",
                    commit.imported_rows,
                    commit.skipped_rows
                );
                self.commit = Some(commit);
                self.advance_to(COMMIT)?;
            }
            (kind, _) => {
                let e = PipelineError::NotAllowed(format!(
                    "Response does not answer the {} request",
                    kind
                ));
                self.last_error = Some(e.to_string());
                return Err(e);
            }
        }
        self.last_error = None;
        Ok(Completion::Applied {
            step: self.steps.current_key().to_string(),
        })
    }

    /// Walk forward one step at a time until `key` is current.
    fn advance_to(&mut self, key: &str) -> Result<(), PipelineError> {
        let target = self.steps.position_of(key).ok_or_else(|| {
            PipelineError::InvalidConfig(format!("The step list has no '{}' step", key))
        })?;
        if target < self.steps.index() {
            return Err(PipelineError::InvalidConfig(format!(
                "Step '{}' comes before the current step '{}'",
                key,
                self.steps.current_key()
            )));
        }
        while self.steps.index() < target {
            self.steps.advance(true)?;
        }
        tracing::info!("Moved to step '{}'", self.steps.current_key());
        Ok(())
    }

    /// Move back one step. Collected data is kept so edits survive the round trip.
    pub fn retreat(&mut self) -> Result<&StepDescriptor, PipelineError> {
        self.ensure_idle()?;
        if self.steps.is_terminal() && self.commit.is_some() {
            return Err(PipelineError::Terminal);
        }
        self.steps.retreat()
    }

    /// Cancel the request in flight. Its response, if it still arrives, is
    /// discarded as stale.
    pub fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                tracing::warn!("Cancelling {} request #{}", in_flight.kind, in_flight.seq);
                in_flight.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear the batch, analysis, mapping and results and return to the first step.
    pub fn reset(&mut self) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.intake.clear(&mut self.batch);
        self.batch_generation += 1;
        self.discard_analysis();
        self.mapping = ColumnMapping::default();
        self.preview = None;
        self.commit = None;
        self.last_error = None;
        self.steps.reset();
        tracing::info!("Pipeline reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn pipeline() -> ImportPipeline {
        ImportPipeline::new(&PipelineConfig::default()).unwrap()
    }

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            import_id: Uuid::new_v4(),
            entity_type: "employee".to_string(),
            source_columns: vec!["Name".to_string(), "Dept".to_string()],
            target_schema: [("full_name", "Full name"), ("department", "Department")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            suggested_mapping: [("Name".to_string(), "full_name".to_string())]
                .into_iter()
                .collect(),
            sample_data: Vec::new(),
            total_rows: 2,
            warnings: Vec::new(),
        }
    }

    fn preview_of(analysis: &AnalysisResult) -> PreviewResult {
        PreviewResult {
            import_id: analysis.import_id,
            columns: vec!["full_name".to_string()],
            rows: Vec::new(),
            total_rows: analysis.total_rows,
            warnings: Vec::new(),
        }
    }

    fn request(transition: Transition) -> PendingRequest {
        match transition {
            Transition::Request(request) => request,
            Transition::Advanced => panic!("expected a collaborator request"),
        }
    }

    /// Drive a fresh pipeline to the map step.
    fn at_map() -> ImportPipeline {
        let mut p = pipeline();
        p.add_files(vec![CandidateFile::new("people.csv", 64)]).unwrap();
        let req = request(p.begin_advance().unwrap());
        p.complete(req.seq, Ok(Response::Analyzed(analysis()))).unwrap();
        p
    }

    #[test]
    fn test_upload_requires_files() {
        let mut p = pipeline();
        assert!(!p.can_advance());
        assert!(matches!(p.begin_advance(), Err(PipelineError::EmptyBatch)));
        assert!(!p.is_busy());
    }

    #[test]
    fn test_busy_rejects_transitions_and_file_changes() {
        let mut p = pipeline();
        p.add_files(vec![CandidateFile::new("people.csv", 64)]).unwrap();
        let req = request(p.begin_advance().unwrap());

        assert!(p.is_busy());
        assert_eq!(p.pending(), Some(RequestKind::Analyze));
        assert_eq!(p.current_step().key, UPLOAD);
        assert!(matches!(p.begin_advance(), Err(PipelineError::Busy)));
        assert!(matches!(p.retreat(), Err(PipelineError::Busy)));
        assert!(matches!(
            p.add_files(vec![CandidateFile::new("more.csv", 64)]),
            Err(PipelineError::Busy)
        ));
        assert!(matches!(p.reset(), Err(PipelineError::Busy)));

        p.complete(req.seq, Ok(Response::Analyzed(analysis()))).unwrap();
        assert!(!p.is_busy());
    }

    #[test]
    fn test_analysis_seeds_mapping_and_moves_to_map() {
        let p = at_map();
        assert_eq!(p.current_step().key, MAP);
        assert_eq!(p.mapping().get("Name"), Some("full_name"));
        assert_eq!(p.mapping().get("Dept"), None);
        assert_eq!(p.mapped_count(), 1);
        assert_eq!(
            p.stepper().to_string(),
            "✓ Upload › ✓ Analyze › ● Map Columns › ○ Preview › ○ Import"
        );
    }

    #[test]
    fn test_analysis_failure_keeps_batch() {
        let mut p = pipeline();
        p.add_files(vec![CandidateFile::new("people.csv", 64)]).unwrap();
        let req = request(p.begin_advance().unwrap());

        let err = p
            .complete(
                req.seq,
                Err(crate::ServiceError::Processing("upstream down".into()).into()),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Service(_)));
        assert_eq!(p.current_step().key, UPLOAD);
        assert_eq!(p.batch().len(), 1);
        assert_eq!(p.last_error(), Some("Processing error: upstream down"));
        assert!(p.can_advance());
    }

    #[test]
    fn test_map_requires_a_mapped_column() {
        let mut p = at_map();
        p.set_mapping("Name", None).unwrap();
        assert_eq!(p.mapped_count(), 0);
        assert!(!p.can_advance());
        assert!(matches!(p.begin_advance(), Err(PipelineError::NothingMapped)));
        assert_eq!(p.current_step().key, MAP);
    }

    #[test]
    fn test_preview_carries_full_mapping() {
        let mut p = at_map();
        p.set_mapping("Dept", Some("department")).unwrap();
        assert_eq!(p.mapped_count(), 2);

        let req = request(p.begin_advance().unwrap());
        match &req.payload {
            RequestPayload::Preview { mapping, .. } => {
                assert_eq!(mapping.get("Name"), Some("full_name"));
                assert_eq!(mapping.get("Dept"), Some("department"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        let preview = preview_of(p.analysis().unwrap());
        let done = p.complete(req.seq, Ok(Response::Previewed(preview))).unwrap();
        assert_eq!(
            done,
            Completion::Applied {
                step: PREVIEW.to_string()
            }
        );
    }

    #[test]
    fn test_retreat_keeps_analysis_and_mapping() {
        let mut p = at_map();
        p.set_mapping("Dept", Some("department")).unwrap();

        assert_eq!(p.retreat().unwrap().key, ANALYZE);
        assert_eq!(p.retreat().unwrap().key, UPLOAD);
        assert!(p.analysis().is_some());
        assert_eq!(p.mapping().get("Dept"), Some("department"));
        assert!(p.retreat().is_err());
    }

    #[test]
    fn test_stale_response_is_discarded() {
        let mut p = pipeline();
        p.add_files(vec![CandidateFile::new("people.csv", 64)]).unwrap();
        let first = request(p.begin_advance().unwrap());
        assert!(p.cancel());
        assert!(first.token.is_cancelled());

        let second = request(p.begin_advance().unwrap());
        assert!(second.seq > first.seq);

        let stale = p
            .complete(first.seq, Ok(Response::Analyzed(analysis())))
            .unwrap();
        assert_eq!(stale, Completion::Stale);
        assert!(p.is_busy());
        assert_eq!(p.current_step().key, UPLOAD);

        p.complete(second.seq, Ok(Response::Analyzed(analysis())))
            .unwrap();
        assert_eq!(p.current_step().key, MAP);
    }

    #[test]
    fn test_mismatched_response_is_an_error() {
        let mut p = pipeline();
        p.add_files(vec![CandidateFile::new("people.csv", 64)]).unwrap();
        let req = request(p.begin_advance().unwrap());
        let preview = preview_of(&analysis());
        assert!(p.complete(req.seq, Ok(Response::Previewed(preview))).is_err());
        assert_eq!(p.current_step().key, UPLOAD);
        assert!(!p.is_busy());
    }

    #[test]
    fn test_commit_then_reset() {
        let mut p = at_map();
        let req = request(p.begin_advance().unwrap());
        let preview = preview_of(p.analysis().unwrap());
        p.complete(req.seq, Ok(Response::Previewed(preview))).unwrap();

        let req = request(p.begin_advance().unwrap());
        let commit = CommitResult {
            import_id: p.analysis().unwrap().import_id,
            entity_type: "employee".to_string(),
            imported_rows: 2,
            skipped_rows: 0,
            output: None,
            committed_at: chrono::Utc::now(),
        };
        p.complete(req.seq, Ok(Response::Committed(commit))).unwrap();

        assert_eq!(p.current_step().key, COMMIT);
        assert!(matches!(p.begin_advance(), Err(PipelineError::Terminal)));
        assert!(matches!(p.retreat(), Err(PipelineError::Terminal)));

        p.reset().unwrap();
        assert_eq!(p.current_step().key, UPLOAD);
        assert!(p.batch().is_empty());
        assert!(p.analysis().is_none());
        assert!(p.mapping().is_empty());
        assert!(p.commit_result().is_none());
    }

    #[test]
    fn test_unknown_steps_advance_without_request() {
        let steps = StepState::new(vec![
            StepDescriptor::new(UPLOAD, ""),
            StepDescriptor::new(MAP, ""),
            StepDescriptor::new("review", ""),
            StepDescriptor::new(PREVIEW, ""),
            StepDescriptor::new(COMMIT, ""),
        ])
        .unwrap();
        let mut p = ImportPipeline::with_parts(FileIntake::default(), MappingEditor::default(), steps);
        p.add_files(vec![CandidateFile::new("people.csv", 64)]).unwrap();
        let req = request(p.begin_advance().unwrap());
        p.complete(req.seq, Ok(Response::Analyzed(analysis()))).unwrap();
        assert_eq!(p.current_step().key, MAP);

        let req = request(p.begin_advance().unwrap());
        let preview = preview_of(p.analysis().unwrap());
        p.complete(req.seq, Ok(Response::Previewed(preview))).unwrap();
        // the preview response walks through "review" one step at a time
        assert_eq!(p.current_step().key, PREVIEW);

        p.retreat().unwrap();
        assert_eq!(p.current_step().key, "review");
        assert!(matches!(p.begin_advance(), Ok(Transition::Advanced)));
        assert_eq!(p.current_step().key, PREVIEW);
    }

    #[test]
    fn test_unchanged_batch_skips_reanalysis() {
        let mut p = at_map();
        p.set_mapping("Dept", Some("department")).unwrap();
        p.retreat().unwrap();
        assert_eq!(p.current_step().key, ANALYZE);

        assert!(matches!(p.begin_advance(), Ok(Transition::Advanced)));
        assert_eq!(p.current_step().key, MAP);
        assert!(!p.is_busy());
        assert_eq!(p.mapping().get("Dept"), Some("department"));
        assert!(p.take_discarded().is_empty());
    }

    #[test]
    fn test_changed_batch_is_reanalyzed() {
        let mut p = at_map();
        let first_id = p.analysis().unwrap().import_id;
        p.retreat().unwrap();
        p.retreat().unwrap();
        p.add_files(vec![CandidateFile::new("more.csv", 64)]).unwrap();

        let req = request(p.begin_advance().unwrap());
        assert_eq!(req.payload.kind(), RequestKind::Analyze);
        p.complete(req.seq, Ok(Response::Analyzed(analysis()))).unwrap();
        assert_eq!(p.take_discarded(), vec![first_id]);

        // removing a file also counts as a change
        p.retreat().unwrap();
        p.retreat().unwrap();
        p.remove_file(1).unwrap();
        assert!(matches!(p.begin_advance(), Ok(Transition::Request(_))));
    }

    #[test]
    fn test_reset_discards_analysis() {
        let mut p = at_map();
        let id = p.analysis().unwrap().import_id;
        p.reset().unwrap();
        assert_eq!(p.take_discarded(), vec![id]);
        assert!(p.take_discarded().is_empty());
    }

    #[test]
    fn test_changing_extra_params_drops_preview() {
        let mut p = at_map();
        let req = request(p.begin_advance().unwrap());
        let preview = preview_of(p.analysis().unwrap());
        p.complete(req.seq, Ok(Response::Previewed(preview))).unwrap();
        assert!(p.can_advance());

        // the same params leave the preview in place
        p.set_extra_params(ExtraParams::new()).unwrap();
        assert!(p.preview().is_some());

        let mut params = ExtraParams::new();
        params.insert("source".to_string(), serde_json::json!("hris"));
        p.set_extra_params(params).unwrap();
        assert!(p.preview().is_none());
        assert!(!p.can_advance());
        assert!(matches!(p.begin_advance(), Err(PipelineError::NotAllowed(_))));
    }

    #[test]
    fn test_response_behind_current_step_is_rejected() {
        // a step list that skipped config validation
        let steps = StepState::new(vec![
            StepDescriptor::new(UPLOAD, ""),
            StepDescriptor::new(MAP, ""),
            StepDescriptor::new(ANALYZE, ""),
            StepDescriptor::new(PREVIEW, ""),
            StepDescriptor::new(COMMIT, ""),
        ])
        .unwrap();
        let mut p = ImportPipeline::with_parts(FileIntake::default(), MappingEditor::default(), steps);
        p.add_files(vec![CandidateFile::new("people.csv", 64)]).unwrap();
        let req = request(p.begin_advance().unwrap());
        p.complete(req.seq, Ok(Response::Analyzed(analysis()))).unwrap();
        assert_eq!(p.current_step().key, MAP);

        let req = request(p.begin_advance().unwrap());
        let preview = preview_of(p.analysis().unwrap());
        p.complete(req.seq, Ok(Response::Previewed(preview))).unwrap();
        p.retreat().unwrap();
        assert_eq!(p.current_step().key, ANALYZE);

        assert!(matches!(
            p.begin_advance(),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(!p.is_busy());
    }

    #[test]
    fn test_set_mapping_only_during_map() {
        let mut p = pipeline();
        assert!(matches!(
            p.set_mapping("Name", None),
            Err(PipelineError::NotAllowed(_))
        ));
    }
}
