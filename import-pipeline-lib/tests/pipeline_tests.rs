use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use chrono::Utc;
use import_pipeline::{
    AnalysisResult, CandidateFile, ColumnMapping, CommitResult, Completion, ExtraParams,
    ImportBatch, ImportPipeline, ImportService, PipelineConfig, PipelineError, PipelineHandle,
    PreviewResult, Row, ServiceError, COMMIT, MAP, PREVIEW, UPLOAD,
};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::info;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize logging exactly once for all tests
fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    });
}

/// Collaborator with canned answers. When gated, `analyze` signals `started`
/// and then waits for `release` before answering.
struct MockService {
    analysis: AnalysisResult,
    fail_analyze: bool,
    gated: bool,
    started: Notify,
    release: Notify,
    analyze_calls: AtomicUsize,
    last_mapping: Mutex<Option<ColumnMapping>>,
    last_params: Mutex<Option<ExtraParams>>,
}

impl MockService {
    fn new() -> Self {
        Self {
            analysis: canned_analysis(),
            fail_analyze: false,
            gated: false,
            started: Notify::new(),
            release: Notify::new(),
            analyze_calls: AtomicUsize::new(0),
            last_mapping: Mutex::new(None),
            last_params: Mutex::new(None),
        }
    }

    fn gated() -> Self {
        Self {
            gated: true,
            ..Self::new()
        }
    }

    fn failing() -> Self {
        Self {
            fail_analyze: true,
            ..Self::new()
        }
    }

    fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImportService for MockService {
    async fn analyze(&self, batch: &ImportBatch) -> Result<AnalysisResult, ServiceError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        info!("Mock analyze called with {} file(s)", batch.len());
        if self.gated {
            self.started.notify_one();
            self.release.notified().await;
        }
        if self.fail_analyze {
            return Err(ServiceError::Processing("backend unavailable".into()));
        }
        Ok(self.analysis.clone())
    }

    async fn preview(
        &self,
        analysis: &AnalysisResult,
        mapping: &ColumnMapping,
        extra_params: &ExtraParams,
    ) -> Result<PreviewResult, ServiceError> {
        *self.last_mapping.lock().unwrap() = Some(mapping.clone());
        *self.last_params.lock().unwrap() = Some(extra_params.clone());
        let rows = analysis
            .sample_data
            .iter()
            .map(|row| {
                mapping
                    .mapped()
                    .map(|(column, target)| {
                        (
                            target.to_string(),
                            row.get(column).cloned().unwrap_or(Value::Null),
                        )
                    })
                    .collect::<Row>()
            })
            .collect();
        Ok(PreviewResult {
            import_id: analysis.import_id,
            columns: mapping.mapped().map(|(_, t)| t.to_string()).collect(),
            rows,
            total_rows: analysis.total_rows,
            warnings: Vec::new(),
        })
    }

    async fn commit(
        &self,
        analysis: &AnalysisResult,
        _mapping: &ColumnMapping,
        _extra_params: &ExtraParams,
    ) -> Result<CommitResult, ServiceError> {
        Ok(CommitResult {
            import_id: analysis.import_id,
            entity_type: analysis.entity_type.clone(),
            imported_rows: analysis.total_rows,
            skipped_rows: 0,
            output: None,
            committed_at: Utc::now(),
        })
    }
}

fn canned_analysis() -> AnalysisResult {
    let row = |name: &str, dept: &str, start: &str| -> Row {
        [
            ("Name".to_string(), json!(name)),
            ("Dept".to_string(), json!(dept)),
            ("Start".to_string(), json!(start)),
        ]
        .into_iter()
        .collect()
    };
    AnalysisResult {
        import_id: Uuid::new_v4(),
        entity_type: "employee".to_string(),
        source_columns: vec!["Name".into(), "Dept".into(), "Start".into()],
        target_schema: [
            ("full_name", "Full name"),
            ("department", "Department"),
            ("hire_date", "Hire date"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
        suggested_mapping: [("Name".to_string(), "full_name".to_string())]
            .into_iter()
            .collect(),
        sample_data: vec![
            row("Ada Lovelace", "Engineering", "2021-03-01"),
            row("Grace Hopper", "Research", "2019-11-15"),
        ],
        total_rows: 2,
        warnings: Vec::new(),
    }
}

fn pipeline_with_files() -> ImportPipeline {
    let mut pipeline = ImportPipeline::new(&PipelineConfig::default()).unwrap();
    let rejections = pipeline
        .add_files(vec![
            CandidateFile::new("staff.csv", 2_048),
            CandidateFile::new("contractors.xlsx", 4_096),
        ])
        .unwrap();
    assert!(rejections.is_empty());
    pipeline
}

#[tokio::test]
async fn test_full_flow_reaches_commit() {
    init_logging();

    let service = Arc::new(MockService::new());
    let handle = PipelineHandle::new(pipeline_with_files(), service.clone());

    let done = handle.advance().await.unwrap();
    assert_eq!(
        done,
        Completion::Applied {
            step: MAP.to_string()
        }
    );
    {
        let pipeline = handle.lock().await;
        assert_eq!(pipeline.mapping().len(), 3);
        assert_eq!(pipeline.mapped_count(), 1);
        assert_eq!(pipeline.mapping().get("Name"), Some("full_name"));
        assert_eq!(pipeline.mapping().get("Dept"), None);
    }

    {
        let mut pipeline = handle.lock().await;
        pipeline.set_mapping("Dept", Some("department")).unwrap();
        pipeline.set_mapping("Start", Some("hire_date")).unwrap();
        pipeline.set_mapping("Start", None).unwrap();
        let mut params = ExtraParams::new();
        params.insert("source".to_string(), json!("hris-export"));
        pipeline.set_extra_params(params).unwrap();
        assert_eq!(pipeline.mapped_count(), 2);
    }

    let done = handle.advance().await.unwrap();
    assert_eq!(
        done,
        Completion::Applied {
            step: PREVIEW.to_string()
        }
    );
    let sent = service.last_mapping.lock().unwrap().clone().unwrap();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent.get("Dept"), Some("department"));
    assert_eq!(sent.get("Start"), None);
    let params = service.last_params.lock().unwrap().clone().unwrap();
    assert_eq!(params.get("source"), Some(&json!("hris-export")));

    {
        let pipeline = handle.lock().await;
        let preview = pipeline.preview().unwrap();
        assert_eq!(preview.columns, vec!["full_name", "department"]);
        assert_eq!(preview.rows[0].get("department"), Some(&json!("Engineering")));
    }

    let done = handle.advance().await.unwrap();
    assert_eq!(
        done,
        Completion::Applied {
            step: COMMIT.to_string()
        }
    );
    let pipeline = handle.lock().await;
    assert_eq!(pipeline.commit_result().unwrap().imported_rows, 2);
    assert!(pipeline.steps().is_terminal());
    assert!(!pipeline.can_advance());
    info!("Stepper: {}", pipeline.stepper());
}

#[tokio::test]
async fn test_second_advance_while_busy_is_rejected() {
    init_logging();

    let service = Arc::new(MockService::gated());
    let handle = Arc::new(PipelineHandle::new(pipeline_with_files(), service.clone()));

    let first = tokio::spawn({
        let handle = handle.clone();
        async move { handle.advance().await }
    });
    service.started.notified().await;

    {
        let pipeline = handle.lock().await;
        assert!(pipeline.is_busy());
        assert_eq!(pipeline.current_step().key, UPLOAD);
        assert!(!pipeline.can_advance());
        assert!(!pipeline.can_retreat());
    }
    assert!(matches!(handle.advance().await, Err(PipelineError::Busy)));
    assert!(matches!(handle.reset().await, Err(PipelineError::Busy)));

    service.release.notify_one();
    let done = first.await.unwrap().unwrap();
    assert_eq!(
        done,
        Completion::Applied {
            step: MAP.to_string()
        }
    );
    assert_eq!(service.analyze_calls(), 1);
    assert!(!handle.lock().await.is_busy());
}

#[tokio::test]
async fn test_cancel_resolves_pending_advance() {
    init_logging();

    let service = Arc::new(MockService::gated());
    let handle = Arc::new(PipelineHandle::new(pipeline_with_files(), service.clone()));

    let pending = tokio::spawn({
        let handle = handle.clone();
        async move { handle.advance().await }
    });
    service.started.notified().await;

    assert!(handle.cancel().await);
    assert!(matches!(
        pending.await.unwrap(),
        Err(PipelineError::Cancelled)
    ));

    let pipeline = handle.lock().await;
    assert!(!pipeline.is_busy());
    assert_eq!(pipeline.current_step().key, UPLOAD);
    assert!(pipeline.analysis().is_none());
    assert_eq!(pipeline.batch().len(), 2);
    assert!(pipeline.last_error().is_none());
}

#[tokio::test]
async fn test_cancel_without_request_is_a_no_op() {
    init_logging();

    let handle = PipelineHandle::new(pipeline_with_files(), Arc::new(MockService::new()));
    assert!(!handle.cancel().await);
    assert_eq!(handle.lock().await.current_step().key, UPLOAD);
}

#[tokio::test]
async fn test_failed_analysis_keeps_batch_and_allows_retry() {
    init_logging();

    let handle = PipelineHandle::new(pipeline_with_files(), Arc::new(MockService::failing()));

    let err = handle.advance().await.unwrap_err();
    assert!(matches!(err, PipelineError::Service(_)));

    let pipeline = handle.lock().await;
    assert_eq!(pipeline.current_step().key, UPLOAD);
    assert_eq!(pipeline.batch().len(), 2);
    assert!(pipeline.last_error().unwrap().contains("backend unavailable"));
    assert!(pipeline.can_advance());
}

#[tokio::test]
async fn test_retreat_then_advance_keeps_edits() {
    init_logging();

    let service = Arc::new(MockService::new());
    let handle = PipelineHandle::new(pipeline_with_files(), service.clone());

    handle.advance().await.unwrap();
    handle
        .lock()
        .await
        .set_mapping("Dept", Some("department"))
        .unwrap();

    assert_eq!(handle.retreat().await.unwrap(), "analyze");
    assert_eq!(
        handle.advance().await.unwrap(),
        Completion::Applied {
            step: MAP.to_string()
        }
    );
    assert_eq!(service.analyze_calls(), 1);
    {
        let pipeline = handle.lock().await;
        assert_eq!(pipeline.mapping().get("Dept"), Some("department"));
        assert_eq!(pipeline.mapped_count(), 2);
    }

    // Changing the batch makes the old analysis stale
    assert_eq!(handle.retreat().await.unwrap(), "analyze");
    assert_eq!(handle.retreat().await.unwrap(), UPLOAD);
    handle
        .lock()
        .await
        .add_files(vec![CandidateFile::new("interns.csv", 512)])
        .unwrap();
    handle.advance().await.unwrap();
    assert_eq!(service.analyze_calls(), 2);
    let pipeline = handle.lock().await;
    assert_eq!(pipeline.current_step().key, MAP);
    assert_eq!(pipeline.mapping().get("Dept"), None);
    assert_eq!(pipeline.mapped_count(), 1);
}
