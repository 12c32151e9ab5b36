use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Completion, ImportPipeline, RequestPayload, Response, Transition};
use crate::error::PipelineError;
use crate::service::ImportService;

/// Async driver for one [`ImportPipeline`] session.
///
/// The pipeline lock is released while a collaborator call runs, so reads and
/// [`cancel`](Self::cancel) stay responsive. Dropping the handle cancels any
/// request still in flight.
pub struct PipelineHandle {
    pipeline: Arc<Mutex<ImportPipeline>>,
    service: Arc<dyn ImportService>,
    shutdown: CancellationToken,
}

impl PipelineHandle {
    pub fn new(pipeline: ImportPipeline, service: Arc<dyn ImportService>) -> Self {
        let shutdown = pipeline.shutdown_token();
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            service,
            shutdown,
        }
    }

    /// Lock the pipeline for reads and edits. Do not hold the guard across
    /// [`advance`](Self::advance) on the same handle.
    pub async fn lock(&self) -> MutexGuard<'_, ImportPipeline> {
        self.pipeline.lock().await
    }

    /// Leave the current step, calling the collaborator when the step needs one.
    /// A second call while a request is in flight fails with [`PipelineError::Busy`].
    pub async fn advance(&self) -> Result<Completion, PipelineError> {
        let (transition, discarded) = {
            let mut pipeline = self.pipeline.lock().await;
            let transition = pipeline.begin_advance();
            let step = pipeline.current_step().key.clone();
            (transition.map(|t| (t, step)), pipeline.take_discarded())
        };
        self.discard(discarded).await;
        let request = match transition? {
            (Transition::Advanced, step) => return Ok(Completion::Applied { step }),
            (Transition::Request(request), _) => request,
        };

        let seq = request.seq;
        let outcome = tokio::select! {
            _ = request.token.cancelled() => Err(PipelineError::Cancelled),
            result = dispatch(self.service.as_ref(), request.payload) => result,
        };

        let (completion, discarded) = {
            let mut pipeline = self.pipeline.lock().await;
            let completion = pipeline.complete(seq, outcome);
            (completion, pipeline.take_discarded())
        };
        self.discard(discarded).await;
        completion
    }

    pub async fn retreat(&self) -> Result<String, PipelineError> {
        let mut pipeline = self.pipeline.lock().await;
        Ok(pipeline.retreat()?.key.clone())
    }

    /// Cancel the request in flight; the pending [`advance`](Self::advance)
    /// resolves with [`PipelineError::Cancelled`].
    pub async fn cancel(&self) -> bool {
        self.pipeline.lock().await.cancel()
    }

    pub async fn reset(&self) -> Result<(), PipelineError> {
        let discarded = {
            let mut pipeline = self.pipeline.lock().await;
            pipeline.reset()?;
            pipeline.take_discarded()
        };
        self.discard(discarded).await;
        Ok(())
    }

    async fn discard(&self, import_ids: Vec<Uuid>) {
        for import_id in import_ids {
            tracing::debug!("Discarding import {}", import_id);
            self.service.discard(import_id).await;
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch(
    service: &dyn ImportService,
    payload: RequestPayload,
) -> Result<Response, PipelineError> {
    let response = match payload {
        RequestPayload::Analyze { batch } => Response::Analyzed(service.analyze(&batch).await?),
        RequestPayload::Preview {
            analysis,
            mapping,
            extra_params,
        } => Response::Previewed(service.preview(&analysis, &mapping, &extra_params).await?),
        RequestPayload::Commit {
            analysis,
            mapping,
            extra_params,
        } => Response::Committed(service.commit(&analysis, &mapping, &extra_params).await?),
    };
    Ok(response)
}
