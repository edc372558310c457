// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page orchestration.
//
// One run per page:
//
//   decode ─► classify ─► dispatch ─► fuse ─► route ─► accept | review
//      │                     │          │
//      └─ Failed (input)     │          └─ Failed + review (no success)
//                            └─ Failed + review (no eligible engine)
//
// Every state change is written to the store and the audit log before the
// call returns. Terminal pages publish a completion event.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use lectern_core::config::PipelineConfig;
use lectern_core::error::{LecternError, Result};
use lectern_core::types::{
    AuditEvent, AuditKind, ClassificationResult, EngineAttempt, EngineId, FusedResult,
    FusionMethod, HealthState, Page, PageId, PageStatus, Resolution, ReviewReason, ReviewTask,
    ReviewTaskId, ReviewTaskStatus, SourceFormat, ValidationState,
};
use lectern_document::{DocumentClassifier, PageImage, PageInput};
use lectern_engine::{
    CancelToken, DispatchReport, DispatchScheduler, EngineRegistry, EngineStatus,
    HealthTransition, RetryPolicy,
};
use lectern_store::{AuditLog, RecordStore, hash_bytes, verify_hash};
use serde_json::json;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::batch::{BatchProgress, BatchReport, PageReport};
use crate::fusion::FusionEngine;
use crate::notify::{CompletionEvent, CompletionReceiver, CompletionSender, completion_channel};
use crate::validation::{ValidationRouter, resolution_state, transition};

/// Where a page ended up after one run.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub page: Page,
    pub status: PageStatus,
    pub classification: Option<ClassificationResult>,
    /// Every attempt made during this run, retries included.
    pub attempts: Vec<EngineAttempt>,
    pub fused: Option<FusedResult>,
    /// Review task opened by this run.
    pub review: Option<ReviewTask>,
}

impl PageOutcome {
    fn new(page: Page) -> Self {
        Self {
            page,
            status: PageStatus::Received,
            classification: None,
            attempts: Vec::new(),
            fused: None,
            review: None,
        }
    }

    /// Why the page did not produce a transcription, if it did not.
    pub fn error(&self) -> Option<LecternError> {
        match self.status {
            PageStatus::Cancelled => Some(LecternError::Cancelled),
            PageStatus::Failed => match self.review.as_ref().map(|task| task.reason) {
                Some(ReviewReason::NoEligibleEngine) => {
                    Some(LecternError::NoEligibleEngine(self.page.id))
                }
                _ => Some(LecternError::NoSuccessfulEngine(self.page.id)),
            },
            _ => None,
        }
    }
}

/// The recognition pipeline.
pub struct Pipeline {
    classifier: DocumentClassifier,
    scheduler: Arc<DispatchScheduler>,
    fusion: FusionEngine,
    router: ValidationRouter,
    store: Arc<dyn RecordStore>,
    audit: Arc<AuditLog>,
    completions: CompletionSender,
    max_image_dimension: u32,
    worker_pool_size: usize,
}

impl Pipeline {
    /// Build a pipeline. Returns the receiving end of the completion channel
    /// alongside it.
    pub fn new(
        config: &PipelineConfig,
        classifier: DocumentClassifier,
        registry: Arc<EngineRegistry>,
        store: Arc<dyn RecordStore>,
        audit: Arc<AuditLog>,
    ) -> Result<(Self, CompletionReceiver)> {
        config.validate()?;
        if registry.is_empty() {
            debug!("pipeline built without engines");
        }

        let (completions, receiver) = completion_channel(config.completion_channel_capacity);
        let pipeline = Self {
            classifier,
            scheduler: Arc::new(DispatchScheduler::new(
                Arc::clone(&registry),
                RetryPolicy::from(config),
            )),
            fusion: FusionEngine::new(registry, config.similarity_threshold),
            router: ValidationRouter::new(config.accept_threshold),
            store,
            audit,
            completions,
            max_image_dimension: config.max_image_dimension,
            worker_pool_size: config.worker_pool_size,
        };
        Ok((pipeline, receiver))
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        self.scheduler.registry()
    }

    fn record(&self, event: AuditEvent) -> Result<()> {
        self.audit.record(&event)?;
        Ok(())
    }

    // -- Page runs --

    /// Run one page through the pipeline.
    ///
    /// Fails only for undecodable input (the page is still stored as
    /// `Failed`) and for storage errors. Engine trouble ends the page in
    /// `Failed` with a review task; cancellation ends it in `Cancelled`.
    #[instrument(skip_all, fields(document = %input.document_id, page_index = input.page_index))]
    pub async fn process_page(&self, input: PageInput, cancel: &CancelToken) -> Result<PageOutcome> {
        let page_id = PageId::new();
        let content_hash = hash_bytes(&input.bytes);

        let image = match PageImage::from_input(&input) {
            Ok(image) => image,
            Err(err) => return self.reject_input(page_id, &input, content_hash, err).await,
        };

        let (width, height) = image.original_dimensions();
        let page = Page {
            id: page_id,
            document_id: input.document_id,
            page_index: input.page_index,
            width,
            height,
            format: image.format(),
            content_hash,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_page(&page)?;
        self.record(AuditEvent::page(
            AuditKind::PageReceived,
            page_id,
            json!({
                "document_id": page.document_id,
                "page_index": page.page_index,
                "width": width,
                "height": height,
                "format": page.format,
                "content_hash": page.content_hash,
            }),
        ))?;
        debug!(page = %page_id, width, height, "page received");

        self.recognize(page, image, cancel).await
    }

    async fn reject_input(
        &self,
        page_id: PageId,
        input: &PageInput,
        content_hash: String,
        err: LecternError,
    ) -> Result<PageOutcome> {
        warn!(page = %page_id, error = %err, "page rejected at intake");
        let page = Page {
            id: page_id,
            document_id: input.document_id,
            page_index: input.page_index,
            width: 0,
            height: 0,
            format: input.format.unwrap_or(SourceFormat::Other),
            content_hash,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_page(&page)?;
        self.store.set_page_status(&page_id, PageStatus::Failed)?;
        self.record(AuditEvent::page(
            AuditKind::InputRejected,
            page_id,
            json!({
                "document_id": page.document_id,
                "page_index": page.page_index,
                "bytes": input.bytes.len(),
                "error": err.to_string(),
            }),
        ))?;
        self.record(AuditEvent::page(
            AuditKind::PageFailed,
            page_id,
            json!({ "cause": "input" }),
        ))?;
        self.completions
            .publish(CompletionEvent::for_page(&page, PageStatus::Failed, None))
            .await;
        Err(err)
    }

    async fn recognize(
        &self,
        page: Page,
        image: PageImage,
        cancel: &CancelToken,
    ) -> Result<PageOutcome> {
        let page_id = page.id;
        let mut outcome = PageOutcome::new(page);
        if cancel.is_cancelled() {
            return self.cancel_page(outcome).await;
        }

        let max_dimension = self.max_image_dimension;
        let image = tokio::task::spawn_blocking(move || image.preprocess(max_dimension))
            .await
            .map_err(|err| LecternError::Ocr(format!("preprocessing task failed: {err}")))?;

        // -- Classification --
        let classification = self.classifier.classify(page_id, &image).await;
        self.store.append_classification(&classification)?;
        self.store.set_page_status(&page_id, PageStatus::Classified)?;
        self.record(AuditEvent::page(
            AuditKind::Classified,
            page_id,
            json!({
                "label": classification.label,
                "confidence": classification.confidence,
                "degraded": classification.degraded,
            }),
        ))?;
        if classification.degraded {
            self.record(AuditEvent::page(
                AuditKind::ClassificationDegraded,
                page_id,
                json!({
                    "confidence": classification.confidence,
                    "floor": self.classifier.confidence_floor(),
                }),
            ))?;
        }
        outcome.status = PageStatus::Classified;
        outcome.classification = Some(classification.clone());

        // -- Dispatch --
        let report = match self
            .scheduler
            .dispatch(page_id, &image, &classification, cancel)
            .await
        {
            Ok(report) => report,
            Err(LecternError::NoEligibleEngine(_)) => {
                self.record(AuditEvent::page(
                    AuditKind::NoEligibleEngine,
                    page_id,
                    json!({ "label": classification.label }),
                ))?;
                return self
                    .fail_to_review(outcome, ReviewReason::NoEligibleEngine)
                    .await;
            }
            Err(err) => return Err(err),
        };
        self.record_dispatch(page_id, &report)?;
        let cancelled = report.cancelled;
        let engines = report.engines.clone();
        outcome.attempts = report.attempts;
        if cancelled {
            return self.cancel_page(outcome).await;
        }

        // -- Fusion --
        let Some(fused) = self.fusion.fuse(page_id, &outcome.attempts) else {
            self.record(AuditEvent::page(
                AuditKind::NoSuccessfulEngine,
                page_id,
                json!({ "engines": engines, "attempts": outcome.attempts.len() }),
            ))?;
            return self
                .fail_to_review(outcome, ReviewReason::NoSuccessfulEngine)
                .await;
        };
        self.store.append_fused(&fused)?;
        self.store.set_page_status(&page_id, PageStatus::Recognized)?;
        self.record(AuditEvent::page(
            AuditKind::Fused,
            page_id,
            json!({
                "fused_id": fused.id,
                "method": fused.method.as_str(),
                "confidence": fused.confidence,
                "support": fused.support,
                "contributing": fused.contributing,
            }),
        ))?;
        if fused.method == FusionMethod::BestOfDisagreeing {
            self.record(AuditEvent::page(
                AuditKind::FusionDisagreement,
                page_id,
                json!({
                    "fused_id": fused.id,
                    "successes": outcome.attempts.iter().filter(|a| a.is_success()).count(),
                    "threshold": self.fusion.similarity_threshold(),
                }),
            ))?;
        }
        outcome.status = PageStatus::Recognized;

        // -- Validation --
        let reason = self.router.review_reason(&fused);
        let target = match reason {
            Some(_) => ValidationState::NeedsReview,
            None => ValidationState::AutoAccepted,
        };
        let state = transition(ValidationState::Pending, target)?;
        self.record(AuditEvent::page(
            AuditKind::ValidationTransition,
            page_id,
            json!({
                "from": ValidationState::Pending,
                "to": state,
                "confidence": fused.confidence,
                "accept_threshold": self.router.accept_threshold(),
            }),
        ))?;

        match reason {
            None => {
                self.store.set_page_status(&page_id, PageStatus::AutoAccepted)?;
                info!(page = %page_id, confidence = fused.confidence, method = fused.method.as_str(), "page auto-accepted");
                self.completions
                    .publish(CompletionEvent::for_page(
                        &outcome.page,
                        PageStatus::AutoAccepted,
                        Some(fused.confidence),
                    ))
                    .await;
                outcome.status = PageStatus::AutoAccepted;
            }
            Some(reason) => {
                let task = ReviewTask::open(page_id, Some(fused.id), reason);
                self.store.open_review(&task)?;
                self.store.set_page_status(&page_id, PageStatus::NeedsReview)?;
                self.record(AuditEvent::page(
                    AuditKind::ReviewOpened,
                    page_id,
                    json!({ "task_id": task.id, "reason": reason, "fused_id": fused.id }),
                ))?;
                info!(page = %page_id, confidence = fused.confidence, ?reason, "page needs review");
                outcome.status = PageStatus::NeedsReview;
                outcome.review = Some(task);
            }
        }
        outcome.fused = Some(fused);
        Ok(outcome)
    }

    /// Persist and audit everything a dispatch produced.
    fn record_dispatch(&self, page_id: PageId, report: &DispatchReport) -> Result<()> {
        for transition in &report.transitions {
            self.record_health(Some(page_id), transition)?;
        }
        for attempt in &report.attempts {
            self.store.append_attempt(attempt)?;
            let duration_ms = (attempt.finished_at - attempt.started_at).num_milliseconds();
            self.record(
                AuditEvent::page(
                    AuditKind::EngineAttempt,
                    page_id,
                    json!({
                        "attempt_id": attempt.id,
                        "attempt": attempt.attempt,
                        "outcome": attempt.outcome,
                        "confidence": attempt.confidence,
                        "duration_ms": duration_ms,
                        "error": attempt.error,
                    }),
                )
                .with_engine(attempt.engine_id.clone()),
            )?;
        }
        Ok(())
    }

    fn record_health(&self, page_id: Option<PageId>, transition: &HealthTransition) -> Result<()> {
        let details = json!({
            "from": transition.from,
            "to": transition.to,
            "cause": transition.cause.as_str(),
            "consecutive_failures": transition.consecutive_failures,
        });
        let event = match page_id {
            Some(page_id) => AuditEvent::page(AuditKind::EngineHealthChanged, page_id, details)
                .with_engine(transition.engine_id.clone()),
            None => AuditEvent::engine(
                AuditKind::EngineHealthChanged,
                transition.engine_id.clone(),
                details,
            ),
        };
        self.record(event)
    }

    /// Mark the page `Failed` and put it in the review queue.
    async fn fail_to_review(
        &self,
        mut outcome: PageOutcome,
        reason: ReviewReason,
    ) -> Result<PageOutcome> {
        let page_id = outcome.page.id;
        let task = ReviewTask::open(page_id, None, reason);
        self.store.open_review(&task)?;
        self.store.set_page_status(&page_id, PageStatus::Failed)?;
        self.record(AuditEvent::page(
            AuditKind::ReviewOpened,
            page_id,
            json!({ "task_id": task.id, "reason": reason, "fused_id": null }),
        ))?;
        self.record(AuditEvent::page(
            AuditKind::PageFailed,
            page_id,
            json!({ "cause": reason }),
        ))?;
        warn!(page = %page_id, ?reason, "page failed, queued for review");

        self.completions
            .publish(CompletionEvent::for_page(&outcome.page, PageStatus::Failed, None))
            .await;
        outcome.status = PageStatus::Failed;
        outcome.review = Some(task);
        Ok(outcome)
    }

    async fn cancel_page(&self, mut outcome: PageOutcome) -> Result<PageOutcome> {
        let page_id = outcome.page.id;
        self.store.set_page_status(&page_id, PageStatus::Cancelled)?;
        self.record(AuditEvent::page(
            AuditKind::PageCancelled,
            page_id,
            json!({ "attempts_recorded": outcome.attempts.len() }),
        ))?;
        info!(page = %page_id, "page cancelled");

        self.completions
            .publish(CompletionEvent::for_page(&outcome.page, PageStatus::Cancelled, None))
            .await;
        outcome.status = PageStatus::Cancelled;
        Ok(outcome)
    }

    // -- Batches --

    /// Run a batch, at most `worker_pool_size` pages at a time.
    pub async fn process_batch(&self, inputs: Vec<PageInput>, cancel: &CancelToken) -> BatchReport {
        self.process_batch_with_progress(inputs, cancel, None).await
    }

    /// [`process_batch`](Self::process_batch), reporting each finished page
    /// on `progress`.
    #[instrument(skip_all, fields(pages = inputs.len()))]
    pub async fn process_batch_with_progress(
        &self,
        inputs: Vec<PageInput>,
        cancel: &CancelToken,
        progress: Option<mpsc::Sender<BatchProgress>>,
    ) -> BatchReport {
        let total = inputs.len();
        let pool = Semaphore::new(self.worker_pool_size.max(1));
        let pool = &pool;

        let mut running = FuturesUnordered::new();
        for (slot, input) in inputs.into_iter().enumerate() {
            running.push(async move {
                let _permit = pool.acquire().await.ok();
                let (document_id, page_index) = (input.document_id, input.page_index);
                let report = match self.process_page(input, cancel).await {
                    Ok(outcome) => PageReport::from_outcome(&outcome),
                    Err(err) => PageReport::from_error(document_id, page_index, &err),
                };
                (slot, report)
            });
        }

        let mut pages: Vec<Option<PageReport>> = vec![None; total];
        let mut completed = 0;
        while let Some((slot, report)) = running.next().await {
            completed += 1;
            if let Some(progress) = &progress {
                let update = BatchProgress {
                    completed,
                    total,
                    page: report.clone(),
                };
                if progress.send(update).await.is_err() {
                    debug!("progress receiver dropped");
                }
            }
            pages[slot] = Some(report);
        }

        let report = BatchReport::new(pages.into_iter().flatten().collect());
        info!(
            pages = total,
            accepted = report.count(PageStatus::AutoAccepted),
            review = report.count(PageStatus::NeedsReview),
            failed = report.count(PageStatus::Failed),
            cancelled = report.count(PageStatus::Cancelled),
            "batch finished"
        );
        report
    }

    // -- Review --

    /// Apply a human decision to an open review task.
    #[instrument(skip(self, resolution), fields(task = %task_id))]
    pub async fn resolve_review(
        &self,
        task_id: ReviewTaskId,
        resolution: Resolution,
    ) -> Result<ReviewTask> {
        let task = self
            .store
            .get_review(&task_id)?
            .ok_or(LecternError::ReviewNotFound(task_id))?;
        if task.status != ReviewTaskStatus::Open {
            return Err(LecternError::ReviewResolved(task_id));
        }
        let page = self
            .store
            .get_page(&task.page_id)?
            .ok_or(LecternError::PageNotFound(task.page_id))?;
        let status = self
            .store
            .page_status(&page.id)?
            .ok_or(LecternError::PageNotFound(page.id))?;

        let from = validation_state(status);
        let to = transition(from, resolution_state(&resolution))?;

        let resolved = self.store.resolve_review(&task_id, &resolution)?;
        self.store.set_page_status(&page.id, to.page_status())?;
        let details = match &resolution {
            Resolution::Corrected { text } => json!({
                "task_id": task_id,
                "resolution": "corrected",
                "chars": text.chars().count(),
            }),
            Resolution::Rejected { note } => json!({
                "task_id": task_id,
                "resolution": "rejected",
                "note": note,
            }),
        };
        self.record(AuditEvent::page(AuditKind::ReviewResolved, page.id, details))?;
        self.record(AuditEvent::page(
            AuditKind::ValidationTransition,
            page.id,
            json!({ "from": from, "to": to }),
        ))?;
        info!(page = %page.id, state = ?to, "review resolved");

        let confidence = match to {
            ValidationState::Corrected => Some(1.0),
            _ => None,
        };
        self.completions
            .publish(CompletionEvent::for_page(&page, to.page_status(), confidence))
            .await;
        Ok(resolved)
    }

    pub fn open_reviews(&self) -> Result<Vec<ReviewTask>> {
        self.store.open_reviews()
    }

    // -- Reprocessing --

    /// Classify and dispatch a stored page again. The bytes must match the
    /// digest recorded at intake. The new classification and fused result
    /// supersede the previous ones. Pages a reviewer corrected or rejected
    /// are final.
    #[instrument(skip(self, bytes, cancel), fields(page = %page_id))]
    pub async fn reprocess(
        &self,
        page_id: PageId,
        bytes: &[u8],
        cancel: &CancelToken,
    ) -> Result<PageOutcome> {
        let page = self
            .store
            .get_page(&page_id)?
            .ok_or(LecternError::PageNotFound(page_id))?;
        match self.store.page_status(&page_id)? {
            Some(PageStatus::Rejected) => {
                return Err(LecternError::ReprocessRefused(
                    page_id,
                    "page was rejected by a reviewer".into(),
                ));
            }
            Some(PageStatus::Corrected) => {
                return Err(LecternError::ReprocessRefused(
                    page_id,
                    "page carries a reviewer's correction".into(),
                ));
            }
            _ => {}
        }
        if let Some(task) = self.store.open_review_for_page(&page_id)? {
            return Err(LecternError::ReprocessRefused(
                page_id,
                format!("review task {} is still open", task.id),
            ));
        }
        let image = match verify_hash(bytes, &page.content_hash)
            .and_then(|()| PageImage::decode(bytes, Some(page.format)))
        {
            Ok(image) => image,
            Err(err) => {
                warn!(error = %err, "resubmitted bytes rejected");
                self.record(AuditEvent::page(
                    AuditKind::InputRejected,
                    page_id,
                    json!({
                        "reprocess": true,
                        "bytes": bytes.len(),
                        "error": err.to_string(),
                    }),
                ))?;
                return Err(err);
            }
        };

        self.store.set_page_status(&page_id, PageStatus::Received)?;
        self.record(AuditEvent::page(
            AuditKind::PageReceived,
            page_id,
            json!({
                "document_id": page.document_id,
                "page_index": page.page_index,
                "reprocess": true,
            }),
        ))?;
        info!("reprocessing page");

        self.recognize(page, image, cancel).await
    }

    // -- Engines --

    /// Manually return an engine to `healthy`.
    pub fn reset_engine(&self, id: &EngineId) -> Result<Option<HealthTransition>> {
        let transition = self.registry().reset(id)?;
        self.record(AuditEvent::engine(
            AuditKind::EngineReset,
            id.clone(),
            json!({
                "from": transition.as_ref().map(|t| t.from),
                "to": HealthState::Healthy,
            }),
        ))?;
        if let Some(transition) = &transition {
            self.record_health(None, transition)?;
        }
        Ok(transition)
    }

    pub fn engine_snapshot(&self) -> Vec<EngineStatus> {
        self.registry().snapshot()
    }
}

/// Validation state a stored page is in. A failed page with an open review
/// task is awaiting review like any other.
fn validation_state(status: PageStatus) -> ValidationState {
    match status {
        PageStatus::NeedsReview | PageStatus::Failed => ValidationState::NeedsReview,
        PageStatus::AutoAccepted => ValidationState::AutoAccepted,
        PageStatus::Corrected => ValidationState::Corrected,
        PageStatus::Rejected => ValidationState::Rejected,
        _ => ValidationState::Pending,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use lectern_core::config::EngineConfig;
    use lectern_core::types::{Capability, DocumentId, Label};
    use lectern_document::{ClassifierModel, FixedClassifier};
    use lectern_engine::{EngineAdapter, HealthPolicy, MockAdapter};
    use lectern_store::SqliteStore;

    use super::*;
    use crate::batch::DocumentStatus;

    fn png_bytes() -> Vec<u8> {
        let img = GrayImage::from_fn(24, 16, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]));
        let mut buf = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .expect("encode png");
        buf.into_inner()
    }

    fn printed(id: &str) -> EngineConfig {
        EngineConfig::new(id, vec![Capability::Printed])
    }

    fn handwritten(id: &str) -> EngineConfig {
        EngineConfig::new(id, vec![Capability::Handwritten])
    }

    fn entry(config: EngineConfig, adapter: Arc<dyn EngineAdapter>) -> (EngineConfig, Arc<dyn EngineAdapter>) {
        (config, adapter)
    }

    struct Harness {
        pipeline: Pipeline,
        completions: CompletionReceiver,
        store: Arc<SqliteStore>,
        audit: Arc<AuditLog>,
    }

    impl Harness {
        fn new(model: Arc<dyn ClassifierModel>, engines: Vec<(EngineConfig, Arc<dyn EngineAdapter>)>) -> Self {
            let config = PipelineConfig {
                engines: engines.iter().map(|(c, _)| c.clone()).collect(),
                retry_base_delay_ms: 1,
                retry_max_delay_ms: 5,
                default_engine_timeout_ms: 500,
                worker_pool_size: 2,
                ..Default::default()
            };
            let mut registry = EngineRegistry::new(HealthPolicy::from(&config));
            for (engine, adapter) in engines {
                registry
                    .register(&engine, adapter, Duration::from_millis(500))
                    .expect("register engine");
            }

            let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
            let audit = Arc::new(AuditLog::open_in_memory().expect("audit"));
            let classifier = DocumentClassifier::new(model, config.classifier_confidence_floor);
            let (pipeline, completions) = Pipeline::new(
                &config,
                classifier,
                Arc::new(registry),
                store.clone(),
                Arc::clone(&audit),
            )
            .expect("pipeline");

            Self {
                pipeline,
                completions,
                store,
                audit,
            }
        }

        fn printed(engines: Vec<(EngineConfig, Arc<dyn EngineAdapter>)>) -> Self {
            Self::new(Arc::new(FixedClassifier::new(Label::Printed, 0.95)), engines)
        }

        async fn run(&self) -> PageOutcome {
            let input = PageInput::new(DocumentId::new(), 0, png_bytes());
            self.pipeline
                .process_page(input, &CancelToken::new())
                .await
                .expect("process page")
        }

        fn kinds(&self, page_id: &PageId) -> Vec<AuditKind> {
            self.audit
                .events_for_page(page_id)
                .unwrap()
                .into_iter()
                .map(|e| e.event.kind)
                .collect()
        }
    }

    #[tokio::test]
    async fn single_confident_engine_is_auto_accepted() {
        let mut h = Harness::printed(vec![entry(
            printed("tesseract"),
            Arc::new(MockAdapter::text("Invoice #123", 0.97)),
        )]);
        let outcome = h.run().await;

        assert_eq!(outcome.status, PageStatus::AutoAccepted);
        let fused = outcome.fused.as_ref().unwrap();
        assert_eq!(fused.method, FusionMethod::SingleEngine);
        assert_eq!(fused.text, "Invoice #123");
        assert_eq!(fused.confidence, 0.97);
        assert!(outcome.review.is_none());

        let page_id = outcome.page.id;
        assert_eq!(h.store.page_status(&page_id).unwrap(), Some(PageStatus::AutoAccepted));
        assert_eq!(h.store.current_fused(&page_id).unwrap().as_ref(), Some(fused));
        assert_eq!(h.store.attempts_for_page(&page_id).unwrap().len(), 1);

        let event = h.completions.try_recv().unwrap();
        assert_eq!(event.page_id, page_id);
        assert_eq!(event.state, PageStatus::AutoAccepted);
        assert_eq!(event.confidence, Some(0.97));

        let kinds = h.kinds(&page_id);
        assert_eq!(
            kinds,
            vec![
                AuditKind::PageReceived,
                AuditKind::Classified,
                AuditKind::EngineAttempt,
                AuditKind::Fused,
                AuditKind::ValidationTransition,
            ]
        );
    }

    #[tokio::test]
    async fn agreeing_engines_reach_consensus() {
        let mut h = Harness::printed(vec![
            entry(printed("a"), Arc::new(MockAdapter::text("Total: 45.00", 0.80))),
            entry(printed("b"), Arc::new(MockAdapter::text("Total: 45,00", 0.82))),
        ]);
        let outcome = h.run().await;

        let fused = outcome.fused.unwrap();
        assert_eq!(fused.method, FusionMethod::Consensus);
        assert_eq!(fused.contributing.len(), 2);
        assert!(fused.confidence > 0.82);
        assert!((fused.confidence - 0.9658).abs() < 1e-9);
        assert_eq!(outcome.status, PageStatus::AutoAccepted);
        assert_eq!(h.completions.try_recv().unwrap().state, PageStatus::AutoAccepted);
    }

    #[tokio::test]
    async fn disagreement_goes_to_review_then_correction() {
        let mut h = Harness::printed(vec![
            entry(printed("a"), Arc::new(MockAdapter::text("Dear Sir, thank you", 0.95))),
            entry(printed("b"), Arc::new(MockAdapter::text("Invoice 2024-07-01", 0.95))),
        ]);
        let outcome = h.run().await;
        let page_id = outcome.page.id;

        assert_eq!(outcome.status, PageStatus::NeedsReview);
        let fused = outcome.fused.as_ref().unwrap();
        assert_eq!(fused.method, FusionMethod::BestOfDisagreeing);
        assert!(fused.low_certainty);
        let task = outcome.review.clone().unwrap();
        assert_eq!(task.reason, ReviewReason::Disagreement);
        assert_eq!(task.fused_id, Some(fused.id));
        assert!(h.completions.try_recv().is_err());
        assert!(h.kinds(&page_id).contains(&AuditKind::FusionDisagreement));

        let resolved = h
            .pipeline
            .resolve_review(task.id, Resolution::Corrected { text: "Dear Sir, thank you".into() })
            .await
            .unwrap();
        assert_eq!(resolved.status, ReviewTaskStatus::Corrected);
        assert_eq!(h.store.page_status(&page_id).unwrap(), Some(PageStatus::Corrected));
        // The fused result is kept alongside the human text.
        assert_eq!(h.store.current_fused(&page_id).unwrap().unwrap().id, fused.id);

        let event = h.completions.try_recv().unwrap();
        assert_eq!(event.state, PageStatus::Corrected);

        let again = h
            .pipeline
            .resolve_review(task.id, Resolution::Rejected { note: None })
            .await;
        assert!(matches!(again, Err(LecternError::ReviewResolved(_))));
    }

    #[tokio::test]
    async fn low_confidence_goes_to_review() {
        let h = Harness::printed(vec![entry(
            printed("a"),
            Arc::new(MockAdapter::text("faint text", 0.40)),
        )]);
        let outcome = h.run().await;
        assert_eq!(outcome.status, PageStatus::NeedsReview);
        assert_eq!(outcome.review.unwrap().reason, ReviewReason::LowConfidence);
    }

    #[tokio::test]
    async fn disabled_handwriting_engine_fails_handwritten_page() {
        let mut h = Harness::new(
            Arc::new(FixedClassifier::new(Label::Handwritten, 0.9)),
            vec![
                entry(printed("printed"), Arc::new(MockAdapter::text("x", 0.9))),
                entry(handwritten("htr"), Arc::new(MockAdapter::text("y", 0.9))),
            ],
        );
        let htr = EngineId::from("htr");
        for _ in 0..3 {
            h.pipeline.registry().record_failure(&htr, "model crashed");
        }
        assert!(h.pipeline.registry().is_disabled(&htr));

        let outcome = h.run().await;
        assert_eq!(outcome.status, PageStatus::Failed);
        assert!(outcome.fused.is_none());
        assert!(outcome.attempts.is_empty());
        assert!(matches!(
            outcome.error(),
            Some(LecternError::NoEligibleEngine(id)) if id == outcome.page.id
        ));
        let task = outcome.review.unwrap();
        assert_eq!(task.reason, ReviewReason::NoEligibleEngine);
        assert_eq!(task.fused_id, None);

        let page_id = outcome.page.id;
        assert_eq!(h.store.page_status(&page_id).unwrap(), Some(PageStatus::Failed));
        assert_eq!(h.store.open_review_for_page(&page_id).unwrap().unwrap().id, task.id);
        assert!(h.kinds(&page_id).contains(&AuditKind::NoEligibleEngine));
        assert_eq!(h.completions.try_recv().unwrap().state, PageStatus::Failed);
    }

    #[tokio::test]
    async fn all_engines_failing_fails_the_page() {
        let mut h = Harness::printed(vec![
            entry(printed("a"), Arc::new(MockAdapter::failing("out of memory"))),
            entry(printed("b"), Arc::new(MockAdapter::failing("model busy"))),
        ]);
        let outcome = h.run().await;

        assert_eq!(outcome.status, PageStatus::Failed);
        assert!(outcome.fused.is_none());
        // One call plus one retry per engine.
        assert_eq!(outcome.attempts.len(), 4);
        assert!(matches!(
            outcome.error(),
            Some(LecternError::NoSuccessfulEngine(id)) if id == outcome.page.id
        ));
        let report = PageReport::from_outcome(&outcome);
        assert!(report.error.unwrap().starts_with("every dispatched engine failed"));
        assert_eq!(outcome.review.unwrap().reason, ReviewReason::NoSuccessfulEngine);

        let page_id = outcome.page.id;
        assert_eq!(h.store.attempts_for_page(&page_id).unwrap().len(), 4);
        assert!(h.store.current_fused(&page_id).unwrap().is_none());
        assert!(h.kinds(&page_id).contains(&AuditKind::NoSuccessfulEngine));
        assert_eq!(h.completions.try_recv().unwrap().state, PageStatus::Failed);
    }

    #[tokio::test]
    async fn repeated_failures_exclude_engine_from_next_dispatch() {
        let h = Harness::printed(vec![entry(
            printed("flaky"),
            Arc::new(MockAdapter::failing("segfault")),
        )]);
        let flaky = EngineId::from("flaky");

        // Two failures (call and retry), then the third disables it.
        let first = h.run().await;
        assert_eq!(first.attempts.len(), 2);
        assert!(!h.pipeline.registry().is_disabled(&flaky));

        let second = h.run().await;
        assert_eq!(second.attempts.len(), 1);
        assert!(h.pipeline.registry().is_disabled(&flaky));
        assert!(h.kinds(&second.page.id).contains(&AuditKind::EngineHealthChanged));

        let third = h.run().await;
        assert!(third.attempts.is_empty());
        assert_eq!(third.review.unwrap().reason, ReviewReason::NoEligibleEngine);

        let transition = h.pipeline.reset_engine(&flaky).unwrap().unwrap();
        assert_eq!(transition.to, HealthState::Healthy);
        assert!(!h.pipeline.registry().is_disabled(&flaky));
        let events = h.audit.events_for_engine(&flaky).unwrap();
        assert!(events.iter().any(|e| e.event.kind == AuditKind::EngineReset));
    }

    #[tokio::test]
    async fn undecodable_input_fails_fast() {
        let mut h = Harness::printed(vec![entry(
            printed("a"),
            Arc::new(MockAdapter::text("never called", 0.9)),
        )]);
        let input = PageInput::new(DocumentId::new(), 2, b"not an image".to_vec());
        let result = h.pipeline.process_page(input, &CancelToken::new()).await;
        assert!(matches!(result, Err(LecternError::Input(_))));

        let event = h.completions.try_recv().unwrap();
        assert_eq!(event.state, PageStatus::Failed);
        assert_eq!(event.page_index, 2);
        assert_eq!(h.store.page_status(&event.page_id).unwrap(), Some(PageStatus::Failed));
        assert_eq!(
            h.kinds(&event.page_id),
            vec![AuditKind::InputRejected, AuditKind::PageFailed]
        );
        assert!(h.store.attempts_for_page(&event.page_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn degraded_classification_fans_out() {
        let h = Harness::new(
            Arc::new(FixedClassifier::failing("model not loaded")),
            vec![
                entry(printed("printed"), Arc::new(MockAdapter::text("Ledger 1887", 0.9))),
                entry(handwritten("htr"), Arc::new(MockAdapter::text("Ledger 1887", 0.85))),
            ],
        );
        let outcome = h.run().await;

        let classification = outcome.classification.unwrap();
        assert_eq!(classification.label, Label::Unknown);
        assert!(classification.degraded);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.fused.unwrap().method, FusionMethod::Consensus);
        assert!(h.kinds(&outcome.page.id).contains(&AuditKind::ClassificationDegraded));
    }

    #[tokio::test]
    async fn cancellation_ends_page_cancelled() {
        let mut h = Harness::printed(vec![
            entry(printed("fast"), Arc::new(MockAdapter::text("done", 0.9))),
            entry(printed("stuck"), Arc::new(MockAdapter::hanging())),
        ]);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let input = PageInput::new(DocumentId::new(), 0, png_bytes());
        let outcome = h.pipeline.process_page(input, &cancel).await.unwrap();
        assert_eq!(outcome.status, PageStatus::Cancelled);
        assert!(outcome.fused.is_none());
        assert!(matches!(outcome.error(), Some(LecternError::Cancelled)));

        let page_id = outcome.page.id;
        assert_eq!(h.store.page_status(&page_id).unwrap(), Some(PageStatus::Cancelled));
        // The fast engine finished before the cancel and is kept.
        assert_eq!(h.store.attempts_for_page(&page_id).unwrap().len(), 1);
        assert_eq!(h.completions.try_recv().unwrap().state, PageStatus::Cancelled);
    }

    #[tokio::test]
    async fn batch_rolls_up_documents() {
        let h = Harness::printed(vec![entry(
            printed("a"),
            Arc::new(MockAdapter::text("Invoice #123", 0.97)),
        )]);
        let (good, bad) = (DocumentId::new(), DocumentId::new());
        let inputs = vec![
            PageInput::new(good, 0, png_bytes()),
            PageInput::new(bad, 0, png_bytes()),
            PageInput::new(good, 1, png_bytes()),
            PageInput::new(bad, 1, Vec::new()),
        ];

        let (progress_tx, mut progress_rx) = mpsc::channel(8);
        let report = h
            .pipeline
            .process_batch_with_progress(inputs, &CancelToken::new(), Some(progress_tx))
            .await;

        assert_eq!(report.pages.len(), 4);
        assert_eq!(report.pages[2].document_id, good);
        assert_eq!(report.pages[2].page_index, 1);
        assert_eq!(report.count(PageStatus::AutoAccepted), 3);
        assert_eq!(report.count(PageStatus::Failed), 1);
        assert!(report.pages[3].error.is_some());
        assert_eq!(report.document(&good).unwrap().status, DocumentStatus::Completed);
        assert_eq!(report.document(&bad).unwrap().status, DocumentStatus::Failed);

        let mut updates = Vec::new();
        while let Ok(update) = progress_rx.try_recv() {
            updates.push(update);
        }
        assert_eq!(updates.len(), 4);
        assert_eq!(updates.last().unwrap().completed, 4);
        assert!(updates.iter().all(|u| u.total == 4));
    }

    #[tokio::test]
    async fn cancelled_batch_cancels_every_page() {
        let h = Harness::printed(vec![entry(
            printed("a"),
            Arc::new(MockAdapter::text("Invoice #123", 0.97)),
        )]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let document = DocumentId::new();
        let inputs = (0..3).map(|i| PageInput::new(document, i, png_bytes())).collect();

        let report = h.pipeline.process_batch(inputs, &cancel).await;
        assert_eq!(report.count(PageStatus::Cancelled), 3);
        assert_eq!(report.document(&document).unwrap().status, DocumentStatus::Incomplete);
    }

    #[tokio::test]
    async fn reprocess_supersedes_previous_result() {
        let h = Harness::printed(vec![entry(
            printed("a"),
            Arc::new(MockAdapter::text("Invoice #123", 0.97)),
        )]);
        let bytes = png_bytes();
        let first = h
            .pipeline
            .process_page(PageInput::new(DocumentId::new(), 0, bytes.clone()), &CancelToken::new())
            .await
            .unwrap();
        let page_id = first.page.id;

        let tampered = [bytes.as_slice(), b"\0"].concat();
        let err = h
            .pipeline
            .reprocess(page_id, &tampered, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LecternError::IntegrityMismatch { .. }));
        assert!(h.kinds(&page_id).contains(&AuditKind::InputRejected));
        assert_eq!(h.store.page_status(&page_id).unwrap(), Some(PageStatus::AutoAccepted));

        let second = h
            .pipeline
            .reprocess(page_id, &bytes, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(second.status, PageStatus::AutoAccepted);
        assert_eq!(second.page.id, page_id);
        assert_eq!(h.store.fused_history(&page_id).unwrap().len(), 2);
        assert_eq!(
            h.store.current_fused(&page_id).unwrap().unwrap().id,
            second.fused.unwrap().id
        );
        assert_eq!(h.store.attempts_for_page(&page_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reprocess_refused_while_reviewed_or_rejected() {
        let h = Harness::printed(vec![entry(
            printed("a"),
            Arc::new(MockAdapter::text("smudged", 0.3)),
        )]);
        let bytes = png_bytes();
        let outcome = h
            .pipeline
            .process_page(PageInput::new(DocumentId::new(), 0, bytes.clone()), &CancelToken::new())
            .await
            .unwrap();
        let page_id = outcome.page.id;
        let task = outcome.review.unwrap();

        let err = h
            .pipeline
            .reprocess(page_id, &bytes, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LecternError::ReprocessRefused(..)));

        h.pipeline
            .resolve_review(task.id, Resolution::Rejected { note: Some("illegible".into()) })
            .await
            .unwrap();
        assert_eq!(h.store.page_status(&page_id).unwrap(), Some(PageStatus::Rejected));

        let err = h
            .pipeline
            .reprocess(page_id, &bytes, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LecternError::ReprocessRefused(..)));
    }

    #[tokio::test]
    async fn reprocess_refused_after_correction() {
        let h = Harness::printed(vec![entry(
            printed("a"),
            Arc::new(MockAdapter::text("Invoice #123", 0.4)),
        )]);
        let bytes = png_bytes();
        let outcome = h
            .pipeline
            .process_page(PageInput::new(DocumentId::new(), 0, bytes.clone()), &CancelToken::new())
            .await
            .unwrap();
        let page_id = outcome.page.id;
        h.pipeline
            .resolve_review(
                outcome.review.unwrap().id,
                Resolution::Corrected { text: "Invoice #128".into() },
            )
            .await
            .unwrap();

        let err = h
            .pipeline
            .reprocess(page_id, &bytes, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LecternError::ReprocessRefused(id, _) if id == page_id));
        assert_eq!(h.store.page_status(&page_id).unwrap(), Some(PageStatus::Corrected));
        assert_eq!(h.store.fused_history(&page_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_reprocess_is_audited() {
        let h = Harness::printed(vec![entry(
            printed("a"),
            Arc::new(MockAdapter::text("Invoice #123", 0.97)),
        )]);
        let garbage = b"not an image".to_vec();
        let err = h
            .pipeline
            .process_page(PageInput::new(DocumentId::new(), 0, garbage.clone()), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LecternError::Input(_)));
        let page_id = h
            .audit
            .recent_events(10)
            .unwrap()
            .iter()
            .find(|entry| entry.event.kind == AuditKind::InputRejected)
            .and_then(|entry| entry.event.page_id)
            .unwrap();

        let err = h
            .pipeline
            .reprocess(page_id, &garbage, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LecternError::Input(_)));
        let rejected = h
            .kinds(&page_id)
            .into_iter()
            .filter(|kind| *kind == AuditKind::InputRejected)
            .count();
        assert_eq!(rejected, 2);
        assert_eq!(h.store.page_status(&page_id).unwrap(), Some(PageStatus::Failed));
    }

    #[tokio::test]
    async fn failed_page_review_can_be_corrected() {
        let h = Harness::printed(vec![entry(
            printed("a"),
            Arc::new(MockAdapter::failing("timeout talking to model server")),
        )]);
        let outcome = h.run().await;
        let task = outcome.review.unwrap();

        h.pipeline
            .resolve_review(task.id, Resolution::Corrected { text: "typed by hand".into() })
            .await
            .unwrap();
        assert_eq!(
            h.store.page_status(&outcome.page.id).unwrap(),
            Some(PageStatus::Corrected)
        );
        assert!(h.pipeline.open_reviews().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_review_task() {
        let h = Harness::printed(Vec::new());
        let result = h
            .pipeline
            .resolve_review(ReviewTaskId::new(), Resolution::Rejected { note: None })
            .await;
        assert!(matches!(result, Err(LecternError::ReviewNotFound(_))));
    }

    #[tokio::test]
    async fn snapshot_lists_registered_engines() {
        let h = Harness::printed(vec![
            entry(printed("a"), Arc::new(MockAdapter::text("x", 0.9))),
            entry(handwritten("b").with_weight(2.0), Arc::new(MockAdapter::text("x", 0.9))),
        ]);
        let snapshot = h.pipeline.engine_snapshot();
        let weights: HashMap<_, _> = snapshot.iter().map(|s| (s.id.as_str().to_string(), s.weight)).collect();
        assert_eq!(weights["a"], 1.0);
        assert_eq!(weights["b"], 2.0);
        assert!(snapshot.iter().all(|s| s.state == HealthState::Healthy));

        let unknown = h.pipeline.reset_engine(&EngineId::from("nope"));
        assert!(matches!(unknown, Err(LecternError::UnknownEngine(_))));
    }
}
