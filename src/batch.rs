//! Batch session and the sequential pipeline driver.
//!
//! A [`BatchSession`] holds everything one user works with: the queue, the
//! results of the last run, notices, usage counters, progress and run state.
//! It is passed explicitly to every operation; nothing is global.
//!
//! A run is gated three ways:
//!
//! 1. the credential must have been validated on this session,
//! 2. the queue must be non-empty,
//! 3. the caller must hold a [`RunConfirmation`], which only
//!    [`CostExposure::confirm`] can produce, for exactly the files queued
//!    now, in the same order.
//!
//! ```text
//!            request_run()          confirm()            run()
//! session ───────────────▶ CostExposure ───▶ RunConfirmation ───▶ BatchSummary
//! ```
//!
//! Files are processed one at a time, and within a file one vision call at a
//! time. This keeps request ordering deterministic and stays well clear of
//! per-minute rate limits, at the cost of wall-clock time.

use crate::config::BatchConfig;
use crate::error::{Img2PromptError, ItemError, VisionError};
use crate::output::{BatchSummary, FailedFile, FileResult, Notice, QualifiedImage, UsageCounters};
use crate::pipeline::{extract, filter, generate};
use crate::progress::{BatchProgress, BatchProgressCallback, STEPS_PER_FILE};
use crate::queue::{ItemId, ItemStatus, QueuedItem, UploadedFile};
use crate::vision::VisionClient;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of the session's most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
}

/// Outcome of the last credential check.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CredentialState {
    #[default]
    Unchecked,
    Valid,
    Invalid(VisionError),
}

/// All mutable state of one batch session.
#[derive(Debug, Default)]
pub struct BatchSession {
    items: Vec<QueuedItem>,
    results: Vec<FileResult>,
    failed: Vec<FailedFile>,
    notices: Vec<Notice>,
    usage: UsageCounters,
    progress: BatchProgress,
    run_state: RunState,
    credential: CredentialState,
}

impl BatchSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an accepted file to the queue and return its id.
    pub fn enqueue(&mut self, file: UploadedFile) -> ItemId {
        let item = QueuedItem::new(file);
        let id = item.id;
        debug!("Queued '{}' as {}", item.file.name(), id);
        self.items.push(item);
        id
    }

    /// Remove a queued file. Not allowed while a run is active.
    pub fn remove(&mut self, id: ItemId) -> Result<Option<QueuedItem>, Img2PromptError> {
        if self.run_state == RunState::Running {
            return Err(Img2PromptError::RunInProgress);
        }
        Ok(self
            .items
            .iter()
            .position(|item| item.id == id)
            .map(|pos| self.items.remove(pos)))
    }

    /// Clear the queue and everything derived from it.
    ///
    /// The credential state is kept. This is also the way out of `Running`
    /// if a run future was dropped before it finished.
    pub fn reset(&mut self) {
        let credential = std::mem::take(&mut self.credential);
        *self = Self {
            credential,
            ..Self::default()
        };
    }

    pub fn items(&self) -> &[QueuedItem] {
        &self.items
    }

    pub fn item(&self, id: ItemId) -> Option<&QueuedItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn results(&self) -> &[FileResult] {
        &self.results
    }

    pub fn failed(&self) -> &[FailedFile] {
        &self.failed
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn usage(&self) -> UsageCounters {
        self.usage
    }

    pub fn progress(&self) -> BatchProgress {
        self.progress
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn credential(&self) -> &CredentialState {
        &self.credential
    }

    pub fn is_credential_valid(&self) -> bool {
        self.credential == CredentialState::Valid
    }

    /// Snapshot of the current results.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            results: self.results.clone(),
            failed: self.failed.clone(),
            notices: self.notices.clone(),
            usage: self.usage,
            progress: self.progress,
        }
    }

    fn check_ready(&self) -> Result<(), Img2PromptError> {
        if self.run_state == RunState::Running {
            return Err(Img2PromptError::RunInProgress);
        }
        if !self.is_credential_valid() {
            return Err(Img2PromptError::CredentialNotValidated);
        }
        if self.items.is_empty() {
            return Err(Img2PromptError::EmptyQueue);
        }
        Ok(())
    }

    fn begin_run(&mut self) {
        self.run_state = RunState::Running;
        self.results.clear();
        self.failed.clear();
        self.notices.clear();
        self.usage = UsageCounters::default();
        self.progress = BatchProgress::for_files(self.items.len());
        for item in &mut self.items {
            item.reset();
        }
    }
}

/// What a run may cost, shown to the user before they commit to it.
///
/// The API call count is an upper bound: two calls per image (classify and
/// generate) and one image per raster file. PDFs make no calls.
#[derive(Debug, Clone, PartialEq)]
pub struct CostExposure {
    pub file_count: usize,
    pub raster_files: usize,
    pub max_api_calls: usize,
    /// Image term of the estimate if every raster image qualifies.
    pub max_image_cost: f64,
    pub per_output_token: f64,
    /// Queue contents this exposure was computed for.
    item_ids: Vec<ItemId>,
}

impl CostExposure {
    /// Acknowledge the exposure. The token is only valid while the session
    /// holds the same items in the same order.
    pub fn confirm(self) -> RunConfirmation {
        RunConfirmation {
            item_ids: self.item_ids,
        }
    }
}

/// Proof that the user acknowledged the cost exposure for this queue.
#[derive(Debug)]
#[must_use = "a confirmation does nothing until passed to BatchPipeline::run"]
pub struct RunConfirmation {
    item_ids: Vec<ItemId>,
}

impl RunConfirmation {
    /// Whether `items` is exactly the queue that was confirmed. Item ids are
    /// unique across sessions, so a confirmation never carries over.
    fn covers(&self, items: &[QueuedItem]) -> bool {
        self.item_ids.len() == items.len()
            && self.item_ids.iter().zip(items).all(|(id, item)| *id == item.id)
    }
}

/// Drives extraction, filtering and generation over a session's queue.
pub struct BatchPipeline {
    client: Arc<dyn VisionClient>,
    config: BatchConfig,
}

impl BatchPipeline {
    pub fn new(client: Arc<dyn VisionClient>, config: BatchConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Check the credential and record the outcome on the session.
    ///
    /// Never touches the run state, the queue or the usage counters.
    pub async fn validate_credential(&self, session: &mut BatchSession) -> Result<(), VisionError> {
        match self.client.check_credential().await {
            Ok(()) => {
                info!("API credential validated");
                session.credential = CredentialState::Valid;
                Ok(())
            }
            Err(e) => {
                warn!("Credential check failed: {}", e);
                session.credential = CredentialState::Invalid(e.clone());
                Err(e)
            }
        }
    }

    /// Check run preconditions and describe the cost exposure.
    pub fn request_run(&self, session: &BatchSession) -> Result<CostExposure, Img2PromptError> {
        session.check_ready()?;

        let raster_files = session
            .items
            .iter()
            .filter(|item| item.file.media_type().is_raster())
            .count();

        Ok(CostExposure {
            file_count: session.items.len(),
            raster_files,
            max_api_calls: raster_files * 2,
            max_image_cost: self.config.pricing.estimate(raster_files, 0),
            per_output_token: self.config.pricing.per_output_token,
            item_ids: session.items.iter().map(|item| item.id).collect(),
        })
    }

    /// Process every queued file in order.
    ///
    /// Per-file failures are recorded in the summary, never returned. The
    /// estimated cost is computed once, after the last file.
    pub async fn run(
        &self,
        session: &mut BatchSession,
        confirmation: RunConfirmation,
    ) -> Result<BatchSummary, Img2PromptError> {
        session.check_ready()?;
        if !confirmation.covers(&session.items) {
            warn!("Queue changed since the cost exposure was confirmed");
            return Err(Img2PromptError::ConfirmationStale {
                confirmed: confirmation.item_ids.len(),
                queued: session.items.len(),
            });
        }

        session.begin_run();
        let total_files = session.items.len();
        info!("Processing {} file(s) with {}", total_files, self.config.model);

        self.emit(|cb| cb.on_batch_start(total_files));
        self.emit(|cb| cb.on_progress(0, session.progress.total_steps));

        for index in 0..total_files {
            self.process_file(session, index).await;
            tokio::task::yield_now().await;
        }

        let qualifying: usize = session.results.iter().map(|r| r.images.len()).sum();
        session.usage.estimated_cost = self
            .config
            .pricing
            .estimate(qualifying, session.usage.tokens);
        session.run_state = RunState::Completed;

        let summary = session.summary();
        info!(
            "Done: {} prompt set(s) from {} qualifying image(s), {} failed file(s), {} tokens, ~${:.4}",
            summary.prompt_count(),
            qualifying,
            summary.failed.len(),
            summary.usage.tokens,
            summary.usage.estimated_cost
        );
        self.emit(|cb| cb.on_batch_complete(&summary));
        Ok(summary)
    }

    async fn process_file(&self, session: &mut BatchSession, index: usize) {
        let total_files = session.items.len();
        let item = &mut session.items[index];
        item.status = ItemStatus::Extracting;
        let id = item.id;
        let file = item.file.clone();
        let name = file.name().to_string();

        info!("[{}/{}] {}", index + 1, total_files, name);
        self.emit(|cb| cb.on_file_start(index + 1, total_files, &name));

        let extraction = match extract::extract_images(id, &file) {
            Ok(extraction) => extraction,
            Err(error) => {
                self.fail_file(session, index, error);
                return;
            }
        };
        self.advance(session, 1);

        let images = match extraction {
            extract::Extraction::Images(images) => images,
            extract::Extraction::Unsupported(format) => {
                self.notice(
                    session,
                    Notice::UnsupportedFormat {
                        file_name: name.clone(),
                        format,
                    },
                );
                Vec::new()
            }
        };
        session.items[index].images = images.iter().map(|img| img.source.clone()).collect();

        if images.is_empty() {
            session.items[index].status = ItemStatus::Done;
            self.advance(session, STEPS_PER_FILE - 1);
            self.emit(|cb| cb.on_file_complete(&name, 0));
            return;
        }

        session.items[index].status = ItemStatus::Filtering;
        let filtered =
            filter::filter_meaningful(self.client.as_ref(), images, &mut session.usage).await;
        for notice in filtered.notices {
            self.notice(session, notice);
        }
        self.advance(session, 1);

        session.items[index].status = ItemStatus::Generating;
        let records = if filtered.kept.is_empty() {
            self.notice(
                session,
                Notice::NoMeaningfulImages {
                    file_name: name.clone(),
                },
            );
            Vec::new()
        } else {
            let generated =
                generate::generate_prompts(self.client.as_ref(), &filtered.kept, &mut session.usage)
                    .await;
            for notice in generated.notices {
                self.notice(session, notice);
            }
            generated.records
        };
        self.advance(session, 1);

        let prompt_count = records.len();
        let item = &mut session.items[index];
        item.status = ItemStatus::Done;
        item.prompts = records.clone();
        session.results.push(FileResult {
            file_id: id,
            file_name: name.clone(),
            images: filtered
                .kept
                .into_iter()
                .map(|f| QualifiedImage {
                    image: f.image.source,
                    analysis: f.analysis,
                })
                .collect(),
            prompts: records,
        });

        debug!("'{}': {} prompt set(s)", name, prompt_count);
        self.emit(|cb| cb.on_file_complete(&name, prompt_count));
    }

    /// Mark the file failed and credit whatever steps it had left.
    fn fail_file(&self, session: &mut BatchSession, index: usize, error: ItemError) {
        let item = &mut session.items[index];
        item.status = ItemStatus::Failed;
        let name = item.file.name().to_string();
        warn!("{}", error);

        let message = error.to_string();
        session.failed.push(FailedFile {
            file_id: item.id,
            file_name: name.clone(),
            error,
        });
        self.advance(session, STEPS_PER_FILE);
        self.emit(|cb| cb.on_file_error(&name, &message));
    }

    fn advance(&self, session: &mut BatchSession, steps: usize) {
        session.progress.advance(steps);
        let BatchProgress {
            completed_steps,
            total_steps,
        } = session.progress;
        self.emit(|cb| cb.on_progress(completed_steps, total_steps));
    }

    fn notice(&self, session: &mut BatchSession, notice: Notice) {
        info!("{}", notice);
        self.emit(|cb| cb.on_notice(&notice));
        session.notices.push(notice);
    }

    fn emit(&self, f: impl FnOnce(&dyn BatchProgressCallback)) {
        if let Some(cb) = self.config.progress_callback.as_deref() {
            f(cb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedClient;
    use crate::queue::MAX_UPLOAD_BYTES;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn png(name: &str) -> UploadedFile {
        UploadedFile::from_bytes(name, "image/png", PNG, MAX_UPLOAD_BYTES).unwrap()
    }

    fn pipeline() -> BatchPipeline {
        BatchPipeline::new(Arc::new(ScriptedClient::new()), BatchConfig::default())
    }

    #[test]
    fn enqueue_and_remove() {
        let mut session = BatchSession::new();
        let a = session.enqueue(png("a.png"));
        let b = session.enqueue(png("b.png"));
        assert_eq!(session.items().len(), 2);

        let removed = session.remove(a).unwrap().unwrap();
        assert_eq!(removed.file.name(), "a.png");
        assert_eq!(session.items()[0].id, b);
        assert!(session.remove(a).unwrap().is_none());
    }

    #[test]
    fn remove_rejected_while_running() {
        let mut session = BatchSession::new();
        let id = session.enqueue(png("a.png"));
        session.run_state = RunState::Running;
        assert!(matches!(session.remove(id), Err(Img2PromptError::RunInProgress)));
    }

    #[test]
    fn reset_keeps_credential() {
        let mut session = BatchSession::new();
        session.credential = CredentialState::Valid;
        session.enqueue(png("a.png"));
        session.run_state = RunState::Running;

        session.reset();
        assert!(session.items().is_empty());
        assert_eq!(session.run_state(), RunState::Idle);
        assert!(session.is_credential_valid());
    }

    #[tokio::test]
    async fn validate_credential_records_outcome() {
        let mut session = BatchSession::new();
        pipeline().validate_credential(&mut session).await.unwrap();
        assert!(session.is_credential_valid());
        assert_eq!(session.run_state(), RunState::Idle);
    }

    #[test]
    fn request_run_requires_credential() {
        let mut session = BatchSession::new();
        session.enqueue(png("a.png"));
        assert!(matches!(
            pipeline().request_run(&session),
            Err(Img2PromptError::CredentialNotValidated)
        ));
    }

    #[test]
    fn request_run_requires_files() {
        let mut session = BatchSession::new();
        session.credential = CredentialState::Valid;
        assert!(matches!(
            pipeline().request_run(&session),
            Err(Img2PromptError::EmptyQueue)
        ));
    }

    #[test]
    fn request_run_rejected_while_running() {
        let mut session = BatchSession::new();
        session.credential = CredentialState::Valid;
        session.enqueue(png("a.png"));
        session.run_state = RunState::Running;
        assert!(matches!(
            pipeline().request_run(&session),
            Err(Img2PromptError::RunInProgress)
        ));
    }

    #[test]
    fn exposure_counts_raster_files_only() {
        let mut session = BatchSession::new();
        session.credential = CredentialState::Valid;
        session.enqueue(png("a.png"));
        session.enqueue(
            UploadedFile::from_bytes("b.pdf", "application/pdf", &b"%PDF"[..], MAX_UPLOAD_BYTES)
                .unwrap(),
        );

        let exposure = pipeline().request_run(&session).unwrap();
        assert_eq!(exposure.file_count, 2);
        assert_eq!(exposure.raster_files, 1);
        assert_eq!(exposure.max_api_calls, 2);
        assert!((exposure.max_image_cost - 0.00765).abs() < 1e-12);
    }

    #[tokio::test]
    async fn stale_confirmation_is_rejected() {
        let pipeline = pipeline();
        let mut session = BatchSession::new();
        session.credential = CredentialState::Valid;
        session.enqueue(png("a.png"));

        let confirmation = pipeline.request_run(&session).unwrap().confirm();
        session.enqueue(png("b.png"));

        let err = pipeline.run(&mut session, confirmation).await.unwrap_err();
        assert!(matches!(
            err,
            Img2PromptError::ConfirmationStale {
                confirmed: 1,
                queued: 2
            }
        ));
        assert_eq!(session.run_state(), RunState::Idle);
    }

    #[tokio::test]
    async fn confirmation_is_bound_to_the_confirmed_files() {
        let pipeline = pipeline();
        let mut session = BatchSession::new();
        session.credential = CredentialState::Valid;
        let first = session.enqueue(png("a.png"));

        let confirmation = pipeline.request_run(&session).unwrap().confirm();
        session.remove(first).unwrap();
        session.enqueue(png("b.png"));

        let err = pipeline.run(&mut session, confirmation).await.unwrap_err();
        assert!(matches!(
            err,
            Img2PromptError::ConfirmationStale {
                confirmed: 1,
                queued: 1
            }
        ));
        assert!(session.item(first).is_none());
        assert_eq!(session.run_state(), RunState::Idle);
    }

    #[tokio::test]
    async fn confirmation_does_not_carry_over_to_another_session() {
        let pipeline = pipeline();
        let mut confirmed = BatchSession::new();
        confirmed.credential = CredentialState::Valid;
        confirmed.enqueue(png("a.png"));
        let mut other = BatchSession::new();
        other.credential = CredentialState::Valid;
        other.enqueue(png("a.png"));

        let confirmation = pipeline.request_run(&confirmed).unwrap().confirm();
        let err = pipeline.run(&mut other, confirmation).await.unwrap_err();
        assert!(matches!(err, Img2PromptError::ConfirmationStale { .. }));
        assert_eq!(other.run_state(), RunState::Idle);
    }

    #[tokio::test]
    async fn run_marks_items_done_and_completes() {
        let pipeline = pipeline();
        let mut session = BatchSession::new();
        session.credential = CredentialState::Valid;
        let id = session.enqueue(png("a.png"));

        let confirmation = pipeline.request_run(&session).unwrap().confirm();
        let summary = pipeline.run(&mut session, confirmation).await.unwrap();

        assert_eq!(session.run_state(), RunState::Completed);
        let item = session.item(id).unwrap();
        assert_eq!(item.status, ItemStatus::Done);
        assert_eq!(item.images.len(), 1);
        assert_eq!(item.prompts.len(), 1);
        assert_eq!(summary.progress.completed_steps, 3);
        assert!(summary.progress.is_complete());
    }
}
