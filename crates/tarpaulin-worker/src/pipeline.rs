//! Resize pipeline for one work item.
//!
//! A message moves through `Received → Fetching → Decoding → Normalizing? →
//! Resizing(tier)…` and ends in a [`ProcessOutcome`]. Each derivative's url is
//! merged into the original's metadata as soon as the derivative is stored, so an
//! interrupted run only loses the tier in progress. Tiers whose url is recorded and
//! whose blob exists are skipped, which makes redelivery safe.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tarpaulin_core::{
    Config, DerivativeTier, ImageId, ImageInfo, ImageMetadata, MetadataPatch, TaskError,
    TaskResultExt,
};
use tarpaulin_processing::{
    plan_derivatives, probe, DerivativeRenderer, DynamicImage, RenderedDerivative,
    DERIVATIVE_CONTENT_TYPE,
};
use tarpaulin_queue::{MessageHandler, ProcessOutcome};
use tarpaulin_storage::{BlobStore, StorageError};

/// Where a work item is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Fetching,
    Decoding,
    Normalizing,
    Resizing(DerivativeTier),
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PipelineStage::Received => f.write_str("received"),
            PipelineStage::Fetching => f.write_str("fetching"),
            PipelineStage::Decoding => f.write_str("decoding"),
            PipelineStage::Normalizing => f.write_str("normalizing"),
            PipelineStage::Resizing(tier) => write!(f, "resizing[{}]", tier),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Prefix of derivative urls written to metadata, e.g. `/media/photos`.
    pub media_url_prefix: String,
    /// Largest original the worker will buffer.
    pub max_image_bytes: usize,
    pub jpeg_quality: u8,
    /// Budget for the whole pipeline of one message.
    pub pipeline_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            media_url_prefix: config.media_url_prefix().to_string(),
            max_image_bytes: config.max_image_size_bytes(),
            jpeg_quality: config.jpeg_quality(),
            pipeline_timeout: config.worker_stage_timeout(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            media_url_prefix: "/media/photos".to_string(),
            max_image_bytes: 25 * 1024 * 1024,
            jpeg_quality: tarpaulin_processing::DEFAULT_JPEG_QUALITY,
            pipeline_timeout: Duration::from_secs(300),
        }
    }
}

/// What one successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub id: ImageId,
    /// Every tier the image qualifies for.
    pub planned: Vec<DerivativeTier>,
    /// Tiers rendered and stored by this run.
    pub produced: Vec<DerivativeTier>,
}

impl PipelineReport {
    /// True when every planned tier already existed.
    pub fn is_noop(&self) -> bool {
        self.produced.is_empty()
    }
}

pub struct ResizeWorker {
    store: Arc<dyn BlobStore>,
    settings: WorkerSettings,
    renderer: DerivativeRenderer,
}

impl ResizeWorker {
    pub fn new(store: Arc<dyn BlobStore>, settings: WorkerSettings) -> Self {
        let renderer = DerivativeRenderer::new(settings.jpeg_quality);
        Self {
            store,
            settings,
            renderer,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Run the pipeline for one message and classify the result.
    pub async fn on_message(&self, payload: &[u8]) -> ProcessOutcome {
        let started = Instant::now();
        let timeout = self.settings.pipeline_timeout;

        match tokio::time::timeout(timeout, self.process(payload)).await {
            Ok(Ok(report)) => {
                tracing::info!(
                    image_id = %report.id,
                    planned = report.planned.len(),
                    produced = report.produced.len(),
                    duration_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Derivatives complete"
                );
                ProcessOutcome::Success
            }
            Ok(Err(err)) => {
                let reason = format!("{:#}", err.inner());
                if err.is_retryable() {
                    tracing::warn!(error = %reason, "Resize pipeline failed, will retry");
                    ProcessOutcome::RetryableFailure(reason)
                } else {
                    tracing::error!(error = %reason, "Resize pipeline failed permanently");
                    ProcessOutcome::PermanentFailure(reason)
                }
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Resize pipeline timed out"
                );
                ProcessOutcome::RetryableFailure(timeout_reason(timeout))
            }
        }
    }

    /// Produce every missing derivative for the image id in `payload`.
    #[tracing::instrument(skip(self, payload), fields(image_id = tracing::field::Empty))]
    pub async fn process(&self, payload: &[u8]) -> Result<PipelineReport, TaskError> {
        enter(PipelineStage::Received);
        let id = ImageId::from_payload(payload)
            .context("malformed work item")
            .permanent()?;
        tracing::Span::current().record("image_id", id.as_str());

        enter(PipelineStage::Fetching);
        let (info, data) = self.fetch_original(&id).await?;

        enter(PipelineStage::Decoding);
        let probed = probe(&data).context("unreadable image header").permanent()?;
        let is_png = probed.is_png(&info.filename);
        let planned = plan_derivatives(&probed, is_png);
        let pending = self.pending_tiers(&id, &info, &planned).await?;

        tracing::debug!(
            width = probed.width,
            height = probed.height,
            is_png,
            planned = ?planned,
            pending = ?pending,
            "Derivatives planned"
        );

        let mut produced = Vec::with_capacity(pending.len());
        if !pending.is_empty() {
            let source = self.decode(data).await?;
            for tier in pending {
                enter(match tier {
                    DerivativeTier::Original => PipelineStage::Normalizing,
                    size => PipelineStage::Resizing(size),
                });
                let rendered = self.render(&source, tier).await?;
                self.store_derivative(&id, rendered).await?;
                produced.push(tier);
            }
        }

        Ok(PipelineReport {
            id,
            planned,
            produced,
        })
    }

    async fn fetch_original(&self, id: &ImageId) -> Result<(ImageInfo, Bytes), TaskError> {
        let info = self
            .store
            .get_info_by_id(id)
            .await
            .map_err(|e| storage_failure(e, "read original info"))?
            .ok_or_else(|| TaskError::permanent(anyhow!("original {} not found", id)))?;

        let limit = self.settings.max_image_bytes;
        if info.length > limit as u64 {
            return Err(TaskError::permanent(anyhow!(
                "original is {} bytes, limit is {}",
                info.length,
                limit
            )));
        }

        let data = self
            .store
            .download_by_id(id, limit)
            .await
            .map_err(|e| storage_failure(e, "download original"))?;
        Ok((info, data))
    }

    /// Planned tiers not yet both recorded in metadata and present in the store.
    async fn pending_tiers(
        &self,
        id: &ImageId,
        info: &ImageInfo,
        planned: &[DerivativeTier],
    ) -> Result<Vec<DerivativeTier>, TaskError> {
        let mut pending = Vec::with_capacity(planned.len());
        for &tier in planned {
            if !info.has_derivative(tier) {
                pending.push(tier);
                continue;
            }
            let existing = self
                .store
                .get_info_by_name(&tier.derivative_filename(id))
                .await
                .map_err(|e| storage_failure(e, "look up existing derivative"))?;
            if existing.is_none() {
                pending.push(tier);
            }
        }
        Ok(pending)
    }

    async fn decode(&self, data: Bytes) -> Result<Arc<DynamicImage>, TaskError> {
        let renderer = self.renderer;
        let decoded = tokio::task::spawn_blocking(move || renderer.decode(&data))
            .await
            .context("decode task aborted")
            .retryable()?
            .context("failed to decode original")
            .permanent()?;
        Ok(Arc::new(decoded))
    }

    async fn render(
        &self,
        source: &Arc<DynamicImage>,
        tier: DerivativeTier,
    ) -> Result<RenderedDerivative, TaskError> {
        let renderer = self.renderer;
        let source = source.clone();
        tokio::task::spawn_blocking(move || renderer.render(&source, tier))
            .await
            .context("render task aborted")
            .retryable()?
            .with_context(|| format!("failed to render {} derivative", tier))
            .permanent()
    }

    /// Store the derivative, then record its url on the original.
    async fn store_derivative(
        &self,
        id: &ImageId,
        rendered: RenderedDerivative,
    ) -> Result<(), TaskError> {
        let tier = rendered.tier;
        let filename = tier.derivative_filename(id);
        let derivative_id = self
            .store
            .upload(
                &filename,
                DERIVATIVE_CONTENT_TYPE,
                ImageMetadata::default(),
                rendered.data,
            )
            .await
            .map_err(|e| storage_failure(e, "store derivative"))?;

        let url = tier.derivative_url(&self.settings.media_url_prefix, id);
        let updated = self
            .store
            .update_metadata(id, &MetadataPatch::url(tier, url.clone()))
            .await
            .map_err(|e| storage_failure(e, "update original metadata"))?;
        if !updated {
            return Err(TaskError::permanent(anyhow!(
                "original {} disappeared during processing",
                id
            )));
        }

        tracing::info!(
            tier = %tier,
            derivative_id = %derivative_id,
            width = rendered.width,
            height = rendered.height,
            url = %url,
            "Derivative stored"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for ResizeWorker {
    async fn handle(&self, payload: &[u8]) -> ProcessOutcome {
        self.on_message(payload).await
    }
}

fn timeout_reason(timeout: Duration) -> String {
    format!("pipeline timed out after {:?}", timeout)
}

fn enter(stage: PipelineStage) {
    tracing::debug!(stage = %stage, "Pipeline stage");
}

/// Missing or oversized blobs never get better on retry; anything else might.
fn storage_failure(err: StorageError, action: &str) -> TaskError {
    let permanent = matches!(
        err,
        StorageError::NotFound(_)
            | StorageError::TooLarge { .. }
            | StorageError::InvalidName(_)
            | StorageError::Metadata(_)
    );
    let err = anyhow::Error::new(err).context(format!("failed to {}", action));
    if permanent {
        TaskError::permanent(err)
    } else {
        TaskError::retryable(err)
    }
}
