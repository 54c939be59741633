//! Request sequencing, local/remote routing and the busy state machine
//!
//! ```text
//! Idle --submit--> Running --+--> Succeeded(result) --acknowledge--> Idle
//!                            +--> Failed(reason)    --acknowledge--> Idle
//! ```
//!
//! One request runs at a time. Each run is a spawned task, so a caller that
//! drops its [`UpscaleHandle`] does not stop the work; the result is simply
//! discarded and the orchestrator returns to `Idle`. Completion is held back
//! to the next busy-cycle boundary so a progress animation never cuts short.

use crate::{
    config::{FillPolicy, RoutingPreference, UpscaleConfig},
    error::{Result, UpscaleError},
    masker::SubjectMasker,
    pipeline::LocalUpscalePipeline,
    remote::{RemoteUpscaleClient, RemoteUpscaler},
    selection,
    types::{RasterImage, SelectionPath, SubjectMask},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

const EVENT_CAPACITY: usize = 32;

/// Everything one upscale run needs
#[derive(Debug, Clone)]
pub struct UpscaleRequest {
    pub image: RasterImage,
    pub mask: Option<SubjectMask>,
    pub selection: Option<SelectionPath>,
    pub routing: RoutingPreference,
    pub fill: FillPolicy,
}

impl UpscaleRequest {
    #[must_use]
    pub fn new(image: RasterImage) -> Self {
        Self {
            image,
            mask: None,
            selection: None,
            routing: RoutingPreference::default(),
            fill: FillPolicy::default(),
        }
    }

    /// Request with routing and fill taken from the user's preferences
    #[must_use]
    pub fn configured(image: RasterImage, config: &UpscaleConfig) -> Self {
        Self::new(image)
            .with_routing(config.routing())
            .with_fill(config.fill_policy())
    }

    #[must_use]
    pub fn with_mask(mut self, mask: SubjectMask) -> Self {
        self.mask = Some(mask);
        self
    }

    #[must_use]
    pub fn with_selection(mut self, selection: SelectionPath) -> Self {
        self.selection = Some(selection);
        self
    }

    #[must_use]
    pub fn with_routing(mut self, routing: RoutingPreference) -> Self {
        self.routing = routing;
        self
    }

    #[must_use]
    pub fn with_fill(mut self, fill: FillPolicy) -> Self {
        self.fill = fill;
        self
    }
}

/// Orchestrator state, observable through [`UpscaleOrchestrator::watch_state`]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Running,
    Succeeded(Arc<RasterImage>),
    /// Carries the user-facing message only
    Failed(String),
}

impl PipelineState {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    #[must_use]
    pub fn result(&self) -> Option<&Arc<RasterImage>> {
        match self {
            Self::Succeeded(image) => Some(image),
            _ => None,
        }
    }
}

/// Notifications for whatever presentation surface is listening
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Started,
    /// The remote service failed and the local pipeline took over
    FallbackOccurred { reason: String },
    Succeeded { width: u32, height: u32 },
    Failed { message: String },
    /// A run finished after its caller lost interest
    Discarded,
    MaskingFailed { message: String },
}

/// Minimum-visible busy period, quantized to whole animation cycles
#[derive(Debug, Clone, Copy)]
pub struct BusyIndicator {
    started: Instant,
    cycle: Duration,
}

impl BusyIndicator {
    #[must_use]
    pub fn start(cycle: Duration) -> Self {
        Self {
            started: Instant::now(),
            cycle,
        }
    }

    #[must_use]
    pub fn started(&self) -> Instant {
        self.started
    }

    /// First cycle boundary at or after `finished`, never earlier than one cycle
    #[must_use]
    pub fn completion_deadline(&self, finished: Instant) -> Instant {
        if self.cycle.is_zero() {
            return finished.max(self.started);
        }
        let elapsed = finished.saturating_duration_since(self.started);
        let cycles = elapsed.as_nanos().div_ceil(self.cycle.as_nanos()).max(1);
        self.started + self.cycle * u32::try_from(cycles).unwrap_or(u32::MAX)
    }

    /// Sleep until the work that just finished may be reported
    pub async fn settle(&self) {
        tokio::time::sleep_until(self.completion_deadline(Instant::now())).await;
    }
}

/// Pending result of a submitted request
///
/// Dropping the handle abandons the request: the run still finishes, but
/// its result is discarded.
#[derive(Debug)]
pub struct UpscaleHandle {
    reply: oneshot::Receiver<Result<RasterImage>>,
    cancel: CancellationToken,
}

impl UpscaleHandle {
    /// Wait for the run to finish
    pub async fn result(self) -> Result<RasterImage> {
        self.reply
            .await
            .map_err(|_| UpscaleError::internal("Upscale task ended without a result"))?
    }

    /// Abandon the request and stop the local pipeline at its next stage boundary
    pub fn abandon(self) {
        self.cancel.cancel();
    }
}

struct Inner {
    local: Arc<LocalUpscalePipeline>,
    remote: Option<Arc<dyn RemoteUpscaler>>,
    masker: Option<SubjectMasker>,
    busy_cycle: Duration,
    state: watch::Sender<PipelineState>,
    events: broadcast::Sender<PipelineEvent>,
}

impl Inner {
    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: PipelineState) {
        self.state.send_replace(state);
    }

    async fn blocking<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(task)
            .await
            .map_err(|e| UpscaleError::internal(format!("Background task failed: {}", e)))?
    }

    /// Mask → selection → upscale, strictly in order
    async fn execute(
        &self,
        request: UpscaleRequest,
        cancel: &CancellationToken,
    ) -> Result<RasterImage> {
        let UpscaleRequest {
            image,
            mask,
            selection,
            routing,
            fill,
        } = request;

        let prepared = self
            .blocking(move || {
                let (working, original, path) = match mask {
                    Some(mask) => {
                        let original = image.crop(mask.extent)?;
                        let path = selection
                            .map(|path| path.relative_to(mask.extent.x, mask.extent.y));
                        (mask.image, original, path)
                    },
                    None => (image.clone(), image, selection),
                };
                let path = path.unwrap_or_else(SelectionPath::empty);
                selection::compose(&working, &path, fill, Some(&original))
            })
            .await?;
        debug!(
            width = prepared.width(),
            height = prepared.height(),
            "prepared upscale input"
        );

        match (routing, &self.remote) {
            (RoutingPreference::RemoteAllowed, Some(remote)) => {
                match remote.upscale(&prepared).await {
                    Ok(result) => {
                        info!(route = "remote", "upscale finished");
                        Ok(result)
                    },
                    Err(UpscaleError::RemoteUnavailable(reason)) => {
                        warn!(%reason, "remote upscale unavailable; running locally");
                        self.emit(PipelineEvent::FallbackOccurred { reason });
                        self.run_local(prepared, cancel).await
                    },
                    Err(e) => Err(e),
                }
            },
            (RoutingPreference::RemoteAllowed, None) => {
                debug!("no remote service configured");
                self.run_local(prepared, cancel).await
            },
            (RoutingPreference::LocalOnly, _) => self.run_local(prepared, cancel).await,
        }
    }

    async fn run_local(
        &self,
        image: RasterImage,
        cancel: &CancellationToken,
    ) -> Result<RasterImage> {
        let pipeline = Arc::clone(&self.local);
        let cancel = cancel.clone();
        let result = self
            .blocking(move || pipeline.run_cancellable(&image, &cancel))
            .await?;
        info!(route = "local", "upscale finished");
        Ok(result)
    }

    async fn run(
        self: Arc<Self>,
        request: UpscaleRequest,
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<RasterImage>>,
    ) {
        let busy = BusyIndicator::start(self.busy_cycle);
        self.emit(PipelineEvent::Started);

        let outcome = self.execute(request, &cancel).await;
        if !(reply.is_closed() || cancel.is_cancelled()) {
            busy.settle().await;
        }

        if reply.is_closed() || cancel.is_cancelled() {
            debug!("request abandoned; discarding result");
            self.set_state(PipelineState::Idle);
            self.emit(PipelineEvent::Discarded);
            return;
        }

        match outcome {
            Ok(image) => {
                let (width, height) = image.dimensions();
                self.set_state(PipelineState::Succeeded(Arc::new(image.clone())));
                self.emit(PipelineEvent::Succeeded { width, height });
                let _ = reply.send(Ok(image));
            },
            Err(e) => {
                error!(error = %e, "upscale failed");
                let message = e.user_message().to_string();
                self.set_state(PipelineState::Failed(message.clone()));
                self.emit(PipelineEvent::Failed { message });
                let _ = reply.send(Err(e));
            },
        }
    }
}

/// Builder for [`UpscaleOrchestrator`]
pub struct UpscaleOrchestratorBuilder {
    local: LocalUpscalePipeline,
    remote: Option<Arc<dyn RemoteUpscaler>>,
    masker: Option<SubjectMasker>,
    busy_cycle: Duration,
}

impl UpscaleOrchestratorBuilder {
    #[must_use]
    pub fn remote(mut self, remote: Arc<dyn RemoteUpscaler>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn masker(mut self, masker: SubjectMasker) -> Self {
        self.masker = Some(masker);
        self
    }

    #[must_use]
    pub fn busy_cycle(mut self, cycle: Duration) -> Self {
        self.busy_cycle = cycle;
        self
    }

    #[must_use]
    pub fn build(self) -> UpscaleOrchestrator {
        let (state, _) = watch::channel(PipelineState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        UpscaleOrchestrator {
            inner: Arc::new(Inner {
                local: Arc::new(self.local),
                remote: self.remote,
                masker: self.masker,
                busy_cycle: self.busy_cycle,
                state,
                events,
            }),
        }
    }
}

/// Front door for masking, selection and upscaling
#[derive(Clone)]
pub struct UpscaleOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for UpscaleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpscaleOrchestrator")
            .field("state", &*self.inner.state.borrow())
            .field("remote", &self.inner.remote.is_some())
            .field("masker", &self.inner.masker.is_some())
            .field("busy_cycle", &self.inner.busy_cycle)
            .finish_non_exhaustive()
    }
}

impl UpscaleOrchestrator {
    #[must_use]
    pub fn builder(local: LocalUpscalePipeline) -> UpscaleOrchestratorBuilder {
        UpscaleOrchestratorBuilder {
            local,
            remote: None,
            masker: None,
            busy_cycle: Duration::from_millis(crate::config::DEFAULT_BUSY_CYCLE_MS),
        }
    }

    /// Wire the remote client (if configured) and busy cycle from `config`
    pub fn from_config(
        config: &UpscaleConfig,
        local: LocalUpscalePipeline,
        masker: Option<SubjectMasker>,
    ) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::builder(local).busy_cycle(config.busy_cycle());
        if let Some(remote) = &config.remote {
            builder = builder.remote(Arc::new(RemoteUpscaleClient::new(remote.clone())?));
        }
        if let Some(masker) = masker {
            builder = builder.masker(masker);
        }
        Ok(builder.build())
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    /// Start a run; only accepted from `Idle`
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// - `Busy` when a run is in progress or its result has not been acknowledged
    pub fn submit(&self, request: UpscaleRequest) -> Result<UpscaleHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| UpscaleError::internal(format!("No async runtime: {}", e)))?;

        let accepted = self.inner.state.send_if_modified(|state| {
            if state.is_idle() {
                *state = PipelineState::Running;
                true
            } else {
                false
            }
        });
        if !accepted {
            debug!("rejecting submission while busy");
            return Err(UpscaleError::Busy);
        }

        let (reply, receiver) = oneshot::channel();
        let cancel = CancellationToken::new();
        let span = info_span!(
            "upscale",
            width = request.image.width(),
            height = request.image.height(),
            routing = ?request.routing,
            masked = request.mask.is_some()
        );
        runtime.spawn(
            Arc::clone(&self.inner)
                .run(request, cancel.clone(), reply)
                .instrument(span),
        );

        Ok(UpscaleHandle {
            reply: receiver,
            cancel,
        })
    }

    /// Submit, wait, and acknowledge
    ///
    /// Handing the result to the caller consumes it, so the orchestrator is
    /// back in `Idle` when this returns. Use [`submit`](Self::submit) to keep
    /// `Succeeded`/`Failed` observable until an explicit
    /// [`acknowledge`](Self::acknowledge).
    pub async fn upscale(&self, request: UpscaleRequest) -> Result<RasterImage> {
        let result = self.submit(request)?.result().await;
        self.acknowledge();
        result
    }

    /// Return to `Idle` after a finished run; false if there was nothing to acknowledge
    pub fn acknowledge(&self) -> bool {
        self.inner.state.send_if_modified(|state| match state {
            PipelineState::Succeeded(_) | PipelineState::Failed(_) => {
                *state = PipelineState::Idle;
                true
            },
            PipelineState::Idle | PipelineState::Running => false,
        })
    }

    /// Cut out the primary subject on a background thread
    ///
    /// # Errors
    /// - `InvalidConfig` when no segmentation model is configured
    /// - whatever [`SubjectMasker::mask`] reports
    pub async fn mask_subject(&self, image: RasterImage) -> Result<SubjectMask> {
        let masker = self
            .inner
            .masker
            .clone()
            .ok_or_else(|| UpscaleError::invalid_config("No segmentation model configured"))?;

        let result = self.inner.blocking(move || masker.mask(&image)).await;
        if let Err(e) = &result {
            warn!(error = %e, "subject masking failed");
            self.inner.emit(PipelineEvent::MaskingFailed {
                message: e.user_message().to_string(),
            });
        }
        result
    }

    /// Clip to `path` and fill the background; darkening dims `image` itself
    pub async fn apply_selection(
        &self,
        image: RasterImage,
        path: SelectionPath,
        policy: FillPolicy,
    ) -> Result<RasterImage> {
        self.inner
            .blocking(move || selection::compose(&image, &path, policy, Some(&image)))
            .await
    }
}
