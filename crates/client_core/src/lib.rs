use std::{future::Future, sync::Arc};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{CaptionRecord, CaseId, CaseMetadata, ImageUpload, ModeState, OperationResult},
    error::ApiError,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub mod config;
pub mod latency;
pub mod mode_store;
pub mod remote;
pub mod report;
pub mod simulated;

pub use config::{load_settings, ClientSettings};
pub use mode_store::{
    FlagStorage, MemoryFlagStorage, ModeStore, NoOverride, OverrideSignal, QueryOverride,
    StaticOverride, UnavailableFlagStorage,
};
pub use remote::{HttpRemoteClient, MissingRemoteBackend, RemoteBackend, RemoteError};
pub use report::{ReportArtifact, ReportFormat};
pub use simulated::{SimulatedBackend, SimulatedLatency};

pub const MODEL_NOT_LOADED_WARNING: &str =
    "AI model is not loaded. Please contact system administrator.";
pub const HEALTH_CHECK_FAILED_WARNING: &str =
    "System health check failed. Some features may not work properly.";

/// What a failed remote call does to the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Every failure, including a well-formed `success: false`, downgrades.
    #[default]
    DowngradeOnAnyFailure,
    /// `success: false` responses are returned as `Failure`; only transport,
    /// status and malformed-response failures downgrade.
    SurfaceApplicationErrors,
}

impl FailurePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "downgrade_on_any_failure" | "downgrade" => Some(Self::DowngradeOnAnyFailure),
            "surface_application_errors" | "surface" => Some(Self::SurfaceApplicationErrors),
            _ => None,
        }
    }

    fn downgrades_on(self, error: &RemoteError) -> bool {
        match self {
            FailurePolicy::DowngradeOnAnyFailure => true,
            FailurePolicy::SurfaceApplicationErrors => !error.is_application(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GenerateCaption,
    SaveCase,
    GeneratePdf,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::GenerateCaption => "generate_caption",
            Operation::SaveCase => "save_case",
            Operation::GeneratePdf => "generate_pdf",
        }
    }
}

/// Result of `generate_pdf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfArtifact {
    /// Document rendered by the backend.
    Bytes(Vec<u8>),
    /// No bytes were produced; build the report with
    /// [`RequestOrchestrator::build_local_report`].
    ConstructLocally,
}

#[derive(Debug, Clone)]
pub enum ModeChangeCause {
    UserToggle,
    UserSelection,
    RemoteFailure {
        operation: Operation,
        error: ApiError,
    },
}

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    ModeChanged {
        from: ModeState,
        to: ModeState,
        cause: ModeChangeCause,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthReport {
    Ready,
    ModelNotLoaded,
    Unreachable { reason: String },
    Simulated,
}

impl HealthReport {
    /// Banner text for the UI, if any.
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            HealthReport::Ready | HealthReport::Simulated => None,
            HealthReport::ModelNotLoaded => Some(MODEL_NOT_LOADED_WARNING),
            HealthReport::Unreachable { .. } => Some(HEALTH_CHECK_FAILED_WARNING),
        }
    }
}

pub struct RequestOrchestrator {
    mode: Arc<ModeStore>,
    remote: Arc<dyn RemoteBackend>,
    simulated: Arc<SimulatedBackend>,
    policy: FailurePolicy,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl RequestOrchestrator {
    pub fn new(
        mode: Arc<ModeStore>,
        remote: Arc<dyn RemoteBackend>,
        simulated: Arc<SimulatedBackend>,
    ) -> Arc<Self> {
        Self::new_with_policy(mode, remote, simulated, FailurePolicy::default())
    }

    pub fn new_with_policy(
        mode: Arc<ModeStore>,
        remote: Arc<dyn RemoteBackend>,
        simulated: Arc<SimulatedBackend>,
        policy: FailurePolicy,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            mode,
            remote,
            simulated,
            policy,
            events,
        })
    }

    /// Wires the SQLite mode flag, the HTTP client and the simulated backend
    /// from settings. `page_query` is the current page's query string, if any.
    pub async fn from_settings(
        settings: &ClientSettings,
        page_query: Option<&str>,
    ) -> Result<Arc<Self>> {
        let flag_storage: Arc<dyn FlagStorage> =
            match storage::Storage::new(&settings.database_url).await {
                Ok(storage) => Arc::new(storage),
                Err(error) => {
                    warn!(
                        database_url = %settings.database_url,
                        error = %format!("{error:#}"),
                        "orchestrator: settings storage unavailable, mode will not persist"
                    );
                    Arc::new(UnavailableFlagStorage)
                }
            };
        let override_signal: Arc<dyn OverrideSignal> = if settings.force_simulated {
            Arc::new(StaticOverride(true))
        } else {
            Arc::new(QueryOverride::from_query(page_query.unwrap_or_default()))
        };
        let mode = Arc::new(ModeStore::with_override(flag_storage, override_signal));

        let remote = HttpRemoteClient::new(
            settings.api_base_url.clone(),
            settings.request_timeout(),
            settings.health_timeout(),
        )?;
        let simulated = SimulatedBackend::new(settings.simulated_latency());

        Ok(Self::new_with_policy(
            mode,
            Arc::new(remote),
            Arc::new(simulated),
            settings.failure_policy,
        ))
    }

    pub fn mode_store(&self) -> &Arc<ModeStore> {
        &self.mode
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub async fn current_mode(&self) -> ModeState {
        self.mode.mode().await
    }

    pub async fn generate_caption(&self, image: &ImageUpload) -> OperationResult<CaptionRecord> {
        self.dispatch(
            Operation::GenerateCaption,
            self.remote.generate_caption(image),
            self.simulated.caption(image),
        )
        .await
    }

    pub async fn save_case(&self, case: &CaseMetadata) -> OperationResult<CaseId> {
        self.dispatch(
            Operation::SaveCase,
            self.remote.save_case(case),
            self.simulated.save_case(case),
        )
        .await
    }

    /// Remote success yields the backend's bytes; simulated mode yields
    /// [`PdfArtifact::ConstructLocally`].
    pub async fn generate_pdf(
        &self,
        image: &ImageUpload,
        case: &CaseMetadata,
    ) -> OperationResult<PdfArtifact> {
        self.dispatch(
            Operation::GeneratePdf,
            async {
                self.remote
                    .generate_pdf(image, case)
                    .await
                    .map(PdfArtifact::Bytes)
            },
            async { PdfArtifact::ConstructLocally },
        )
        .await
    }

    pub async fn build_local_report(&self, case: &CaseMetadata) -> ReportArtifact {
        self.simulated.report(case).await
    }

    /// Flips the stored flag, not the effective mode. The override signal is
    /// untouched, so the returned mode may still be simulated. With
    /// `mock=true` present and `"false"` stored this persists `"true"`, which
    /// outlives the override; the web client instead wrote `"false"` there.
    pub async fn toggle_mode(&self) -> ModeState {
        let from = self.mode.mode().await;
        let stored = ModeState::from_simulated(self.mode.persisted_simulated().await);
        self.mode.set_simulated(stored.flipped().is_simulated()).await;
        let to = self.mode.mode().await;
        info!(from = ?from, to = ?to, "orchestrator: mode toggled");
        self.notify_mode_change(from, to, ModeChangeCause::UserToggle);
        to
    }

    pub async fn enable_remote(&self) -> ModeState {
        self.select_mode(false).await
    }

    pub async fn enable_simulated(&self) -> ModeState {
        self.select_mode(true).await
    }

    async fn select_mode(&self, simulated: bool) -> ModeState {
        let from = self.mode.mode().await;
        self.mode.set_simulated(simulated).await;
        let to = self.mode.mode().await;
        self.notify_mode_change(from, to, ModeChangeCause::UserSelection);
        to
    }

    /// Startup probe. Never changes the mode.
    pub async fn check_health(&self) -> HealthReport {
        if self.mode.is_simulated().await {
            return self.simulated.health();
        }
        match self.remote.health().await {
            Ok(health) if health.model_loaded => HealthReport::Ready,
            Ok(_) => {
                warn!("orchestrator: backend reports model not loaded");
                HealthReport::ModelNotLoaded
            }
            Err(error) => {
                warn!(%error, "orchestrator: health check failed");
                HealthReport::Unreachable {
                    reason: error.to_string(),
                }
            }
        }
    }

    /// Both futures are lazy: only the branch chosen here is ever polled.
    async fn dispatch<T>(
        &self,
        operation: Operation,
        remote_call: impl Future<Output = std::result::Result<T, RemoteError>>,
        simulate: impl Future<Output = T>,
    ) -> OperationResult<T> {
        if self.mode.is_simulated().await {
            debug!(
                operation = operation.as_str(),
                "orchestrator: simulated mode, skipping remote"
            );
            return OperationResult::Success(simulate.await);
        }

        let error = match remote_call.await {
            Ok(payload) => return OperationResult::Success(payload),
            Err(error) => error,
        };

        if !self.policy.downgrades_on(&error) {
            warn!(
                operation = operation.as_str(),
                %error,
                "orchestrator: backend rejected request"
            );
            return OperationResult::failure(error.to_string());
        }

        self.downgrade(operation, &error).await;
        OperationResult::Success(simulate.await)
    }

    async fn downgrade(&self, operation: Operation, error: &RemoteError) {
        if !self.mode.downgrade().await {
            info!(
                operation = operation.as_str(),
                %error,
                "orchestrator: remote call failed, simulated mode already stored"
            );
            return;
        }
        warn!(
            operation = operation.as_str(),
            %error,
            "orchestrator: remote call failed, switching to simulated mode"
        );
        self.notify_mode_change(
            ModeState::Remote,
            ModeState::Simulated,
            ModeChangeCause::RemoteFailure {
                operation,
                error: error.to_api_error(),
            },
        );
    }

    fn notify_mode_change(&self, from: ModeState, to: ModeState, cause: ModeChangeCause) {
        if from == to {
            return;
        }
        // No receivers is fine.
        let _ = self
            .events
            .send(OrchestratorEvent::ModeChanged { from, to, cause });
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
