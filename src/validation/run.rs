//! Validation run orchestration
//!
//! Sequence: create owner → attach dependents → observation window → teardown.
//! Once the owner exists, teardown runs on every exit path. It is tied to a
//! cleanup guard rather than the run's cancellation token, so an interrupted
//! run still issues the owner's deletion.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::owner::{Dependent, OwnerGroup, TeardownOutcome};
use super::templates::ManifestTemplates;
use super::{ValidationConfig, WEB_SERVER_NAME};
use crate::kube_client::ClusterApi;
use crate::Error;

/// Default length of the observation window
pub const DEFAULT_OBSERVATION: Duration = Duration::from_secs(30);

/// Default interval between web server health checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Timing of the observation phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObservationWindow {
    /// How long the run observes its resources before tearing down
    pub duration: Duration,
    /// Time between web server checks
    pub poll_interval: Duration,
}

impl Default for ObservationWindow {
    fn default() -> Self {
        Self {
            duration: DEFAULT_OBSERVATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ObservationWindow {
    /// Window of the given length with the default poll interval
    pub fn of(duration: Duration) -> Self {
        Self {
            duration,
            ..Default::default()
        }
    }
}

/// What was seen during the observation window
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservationReport {
    /// Whether the web server reported a ready replica at any check
    pub web_server_ready: bool,
    /// Number of health checks performed
    pub checks: u32,
}

/// How a run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The observation window elapsed
    Completed(ObservationReport),
    /// The run was cancelled before the window elapsed
    Cancelled(ObservationReport),
}

impl RunOutcome {
    /// The observation report, regardless of how the run ended
    pub fn report(&self) -> &ObservationReport {
        match self {
            Self::Completed(r) | Self::Cancelled(r) => r,
        }
    }
}

/// Releases a resource group exactly once
///
/// Call [`CleanupGuard::release`] on every path that still has an executor.
/// If the guard is dropped unreleased (the run future itself was dropped), the
/// teardown is spawned onto the current Tokio runtime instead.
struct CleanupGuard {
    group: Option<OwnerGroup>,
}

impl CleanupGuard {
    fn new(group: OwnerGroup) -> Self {
        Self { group: Some(group) }
    }

    /// Tear the group down inline
    ///
    /// The guard stays armed until the teardown returns, so dropping this
    /// future midway still hands the teardown to `Drop`.
    async fn release(mut self) -> Option<TeardownOutcome> {
        let group = self.group.clone()?;
        let outcome = group.teardown().await;
        self.group = None;
        Some(outcome)
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(group) = self.group.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("validation run dropped before cleanup, scheduling teardown");
                handle.spawn(async move {
                    group.teardown().await;
                });
            }
            Err(_) => {
                error!(
                    namespace = group.namespace(),
                    "no runtime to clean up multus validation test resources; \
                     please manually delete owner configmap {:?}",
                    group.owner_name()
                );
            }
        }
    }
}

/// A multus validation run
pub struct ValidationTest {
    api: Arc<dyn ClusterApi>,
    config: ValidationConfig,
    window: ObservationWindow,
    templates: ManifestTemplates,
}

impl ValidationTest {
    /// Create a run with the default observation window
    ///
    /// Fails with [`Error::Config`] if a network reference is malformed.
    pub fn new(api: Arc<dyn ClusterApi>, config: ValidationConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            api,
            config,
            window: ObservationWindow::default(),
            templates: ManifestTemplates::new()?,
        })
    }

    /// Override the observation window
    pub fn with_window(mut self, window: ObservationWindow) -> Self {
        self.window = window;
        self
    }

    /// The run's configuration
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Execute the run
    ///
    /// `cancel` ends the dependent-creation and observation phases early; it
    /// does not affect teardown. Owner creation is not cancellable, since
    /// abandoning it midway could leave an owner nobody knows to delete.
    ///
    /// If the owner already exists it belongs to another run, so the run
    /// fails without touching it. Any other owner creation failure may still
    /// have left the owner on the server, so teardown runs before the error
    /// is returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunOutcome, Error> {
        info!(
            namespace = %self.config.namespace,
            public_network = self.config.public_network.as_deref().unwrap_or(""),
            cluster_network = self.config.cluster_network.as_deref().unwrap_or(""),
            "starting multus validation test"
        );

        let group = OwnerGroup::new(self.api.clone(), self.config.namespace.clone());
        let owner = match group.create_owner(&self.config).await {
            Ok(owner) => owner,
            Err(e) => {
                error!(error = %e, "failed to create validation test config object");
                if !e.is_conflict() && !matches!(e, Error::Serialization(_)) {
                    group.teardown().await;
                }
                return Err(e);
            }
        };

        let guard = CleanupGuard::new(group.clone());
        let result = self.start_and_observe(&group, &owner, &cancel).await;
        guard.release().await;
        result
    }

    async fn start_and_observe(
        &self,
        group: &OwnerGroup,
        owner: &OwnerReference,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, Error> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("multus validation test cancelled while starting resources");
                return Ok(RunOutcome::Cancelled(ObservationReport::default()));
            }
            started = self.start_web_server(group, owner) => {
                if let Err(e) = started {
                    error!(error = %e, "failed to start multus validation test");
                    return Err(e);
                }
            }
        }

        Ok(self.observe(cancel).await)
    }

    async fn start_web_server(
        &self,
        group: &OwnerGroup,
        owner: &OwnerReference,
    ) -> Result<(), Error> {
        let deployment = self.templates.web_server_deployment(&self.config)?;
        let config_map = self.templates.web_server_config(&self.config)?;

        group
            .attach_dependent(Dependent::ConfigMap(config_map), owner)
            .await?;
        group
            .attach_dependent(Dependent::Deployment(deployment), owner)
            .await?;

        info!(deployment = WEB_SERVER_NAME, "started validation web server");
        Ok(())
    }

    async fn observe(&self, cancel: &CancellationToken) -> RunOutcome {
        let deadline = Instant::now() + self.window.duration;
        let mut report = ObservationReport::default();

        loop {
            let ready_replicas = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("multus validation test cancelled");
                    return RunOutcome::Cancelled(report);
                }
                ready = self.web_server_ready_replicas() => ready,
            };

            report.checks += 1;
            if ready_replicas > 0 && !report.web_server_ready {
                info!(ready_replicas, "validation web server is ready");
            }
            report.web_server_ready |= ready_replicas > 0;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                info!(
                    web_server_ready = report.web_server_ready,
                    checks = report.checks,
                    "multus validation test observation window elapsed"
                );
                return RunOutcome::Completed(report);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("multus validation test cancelled");
                    return RunOutcome::Cancelled(report);
                }
                _ = tokio::time::sleep(remaining.min(self.window.poll_interval)) => {}
            }
        }
    }

    async fn web_server_ready_replicas(&self) -> i32 {
        match self
            .api
            .get_deployment(&self.config.namespace, WEB_SERVER_NAME)
            .await
        {
            Ok(deployment) => deployment
                .status
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
            Err(e) => {
                debug!(error = %e, "validation web server not observable yet");
                0
            }
        }
    }
}
