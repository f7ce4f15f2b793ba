//! Debug mode for mon and osd Deployments
//!
//! A Deployment is either running normally or has been suspended (scaled to
//! zero) with a `-debug` replacement running in its place. The state lives in
//! the cluster: it is `DebugActive` exactly when the derived debug Deployment
//! exists. [`DebugTarget`] is the only place that knows the naming convention.
//!
//! ```text
//!            start (create debug, scale original to 0)
//!   Normal ─────────────────────────────────────────────▶ DebugActive
//!          ◀─────────────────────────────────────────────
//!            stop (delete debug, scale original to 1)
//! ```
//!
//! Both transitions are sequences of independent API calls. A failure midway
//! is returned as-is and nothing is rolled back.

mod deployment;

pub use deployment::{debug_deployment_for, DEBUG_COMMAND};

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use tracing::{info, warn};

use crate::kube_client::ClusterApi;
use crate::scale::ScaleController;
use crate::{Error, DEBUG_SUFFIX};

/// Replica count the original Deployment is restored to when leaving debug mode
pub const RESTORED_REPLICAS: i32 = 1;

/// Debug mode state of a Deployment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugState {
    /// The original Deployment is in charge; no debug Deployment exists
    Normal,
    /// A debug Deployment exists in place of the original
    DebugActive,
}

impl fmt::Display for DebugState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::DebugActive => write!(f, "DebugActive"),
        }
    }
}

/// A Deployment identified by its base (non-debug) name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugTarget {
    namespace: String,
    base_name: String,
}

impl DebugTarget {
    /// Build a target from either the original or the debug Deployment name
    ///
    /// A trailing `-debug` is stripped exactly once, so `osd0` and
    /// `osd0-debug` identify the same target.
    pub fn new(namespace: impl Into<String>, name: &str) -> Self {
        let base_name = name.strip_suffix(DEBUG_SUFFIX).unwrap_or(name);
        Self {
            namespace: namespace.into(),
            base_name: base_name.to_string(),
        }
    }

    /// Namespace of both Deployments
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the original Deployment
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Name of the debug Deployment
    pub fn debug_name(&self) -> String {
        format!("{}{}", self.base_name, DEBUG_SUFFIX)
    }
}

/// Drives Deployments in and out of debug mode
#[derive(Clone)]
pub struct DebugManager {
    api: Arc<dyn ClusterApi>,
    scaler: ScaleController,
}

impl DebugManager {
    /// Create a manager on top of the given API
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        let scaler = ScaleController::new(api.clone());
        Self { api, scaler }
    }

    /// Observe the current debug state of a target
    pub async fn state(&self, target: &DebugTarget) -> Result<DebugState, Error> {
        match self
            .api
            .get_deployment(target.namespace(), &target.debug_name())
            .await
        {
            Ok(_) => Ok(DebugState::DebugActive),
            Err(e) if e.is_not_found() => Ok(DebugState::Normal),
            Err(e) => Err(e),
        }
    }

    /// Fetch the original Deployment of a target
    pub async fn original(&self, target: &DebugTarget) -> Result<Deployment, Error> {
        self.scaler
            .get_workload(target.namespace(), target.base_name())
            .await
    }

    /// Enter debug mode: `Normal -> DebugActive`
    ///
    /// Requires the original Deployment to exist and no debug Deployment to be
    /// present. `debug_deployment` is installed under the target's debug name,
    /// then the original is scaled to zero.
    pub async fn start(
        &self,
        target: &DebugTarget,
        mut debug_deployment: Deployment,
    ) -> Result<(), Error> {
        self.original(target).await?;

        if self.state(target).await? == DebugState::DebugActive {
            return Err(Error::AlreadyInDebug {
                name: target.base_name().to_string(),
            });
        }

        let debug_name = target.debug_name();
        debug_deployment.metadata.name = Some(debug_name.clone());
        debug_deployment.metadata.namespace = Some(target.namespace().to_string());

        info!(
            namespace = target.namespace(),
            deployment = target.base_name(),
            debug_deployment = %debug_name,
            "starting debug deployment"
        );
        self.api
            .create_deployment(target.namespace(), debug_deployment)
            .await?;

        self.scaler
            .set_scale(target.namespace(), target.base_name(), 0)
            .await?;

        info!(
            namespace = target.namespace(),
            deployment = target.base_name(),
            "deployment is in debug mode"
        );
        Ok(())
    }

    /// Exit debug mode: `DebugActive -> Normal`
    ///
    /// Fails without mutating anything if the debug Deployment is absent. A
    /// not-found on the delete itself is tolerated. The original is always
    /// restored to [`RESTORED_REPLICAS`], not to its pre-debug count.
    pub async fn stop(&self, target: &DebugTarget) -> Result<(), Error> {
        let debug_name = target.debug_name();

        if let Err(e) = self
            .api
            .get_deployment(target.namespace(), &debug_name)
            .await
        {
            return Err(Error::MissingDebugDeployment {
                name: debug_name,
                source: Box::new(e),
            });
        }

        info!(
            namespace = target.namespace(),
            debug_deployment = %debug_name,
            "removing debug mode from deployment"
        );
        match self
            .api
            .delete_deployment(target.namespace(), &debug_name)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!(debug_deployment = %debug_name, "debug deployment already deleted");
            }
            Err(e) => return Err(e),
        }

        self.scaler
            .set_scale(target.namespace(), target.base_name(), RESTORED_REPLICAS)
            .await?;

        info!(
            namespace = target.namespace(),
            deployment = target.base_name(),
            "successfully deleted debug deployment and restored deployment"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube_client::memory::{ApiCall, InMemoryCluster, Operation};
    use crate::kube_client::MockClusterApi;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use mockall::predicate::eq;
    use mockall::Sequence;

    const NS: &str = "rook-ceph";

    fn deployment(name: &str, replicas: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn cluster_with(deployments: &[(&str, i32)]) -> Arc<InMemoryCluster> {
        let cluster = deployments
            .iter()
            .fold(InMemoryCluster::new(), |c, (name, replicas)| {
                c.with_deployment(NS, deployment(name, *replicas))
            });
        Arc::new(cluster)
    }

    // ==========================================================================
    // Story: Name translation
    // ==========================================================================

    #[test]
    fn base_and_debug_names_identify_the_same_target() {
        let a = DebugTarget::new(NS, "osd0");
        let b = DebugTarget::new(NS, "osd0-debug");
        assert_eq!(a, b);
        assert_eq!(a.base_name(), "osd0");
        assert_eq!(a.debug_name(), "osd0-debug");
    }

    #[test]
    fn debug_suffix_is_stripped_exactly_once() {
        let target = DebugTarget::new(NS, "osd0-debug-debug");
        assert_eq!(target.base_name(), "osd0-debug");
        assert_eq!(target.debug_name(), "osd0-debug-debug");
    }

    #[test]
    fn names_containing_debug_elsewhere_are_kept() {
        let target = DebugTarget::new(NS, "debug-mon-a");
        assert_eq!(target.base_name(), "debug-mon-a");
        assert_eq!(target.debug_name(), "debug-mon-a-debug");
    }

    // ==========================================================================
    // Story: Entering debug mode
    // ==========================================================================

    #[tokio::test]
    async fn start_installs_debug_and_suspends_original() {
        let cluster = cluster_with(&[("rook-ceph-osd-0", 1)]);
        let manager = DebugManager::new(cluster.clone());
        let target = DebugTarget::new(NS, "rook-ceph-osd-0");

        assert_eq!(manager.state(&target).await.unwrap(), DebugState::Normal);
        manager
            .start(&target, deployment("anything", 1))
            .await
            .unwrap();

        assert_eq!(manager.state(&target).await.unwrap(), DebugState::DebugActive);
        assert!(cluster.deployment(NS, "rook-ceph-osd-0-debug").is_some());
        assert_eq!(cluster.replicas(NS, "rook-ceph-osd-0"), Some(0));
    }

    #[tokio::test]
    async fn start_without_original_is_fatal_and_creates_nothing() {
        let cluster = cluster_with(&[]);
        let manager = DebugManager::new(cluster.clone());
        let target = DebugTarget::new(NS, "rook-ceph-mon-a");

        let err = manager
            .start(&target, deployment("x", 1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(cluster.calls().iter().all(|c| !c.is_mutation()));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let cluster = cluster_with(&[("rook-ceph-mon-a", 1)]);
        let manager = DebugManager::new(cluster.clone());
        let target = DebugTarget::new(NS, "rook-ceph-mon-a");

        manager.start(&target, deployment("x", 1)).await.unwrap();
        let err = manager
            .start(&target, deployment("x", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyInDebug { ref name } if name == "rook-ceph-mon-a"));
    }

    #[tokio::test]
    async fn start_failure_after_create_leaves_partial_state() {
        let cluster = cluster_with(&[("rook-ceph-osd-1", 1)]);
        cluster.fail_on(Operation::Update, "rook-ceph-osd-1");
        let manager = DebugManager::new(cluster.clone());
        let target = DebugTarget::new(NS, "rook-ceph-osd-1");

        let err = manager
            .start(&target, deployment("x", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Update { .. }));
        // No rollback: the debug deployment stays and the original keeps running
        assert!(cluster.deployment(NS, "rook-ceph-osd-1-debug").is_some());
        assert_eq!(cluster.replicas(NS, "rook-ceph-osd-1"), Some(1));
    }

    // ==========================================================================
    // Story: Exiting debug mode
    // ==========================================================================

    #[tokio::test]
    async fn stop_without_debug_deployment_is_fatal_and_mutates_nothing() {
        let cluster = cluster_with(&[("rook-ceph-osd-0", 0)]);
        let manager = DebugManager::new(cluster.clone());

        let err = manager
            .stop(&DebugTarget::new(NS, "rook-ceph-osd-0"))
            .await
            .unwrap_err();

        assert!(err
            .to_string()
            .starts_with("Missing mon or osd debug deployment name rook-ceph-osd-0-debug"));
        assert!(cluster.calls().iter().all(|c| !c.is_mutation()));
        assert_eq!(cluster.replicas(NS, "rook-ceph-osd-0"), Some(0));
    }

    #[tokio::test]
    async fn stop_with_base_or_debug_name_issues_identical_calls() {
        let mut recorded = Vec::new();
        for name in ["osd0", "osd0-debug"] {
            let cluster = cluster_with(&[("osd0", 0), ("osd0-debug", 1)]);
            DebugManager::new(cluster.clone())
                .stop(&DebugTarget::new(NS, name))
                .await
                .unwrap();
            recorded.push(cluster.calls());
        }

        assert_eq!(recorded[0], recorded[1]);
        assert!(recorded[0].contains(&ApiCall::DeleteDeployment {
            namespace: NS.to_string(),
            name: "osd0-debug".to_string(),
        }));
        assert!(recorded[0].contains(&ApiCall::SetReplicas {
            namespace: NS.to_string(),
            name: "osd0".to_string(),
            replicas: 1,
        }));
    }

    #[tokio::test]
    async fn stop_aborts_before_restore_when_delete_fails() {
        let cluster = cluster_with(&[("osd0", 0), ("osd0-debug", 1)]);
        cluster.fail_on(Operation::Delete, "osd0-debug");
        let manager = DebugManager::new(cluster.clone());

        let err = manager
            .stop(&DebugTarget::new(NS, "osd0"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Deletion { .. }));
        assert_eq!(cluster.replicas(NS, "osd0"), Some(0));
    }

    /// The debug deployment can still be observed while its delete reports
    /// not-found (already removed by someone else). Both calls succeed.
    #[tokio::test]
    async fn stop_twice_tolerates_not_found_on_delete() {
        let mut api = MockClusterApi::new();
        let mut seq = Sequence::new();
        for _ in 0..2 {
            api.expect_get_deployment()
                .with(eq(NS), eq("osd0-debug"))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, name| Ok(deployment(name, 1)));
            api.expect_delete_deployment()
                .with(eq(NS), eq("osd0-debug"))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, name| Err(Error::not_found("Deployment", name)));
            api.expect_get_deployment()
                .with(eq(NS), eq("osd0"))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, name| Ok(deployment(name, 0)));
            api.expect_set_deployment_replicas()
                .with(eq(NS), eq("osd0"), eq(1))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
        }

        let manager = DebugManager::new(Arc::new(api));
        let target = DebugTarget::new(NS, "osd0");
        manager.stop(&target).await.unwrap();
        manager.stop(&target).await.unwrap();
    }

    // ==========================================================================
    // Story: Round trip
    // ==========================================================================

    #[tokio::test]
    async fn enter_then_exit_restores_exactly_one_replica() {
        for starting_replicas in [0, 1, 3] {
            let cluster = cluster_with(&[("rook-ceph-mon-b", starting_replicas)]);
            let manager = DebugManager::new(cluster.clone());
            let target = DebugTarget::new(NS, "rook-ceph-mon-b");

            manager.start(&target, deployment("x", 1)).await.unwrap();
            manager.stop(&target).await.unwrap();

            assert_eq!(cluster.replicas(NS, "rook-ceph-mon-b"), Some(1));
            assert!(cluster.deployment(NS, "rook-ceph-mon-b-debug").is_none());
            assert_eq!(manager.state(&target).await.unwrap(), DebugState::Normal);
        }
    }
}
