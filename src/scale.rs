//! Deployment scale control
//!
//! Reads and sets the replica count of a named Deployment. Used to suspend a
//! mon/osd Deployment before its debug override is installed and to bring it
//! back afterwards. No retries: a failed update is returned to the caller.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info};

use crate::kube_client::ClusterApi;
use crate::Error;

/// Replica count Kubernetes assumes when `spec.replicas` is unset
const DEFAULT_REPLICAS: i32 = 1;

/// Replica count of a Deployment, applying the Kubernetes default
pub fn deployment_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(DEFAULT_REPLICAS)
}

/// Reads and sets Deployment replica counts
#[derive(Clone)]
pub struct ScaleController {
    api: Arc<dyn ClusterApi>,
}

impl ScaleController {
    /// Create a controller on top of the given API
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    /// Fetch a Deployment, failing with [`Error::NotFound`] if it is absent
    pub async fn get_workload(&self, namespace: &str, name: &str) -> Result<Deployment, Error> {
        self.api.get_deployment(namespace, name).await
    }

    /// Current replica count of a Deployment
    pub async fn replicas(&self, namespace: &str, name: &str) -> Result<i32, Error> {
        let deployment = self.get_workload(namespace, name).await?;
        Ok(deployment_replicas(&deployment))
    }

    /// Set the replica count of an existing Deployment
    ///
    /// Setting the current value is a successful no-op and issues no update.
    pub async fn set_scale(&self, namespace: &str, name: &str, replicas: i32) -> Result<(), Error> {
        let current = self.replicas(namespace, name).await?;
        if current == replicas {
            debug!(namespace, deployment = %name, replicas, "deployment already at desired scale");
            return Ok(());
        }

        self.api
            .set_deployment_replicas(namespace, name, replicas)
            .await?;

        info!(
            namespace,
            deployment = %name,
            from = current,
            to = replicas,
            "scaled deployment"
        );
        Ok(())
    }
}
