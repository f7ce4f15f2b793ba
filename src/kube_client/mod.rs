//! Kubernetes API seam
//!
//! Every cluster mutation made by the debug and validation flows goes through
//! [`ClusterApi`]. The production implementation wraps a kube-rs [`Client`];
//! [`memory::InMemoryCluster`] is a self-contained substrate that honours
//! owner references and foreground deletion, used for lifecycle tests.

pub mod memory;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Kind string used in errors and logs for Deployments
pub const DEPLOYMENT_KIND: &str = "Deployment";
/// Kind string used in errors and logs for ConfigMaps
pub const CONFIG_MAP_KIND: &str = "ConfigMap";

/// How dependents of a deleted object are handled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeletePropagation {
    /// Whatever the API server's default is for the resource
    #[default]
    Default,
    /// Delete dependents first, then the object itself
    Foreground,
}

impl DeletePropagation {
    fn delete_params(self) -> DeleteParams {
        match self {
            Self::Default => DeleteParams::default(),
            Self::Foreground => DeleteParams::foreground(),
        }
    }
}

/// Trait abstracting the namespaced Kubernetes operations used by this tool
///
/// Implementations map an HTTP 404 to [`Error::NotFound`] and a 409 on create
/// to [`Error::AlreadyExists`], so callers can branch on absence without
/// inspecting raw API responses.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a Deployment by name
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, Error>;

    /// Create a Deployment, returning the server's copy
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: Deployment,
    ) -> Result<Deployment, Error>;

    /// Delete a Deployment by name
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Set `spec.replicas` on an existing Deployment
    async fn set_deployment_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error>;

    /// Create a ConfigMap, returning the server's copy (with UID populated)
    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: ConfigMap,
    ) -> Result<ConfigMap, Error>;

    /// Fetch a ConfigMap by name
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, Error>;

    /// Delete a ConfigMap by name with the given propagation
    async fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        propagation: DeletePropagation,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new KubeClusterApi wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn api_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(ae) => Some(ae.code),
        _ => None,
    }
}

fn map_get_error(kind: &str, name: &str, err: kube::Error) -> Error {
    match api_code(&err) {
        Some(404) => Error::not_found(kind, name),
        _ => Error::Kube(err),
    }
}

fn map_create_error(kind: &str, name: &str, err: kube::Error) -> Error {
    match api_code(&err) {
        Some(409) => Error::already_exists(kind, name),
        _ => Error::creation(kind, name, err),
    }
}

fn map_delete_error(kind: &str, name: &str, err: kube::Error) -> Error {
    match api_code(&err) {
        Some(404) => Error::not_found(kind, name),
        _ => Error::deletion(kind, name, err),
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, Error> {
        self.deployments(namespace)
            .get(name)
            .await
            .map_err(|e| map_get_error(DEPLOYMENT_KIND, name, e))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: Deployment,
    ) -> Result<Deployment, Error> {
        let name = deployment.name_any();
        debug!(namespace, deployment = %name, "creating deployment");
        self.deployments(namespace)
            .create(&PostParams::default(), &deployment)
            .await
            .map_err(|e| map_create_error(DEPLOYMENT_KIND, &name, e))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), Error> {
        debug!(namespace, deployment = %name, "deleting deployment");
        self.deployments(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_delete_error(DEPLOYMENT_KIND, name, e))
    }

    async fn set_deployment_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "spec": { "replicas": replicas }
        });

        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| match api_code(&e) {
                Some(404) => Error::not_found(DEPLOYMENT_KIND, name),
                _ => Error::update(DEPLOYMENT_KIND, name, e),
            })
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: ConfigMap,
    ) -> Result<ConfigMap, Error> {
        let name = config_map.name_any();
        debug!(namespace, configmap = %name, "creating configmap");
        self.config_maps(namespace)
            .create(&PostParams::default(), &config_map)
            .await
            .map_err(|e| map_create_error(CONFIG_MAP_KIND, &name, e))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, Error> {
        self.config_maps(namespace)
            .get(name)
            .await
            .map_err(|e| map_get_error(CONFIG_MAP_KIND, name, e))
    }

    async fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        propagation: DeletePropagation,
    ) -> Result<(), Error> {
        debug!(namespace, configmap = %name, ?propagation, "deleting configmap");
        self.config_maps(namespace)
            .delete(name, &propagation.delete_params())
            .await
            .map(|_| ())
            .map_err(|e| map_delete_error(CONFIG_MAP_KIND, name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn when_get_returns_404_it_becomes_not_found() {
        let err = map_get_error(DEPLOYMENT_KIND, "osd0", api_error(404));
        assert!(matches!(err, Error::NotFound { ref name, .. } if name == "osd0"));
    }

    #[test]
    fn when_get_fails_otherwise_the_kube_error_is_kept() {
        let err = map_get_error(DEPLOYMENT_KIND, "osd0", api_error(500));
        assert!(matches!(err, Error::Kube(_)));
    }

    #[test]
    fn when_create_conflicts_it_becomes_already_exists() {
        let err = map_create_error(CONFIG_MAP_KIND, "marker", api_error(409));
        assert!(err.is_conflict());

        let err = map_create_error(CONFIG_MAP_KIND, "marker", api_error(422));
        assert!(matches!(err, Error::Creation { .. }));
    }

    #[test]
    fn when_delete_fails_404_is_distinguishable() {
        assert!(map_delete_error(CONFIG_MAP_KIND, "marker", api_error(404)).is_not_found());
        assert!(matches!(
            map_delete_error(CONFIG_MAP_KIND, "marker", api_error(403)),
            Error::Deletion { .. }
        ));
    }

    #[test]
    fn foreground_propagation_sets_the_policy() {
        let params = DeletePropagation::Foreground.delete_params();
        assert!(matches!(
            params.propagation_policy,
            Some(kube::api::PropagationPolicy::Foreground)
        ));
        assert!(DeletePropagation::Default
            .delete_params()
            .propagation_policy
            .is_none());
    }
}
