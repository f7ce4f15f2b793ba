//! Multus validation runs
//!
//! A validation run creates a small set of cluster resources that all hang off
//! one owner ConfigMap, lets them run for a while, and then deletes the owner
//! with foreground propagation so the garbage collector removes everything
//! else. The owner name is fixed per namespace, so only one run per namespace
//! can exist at a time; a second run is rejected while the first one's owner
//! is still present.

mod owner;
mod run;
mod templates;

pub use owner::{Dependent, OwnerGroup, TeardownOutcome};
pub use run::{ObservationReport, ObservationWindow, RunOutcome, ValidationTest};
pub use templates::ManifestTemplates;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Name of the ConfigMap that owns every resource of a validation run
pub const OWNER_CONFIG_MAP_NAME: &str = "multus-validation-test-config";

/// Key in the owner ConfigMap holding the serialized run configuration
pub const OWNER_CONFIG_KEY: &str = "config";

/// Name shared by the web server Deployment and its nginx ConfigMap
pub const WEB_SERVER_NAME: &str = "multus-validation-test-web-server";

/// Default image for the validation web server
pub const DEFAULT_WEB_SERVER_IMAGE: &str = "quay.io/nginx/nginx-unprivileged:stable-alpine";

/// Configuration snapshot of a validation run
///
/// Serialized into the owner ConfigMap and used as the template context for
/// the run's manifests.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    /// Namespace the run's resources are created in
    pub namespace: String,
    /// NetworkAttachmentDefinition used as the Ceph public network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_network: Option<String>,
    /// NetworkAttachmentDefinition used as the Ceph cluster network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_network: Option<String>,
    /// Web server image
    pub web_server_image: String,
}

impl ValidationConfig {
    /// Create a config for the given namespace with no multus networks
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            public_network: None,
            cluster_network: None,
            web_server_image: DEFAULT_WEB_SERVER_IMAGE.to_string(),
        }
    }

    /// Set the public network
    pub fn with_public_network(mut self, network: impl Into<String>) -> Self {
        self.public_network = Some(network.into());
        self
    }

    /// Set the cluster network
    pub fn with_cluster_network(mut self, network: impl Into<String>) -> Self {
        self.cluster_network = Some(network.into());
        self
    }

    /// Set the web server image
    pub fn with_web_server_image(mut self, image: impl Into<String>) -> Self {
        self.web_server_image = image.into();
        self
    }

    /// Check that the configured networks are plain `[namespace/]name`
    /// references that can be placed in the pod annotation as-is
    pub fn validate(&self) -> Result<(), Error> {
        for (flag, network) in [
            ("public network", &self.public_network),
            ("cluster network", &self.cluster_network),
        ] {
            let Some(network) = network else { continue };
            let valid = network
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '/'));
            if !valid {
                return Err(Error::config(format!(
                    "{} {:?} is not a valid NetworkAttachmentDefinition reference",
                    flag, network
                )));
            }
        }
        Ok(())
    }

    /// Value for the `k8s.v1.cni.cncf.io/networks` pod annotation
    ///
    /// Empty when no multus network is configured.
    pub fn network_selection(&self) -> String {
        [&self.public_network, &self.cluster_network]
            .into_iter()
            .flatten()
            .filter(|n| !n.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }
}
