//! Owner-marker resource groups
//!
//! One immutable ConfigMap acts as the owner of every resource a validation
//! run creates. Dependents carry a single owner reference to it with
//! `blockOwnerDeletion` set, so deleting the owner with foreground propagation
//! removes the whole group before the delete completes.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use serde::Serialize;
use tracing::{debug, error, info};

use super::{OWNER_CONFIG_KEY, OWNER_CONFIG_MAP_NAME};
use crate::kube_client::{ClusterApi, DeletePropagation, CONFIG_MAP_KIND, DEPLOYMENT_KIND};
use crate::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE};

/// A resource created as part of a group
#[derive(Clone, Debug)]
pub enum Dependent {
    /// A ConfigMap dependent
    ConfigMap(ConfigMap),
    /// A Deployment dependent
    Deployment(Deployment),
}

impl Dependent {
    /// Resource kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigMap(_) => CONFIG_MAP_KIND,
            Self::Deployment(_) => DEPLOYMENT_KIND,
        }
    }

    /// Resource name
    pub fn name(&self) -> String {
        match self {
            Self::ConfigMap(c) => c.name_any(),
            Self::Deployment(d) => d.name_any(),
        }
    }

    /// Owner references currently set on the resource
    pub fn owner_references(&self) -> &[OwnerReference] {
        match self {
            Self::ConfigMap(c) => c.owner_references(),
            Self::Deployment(d) => d.owner_references(),
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::ConfigMap(c) => &mut c.metadata,
            Self::Deployment(d) => &mut d.metadata,
        }
    }

    /// Replace the resource's owner references with `owner`
    fn stamp_owner(&mut self, owner: &OwnerReference) {
        self.metadata_mut().owner_references = Some(vec![owner.clone()]);
    }
}

/// Result of tearing a group down
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// The owner was deleted along with its dependents
    Deleted,
    /// The owner did not exist
    AlreadyClean,
    /// Deletion failed; the operator has been told to delete `owner` manually
    Failed {
        /// Name of the owner ConfigMap left behind
        owner: String,
    },
}

/// Resource group rooted at the owner ConfigMap in one namespace
#[derive(Clone)]
pub struct OwnerGroup {
    api: Arc<dyn ClusterApi>,
    namespace: String,
}

impl OwnerGroup {
    /// Create a group manager for the given namespace
    pub fn new(api: Arc<dyn ClusterApi>, namespace: impl Into<String>) -> Self {
        Self {
            api,
            namespace: namespace.into(),
        }
    }

    /// Namespace of the group
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the owner ConfigMap
    pub fn owner_name(&self) -> &'static str {
        OWNER_CONFIG_MAP_NAME
    }

    /// Create the owner ConfigMap holding a JSON snapshot of `run_config`
    ///
    /// Fails with [`Error::AlreadyExists`] if an owner is already present in
    /// the namespace, which means another run has not been cleaned up yet.
    pub async fn create_owner<T>(&self, run_config: &T) -> Result<OwnerReference, Error>
    where
        T: Serialize + Sync,
    {
        let snapshot = serde_json::to_string(run_config).map_err(|e| {
            Error::serialization(format!(
                "failed to render validation test config to a string: {}",
                e
            ))
        })?;

        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(OWNER_CONFIG_MAP_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    LABEL_MANAGED_BY_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            immutable: Some(true),
            data: Some(BTreeMap::from([(OWNER_CONFIG_KEY.to_string(), snapshot)])),
            ..Default::default()
        };

        let created = self
            .api
            .create_config_map(&self.namespace, config_map)
            .await?;

        let uid = created.uid().ok_or_else(|| {
            Error::creation(
                CONFIG_MAP_KIND,
                OWNER_CONFIG_MAP_NAME,
                "API server returned no UID",
            )
        })?;

        info!(
            namespace = %self.namespace,
            configmap = OWNER_CONFIG_MAP_NAME,
            "created validation test owner"
        );

        Ok(OwnerReference {
            api_version: "v1".to_string(),
            kind: CONFIG_MAP_KIND.to_string(),
            name: created.name_any(),
            uid,
            block_owner_deletion: Some(true),
            controller: None,
        })
    }

    /// Create `dependent` with `owner` as its only owner reference
    pub async fn attach_dependent(
        &self,
        mut dependent: Dependent,
        owner: &OwnerReference,
    ) -> Result<Dependent, Error> {
        dependent.stamp_owner(owner);
        debug!(
            kind = dependent.kind(),
            name = %dependent.name(),
            owner = %owner.name,
            "creating dependent resource"
        );

        let created = match dependent {
            Dependent::ConfigMap(c) => Dependent::ConfigMap(
                self.api.create_config_map(&self.namespace, c).await?,
            ),
            Dependent::Deployment(d) => Dependent::Deployment(
                self.api.create_deployment(&self.namespace, d).await?,
            ),
        };
        Ok(created)
    }

    /// Delete the owner with foreground propagation
    ///
    /// Never fails: a missing owner means there is nothing to clean up, and
    /// any other failure is reported with manual cleanup instructions.
    pub async fn teardown(&self) -> TeardownOutcome {
        info!(
            "please wait for multus validation test resources to be cleaned up, \
             or manually delete owner configmap {:?}",
            OWNER_CONFIG_MAP_NAME
        );

        match self
            .api
            .delete_config_map(
                &self.namespace,
                OWNER_CONFIG_MAP_NAME,
                DeletePropagation::Foreground,
            )
            .await
        {
            Ok(()) => {
                info!(namespace = %self.namespace, "multus validation test resources cleaned up");
                TeardownOutcome::Deleted
            }
            Err(e) if e.is_not_found() => {
                debug!(namespace = %self.namespace, "validation test owner already gone");
                TeardownOutcome::AlreadyClean
            }
            Err(e) => {
                error!(
                    namespace = %self.namespace,
                    error = %e,
                    "failed to clean up multus validation test resources; \
                     please manually delete owner configmap {:?} to perform cleanup",
                    OWNER_CONFIG_MAP_NAME
                );
                TeardownOutcome::Failed {
                    owner: OWNER_CONFIG_MAP_NAME.to_string(),
                }
            }
        }
    }
}
