//! Debug Deployment derivation
//!
//! Builds the replacement Deployment installed while a mon or osd is in debug
//! mode: same pod spec as the original, but every container just sleeps so an
//! operator can exec in and run ceph tooling against the daemon's data.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::kube_client::DEPLOYMENT_KIND;
use crate::{Error, DO_NOT_RECONCILE_LABEL, LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE};

/// Command the debug containers run instead of the daemon
pub const DEBUG_COMMAND: [&str; 2] = ["sleep", "infinity"];

/// Derive the debug Deployment for `original`
///
/// The result carries no server-populated metadata, runs one replica, has all
/// probes removed and is labelled so the Rook operator does not reconcile it.
/// `alternate_image` replaces every container image when given.
pub fn debug_deployment_for(
    original: &Deployment,
    debug_name: &str,
    alternate_image: Option<&str>,
) -> Result<Deployment, Error> {
    let original_spec = original.spec.as_ref().ok_or_else(|| {
        Error::creation(
            DEPLOYMENT_KIND,
            debug_name,
            format!("deployment {} has no spec to copy", original.name_any()),
        )
    })?;

    let mut labels: BTreeMap<String, String> = original.labels().clone();
    labels.insert(DO_NOT_RECONCILE_LABEL.to_string(), "true".to_string());
    labels.insert(
        LABEL_MANAGED_BY.to_string(),
        LABEL_MANAGED_BY_VALUE.to_string(),
    );

    let mut pod_spec = original_spec.template.spec.clone().unwrap_or_default();
    for container in pod_spec.containers.iter_mut() {
        container.command = Some(DEBUG_COMMAND.iter().map(|s| s.to_string()).collect());
        container.args = Some(Vec::new());
        container.liveness_probe = None;
        container.readiness_probe = None;
        container.startup_probe = None;
        if let Some(image) = alternate_image {
            container.image = Some(image.to_string());
        }
    }

    let mut template_labels = original_spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    template_labels.extend(labels.clone());

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(debug_name.to_string()),
            namespace: original.namespace(),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(template_labels),
                    annotations: original_spec
                        .template
                        .metadata
                        .as_ref()
                        .and_then(|m| m.annotations.clone()),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            strategy: original_spec.strategy.clone(),
            ..Default::default()
        }),
        status: None,
    })
}
