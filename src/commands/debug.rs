//! `kubectl-rook-ceph debug` - mon/osd debug mode

use std::sync::Arc;

use clap::{Args, Subcommand};
use tracing::info;

use crate::debug::{debug_deployment_for, DebugManager, DebugTarget};
use crate::kube_client::ClusterApi;
use crate::Result;

/// Debug mode arguments
#[derive(Args, Debug)]
pub struct DebugArgs {
    /// Debug mode action
    #[command(subcommand)]
    pub command: DebugCommand,
}

/// Debug mode actions
#[derive(Subcommand, Debug)]
pub enum DebugCommand {
    /// Stop a mon or osd deployment and run a sleeping copy of it instead
    Start {
        /// Name of the mon or osd deployment
        deployment: String,

        /// Image to run in the debug deployment instead of the original
        #[arg(long)]
        alternate_image: Option<String>,
    },

    /// Remove the debug deployment and restore the original
    Stop {
        /// Name of the mon or osd deployment (with or without `-debug`)
        deployment: String,
    },
}

/// Run a debug command
pub async fn run(api: Arc<dyn ClusterApi>, namespace: &str, args: DebugArgs) -> Result<()> {
    let manager = DebugManager::new(api);

    match args.command {
        DebugCommand::Start {
            deployment,
            alternate_image,
        } => {
            let target = DebugTarget::new(namespace, &deployment);
            let original = manager.original(&target).await?;
            let debug_deployment =
                debug_deployment_for(&original, &target.debug_name(), alternate_image.as_deref())?;
            manager.start(&target, debug_deployment).await?;
            println!(
                "Deployment '{}' is in debug mode as '{}'.",
                target.base_name(),
                target.debug_name()
            );
        }
        DebugCommand::Stop { deployment } => {
            let target = DebugTarget::new(namespace, &deployment);
            manager.stop(&target).await?;
            info!(deployment = target.base_name(), "debug mode removed");
            println!("Deployment '{}' restored.", target.base_name());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube_client::memory::InMemoryCluster;
    use crate::Error;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const NS: &str = "rook-ceph";

    fn osd(replicas: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("rook-ceph-osd-0".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "osd".to_string(),
                            image: Some("quay.io/ceph/ceph:v18".to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn start(name: &str, image: Option<&str>) -> DebugArgs {
        DebugArgs {
            command: DebugCommand::Start {
                deployment: name.to_string(),
                alternate_image: image.map(str::to_string),
            },
        }
    }

    fn stop(name: &str) -> DebugArgs {
        DebugArgs {
            command: DebugCommand::Stop {
                deployment: name.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn start_installs_a_derived_debug_deployment() {
        let cluster = Arc::new(InMemoryCluster::new().with_deployment(NS, osd(1)));

        run(cluster.clone(), NS, start("rook-ceph-osd-0", Some("ceph:debug")))
            .await
            .unwrap();

        let debug = cluster.deployment(NS, "rook-ceph-osd-0-debug").unwrap();
        let container = &debug.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("ceph:debug"));
        assert_eq!(
            container.command.as_deref(),
            Some(&["sleep".to_string(), "infinity".to_string()][..])
        );
        assert_eq!(cluster.replicas(NS, "rook-ceph-osd-0"), Some(0));
    }

    #[tokio::test]
    async fn stop_accepts_the_debug_name() {
        let cluster = Arc::new(InMemoryCluster::new().with_deployment(NS, osd(3)));
        run(cluster.clone(), NS, start("rook-ceph-osd-0", None))
            .await
            .unwrap();

        run(cluster.clone(), NS, stop("rook-ceph-osd-0-debug"))
            .await
            .unwrap();

        assert!(cluster.deployment(NS, "rook-ceph-osd-0-debug").is_none());
        assert_eq!(cluster.replicas(NS, "rook-ceph-osd-0"), Some(1));
    }

    #[tokio::test]
    async fn start_of_unknown_deployment_fails() {
        let cluster = Arc::new(InMemoryCluster::new());
        let err = run(cluster, NS, start("rook-ceph-mon-z", None))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn stop_without_debug_deployment_reports_the_missing_name() {
        let cluster = Arc::new(InMemoryCluster::new().with_deployment(NS, osd(1)));
        let err = run(cluster, NS, stop("rook-ceph-osd-0")).await.unwrap_err();
        assert!(matches!(err, Error::MissingDebugDeployment { .. }));
        assert!(err
            .to_string()
            .starts_with("Missing mon or osd debug deployment name rook-ceph-osd-0-debug"));
    }
}
