//! CLI commands

use std::path::Path;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use crate::config::{create_client, resolve_kubeconfig};
use crate::kube_client::{ClusterApi, KubeClusterApi};
use crate::{Result, DEFAULT_NAMESPACE};

pub mod debug;
pub mod multus;

/// kubectl-rook-ceph - operate Rook/Ceph storage clusters
#[derive(Parser, Debug)]
#[command(name = "kubectl-rook-ceph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Connection settings shared by every command
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Namespace of the CephCluster
    #[arg(
        long,
        short = 'n',
        global = true,
        env = "ROOK_CLUSTER_NAMESPACE",
        default_value = DEFAULT_NAMESPACE
    )]
    pub namespace: String,

    /// Path to kubeconfig file (overrides ROOK_KUBECONFIG)
    #[arg(long, global = true)]
    pub kubeconfig: Option<String>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    pub context: Option<String>,
}

impl GlobalArgs {
    /// Build the cluster API from the resolved kubeconfig
    pub async fn cluster_api(&self) -> Result<Arc<dyn ClusterApi>> {
        let kubeconfig = resolve_kubeconfig(self.kubeconfig.as_deref());
        let client = create_client(
            kubeconfig.as_deref().map(Path::new),
            self.context.as_deref(),
        )
        .await?;
        Ok(Arc::new(KubeClusterApi::new(client)))
    }
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Put mon or osd deployments into debug mode and back
    Debug(debug::DebugArgs),

    /// Multus network tooling
    Multus(multus::MultusArgs),
}

impl Cli {
    /// Run the selected command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Debug(args) => {
                let api = self.global.cluster_api().await?;
                debug::run(api, &self.global.namespace, args).await
            }
            Commands::Multus(args) => {
                let api = self.global.cluster_api().await?;
                multus::run(api, &self.global.namespace, args).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn namespace_defaults_to_rook_ceph_and_reads_env() {
        use clap::CommandFactory;
        let cmd = Cli::command();
        let namespace = cmd
            .get_arguments()
            .find(|a| a.get_id() == "namespace")
            .expect("namespace flag is defined");

        let defaults: Vec<String> = namespace
            .get_default_values()
            .iter()
            .map(|v| v.to_string_lossy().into_owned())
            .collect();
        assert_eq!(defaults, vec![DEFAULT_NAMESPACE.to_string()]);
        assert_eq!(
            namespace.get_env(),
            Some(std::ffi::OsStr::new("ROOK_CLUSTER_NAMESPACE"))
        );
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "kubectl-rook-ceph",
            "debug",
            "start",
            "rook-ceph-mon-a",
            "-n",
            "storage",
            "--context",
            "prod",
        ])
        .unwrap();
        assert_eq!(cli.global.namespace, "storage");
        assert_eq!(cli.global.context.as_deref(), Some("prod"));
    }
}
