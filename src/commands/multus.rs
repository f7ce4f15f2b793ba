//! `kubectl-rook-ceph multus validation run`

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::kube_client::ClusterApi;
use crate::validation::{
    ObservationWindow, RunOutcome, ValidationConfig, ValidationTest, DEFAULT_WEB_SERVER_IMAGE,
};
use crate::Result;

/// Multus arguments
#[derive(Args, Debug)]
pub struct MultusArgs {
    /// Multus action
    #[command(subcommand)]
    pub command: MultusCommand,
}

/// Multus actions
#[derive(Subcommand, Debug)]
pub enum MultusCommand {
    /// Multus network validation
    #[command(subcommand)]
    Validation(ValidationCommand),
}

/// Validation actions
#[derive(Subcommand, Debug)]
pub enum ValidationCommand {
    /// Run a validation test against the configured multus networks
    Run(RunArgs),
}

/// Validation run arguments
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// NetworkAttachmentDefinition used as the Ceph public network
    #[arg(long)]
    pub public_network: Option<String>,

    /// NetworkAttachmentDefinition used as the Ceph cluster network
    #[arg(long)]
    pub cluster_network: Option<String>,

    /// Web server image
    #[arg(long, default_value = DEFAULT_WEB_SERVER_IMAGE)]
    pub web_server_image: String,

    /// Seconds to keep the test resources running before cleaning up
    #[arg(long, default_value_t = 30)]
    pub observe_secs: u64,
}

impl RunArgs {
    fn validation_config(&self, namespace: &str) -> ValidationConfig {
        let mut config =
            ValidationConfig::new(namespace).with_web_server_image(&self.web_server_image);
        if let Some(network) = &self.public_network {
            config = config.with_public_network(network);
        }
        if let Some(network) = &self.cluster_network {
            config = config.with_cluster_network(network);
        }
        config
    }
}

/// Run a multus command, cancelling the validation run on Ctrl-C
pub async fn run(api: Arc<dyn ClusterApi>, namespace: &str, args: MultusArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    let signal = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling validation test");
                cancel.cancel();
            }
        }
    });

    let result = run_with_cancel(api, namespace, args, cancel).await;
    signal.abort();
    result
}

/// Run a multus command under an externally controlled cancellation token
pub async fn run_with_cancel(
    api: Arc<dyn ClusterApi>,
    namespace: &str,
    args: MultusArgs,
    cancel: CancellationToken,
) -> Result<()> {
    match args.command {
        MultusCommand::Validation(ValidationCommand::Run(run_args)) => {
            let test = ValidationTest::new(api, run_args.validation_config(namespace))?
                .with_window(ObservationWindow::of(Duration::from_secs(
                    run_args.observe_secs,
                )));

            match test.run(cancel).await? {
                RunOutcome::Completed(report) => {
                    info!(
                        web_server_ready = report.web_server_ready,
                        "multus validation test completed"
                    );
                    println!(
                        "Multus validation test completed (web server ready: {}).",
                        report.web_server_ready
                    );
                }
                RunOutcome::Cancelled(_) => {
                    println!("Multus validation test cancelled; resources cleaned up.");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use crate::kube_client::memory::InMemoryCluster;
    use crate::validation::OWNER_CONFIG_MAP_NAME;
    use clap::Parser;

    fn parse_run(args: &[&str]) -> RunArgs {
        let mut argv = vec!["kubectl-rook-ceph", "multus", "validation", "run"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Multus(MultusArgs {
                command: MultusCommand::Validation(ValidationCommand::Run(run)),
            }) => run,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn run_flags_build_the_validation_config() {
        let args = parse_run(&[
            "--public-network",
            "public-net",
            "--cluster-network",
            "cluster-net",
            "--observe-secs",
            "5",
        ]);
        assert_eq!(args.observe_secs, 5);

        let config = args.validation_config("storage");
        assert_eq!(config.namespace, "storage");
        assert_eq!(config.public_network.as_deref(), Some("public-net"));
        assert_eq!(config.cluster_network.as_deref(), Some("cluster-net"));
        assert_eq!(config.web_server_image, DEFAULT_WEB_SERVER_IMAGE);
    }

    #[test]
    fn observe_window_defaults_to_thirty_seconds() {
        assert_eq!(parse_run(&[]).observe_secs, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_command_still_cleans_up() {
        let cluster = Arc::new(InMemoryCluster::new());
        let args = MultusArgs {
            command: MultusCommand::Validation(ValidationCommand::Run(parse_run(&[]))),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_with_cancel(cluster.clone(), "rook-ceph", args, cancel)
            .await
            .unwrap();

        assert!(cluster.config_map("rook-ceph", OWNER_CONFIG_MAP_NAME).is_none());
        assert_eq!(cluster.object_count(), 0);
    }
}
