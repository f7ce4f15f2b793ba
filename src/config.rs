//! Kubernetes client configuration
//!
//! The kubeconfig resolution chain (highest priority first):
//! 1. Explicit `--kubeconfig` flag
//! 2. `ROOK_KUBECONFIG` environment variable
//! 3. Fall back to kube default (`KUBECONFIG` env / `~/.kube/config` / in-cluster)

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::{Error, Result};

/// Environment variable consulted when no `--kubeconfig` flag is given
pub const ROOK_KUBECONFIG_ENV: &str = "ROOK_KUBECONFIG";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolve a kubeconfig path using the priority chain.
///
/// Returns `None` to let kube infer its configuration.
pub fn resolve_kubeconfig(explicit: Option<&str>) -> Option<String> {
    resolve_kubeconfig_from(explicit, std::env::var(ROOK_KUBECONFIG_ENV).ok())
}

fn resolve_kubeconfig_from(explicit: Option<&str>, env: Option<String>) -> Option<String> {
    if let Some(path) = explicit.filter(|p| !p.is_empty()) {
        return Some(path.to_string());
    }
    env.filter(|p| !p.is_empty())
}

/// Create a kube client with default timeouts
///
/// `context` selects a kubeconfig context other than the current one.
pub async fn create_client(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Client> {
    create_client_with_timeout(
        kubeconfig,
        context,
        DEFAULT_CONNECT_TIMEOUT,
        DEFAULT_READ_TIMEOUT,
    )
    .await
}

/// Create a kube client with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    context: Option<&str>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client> {
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };

    let mut config = match kubeconfig {
        Some(path) => {
            debug!(kubeconfig = %path.display(), "loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None if options.context.is_some() => Config::from_kubeconfig(&options)
            .await
            .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?,
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer config: {}", e)))?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| Error::config(format!("failed to create client: {}", e)))
}
