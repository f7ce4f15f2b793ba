//! kubectl-rook-ceph - operator tooling for Rook/Ceph storage clusters
//!
//! Manipulates live cluster resources on behalf of a storage-cluster operator:
//! puts mon/osd Deployments into a "debug mode" override and back, and runs
//! transient multus validation workloads whose lifetime is tied to a single
//! owner ConfigMap.
//!
//! # Modules
//!
//! - [`kube_client`] - Kubernetes API seam (real client + in-memory substrate)
//! - [`scale`] - Deployment replica count reads and updates
//! - [`debug`] - Debug mode state machine for mon/osd Deployments
//! - [`validation`] - Owner-marker resource groups and the multus validation run
//! - [`config`] - Client configuration and kubeconfig resolution
//! - [`commands`] - CLI command handlers
//! - [`error`] - Error types

#![warn(missing_docs)]

pub mod commands;
pub mod config;
pub mod debug;
pub mod error;
pub mod kube_client;
pub mod scale;
pub mod validation;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default namespace of both the Rook operator and the CephCluster
pub const DEFAULT_NAMESPACE: &str = "rook-ceph";

/// Suffix appended to a Deployment name to form its debug Deployment name
pub const DEBUG_SUFFIX: &str = "-debug";

/// Label telling the Rook operator to leave a resource alone
pub const DO_NOT_RECONCILE_LABEL: &str = "ceph.rook.io/do-not-reconcile";

/// Label key identifying resources managed by this tool
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for [`LABEL_MANAGED_BY`]
pub const LABEL_MANAGED_BY_VALUE: &str = "kubectl-rook-ceph";
