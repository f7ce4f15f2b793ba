//! Error types for rook-ceph lifecycle operations

use thiserror::Error;

/// Main error type for debug-mode and validation-run operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error that has no more specific mapping
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// An expected resource is absent
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (e.g. "Deployment")
        kind: String,
        /// Resource name
        name: String,
    },

    /// A resource with the same name already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// Creating a resource failed
    #[error("failed to create {kind} {name}: {message}")]
    Creation {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Underlying failure
        message: String,
    },

    /// Updating a resource failed
    #[error("failed to update {kind} {name}: {message}")]
    Update {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Underlying failure
        message: String,
    },

    /// Deleting a resource failed for a reason other than absence
    #[error("failed to delete {kind} {name}: {message}")]
    Deletion {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Underlying failure
        message: String,
    },

    /// Exiting debug mode without a debug deployment present
    #[error("Missing mon or osd debug deployment name {name}. {source}")]
    MissingDebugDeployment {
        /// The debug deployment name that was looked up
        name: String,
        /// The lookup failure
        source: Box<Error>,
    },

    /// Entering debug mode while a debug deployment already exists
    #[error("deployment {name} is already in debug mode")]
    AlreadyInDebug {
        /// The original deployment name
        name: String,
    },

    /// Run-config or manifest encoding/decoding error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Template rendering error
    #[error("template error: {0}")]
    Template(String),

    /// Client configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a not-found error for the given kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for the given kind and name
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a creation error wrapping the underlying failure
    pub fn creation(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Creation {
            kind: kind.into(),
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create an update error wrapping the underlying failure
    pub fn update(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Update {
            kind: kind.into(),
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create a deletion error wrapping the underlying failure
    pub fn deletion(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Deletion {
            kind: kind.into(),
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a template error with the given message
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True if this error reports an absent resource
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// True if this error reports a name collision
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }
}
