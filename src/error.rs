//! Error types for the konfig-deployer controller

use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A triggering ConfigMap carries a missing or malformed deployment field
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Key (`namespace/name`) of the offending source resource
        resource: String,
        /// The data field that failed validation, if any
        field: Option<String>,
        /// Description of what's invalid
        message: String,
    },

    /// The local resource cache could not answer a lookup
    #[error("store error: {0}")]
    Store(String),

    /// An object or string could not be turned into a work key
    #[error("invalid key {key:?}: {message}")]
    InvalidKey {
        /// The key (or object name) that was rejected
        key: String,
        /// Why it was rejected
        message: String,
    },

    /// Controller configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification used for logging, metrics and requeue decisions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Infrastructure failure that is expected to heal on its own
    Transient,
    /// Bad input on the source resource; needs an edit to heal
    Validation,
    /// The target resource already exists
    Conflict,
}

impl ErrorKind {
    /// Stable lowercase name for metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
        }
    }
}

impl Error {
    /// Create a validation error for a resource
    pub fn validation(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            field: None,
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific data field of a resource
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            field: Some(field.into()),
            message: msg.into(),
        }
    }

    /// Create a store error with the given message
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create an invalid key error
    pub fn invalid_key(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True when the API server rejected a create because the object exists
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::Kube(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "AlreadyExists"
        )
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            _ if self.is_already_exists() => ErrorKind::Conflict,
            Error::Validation { .. } | Error::InvalidKey { .. } | Error::Config(_) => {
                ErrorKind::Validation
            }
            Error::Kube(_) | Error::Store(_) => ErrorKind::Transient,
        }
    }
}
