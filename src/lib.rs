//! konfig-deployer - level-triggered controller that turns labelled ConfigMaps into Deployments
//!
//! A ConfigMap carrying the label `app=auto-deployment` and the data fields
//! `DeploymentName`, `DeploymentReplicas` and `DeploymentImage` requests a
//! Deployment. The controller watches ConfigMaps, turns every change into a
//! `namespace/name` work key, and reconciles each key by creating the requested
//! Deployment if it does not exist yet.
//!
//! # Modules
//!
//! - [`store`] - Informer-style ConfigMap cache and change subscription
//! - [`queue`] - Deduplicating, single-flight, rate-limited work queue
//! - [`controller`] - Workers, reconciler and the controller runner
//! - [`client`] - Deployment creation against the Kubernetes API
//! - [`deployment`] - Derivation of the Deployment from a ConfigMap
//! - [`resource`] - Work keys and source resource snapshots
//! - [`config`] - Controller configuration
//! - [`metrics`] / [`telemetry`] - Observability
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod controller;
pub mod deployment;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod resource;
pub mod store;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Trigger and field names
// =============================================================================

/// Label key that marks a ConfigMap as a deployment request
pub const TRIGGER_LABEL_KEY: &str = "app";

/// Label value that marks a ConfigMap as a deployment request
///
/// The same pair is stamped on the created Deployment, its pod template and
/// its selector.
pub const TRIGGER_LABEL_VALUE: &str = "auto-deployment";

/// Data field holding the Deployment name
pub const FIELD_DEPLOYMENT_NAME: &str = "DeploymentName";

/// Data field holding the replica count (base-10, non-negative, 32-bit)
pub const FIELD_DEPLOYMENT_REPLICAS: &str = "DeploymentReplicas";

/// Data field holding the container image reference
pub const FIELD_DEPLOYMENT_IMAGE: &str = "DeploymentImage";

/// Name of the single container in the generated pod template
pub const CONTAINER_NAME: &str = "auto-deployment-container";

/// Field manager recorded on objects this controller creates
pub const FIELD_MANAGER: &str = "konfig-deployer";

/// Name of the work queue, used in logs and metrics
pub const QUEUE_NAME: &str = "konfig-deployer";
