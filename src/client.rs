//! Target resource client
//!
//! The reconciler only ever creates Deployments. Errors from the API server
//! are passed through unmodified so the caller can classify them.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::deployment::TargetResourceSpec;
use crate::{Error, FIELD_MANAGER};

/// Trait abstracting creation of target resources
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetResourceClient: Send + Sync {
    /// Create the target resource described by `spec`
    ///
    /// Fails with an `AlreadyExists` API error when it is already present.
    async fn create(&self, spec: &TargetResourceSpec) -> Result<(), Error>;
}

/// Real implementation creating apps/v1 Deployments
pub struct DeploymentClient {
    client: Client,
}

impl DeploymentClient {
    /// Create a new DeploymentClient wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TargetResourceClient for DeploymentClient {
    async fn create(&self, spec: &TargetResourceSpec) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &spec.namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        api.create(&params, &spec.to_deployment()).await?;
        debug!(namespace = %spec.namespace, name = %spec.name, "Deployment created");
        Ok(())
    }
}
