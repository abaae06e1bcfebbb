//! Derivation of the target Deployment from a triggering ConfigMap
//!
//! [`TargetResourceSpec`] is built fresh from a [`SourceResource`] snapshot on
//! every reconcile and converted into a `Deployment` for the create call. It
//! never outlives the reconcile that built it.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use crate::resource::SourceResource;
use crate::{
    Error, CONTAINER_NAME, FIELD_DEPLOYMENT_IMAGE, FIELD_DEPLOYMENT_NAME,
    FIELD_DEPLOYMENT_REPLICAS, TRIGGER_LABEL_KEY, TRIGGER_LABEL_VALUE,
};

/// Maximum length of a DNS-1123 subdomain
const MAX_DNS_SUBDOMAIN_LEN: usize = 253;

/// True when the source resource requests a deployment
pub fn is_triggered(source: &SourceResource) -> bool {
    source.has_label(TRIGGER_LABEL_KEY, TRIGGER_LABEL_VALUE)
}

/// Desired Deployment derived from a single ConfigMap snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetResourceSpec {
    /// Deployment name
    pub name: String,
    /// Namespace, always the ConfigMap's namespace
    pub namespace: String,
    /// Desired replica count
    pub replicas: i32,
    /// Image of the single container
    pub image: String,
    /// Labels applied to the Deployment, its pod template and its selector
    pub labels: BTreeMap<String, String>,
}

impl TargetResourceSpec {
    /// Build the desired spec from a ConfigMap snapshot
    ///
    /// Every required field is checked before anything is built, so a
    /// validation error always means no create call is made.
    pub fn from_source(source: &SourceResource) -> Result<Self, Error> {
        let key = source.key().to_string();

        let name = required_field(source, &key, FIELD_DEPLOYMENT_NAME)?;
        validate_dns_subdomain(name)
            .map_err(|msg| Error::validation_for_field(&key, FIELD_DEPLOYMENT_NAME, msg))?;

        let replicas = parse_replicas(required_field(source, &key, FIELD_DEPLOYMENT_REPLICAS)?)
            .map_err(|msg| Error::validation_for_field(&key, FIELD_DEPLOYMENT_REPLICAS, msg))?;

        let image = required_field(source, &key, FIELD_DEPLOYMENT_IMAGE)?;
        if image.trim().is_empty() {
            return Err(Error::validation_for_field(
                &key,
                FIELD_DEPLOYMENT_IMAGE,
                "image must not be blank",
            ));
        }

        Ok(Self {
            name: name.to_string(),
            namespace: source.namespace.clone(),
            replicas,
            image: image.to_string(),
            labels: marker_labels(),
        })
    }

    /// Render the apps/v1 Deployment to create
    pub fn to_deployment(&self) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(self.labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: CONTAINER_NAME.to_string(),
                            image: Some(self.image.clone()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn marker_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        TRIGGER_LABEL_KEY.to_string(),
        TRIGGER_LABEL_VALUE.to_string(),
    )])
}

fn required_field<'a>(
    source: &'a SourceResource,
    key: &str,
    field: &str,
) -> Result<&'a str, Error> {
    source
        .data_field(field)
        .ok_or_else(|| Error::validation_for_field(key, field, "required field is missing"))
}

/// Parse a base-10 replica count into a non-negative `i32`
fn parse_replicas(raw: &str) -> Result<i32, String> {
    let value: i64 = raw
        .parse()
        .map_err(|_| format!("{:?} is not a base-10 integer", raw))?;
    if value < 0 {
        return Err(format!("replica count must not be negative, got {}", value));
    }
    i32::try_from(value).map_err(|_| format!("replica count {} does not fit in 32 bits", value))
}

/// Validate a Kubernetes object name (DNS-1123 subdomain).
///
/// Rules:
/// - 1 to 253 characters
/// - lowercase alphanumerics, `-` and `.`
/// - starts and ends with an alphanumeric
fn validate_dns_subdomain(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if s.len() > MAX_DNS_SUBDOMAIN_LEN {
        return Err(format!(
            "name must be at most {} characters, got {}",
            MAX_DNS_SUBDOMAIN_LEN,
            s.len()
        ));
    }

    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if let Some(c) = s.chars().find(|&c| !is_alnum(c) && c != '-' && c != '.') {
        return Err(format!("name contains invalid character {:?}: {}", c, s));
    }
    if !s.starts_with(is_alnum) || !s.ends_with(is_alnum) {
        return Err(format!(
            "name must start and end with a lowercase alphanumeric: {}",
            s
        ));
    }

    Ok(())
}
