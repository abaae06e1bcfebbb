//! Source resources and work keys
//!
//! Notifications from the store carry full Kubernetes objects. They are turned
//! into a [`WorkKey`] at the boundary, and the reconciler reads a
//! [`SourceResource`] snapshot back from the store by that key.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Resource, ResourceExt};

use crate::Error;

/// Identity of a source resource that changed
///
/// Equality is by value, which is what the queue deduplicates on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkKey {
    /// Namespace (empty for cluster-scoped objects)
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl WorkKey {
    /// Create a key from a namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Derive the key of any Kubernetes object
    ///
    /// Objects without a name cannot be addressed and are rejected.
    pub fn from_object<K: Resource>(obj: &K) -> Result<Self, Error> {
        let meta = obj.meta();
        let name = meta
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::invalid_key("<unnamed>", "object has no metadata.name"))?;
        Ok(Self::new(meta.namespace.clone().unwrap_or_default(), name))
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for WorkKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::new("", *name)),
            [namespace, name] if !name.is_empty() => Ok(Self::new(*namespace, *name)),
            _ => Err(Error::invalid_key(s, "unexpected key format")),
        }
    }
}

/// Immutable snapshot of a watched ConfigMap
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceResource {
    /// Namespace of the ConfigMap
    pub namespace: String,
    /// Name of the ConfigMap
    pub name: String,
    /// Labels on the ConfigMap
    pub labels: BTreeMap<String, String>,
    /// String data entries of the ConfigMap
    pub data: BTreeMap<String, String>,
}

impl SourceResource {
    /// Key addressing this snapshot
    pub fn key(&self) -> WorkKey {
        WorkKey::new(&self.namespace, &self.name)
    }

    /// True when the label `key` is present with exactly `value`
    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).map(String::as_str) == Some(value)
    }

    /// Look up a data entry
    pub fn data_field(&self, field: &str) -> Option<&str> {
        self.data.get(field).map(String::as_str)
    }
}

impl From<&ConfigMap> for SourceResource {
    fn from(cm: &ConfigMap) -> Self {
        Self {
            namespace: cm.namespace().unwrap_or_default(),
            name: cm.name_any(),
            labels: cm.labels().clone(),
            data: cm.data.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use rstest::rstest;

    fn config_map(namespace: Option<&str>, name: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                namespace: namespace.map(str::to_string),
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    "auto-deployment".to_string(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "DeploymentName".to_string(),
                "web".to_string(),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn key_from_namespaced_object() {
        let key = WorkKey::from_object(&config_map(Some("team-a"), Some("web-config"))).unwrap();
        assert_eq!(key, WorkKey::new("team-a", "web-config"));
        assert_eq!(key.to_string(), "team-a/web-config");
    }

    #[test]
    fn key_from_cluster_scoped_object_has_empty_namespace() {
        let key = WorkKey::from_object(&config_map(None, Some("global"))).unwrap();
        assert_eq!(key.namespace, "");
        assert_eq!(key.to_string(), "global");
    }

    #[test]
    fn key_from_unnamed_object_is_rejected() {
        let err = WorkKey::from_object(&config_map(Some("default"), None)).unwrap_err();
        assert!(matches!(err, Error::InvalidKey { .. }));
    }

    #[rstest]
    #[case::namespaced("default/web", "default", "web")]
    #[case::cluster_scoped("web", "", "web")]
    #[case::empty_namespace_prefix("/web", "", "web")]
    fn key_parses(#[case] input: &str, #[case] namespace: &str, #[case] name: &str) {
        let key: WorkKey = input.parse().unwrap();
        assert_eq!(key, WorkKey::new(namespace, name));
    }

    #[rstest]
    #[case::too_many_parts("a/b/c")]
    #[case::empty("")]
    #[case::trailing_slash("default/")]
    fn key_parse_rejects(#[case] input: &str) {
        assert!(input.parse::<WorkKey>().is_err());
    }

    #[test]
    fn keys_compare_by_value() {
        assert_eq!(WorkKey::new("ns", "a"), WorkKey::new("ns", "a"));
        assert_ne!(WorkKey::new("ns", "a"), WorkKey::new("other", "a"));
    }

    #[test]
    fn source_resource_snapshot_from_config_map() {
        let source = SourceResource::from(&config_map(Some("default"), Some("web-config")));
        assert_eq!(source.key(), WorkKey::new("default", "web-config"));
        assert!(source.has_label("app", "auto-deployment"));
        assert!(!source.has_label("app", "something-else"));
        assert!(!source.has_label("role", "auto-deployment"));
        assert_eq!(source.data_field("DeploymentName"), Some("web"));
        assert_eq!(source.data_field("DeploymentImage"), None);
    }

    #[test]
    fn config_map_without_data_or_labels_yields_empty_maps() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("bare".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let source = SourceResource::from(&cm);
        assert!(source.labels.is_empty());
        assert!(source.data.is_empty());
    }
}
