//! Reconcile logic for ConfigMap-driven Deployments
//!
//! A pure function of the work key and the current cache snapshot: read the
//! ConfigMap, decide whether it requests a Deployment, and create it. Nothing
//! is remembered between calls, so a retry with a fresher snapshot is always
//! safe.

use tracing::{debug, info, instrument};

use super::Context;
use crate::deployment::{is_triggered, TargetResourceSpec};
use crate::resource::WorkKey;
use crate::Error;

/// What a successful reconcile did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The ConfigMap is gone from the cache
    SourceNotFound,
    /// The ConfigMap does not carry the trigger label
    NotTriggered,
    /// The Deployment was created
    Created,
    /// The Deployment was already present
    AlreadyExists,
}

impl ReconcileOutcome {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceNotFound => "source_not_found",
            Self::NotTriggered => "not_triggered",
            Self::Created => "created",
            Self::AlreadyExists => "already_exists",
        }
    }
}

/// Reconcile the ConfigMap identified by `key`
///
/// A missing ConfigMap, or one without the trigger label, is a successful
/// no-op. An `AlreadyExists` answer from the API server is also success, so
/// repeated notifications for the same ConfigMap converge instead of failing.
#[instrument(skip(key, ctx), fields(key = %key))]
pub async fn reconcile(key: &WorkKey, ctx: &Context) -> Result<ReconcileOutcome, Error> {
    let Some(source) = ctx.store.get(&key.namespace, &key.name)? else {
        debug!("ConfigMap no longer exists, nothing to do");
        return Ok(ReconcileOutcome::SourceNotFound);
    };

    if !is_triggered(&source) {
        debug!("ConfigMap is not a deployment request");
        return Ok(ReconcileOutcome::NotTriggered);
    }

    let spec = TargetResourceSpec::from_source(&source)?;

    match ctx.client.create(&spec).await {
        Ok(()) => {
            info!(
                deployment = %spec.name,
                replicas = spec.replicas,
                image = %spec.image,
                "created Deployment"
            );
            Ok(ReconcileOutcome::Created)
        }
        Err(e) if e.is_already_exists() => {
            debug!(deployment = %spec.name, "Deployment already exists");
            Ok(ReconcileOutcome::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use kube::core::ErrorResponse;
    use mockall::predicate::eq;

    use crate::client::MockTargetResourceClient;
    use crate::config::QueueConfig;
    use crate::error::ErrorKind;
    use crate::queue::EventQueue;
    use crate::resource::SourceResource;
    use crate::store::MockResourceStore;

    fn key() -> WorkKey {
        WorkKey::new("default", "web-config")
    }

    fn source(labels: &[(&str, &str)], data: &[(&str, &str)]) -> SourceResource {
        let to_map = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        SourceResource {
            namespace: "default".to_string(),
            name: "web-config".to_string(),
            labels: to_map(labels),
            data: to_map(data),
        }
    }

    fn triggered_source() -> SourceResource {
        source(
            &[("app", "auto-deployment")],
            &[
                ("DeploymentName", "foo"),
                ("DeploymentReplicas", "3"),
                ("DeploymentImage", "nginx:latest"),
            ],
        )
    }

    fn api_error(code: u16, reason: &str) -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} from the API server", reason),
            reason: reason.to_string(),
            code,
        }))
    }

    fn store_returning(source: Option<SourceResource>) -> MockResourceStore {
        let mut store = MockResourceStore::new();
        store
            .expect_get()
            .with(eq("default"), eq("web-config"))
            .returning(move |_, _| Ok(source.clone()));
        store.expect_has_synced().return_const(true);
        store
    }

    fn context(store: MockResourceStore, client: MockTargetResourceClient) -> Context {
        Context::new(
            Arc::new(store),
            Arc::new(client),
            EventQueue::new("test", &QueueConfig::default()),
        )
    }

    mod no_op_paths {
        use super::*;

        #[tokio::test]
        async fn missing_source_is_success_without_create() {
            let mut client = MockTargetResourceClient::new();
            client.expect_create().never();
            let ctx = context(store_returning(None), client);

            let outcome = reconcile(&key(), &ctx).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::SourceNotFound);
        }

        #[tokio::test]
        async fn unlabelled_source_is_ignored() {
            let mut client = MockTargetResourceClient::new();
            client.expect_create().never();
            let mut unlabelled = triggered_source();
            unlabelled.labels.clear();
            let ctx = context(store_returning(Some(unlabelled)), client);

            let outcome = reconcile(&key(), &ctx).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::NotTriggered);
        }

        #[tokio::test]
        async fn mismatched_label_value_is_ignored() {
            let mut client = MockTargetResourceClient::new();
            client.expect_create().never();
            let mut mismatched = triggered_source();
            mismatched
                .labels
                .insert("app".to_string(), "manual-deployment".to_string());
            let ctx = context(store_returning(Some(mismatched)), client);

            let outcome = reconcile(&key(), &ctx).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::NotTriggered);
        }

        #[tokio::test]
        async fn untriggered_source_with_bad_fields_is_still_ignored() {
            let mut client = MockTargetResourceClient::new();
            client.expect_create().never();
            let ctx = context(
                store_returning(Some(source(&[], &[("DeploymentReplicas", "abc")]))),
                client,
            );

            assert_eq!(
                reconcile(&key(), &ctx).await.unwrap(),
                ReconcileOutcome::NotTriggered
            );
        }
    }

    mod create {
        use super::*;

        #[tokio::test]
        async fn triggered_source_creates_deployment_with_mapped_fields() {
            let mut client = MockTargetResourceClient::new();
            client
                .expect_create()
                .withf(|spec: &TargetResourceSpec| {
                    spec.name == "foo"
                        && spec.namespace == "default"
                        && spec.replicas == 3
                        && spec.image == "nginx:latest"
                        && spec.labels.get("app").map(String::as_str) == Some("auto-deployment")
                })
                .times(1)
                .returning(|_| Ok(()));
            let ctx = context(store_returning(Some(triggered_source())), client);

            let outcome = reconcile(&key(), &ctx).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::Created);
        }

        #[tokio::test]
        async fn second_reconcile_treats_already_exists_as_success() {
            let mut client = MockTargetResourceClient::new();
            let mut seq = mockall::Sequence::new();
            client
                .expect_create()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
            client
                .expect_create()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Err(api_error(409, "AlreadyExists")));
            let ctx = context(store_returning(Some(triggered_source())), client);

            assert_eq!(
                reconcile(&key(), &ctx).await.unwrap(),
                ReconcileOutcome::Created
            );
            assert_eq!(
                reconcile(&key(), &ctx).await.unwrap(),
                ReconcileOutcome::AlreadyExists
            );
        }
    }

    mod failures {
        use super::*;

        #[tokio::test]
        async fn malformed_replicas_fail_validation_without_create() {
            let mut client = MockTargetResourceClient::new();
            client.expect_create().never();
            let mut bad = triggered_source();
            bad.data
                .insert("DeploymentReplicas".to_string(), "abc".to_string());
            let ctx = context(store_returning(Some(bad)), client);

            let err = reconcile(&key(), &ctx).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert!(err.to_string().contains("default/web-config"));
        }

        #[tokio::test]
        async fn transport_errors_are_passed_through() {
            let mut client = MockTargetResourceClient::new();
            client
                .expect_create()
                .times(1)
                .returning(|_| Err(api_error(503, "ServiceUnavailable")));
            let ctx = context(store_returning(Some(triggered_source())), client);

            let err = reconcile(&key(), &ctx).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transient);
            assert!(!err.is_already_exists());
        }

        #[tokio::test]
        async fn store_errors_are_transient() {
            let mut store = MockResourceStore::new();
            store
                .expect_get()
                .returning(|_, _| Err(Error::store("cache unavailable")));
            let mut client = MockTargetResourceClient::new();
            client.expect_create().never();
            let ctx = context(store, client);

            let err = reconcile(&key(), &ctx).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transient);
        }
    }

    #[test]
    fn outcome_labels_are_stable() {
        assert_eq!(ReconcileOutcome::SourceNotFound.as_str(), "source_not_found");
        assert_eq!(ReconcileOutcome::NotTriggered.as_str(), "not_triggered");
        assert_eq!(ReconcileOutcome::Created.as_str(), "created");
        assert_eq!(ReconcileOutcome::AlreadyExists.as_str(), "already_exists");
    }
}
