// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Controller fan-out: one [`Controller`] per resource kind, wired with the
//! change predicates and the secondary-watch mappers that route events to
//! the primaries that care about them.

pub mod discovery;
pub mod leader;

use crate::context::Context;
use crate::reconcile::{self, Reconciler, error_policy};
use crate::types::objectbucket::ObjectBucketClaim;
use crate::types::v1alpha1::account::NooBaaAccount;
use crate::types::v1alpha1::backingstore::BackingStore;
use crate::types::v1alpha1::bucketclass::{BucketClass, DEFAULT_BUCKET_CLASS};
use crate::types::v1alpha1::namespacestore::NamespaceStore;
use crate::types::v1alpha1::noobaa::NooBaa;
use crate::types::v1alpha1::store::{KindError, StoreKind};
use dashmap::DashMap;
use futures::{FutureExt, StreamExt, TryStreamExt, future};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fingerprint of one aspect of an object; `None` when the aspect is absent.
pub type Fingerprint = fn(&ObjectMeta) -> Option<u64>;

fn hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

pub fn generation(meta: &ObjectMeta) -> Option<u64> {
    meta.generation.map(|g| hash(&g))
}

pub fn labels(meta: &ObjectMeta) -> Option<u64> {
    meta.labels.as_ref().map(hash)
}

pub fn finalizers(meta: &ObjectMeta) -> Option<u64> {
    meta.finalizers.as_ref().map(|f| hash(f.as_slice()))
}

pub fn deletion(meta: &ObjectMeta) -> Option<u64> {
    meta.deletion_timestamp.as_ref().map(|_| 1)
}

/// Status-only updates match none of these, so a reconciler's own status
/// writes do not wake it again.
pub const PRIMARY_PREDICATES: &[Fingerprint] = &[generation, labels, finalizers, deletion];

/// Passes an object when any of its fingerprints changed since it was last seen.
#[derive(Clone)]
pub struct ChangeFilter {
    predicates: &'static [Fingerprint],
    seen: Arc<DashMap<String, Vec<Option<u64>>>>,
}

impl ChangeFilter {
    pub fn new(predicates: &'static [Fingerprint]) -> Self {
        Self {
            predicates,
            seen: Arc::new(DashMap::new()),
        }
    }

    pub fn changed<K: Resource>(&self, obj: &K) -> bool {
        let meta = obj.meta();
        let key = meta.uid.clone().unwrap_or_else(|| {
            format!(
                "{}/{}",
                meta.namespace.as_deref().unwrap_or_default(),
                meta.name.as_deref().unwrap_or_default()
            )
        });
        let prints: Vec<Option<u64>> = self.predicates.iter().map(|p| p(meta)).collect();
        match self.seen.insert(key, prints.clone()) {
            Some(previous) => previous != prints,
            None => true,
        }
    }
}

/// Whether `obj` lives in `namespace`; events from other namespaces are not routed.
pub fn in_namespace<K: Resource>(obj: &K, namespace: &str) -> bool {
    obj.meta().namespace.as_deref() == Some(namespace)
}

/// Reflected watch of a primary kind, filtered by [`PRIMARY_PREDICATES`].
fn primary<K>(
    api: Api<K>,
) -> (
    Store<K>,
    impl futures::Stream<Item = Result<K, watcher::Error>> + Send + 'static,
)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let filter = ChangeFilter::new(PRIMARY_PREDICATES);
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .try_filter(move |obj| future::ready(filter.changed(obj)));
    (reader, stream)
}

fn secret_referenced(
    kind: Result<StoreKind<'_>, KindError>,
    store_ns: &str,
    secret: &Secret,
) -> bool {
    let Some(reference) = kind.ok().and_then(|k| k.secret()) else {
        return false;
    };
    let ref_ns = reference.namespace.as_deref().unwrap_or(store_ns);
    reference.name.as_deref() == Some(secret.name_any().as_str())
        && secret.namespace().as_deref() == Some(ref_ns)
}

/// Backing stores whose credentials live in `secret`.
pub fn backing_stores_for_secret(
    stores: &[Arc<BackingStore>],
    secret: &Secret,
) -> Vec<ObjectRef<BackingStore>> {
    stores
        .iter()
        .filter(|bs| {
            let ns = bs.namespace().unwrap_or_default();
            secret_referenced(bs.spec.kind(), &ns, secret)
        })
        .map(|bs| ObjectRef::from_obj(bs.as_ref()))
        .collect()
}

pub fn namespace_stores_for_secret(
    stores: &[Arc<NamespaceStore>],
    secret: &Secret,
) -> Vec<ObjectRef<NamespaceStore>> {
    stores
        .iter()
        .filter(|nss| {
            let ns = nss.namespace().unwrap_or_default();
            secret_referenced(nss.spec.kind(), &ns, secret)
        })
        .map(|nss| ObjectRef::from_obj(nss.as_ref()))
        .collect()
}

/// nsfs stores are mounted into the endpoints, so they wake the system of their namespace.
pub fn systems_for_namespace_store(
    systems: &[Arc<NooBaa>],
    nss: &NamespaceStore,
) -> Vec<ObjectRef<NooBaa>> {
    if !nss.spec.is_nsfs() {
        return Vec::new();
    }
    let ns = nss.namespace().unwrap_or_default();
    systems
        .iter()
        .filter(|nb| in_namespace(nb.as_ref(), &ns))
        .map(|nb| ObjectRef::from_obj(nb.as_ref()))
        .collect()
}

/// Bucket classes that place data on, or read through, the store `name`.
pub fn classes_for_store(
    classes: &[Arc<BucketClass>],
    name: &str,
    namespace: &str,
) -> Vec<ObjectRef<BucketClass>> {
    classes
        .iter()
        .filter(|bc| in_namespace(bc.as_ref(), namespace))
        .filter(|bc| {
            bc.spec.referenced_backing_stores().contains(&name)
                || bc
                    .spec
                    .namespace_policy
                    .as_ref()
                    .is_some_and(|p| p.referenced_stores().contains(&name))
        })
        .map(|bc| ObjectRef::from_obj(bc.as_ref()))
        .collect()
}

/// Claims that name `class` explicitly, or rely on the default class.
pub fn claims_for_class(
    claims: &[Arc<ObjectBucketClaim>],
    class: &BucketClass,
) -> Vec<ObjectRef<ObjectBucketClaim>> {
    let name = class.name_any();
    claims
        .iter()
        .filter(|obc| obc.bucket_class().unwrap_or(DEFAULT_BUCKET_CLASS) == name)
        .map(|obc| ObjectRef::from_obj(obc.as_ref()))
        .collect()
}

type ControllerResult<K> =
    Result<(ObjectRef<K>, Action), controller::Error<reconcile::Error, watcher::Error>>;

fn report<K: Resource>(result: ControllerResult<K>) -> future::Ready<()> {
    match result {
        Ok((obj, _)) => debug!(name = %obj.name, namespace = ?obj.namespace, "reconciled"),
        Err(controller::Error::ReconcilerFailed(err, obj)) => {
            debug!(name = %obj.name, error = %err, "reconcile failed")
        }
        Err(err) => warn!(error = %err, "controller error"),
    }
    future::ready(())
}

fn settings(ctx: &Context) -> controller::Config {
    controller::Config::default().concurrency(ctx.config.concurrency)
}

async fn drive<K: Reconciler>(
    controller: Controller<K>,
    ctx: Arc<Context>,
    shutdown: CancellationToken,
) {
    info!(kind = %K::kind(&()), "starting controller");
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        let _ = stop.send(());
    });
    controller
        .with_config(settings(&ctx))
        .graceful_shutdown_on(stopped.map(|_| ()))
        .run(reconcile::reconcile::<K>, error_policy::<K>, ctx)
        .for_each(report)
        .await;
    info!(kind = %K::kind(&()), "controller stopped");
}

/// Runs every controller until `shutdown` fires.
pub async fn run(ctx: Arc<Context>, shutdown: CancellationToken) {
    let client = ctx.client.clone();
    let ns = ctx.config.namespace.clone();
    let owned = watcher::Config::default();

    let systems = {
        let (reader, stream) = primary(Api::<NooBaa>::namespaced(client.clone(), &ns));
        let mapped = reader.clone();
        Controller::for_stream(stream, reader)
            .owns(Api::<Deployment>::namespaced(client.clone(), &ns), owned.clone())
            .owns(Api::<StatefulSet>::namespaced(client.clone(), &ns), owned.clone())
            .owns(Api::<Service>::namespaced(client.clone(), &ns), owned.clone())
            .watches(
                Api::<NamespaceStore>::namespaced(client.clone(), &ns),
                owned.clone(),
                move |nss| systems_for_namespace_store(&mapped.state(), &nss),
            )
    };

    let backing_stores = {
        let (reader, stream) = primary(Api::<BackingStore>::namespaced(client.clone(), &ns));
        let mapped = reader.clone();
        Controller::for_stream(stream, reader)
            .owns(Api::<StatefulSet>::namespaced(client.clone(), &ns), owned.clone())
            .watches(
                Api::<Secret>::namespaced(client.clone(), &ns),
                owned.clone(),
                move |secret| backing_stores_for_secret(&mapped.state(), &secret),
            )
    };

    let namespace_stores = {
        let (reader, stream) = primary(Api::<NamespaceStore>::namespaced(client.clone(), &ns));
        let mapped = reader.clone();
        Controller::for_stream(stream, reader).watches(
            Api::<Secret>::namespaced(client.clone(), &ns),
            owned.clone(),
            move |secret| namespace_stores_for_secret(&mapped.state(), &secret),
        )
    };

    let bucket_classes = {
        let (reader, stream) = primary(Api::<BucketClass>::namespaced(client.clone(), &ns));
        let by_backing_store = reader.clone();
        let by_namespace_store = reader.clone();
        Controller::for_stream(stream, reader)
            .watches(
                Api::<BackingStore>::namespaced(client.clone(), &ns),
                owned.clone(),
                move |bs| {
                    let ns = bs.namespace().unwrap_or_default();
                    classes_for_store(&by_backing_store.state(), &bs.name_any(), &ns)
                },
            )
            .watches(
                Api::<NamespaceStore>::namespaced(client.clone(), &ns),
                owned.clone(),
                move |nss| {
                    let ns = nss.namespace().unwrap_or_default();
                    classes_for_store(&by_namespace_store.state(), &nss.name_any(), &ns)
                },
            )
    };

    let accounts = {
        let (reader, stream) = primary(Api::<NooBaaAccount>::namespaced(client.clone(), &ns));
        Controller::for_stream(stream, reader)
            .owns(Api::<Secret>::namespaced(client.clone(), &ns), owned.clone())
    };

    // Claims live in application namespaces; their classes in the operator's.
    let claims = {
        let (reader, stream) = primary(Api::<ObjectBucketClaim>::all(client.clone()));
        let mapped = reader.clone();
        Controller::for_stream(stream, reader).watches(
            Api::<BucketClass>::namespaced(client.clone(), &ns),
            owned.clone(),
            move |bc| claims_for_class(&mapped.state(), &bc),
        )
    };

    futures::join!(
        drive(systems, ctx.clone(), shutdown.clone()),
        drive(backing_stores, ctx.clone(), shutdown.clone()),
        drive(namespace_stores, ctx.clone(), shutdown.clone()),
        drive(bucket_classes, ctx.clone(), shutdown.clone()),
        drive(accounts, ctx.clone(), shutdown.clone()),
        drive(claims, ctx, shutdown),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::{
        create_nsfs_namespace_store, create_placement_bucket_class, create_s3_backing_store,
        create_s3_compatible_namespace_store, create_test_noobaa, TEST_NAMESPACE,
    };
    use k8s_openapi::api::core::v1 as corev1;

    fn secret(name: &str, namespace: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_status_update_filtered_out() {
        let filter = ChangeFilter::new(PRIMARY_PREDICATES);
        let mut bs = create_s3_backing_store("bs", "bucket");
        assert!(filter.changed(&bs));

        bs.status = Some(Default::default());
        bs.metadata.resource_version = Some("2".to_owned());
        assert!(!filter.changed(&bs));

        bs.metadata.finalizers = Some(vec!["noobaa.io/finalizer".to_owned()]);
        assert!(filter.changed(&bs));

        bs.metadata.labels = Some([("app".to_owned(), "noobaa".to_owned())].into());
        assert!(filter.changed(&bs));

        bs.metadata.generation = Some(2);
        assert!(filter.changed(&bs));
        assert!(!filter.changed(&bs));
    }

    #[test]
    fn test_secret_maps_to_referencing_stores() {
        let stores = vec![
            Arc::new(create_s3_backing_store("bs1", "bucket")),
            Arc::new(create_s3_backing_store("bs2", "bucket")),
        ];
        let refs = backing_stores_for_secret(&stores, &secret("bs1-secret", TEST_NAMESPACE));
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "bs1");

        assert!(backing_stores_for_secret(&stores, &secret("bs1-secret", "elsewhere")).is_empty());
        assert!(backing_stores_for_secret(&stores, &secret("unrelated", TEST_NAMESPACE)).is_empty());
    }

    #[test]
    fn test_secret_ref_defaults_to_store_namespace() {
        let mut nss = create_s3_compatible_namespace_store("nss", "bucket");
        nss.spec.s3_compatible.as_mut().unwrap().secret = corev1::SecretReference {
            name: Some("creds".to_owned()),
            namespace: None,
        };
        let refs = namespace_stores_for_secret(&[Arc::new(nss)], &secret("creds", TEST_NAMESPACE));
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn test_only_nsfs_stores_wake_the_system() {
        let systems = vec![Arc::new(create_test_noobaa())];
        let nsfs = create_nsfs_namespace_store("fs", "pvc", None);
        assert_eq!(systems_for_namespace_store(&systems, &nsfs).len(), 1);

        let s3 = create_s3_compatible_namespace_store("nss", "bucket");
        assert!(systems_for_namespace_store(&systems, &s3).is_empty());
    }

    #[test]
    fn test_store_maps_to_classes() {
        let classes = vec![
            Arc::new(create_placement_bucket_class("uses-bs", &[&["bs"]])),
            Arc::new(create_placement_bucket_class("other", &[&["bs2"]])),
        ];
        let refs = classes_for_store(&classes, "bs", TEST_NAMESPACE);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "uses-bs");
        assert!(classes_for_store(&classes, "bs", "elsewhere").is_empty());
    }

    #[test]
    fn test_class_maps_to_claims() {
        let mut explicit = ObjectBucketClaim::new("explicit", Default::default());
        explicit
            .spec
            .additional_config
            .insert("bucketclass".to_owned(), "gold".to_owned());
        let implicit = ObjectBucketClaim::new("implicit", Default::default());
        let claims = vec![Arc::new(explicit), Arc::new(implicit)];

        let gold = create_placement_bucket_class("gold", &[&["bs"]]);
        let refs = claims_for_class(&claims, &gold);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "explicit");

        let default = create_placement_bucket_class(DEFAULT_BUCKET_CLASS, &[&["bs"]]);
        let refs = claims_for_class(&claims, &default);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "implicit");
    }
}
