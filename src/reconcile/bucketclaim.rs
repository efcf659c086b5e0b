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

//! ObjectBucketClaim binding.
//!
//! Claims whose StorageClass names this operator as provisioner get a bucket
//! (or access to an existing one), a cluster-scoped ObjectBucket, and a
//! ConfigMap/Secret pair carrying the connection details.

use super::account::credentials_secret;
use super::system::{connected_system, find_system, teardown_client};
use super::{Error, ObjectStatus, Outcome, Reconciler};
use crate::context::Context;
use crate::provisioner::{
    self, BoundBucket, BucketRequest, Provisioner, account_keys, check_deletion_mode,
    resolve_bucket_class,
};
use crate::rpc::types::AccessKeys;
use crate::types::objectbucket::{
    self, BUCKET_CLASS_GENERATION_ANNOTATION, BucketEndpoint, ClaimPhase, ObjectBucket,
    ObjectBucketClaim, ObjectBucketClaimStatus, ObjectBucketSpec,
};
use crate::types::owner_reference;
use crate::types::v1alpha1::bucketclass::{BucketClass, DEFAULT_BUCKET_CLASS};
use crate::types::v1alpha1::condition::Condition;
use crate::types::v1alpha1::k8s::ReclaimPolicy;
use crate::types::v1alpha1::noobaa::S3_SERVICE;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::info;

/// StorageClass parameter selecting an existing bucket (grant instead of provision).
pub const BUCKET_NAME_PARAM: &str = "bucketName";
pub const BUCKET_CLASS_PARAM: &str = "bucketclass";

const S3_HTTPS_PORT: i32 = 443;
const MAX_BUCKET_NAME: usize = 63;

/// Provisioner name claimed by the operator running in `namespace`.
pub fn provisioner_name(namespace: &str) -> String {
    format!("{namespace}.{}", crate::types::v1alpha1::GROUP)
}

impl ObjectStatus for ObjectBucketClaimStatus {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }

    fn mark_ready(&mut self) {
        self.phase = ClaimPhase::Bound;
    }

    fn mark_rejected(&mut self) {
        self.phase = ClaimPhase::Failed;
    }

    fn set_observed_generation(&mut self, _generation: Option<i64>) {}
}

/// What a claim resolves to once its StorageClass is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub bucket: String,
    pub grant: bool,
    pub class_name: String,
    pub reclaim: ReclaimPolicy,
}

fn reclaim_policy(sc: &StorageClass) -> ReclaimPolicy {
    match sc.reclaim_policy.as_deref() {
        Some("Retain") => ReclaimPolicy::Retain,
        Some("Recycle") => ReclaimPolicy::Recycle,
        _ => ReclaimPolicy::Delete,
    }
}

/// Deterministic generated name, so a retried bind lands on the same bucket.
fn generated_bucket_name(claim: &ObjectBucketClaim) -> String {
    let uid = claim.metadata.uid.as_deref().unwrap_or_default();
    let prefix = claim
        .spec
        .generate_bucket_name
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| claim.name_any());
    let room = MAX_BUCKET_NAME.saturating_sub(uid.len() + 1);
    let prefix: String = prefix.chars().take(room).collect();
    format!("{prefix}-{uid}")
}

pub fn binding(claim: &ObjectBucketClaim, sc: &StorageClass) -> Binding {
    let params = sc.parameters.clone().unwrap_or_default();
    let existing = params.get(BUCKET_NAME_PARAM).filter(|b| !b.is_empty());

    let bucket = match existing {
        Some(bucket) => bucket.clone(),
        None => claim
            .spec
            .bucket_name
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| generated_bucket_name(claim)),
    };

    let class_name = claim
        .bucket_class()
        .map(str::to_owned)
        .or_else(|| params.get(BUCKET_CLASS_PARAM).cloned())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_BUCKET_CLASS.to_owned());

    Binding {
        bucket,
        grant: existing.is_some(),
        class_name,
        reclaim: reclaim_policy(sc),
    }
}

/// S3 service endpoint of the system in `namespace` for `bucket`.
pub fn bucket_endpoint(namespace: &str, bucket: &str) -> BucketEndpoint {
    BucketEndpoint {
        bucket_host: format!("{S3_SERVICE}.{namespace}.svc"),
        bucket_port: S3_HTTPS_PORT,
        bucket_name: bucket.to_owned(),
        ..Default::default()
    }
}

fn owned_meta(claim: &ObjectBucketClaim) -> metav1::ObjectMeta {
    metav1::ObjectMeta {
        name: Some(claim.name_any()),
        namespace: claim.namespace(),
        owner_references: Some(vec![owner_reference(claim)]),
        ..Default::default()
    }
}

pub fn new_config_map(claim: &ObjectBucketClaim, endpoint: &BucketEndpoint) -> corev1::ConfigMap {
    let data: BTreeMap<String, String> = [
        ("BUCKET_HOST", endpoint.bucket_host.clone()),
        ("BUCKET_NAME", endpoint.bucket_name.clone()),
        ("BUCKET_PORT", endpoint.bucket_port.to_string()),
        ("BUCKET_REGION", endpoint.region.clone()),
        ("BUCKET_SUBREGION", endpoint.sub_region.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect();

    corev1::ConfigMap {
        metadata: owned_meta(claim),
        data: Some(data),
        ..Default::default()
    }
}

pub fn new_object_bucket(
    claim: &ObjectBucketClaim,
    binding: &Binding,
    bound: &BoundBucket,
    endpoint: BucketEndpoint,
) -> ObjectBucket {
    let additional_state = [
        ("account", bound.account.clone()),
        ("bucketclass", binding.class_name.clone()),
        ("grant", binding.grant.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect();

    ObjectBucket {
        metadata: metav1::ObjectMeta {
            name: Some(claim.object_bucket_name()),
            ..Default::default()
        },
        spec: ObjectBucketSpec {
            storage_class_name: claim.spec.storage_class_name.clone(),
            reclaim_policy: binding.reclaim,
            claim_ref: Some(corev1::ObjectReference {
                api_version: Some(ObjectBucketClaim::api_version(&()).to_string()),
                kind: Some(ObjectBucketClaim::kind(&()).to_string()),
                name: claim.metadata.name.clone(),
                namespace: claim.metadata.namespace.clone(),
                uid: claim.metadata.uid.clone(),
                ..Default::default()
            }),
            endpoint: Some(endpoint),
            additional_state,
        },
        status: None,
    }
}

impl ObjectBucketClaim {
    async fn storage_class(&self, ctx: &Context) -> Result<Option<StorageClass>, Error> {
        if self.spec.storage_class_name.is_empty() {
            return Ok(None);
        }
        Ok(ctx
            .get_cluster_opt::<StorageClass>(&self.spec.storage_class_name)
            .await?)
    }

    /// Provisions or grants a bucket for a claim that has none yet.
    async fn bind_new(
        &self,
        ctx: &Context,
        provisioner: &Provisioner<'_>,
        binding: &Binding,
        class: &BucketClass,
    ) -> Result<AccessKeys, Error> {
        let op_ns = &ctx.config.namespace;
        if let Some(system) = find_system(ctx, op_ns).await? {
            check_deletion_mode(&system)?;
        }

        let claim_ns = self.namespace().unwrap_or_default();
        let req = BucketRequest {
            bucket_name: &binding.bucket,
            claim_namespace: &claim_ns,
            class,
        };
        let bound = if binding.grant {
            provisioner.grant(&req).await?
        } else {
            provisioner.provision(&req, Utc::now()).await?
        };

        let endpoint = bucket_endpoint(op_ns, &bound.bucket_name);
        ctx.apply_cluster(&new_object_bucket(self, binding, &bound, endpoint))
            .await?;
        info!(claim = %self.name_any(), bucket = %bound.bucket_name, "claim bound");
        ctx.record(
            self,
            EventType::Normal,
            "Bound",
            &format!("bucket {} bound", bound.bucket_name),
        )
        .await?;
        Ok(bound.keys)
    }
}

#[async_trait]
impl Reconciler for ObjectBucketClaim {
    type Status = ObjectBucketClaimStatus;

    const FINALIZER: &'static str = objectbucket::FINALIZER;

    fn status(&self) -> Option<&ObjectBucketClaimStatus> {
        self.status.as_ref()
    }

    async fn is_managed(&self, ctx: &Context) -> Result<bool, Error> {
        let expected = provisioner_name(&ctx.config.namespace);
        Ok(self
            .storage_class(ctx)
            .await?
            .is_some_and(|sc| sc.provisioner == expected))
    }

    async fn apply(&self, ctx: &Context, _status: &mut ObjectBucketClaimStatus) -> Result<Outcome, Error> {
        let claim_ns = self.namespace().unwrap_or_default();
        let op_ns = ctx.config.namespace.clone();
        let Some(sc) = self.storage_class(ctx).await? else {
            return Err(Error::persistent(
                "MissingStorageClass",
                format!("storage class {:?} not found", self.spec.storage_class_name),
            ));
        };
        let binding = binding(self, &sc);

        let class = match resolve_bucket_class(ctx, &binding.class_name, &claim_ns, &op_ns).await {
            Ok(class) => class,
            Err(e @ provisioner::Error::BucketClassNotReady { .. }) => {
                ctx.record(self, EventType::Warning, e.reason(), &e.to_string())
                    .await?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let (_, rpc) = connected_system(ctx, &op_ns).await?;
        let provisioner = Provisioner::new(rpc.as_ref());

        let object_bucket = ctx
            .get_cluster_opt::<ObjectBucket>(&self.object_bucket_name())
            .await?;
        let secret = ctx
            .get_opt::<corev1::Secret>(&self.name_any(), &claim_ns)
            .await?;

        let (bucket, keys) = match &object_bucket {
            Some(ob) => {
                let bucket = ob.bucket_name().unwrap_or(&binding.bucket).to_owned();
                let generation = class.ready_generation();
                if !ob.is_granted()
                    && self.synced_generation().is_some()
                    && self.synced_generation() != generation
                {
                    provisioner.update(&bucket, &class, Utc::now()).await?;
                }
                let keys = match (&secret, ob.account_name()) {
                    (None, Some(account)) => {
                        Some(account_keys(rpc.as_ref(), account, Vec::new()).await?)
                    }
                    _ => None,
                };
                (bucket, keys)
            }
            None => {
                let keys = self.bind_new(ctx, &provisioner, &binding, &class).await?;
                (binding.bucket.clone(), Some(keys))
            }
        };

        ctx.apply(&new_config_map(self, &bucket_endpoint(&op_ns, &bucket)), &claim_ns)
            .await?;
        if let Some(keys) = keys {
            ctx.apply(&credentials_secret(owned_meta(self), &keys), &claim_ns)
                .await?;
        }

        let generation = class
            .ready_generation()
            .map(|g| g.to_string())
            .unwrap_or_default();
        ctx.patch_merge(
            self,
            &serde_json::json!({
                "metadata": {"annotations": {BUCKET_CLASS_GENERATION_ANNOTATION: generation}},
                "spec": {"objectBucketName": self.object_bucket_name()},
            }),
        )
        .await?;

        Ok(Outcome::ready())
    }

    async fn finalize(&self, ctx: &Context) -> Result<(), Error> {
        let name = self.object_bucket_name();
        let Some(ob) = ctx.get_cluster_opt::<ObjectBucket>(&name).await? else {
            return Ok(());
        };

        if let (Some(rpc), Some(account)) = (
            teardown_client(ctx, &ctx.config.namespace).await?,
            ob.account_name(),
        ) {
            let provisioner = Provisioner::new(rpc.as_ref());
            match ob.bucket_name() {
                Some(bucket) if !ob.is_granted() => {
                    provisioner
                        .delete(bucket, account, ob.spec.reclaim_policy)
                        .await?
                }
                _ => provisioner.revoke(account).await?,
            }
        }

        ctx.delete_cluster::<ObjectBucket>(&name).await?;
        info!(claim = %self.name_any(), object_bucket = %name, "claim released");
        Ok(())
    }
}
