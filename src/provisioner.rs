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

//! Bucket provisioning for object bucket claims.
//!
//! [`Provisioner`] implements the four provisioner callbacks against the
//! managed system. It only talks to [`NoobaaApi`], so every path here can run
//! against the in-memory fake; Kubernetes lookups ([`resolve_bucket_class`],
//! [`check_deletion_mode`]) are kept separate and used by the claim reconciler.

use crate::context::{self, Context};
use crate::rpc::types::{
    AccessKeys, BucketClaimInfo, CacheConfig, CreateAccountParams, CreateBucketParams,
    CreateTierParams, CreateTieringPolicyParams, NamespaceBucketInfo, QuotaConfig, QuotaQuantity,
    QuotaSize, TierOrder, UpdateBucketParams,
};
use crate::rpc::{self, Classified, NoobaaApi};
use crate::types::{has_finalizer, is_deleting};
use crate::types::v1alpha1::GRACEFUL_FINALIZER;
use crate::types::v1alpha1::bucketclass::{BucketClass, NamespacePolicy, NamespacePolicyType, Quota};
use crate::types::v1alpha1::k8s::ReclaimPolicy;
use crate::types::v1alpha1::noobaa::NooBaa;
use crate::utils::quantity::{self, GIB, PIB, TIB};
use crate::validation;
use chrono::{DateTime, Utc};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

/// Domain of the scoped accounts created for claims.
pub const ACCOUNT_DOMAIN: &str = "noobaa.io";

const ACCOUNT_ALREADY_EXISTS: &str = "ACCOUNT_ALREADY_EXISTS";

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Rpc { source: rpc::Error },

    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(display("bucket {bucket} already exists and is not bound to this claim"))]
    BucketExists { bucket: String },

    #[snafu(display("system {name} is being deleted, new buckets are refused"))]
    DeletionMode { name: String },

    #[snafu(display("bucket class {name} not found in {namespaces:?}"))]
    BucketClassNotFound {
        name: String,
        namespaces: Vec<String>,
    },

    #[snafu(display("bucket class {name} is not ready"))]
    BucketClassNotReady { name: String },

    #[snafu(display("bucket class {name} is invalid: {source}"))]
    InvalidBucketClass {
        name: String,
        source: validation::Error,
    },

    #[snafu(display("account {account} has no access keys"))]
    MissingCredentials { account: String },
}

impl Error {
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            Error::BucketExists { .. }
                | Error::DeletionMode { .. }
                | Error::BucketClassNotFound { .. }
                | Error::InvalidBucketClass { .. }
        )
    }

    /// Event reason recorded on the claim.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Rpc { .. } => "RpcError",
            Error::Context { .. } => "KubernetesError",
            Error::BucketExists { .. } => "BucketExists",
            Error::DeletionMode { .. } => "DeletionMode",
            Error::BucketClassNotFound { .. } => "BucketClassNotFound",
            Error::BucketClassNotReady { .. } => "BucketClassNotReady",
            Error::InvalidBucketClass { .. } => "InvalidBucketClass",
            Error::MissingCredentials { .. } => "MissingCredentials",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub fn account_email(bucket: &str) -> String {
    format!("obc-account.{bucket}@{ACCOUNT_DOMAIN}")
}

/// Refuses new buckets while the system is being torn down.
pub fn check_deletion_mode(system: &NooBaa) -> Result<()> {
    if is_deleting(system) && has_finalizer(system, GRACEFUL_FINALIZER) {
        return DeletionModeSnafu { name: system.name() }.fail();
    }
    Ok(())
}

/// Finds the class in the claim's namespace, then in the operator's.
///
/// The class must be Ready.
pub async fn resolve_bucket_class(
    ctx: &Context,
    name: &str,
    claim_namespace: &str,
    operator_namespace: &str,
) -> Result<BucketClass> {
    let mut namespaces = vec![claim_namespace.to_owned()];
    if operator_namespace != claim_namespace {
        namespaces.push(operator_namespace.to_owned());
    }

    for ns in &namespaces {
        if let Some(class) = ctx.get_opt::<BucketClass>(name, ns).await? {
            if !class.phase().is_ready() {
                return BucketClassNotReadySnafu { name }.fail();
            }
            return Ok(class);
        }
    }

    BucketClassNotFoundSnafu { name, namespaces }.fail()
}

/// Quota in the largest binary unit that divides it, in whole GiB at least.
pub fn quota_config(quota: &Quota) -> std::result::Result<QuotaConfig, validation::Error> {
    validation::bucketclass::validate_quota(quota)?;

    let size = quota
        .max_size
        .as_deref()
        .map(|s| quantity::parse_bytes(s).map_err(|e| validation::Error::invalid(e.to_string())))
        .transpose()?
        .map(|bytes| {
            let (value, unit) = if bytes % PIB == 0 {
                (bytes / PIB, "P")
            } else if bytes % TIB == 0 {
                (bytes / TIB, "T")
            } else {
                (bytes / GIB, "G")
            };
            QuotaSize {
                value,
                unit: unit.to_owned(),
            }
        });

    let quantity = quota
        .max_objects
        .as_deref()
        .map(str::parse::<u64>)
        .transpose()
        .map_err(|e| validation::Error::invalid(e.to_string()))?
        .map(|value| QuotaQuantity { value });

    Ok(QuotaConfig { size, quantity })
}

/// Namespace bucket configuration for a namespace policy.
pub fn namespace_bucket(policy: &NamespacePolicy) -> NamespaceBucketInfo {
    match policy.type_ {
        NamespacePolicyType::Single => {
            let resource = policy.single.as_ref().map(|s| s.resource.clone());
            NamespaceBucketInfo {
                read_resources: resource.iter().cloned().collect(),
                write_resource: resource,
                caching: None,
            }
        }
        NamespacePolicyType::Multi => NamespaceBucketInfo {
            write_resource: policy.multi.as_ref().map(|m| m.write_resource.clone()),
            read_resources: policy
                .multi
                .as_ref()
                .map(|m| m.read_resources.clone())
                .unwrap_or_default(),
            caching: None,
        },
        NamespacePolicyType::Cache => {
            let cache = policy.cache.as_ref();
            let hub = cache.map(|c| c.hub_resource.clone());
            NamespaceBucketInfo {
                read_resources: hub.iter().cloned().collect(),
                write_resource: hub,
                caching: Some(CacheConfig {
                    ttl_ms: cache
                        .and_then(|c| c.caching.as_ref())
                        .map(|c| c.ttl)
                        .unwrap_or_default(),
                    prefix: cache
                        .and_then(|c| c.caching.as_ref())
                        .and_then(|c| c.prefix.clone()),
                }),
            }
        }
    }
}

/// Resource new objects of the scoped account land on.
fn default_resource(class: &BucketClass) -> Option<String> {
    if let Some(placement) = &class.spec.placement_policy {
        return placement
            .tiers
            .first()
            .and_then(|t| t.backing_stores.first())
            .cloned();
    }
    class
        .spec
        .namespace_policy
        .as_ref()
        .and_then(|p| namespace_bucket(p).write_resource)
}

/// What a claim asks for.
#[derive(Debug, Clone)]
pub struct BucketRequest<'a> {
    pub bucket_name: &'a str,
    pub claim_namespace: &'a str,
    pub class: &'a BucketClass,
}

/// A bucket bound to a claim, with the scoped account's credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundBucket {
    pub bucket_name: String,
    pub account: String,
    pub keys: AccessKeys,
}

pub struct Provisioner<'a> {
    rpc: &'a dyn NoobaaApi,
}

impl<'a> Provisioner<'a> {
    pub fn new(rpc: &'a dyn NoobaaApi) -> Self {
        Self { rpc }
    }

    /// Creates the bucket, its tiering policy and the scoped account.
    ///
    /// Safe to retry: a bucket already claimed from the same namespace is reused.
    pub async fn provision(&self, req: &BucketRequest<'_>, now: DateTime<Utc>) -> Result<BoundBucket> {
        let bucket = req.bucket_name;
        match self.rpc.read_bucket(bucket).await {
            Ok(existing) => {
                let ours = existing
                    .bucket_claim
                    .as_ref()
                    .is_some_and(|c| c.namespace == req.claim_namespace);
                if !ours {
                    return BucketExistsSnafu { bucket }.fail();
                }
                debug!(%bucket, "bucket already provisioned for this claim");
            }
            Err(e) if e.is_no_such() => self.create_bucket(req, now).await?,
            Err(e) => return Err(e.into()),
        }

        self.grant(req).await
    }

    async fn create_bucket(&self, req: &BucketRequest<'_>, now: DateTime<Utc>) -> Result<()> {
        let bucket = req.bucket_name;
        let class = req.class;
        let invalid = |source| Error::InvalidBucketClass {
            name: class.name(),
            source,
        };

        let mut params = CreateBucketParams {
            name: bucket.to_owned(),
            bucket_claim: Some(BucketClaimInfo {
                bucket_class: class.name(),
                namespace: req.claim_namespace.to_owned(),
            }),
            quota: class
                .spec
                .quota
                .as_ref()
                .map(quota_config)
                .transpose()
                .map_err(invalid)?,
            replication_policy: class
                .spec
                .replication_policy
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| invalid(validation::Error::invalid(format!("replication policy: {e}"))))?,
            ..Default::default()
        };

        if class.spec.placement_policy.is_some() {
            params.tiering = Some(self.create_tiering(bucket, class, now).await?);
        } else if let Some(policy) = &class.spec.namespace_policy {
            params.namespace = Some(namespace_bucket(policy));
        }

        info!(%bucket, class = %class.name(), "creating bucket");
        match self.rpc.create_bucket(params).await {
            Ok(()) => Ok(()),
            Err(e) if e.classify() == Classified::BucketAlreadyExists => {
                BucketExistsSnafu { bucket }.fail()
            }
            Err(e) => Err(e.into()),
        }
    }

    /// One tier per placement tier, then a policy listing them in order.
    async fn create_tiering(
        &self,
        bucket: &str,
        class: &BucketClass,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let ts = now.timestamp();
        let policy_name = format!("{bucket}.{ts}");
        let mut order = Vec::new();

        let tiers = class
            .spec
            .placement_policy
            .iter()
            .flat_map(|p| p.tiers.iter());
        for (i, tier) in tiers.enumerate() {
            let name = format!("{bucket}.{ts}.{i}");
            self.rpc
                .create_tier(CreateTierParams {
                    name: name.clone(),
                    attached_pools: tier.backing_stores.clone(),
                    data_placement: tier.placement.unwrap_or_default().data_placement().to_owned(),
                })
                .await?;
            order.push(TierOrder {
                order: i,
                tier: name,
                spillover: false,
                disabled: false,
            });
        }

        self.rpc
            .create_tiering_policy(CreateTieringPolicyParams {
                name: policy_name.clone(),
                tiers: order,
            })
            .await?;
        Ok(policy_name)
    }

    /// Creates (or reuses) the scoped account for an existing bucket.
    pub async fn grant(&self, req: &BucketRequest<'_>) -> Result<BoundBucket> {
        let bucket = req.bucket_name;
        self.rpc.read_bucket(bucket).await?;

        let email = account_email(bucket);
        let params = CreateAccountParams {
            name: email.clone(),
            email: email.clone(),
            default_resource: default_resource(req.class),
            has_login: false,
            s3_access: true,
            allow_bucket_creation: false,
            bucket_claim_owner: Some(bucket.to_owned()),
            nsfs_account_config: None,
        };
        let keys = ensure_account(self.rpc, params).await?;

        Ok(BoundBucket {
            bucket_name: bucket.to_owned(),
            account: email,
            keys,
        })
    }

    /// Refreshes quota and tiering after the class changed.
    pub async fn update(&self, bucket: &str, class: &BucketClass, now: DateTime<Utc>) -> Result<()> {
        let quota = class
            .spec
            .quota
            .as_ref()
            .map(quota_config)
            .transpose()
            .context(InvalidBucketClassSnafu { name: class.name() })?;
        let tiering = match class.spec.placement_policy {
            Some(_) => Some(self.create_tiering(bucket, class, now).await?),
            None => None,
        };
        info!(%bucket, class = %class.name(), "updating bucket");
        self.rpc
            .update_bucket(UpdateBucketParams {
                name: bucket.to_owned(),
                tiering,
                quota,
            })
            .await?;
        Ok(())
    }

    /// Deletes the bucket when the reclaim policy says so, and always the account.
    pub async fn delete(&self, bucket: &str, account: &str, reclaim: ReclaimPolicy) -> Result<()> {
        if reclaim.deletes_data() {
            info!(%bucket, "deleting bucket and objects");
            rpc::ignore_no_such(self.rpc.delete_bucket_and_objects(bucket).await)?;
        }
        self.revoke(account).await
    }

    /// Deletes only the scoped account.
    pub async fn revoke(&self, account: &str) -> Result<()> {
        info!(%account, "deleting scoped account");
        rpc::ignore_no_such(self.rpc.delete_account(account).await)?;
        Ok(())
    }
}

/// Creates the account, or adopts an existing one, and returns one key pair.
///
/// The create reply may omit the keys, in which case the account is read once.
pub async fn ensure_account(rpc: &dyn NoobaaApi, params: CreateAccountParams) -> Result<AccessKeys> {
    let email = params.email.clone();
    let reply_keys = match rpc.create_account(params).await {
        Ok(reply) => {
            info!(account = %email, "created account");
            reply.access_keys
        }
        Err(e) if e.is_code(ACCOUNT_ALREADY_EXISTS) => {
            debug!(account = %email, "account exists");
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };
    account_keys(rpc, &email, reply_keys).await
}

/// First key pair of `reply_keys`, falling back to a single `read_account`.
pub async fn account_keys(
    rpc: &dyn NoobaaApi,
    email: &str,
    reply_keys: Vec<AccessKeys>,
) -> Result<AccessKeys> {
    if let Some(keys) = reply_keys.into_iter().next() {
        return Ok(keys);
    }
    let account = rpc.read_account(email).await?;
    account
        .access_keys
        .into_iter()
        .next()
        .ok_or_else(|| Error::MissingCredentials {
            account: email.to_owned(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rpc::fake::FakeNoobaa;
    use crate::rpc::types::POOL_TYPE_HOSTS;
    use crate::tests::{
        create_cache_bucket_class, create_placement_bucket_class, create_test_noobaa, k8s_time,
    };
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn fake_with_pools(pools: &[&str]) -> FakeNoobaa {
        let fake = FakeNoobaa::new();
        for pool in pools {
            fake.add_pool(pool, POOL_TYPE_HOSTS, "OPTIMAL");
        }
        fake
    }

    #[tokio::test]
    async fn test_provision_creates_tiers_policy_bucket_and_account() {
        let fake = fake_with_pools(&["bs1", "bs2"]);
        let class = create_placement_bucket_class("bc", &[&["bs1"], &["bs2"]]);
        let req = BucketRequest {
            bucket_name: "photos",
            claim_namespace: "apps",
            class: &class,
        };

        let bound = Provisioner::new(&fake).provision(&req, now()).await.unwrap();
        let ts = now().timestamp();

        assert_eq!(bound.account, "obc-account.photos@noobaa.io");
        assert!(!bound.keys.access_key.is_empty());
        fake.with(|s| {
            assert!(s.tiers.contains_key(&format!("photos.{ts}.0")));
            assert!(s.tiers.contains_key(&format!("photos.{ts}.1")));
            let policy = &s.policies[&format!("photos.{ts}")];
            assert_eq!(policy.tiers.len(), 2);
            assert_eq!(policy.tiers[1].order, 1);
            let bucket = &s.buckets["photos"];
            assert_eq!(bucket.tiering.as_ref().unwrap().name, format!("photos.{ts}"));
            let account = &s.accounts["obc-account.photos@noobaa.io"];
            assert_eq!(account.default_resource.as_deref(), Some("bs1"));
            assert_eq!(account.bucket_claim_owner.as_deref(), Some("photos"));
            assert!(!account.allow_bucket_creation);
        });
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let fake = fake_with_pools(&["bs1"]);
        let class = create_placement_bucket_class("bc", &[&["bs1"]]);
        let req = BucketRequest {
            bucket_name: "photos",
            claim_namespace: "apps",
            class: &class,
        };
        let provisioner = Provisioner::new(&fake);

        let first = provisioner.provision(&req, now()).await.unwrap();
        let second = provisioner.provision(&req, now()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fake.count("create_bucket"), 1);
        assert_eq!(fake.count("read_account"), 1);
    }

    #[tokio::test]
    async fn test_foreign_bucket_is_bucket_exists() {
        let fake = fake_with_pools(&["bs1"]);
        let class = create_placement_bucket_class("bc", &[&["bs1"]]);
        let provisioner = Provisioner::new(&fake);
        let mine = BucketRequest {
            bucket_name: "photos",
            claim_namespace: "apps",
            class: &class,
        };
        provisioner.provision(&mine, now()).await.unwrap();

        let theirs = BucketRequest {
            claim_namespace: "other",
            ..mine
        };
        let err = provisioner.provision(&theirs, now()).await.unwrap_err();
        assert!(matches!(err, Error::BucketExists { .. }));
        assert!(err.is_persistent());
    }

    #[tokio::test]
    async fn test_cache_class_creates_namespace_bucket() {
        let fake = FakeNoobaa::new();
        let class = create_cache_bucket_class("bc", "hub", 60_000, Some("pre"));
        let req = BucketRequest {
            bucket_name: "cached",
            claim_namespace: "apps",
            class: &class,
        };
        Provisioner::new(&fake).provision(&req, now()).await.unwrap();

        fake.with(|s| {
            let created = &s.created_buckets[0];
            assert!(created.tiering.is_none());
            let ns = created.namespace.as_ref().unwrap();
            assert_eq!(ns.write_resource.as_deref(), Some("hub"));
            assert_eq!(ns.read_resources, vec!["hub".to_owned()]);
            let caching = ns.caching.as_ref().unwrap();
            assert_eq!(caching.ttl_ms, 60_000);
            assert_eq!(caching.prefix.as_deref(), Some("pre"));
        });
    }

    #[tokio::test]
    async fn test_keys_fall_back_to_read_account() {
        let fake = FakeNoobaa::new();
        fake.with(|s| s.omit_keys_on_create = true);
        let params = CreateAccountParams {
            name: "a@noobaa.io".to_owned(),
            email: "a@noobaa.io".to_owned(),
            s3_access: true,
            ..Default::default()
        };
        let keys = ensure_account(&fake, params).await.unwrap();
        assert!(!keys.access_key.is_empty());
        assert_eq!(fake.count("read_account"), 1);
    }

    #[tokio::test]
    async fn test_delete_honours_reclaim_policy() {
        let fake = fake_with_pools(&["bs1"]);
        let class = create_placement_bucket_class("bc", &[&["bs1"]]);
        let req = BucketRequest {
            bucket_name: "photos",
            claim_namespace: "apps",
            class: &class,
        };
        let provisioner = Provisioner::new(&fake);
        let bound = provisioner.provision(&req, now()).await.unwrap();

        provisioner
            .delete("photos", &bound.account, ReclaimPolicy::Retain)
            .await
            .unwrap();
        fake.with(|s| {
            assert!(s.buckets.contains_key("photos"));
            assert!(s.accounts.is_empty());
        });

        provisioner
            .delete("photos", &bound.account, ReclaimPolicy::Delete)
            .await
            .unwrap();
        fake.with(|s| assert!(s.buckets.is_empty()));
    }

    #[tokio::test]
    async fn test_revoke_tolerates_missing_account() {
        let fake = FakeNoobaa::new();
        Provisioner::new(&fake).revoke("gone@noobaa.io").await.unwrap();
        assert_eq!(fake.count("delete_account"), 1);
    }

    #[test]
    fn test_quota_units() {
        let quota = Quota {
            max_size: Some("2Ti".to_owned()),
            max_objects: Some("1000".to_owned()),
        };
        let config = quota_config(&quota).unwrap();
        let size = config.size.unwrap();
        assert_eq!((size.value, size.unit.as_str()), (2, "T"));
        assert_eq!(config.quantity.unwrap().value, 1000);

        let small = Quota {
            max_size: Some("10Mi".to_owned()),
            max_objects: None,
        };
        assert!(quota_config(&small).is_err());
    }

    #[test]
    fn test_deletion_mode() {
        let mut system = create_test_noobaa();
        system.metadata.finalizers = Some(vec![GRACEFUL_FINALIZER.to_owned()]);
        assert!(check_deletion_mode(&system).is_ok());

        system.metadata.deletion_timestamp = Some(k8s_time(Utc::now()));
        let err = check_deletion_mode(&system).unwrap_err();
        assert!(err.is_persistent());
    }
}
