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

//! The NooBaa system resource.
//!
//! Phases run in order: Verifying checks the spec, Creating applies the
//! secrets, root keys and workloads, Connecting waits for the core and
//! bootstraps the operator's credentials, Configuring fills the admin
//! secret and the default store and class.

use super::{Error, ObjectStatus, Outcome, Reconciler};
use crate::context::{Context, OPERATOR_TOKEN_KEY, secret_string};
use crate::kms::{self, BackendError, Projector, RotationPolicy};
use crate::rpc::NoobaaApi;
use crate::rpc::types::{AccessKeys, CreateAuthParams, CreateSystemParams};
use crate::types::v1alpha1::backingstore::{BackingStore, BackingStoreSpec, DEFAULT_BACKING_STORE};
use crate::types::v1alpha1::bucketclass::{
    BucketClass, BucketClassSpec, DEFAULT_BUCKET_CLASS, PlacementPolicy, Tier,
};
use crate::types::v1alpha1::condition::{Condition, ConditionStatus, ConditionType, set_condition};
use crate::types::v1alpha1::namespacestore::NamespaceStore;
use crate::types::v1alpha1::noobaa::{
    ADMIN_SECRET, AccountsStatus, CORE_DEPLOYMENT, ENDPOINT_DEPLOYMENT, EndpointsStatus,
    MGMT_SERVICE, NooBaa, NooBaaStatus, OPERATOR_SECRET, ROOT_KEY_VOLUME_SECRET, S3_SERVICE,
    ServiceStatus, ServicesStatus, UserStatus,
};
use crate::types::v1alpha1::phase::SystemPhase;
use crate::types::v1alpha1::store::{PvPoolSpec, StoreType};
use crate::types::is_deleting;
use crate::types::v1alpha1::GRACEFUL_FINALIZER;
use crate::utils::random;
use crate::validation;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, GroupVersionKind, Patch, PatchParams};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Login of the system's first account.
pub const ADMIN_EMAIL: &str = "admin@noobaa.io";

const DEFAULT_STORE_VOLUME_SIZE: &str = "50Gi";
const PASSWORD_LEN: usize = 16;
const SECRET_LEN: usize = 32;

impl ObjectStatus for NooBaaStatus {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }

    fn mark_ready(&mut self) {
        self.phase = SystemPhase::Ready;
    }

    fn mark_rejected(&mut self) {
        self.phase = SystemPhase::Rejected;
    }

    fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.observed_generation = generation;
    }
}

/// The first system in `namespace`, if any.
pub async fn find_system(ctx: &Context, namespace: &str) -> Result<Option<NooBaa>, Error> {
    Ok(ctx.list::<NooBaa>(namespace).await?.into_iter().next())
}

/// The system of `namespace` and an RPC client for it, for store reconcilers.
pub async fn connected_system(
    ctx: &Context,
    namespace: &str,
) -> Result<(NooBaa, Arc<dyn NoobaaApi>), Error> {
    let Some(system) = find_system(ctx, namespace).await? else {
        return Err(Error::persistent(
            "MissingSystem",
            format!("no NooBaa system in namespace {namespace}"),
        ));
    };
    if is_deleting(&system) {
        return Err(Error::persistent(
            "SystemDeleting",
            format!("system {} is being deleted", system.name()),
        ));
    }
    let Some(rpc) = ctx.rpc(namespace).await? else {
        return Err(Error::transient(
            "SystemNotReady",
            format!("system {} has not been bootstrapped yet", system.name()),
        ));
    };
    Ok((system, rpc))
}

/// RPC client for tearing down a store's remote side; `None` when the
/// system is gone or going, since its resources go with it.
pub async fn teardown_client(
    ctx: &Context,
    namespace: &str,
) -> Result<Option<Arc<dyn NoobaaApi>>, Error> {
    match find_system(ctx, namespace).await? {
        Some(system) if !is_deleting(&system) => Ok(ctx.rpc(namespace).await?),
        _ => Ok(None),
    }
}

/// Pv-pool store with one volume, owned by the system.
pub fn new_default_backing_store(system: &NooBaa) -> BackingStore {
    let mut store = BackingStore::new(
        DEFAULT_BACKING_STORE,
        BackingStoreSpec {
            type_: <&str>::from(StoreType::PvPool).to_owned(),
            pv_pool: Some(PvPoolSpec {
                num_volumes: 1,
                resources: Some(corev1::VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_owned(),
                        Quantity(DEFAULT_STORE_VOLUME_SIZE.to_owned()),
                    )])),
                    ..Default::default()
                }),
                storage_class: system.spec.db_storage_class.clone(),
                secret: None,
            }),
            ..Default::default()
        },
    );
    store.metadata = system.owned_meta(DEFAULT_BACKING_STORE);
    store
}

/// Single tier class over the default backing store.
pub fn new_default_bucket_class(system: &NooBaa) -> BucketClass {
    let mut class = BucketClass::new(
        DEFAULT_BUCKET_CLASS,
        BucketClassSpec {
            placement_policy: Some(PlacementPolicy {
                tiers: vec![Tier {
                    placement: None,
                    backing_stores: vec![DEFAULT_BACKING_STORE.to_owned()],
                }],
            }),
            ..Default::default()
        },
    );
    class.metadata = system.owned_meta(DEFAULT_BUCKET_CLASS);
    class
}

fn services_status(system: &NooBaa) -> ServicesStatus {
    ServicesStatus {
        service_mgmt: ServiceStatus {
            internal_dns: system.internal_dns(MGMT_SERVICE),
            ..Default::default()
        },
        service_s3: ServiceStatus {
            internal_dns: system.internal_dns(S3_SERVICE),
            external_dns: system
                .spec
                .ingress_host
                .iter()
                .map(|h| format!("https://{h}"))
                .collect(),
            ..Default::default()
        },
    }
}

fn ready_replicas(deployment: Option<&Deployment>) -> i32 {
    deployment
        .and_then(|d| d.status.as_ref())
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

fn route_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("route.openshift.io", "v1", "Route")
}

/// Writes the root keys into the volume Secret mounted by the core.
struct VolumeProjector<'a> {
    api: Api<Secret>,
    system: &'a NooBaa,
}

impl VolumeProjector<'_> {
    async fn write(&self, data: BTreeMap<String, String>) -> Result<(), BackendError> {
        let mut secret = self.system.new_root_key_volume_secret(BTreeMap::new());
        secret.string_data = None;
        secret.data = Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        );
        self.api
            .patch(
                ROOT_KEY_VOLUME_SECRET,
                &PatchParams::apply(crate::context::FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await
            .context(kms::KubeSnafu)?;
        Ok(())
    }
}

#[async_trait]
impl Projector for VolumeProjector<'_> {
    async fn project_string(&self, value: &str) -> Result<(), BackendError> {
        self.write(BTreeMap::from([(kms::SINGLE_KEY.to_owned(), value.to_owned())]))
            .await
    }

    async fn project_map(&self, keys: &BTreeMap<String, String>) -> Result<(), BackendError> {
        self.write(keys.clone()).await
    }
}

/// Token the operator talks to the core with.
///
/// Signs in with the admin credentials first, so a system created by an
/// earlier interrupted pass is reused. Only a structured rejection of the
/// sign-in leads to `create_system`.
pub(super) async fn operator_token(
    rpc: &dyn NoobaaApi,
    system: &str,
    email: &str,
    password: &str,
) -> Result<String, Error> {
    let signed_in = rpc
        .create_auth(CreateAuthParams {
            system: system.to_owned(),
            email: email.to_owned(),
            password: password.to_owned(),
        })
        .await;
    match signed_in {
        Ok(reply) => {
            info!(%system, "system exists in the core, reusing it");
            return Ok(reply.token);
        }
        Err(err) if err.code().is_some() => {
            debug!(%system, error = %err, "sign in rejected");
        }
        Err(err) => return Err(err.into()),
    }

    info!(%system, "creating system in the core");
    let reply = rpc
        .create_system(CreateSystemParams {
            name: system.to_owned(),
            email: email.to_owned(),
            password: password.to_owned(),
        })
        .await?;
    Ok(if reply.operator_token.is_empty() {
        reply.token
    } else {
        reply.operator_token
    })
}

impl NooBaa {
    async fn ensure_secret(&self, ctx: &Context, ns: &str, secret: Secret) -> Result<(), Error> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        if ctx.get_opt::<Secret>(&name, ns).await?.is_none() {
            info!(system = %self.name(), secret = %name, "creating secret");
            ctx.create(&secret, ns).await?;
        }
        Ok(())
    }

    /// Syncs the root keys; returns the delay until the next rotation.
    async fn reconcile_kms(
        &self,
        ctx: &Context,
        ns: &str,
        status: &mut NooBaaStatus,
    ) -> Result<Option<Duration>, Error> {
        let provider = kms::provider(self.kms());
        let result = async {
            let provider = provider?;
            set_condition(
                &mut status.conditions,
                ConditionType::KmsType,
                ConditionStatus::True,
                &provider.to_string(),
                "",
            );
            let policy = RotationPolicy::for_system(self)?;
            let driver = kms::driver(ctx.client.clone(), self).await?;
            let projector = VolumeProjector {
                api: Api::namespaced(ctx.client.clone(), ns),
                system: self,
            };
            kms::sync_root_keys(driver.as_ref(), &projector, &self.name(), &policy, Utc::now())
                .await
        }
        .await;

        match result {
            Ok(sync) => {
                set_condition(
                    &mut status.conditions,
                    ConditionType::KmsStatus,
                    ConditionStatus::True,
                    &sync.status.to_string(),
                    "root keys are in sync",
                );
                if let Some(last) = sync.last_rotate {
                    status.last_key_rotate_time =
                        Some(last.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
                }
                Ok(sync
                    .next_rotation
                    .and_then(|next| (next - Utc::now()).to_std().ok()))
            }
            Err(e) => {
                set_condition(
                    &mut status.conditions,
                    ConditionType::KmsStatus,
                    ConditionStatus::False,
                    &e.status().to_string(),
                    &e.to_string(),
                );
                Err(e.into())
            }
        }
    }

    async fn create(
        &self,
        ctx: &Context,
        ns: &str,
        status: &mut NooBaaStatus,
    ) -> Result<Option<Duration>, Error> {
        status.phase = SystemPhase::Creating;

        let server_secret = self.new_server_secret(
            &random::alphanumeric(SECRET_LEN),
            &random::alphanumeric(SECRET_LEN),
        );
        self.ensure_secret(ctx, ns, server_secret).await?;
        self.ensure_secret(ctx, ns, self.new_db_secret(&random::alphanumeric(SECRET_LEN)))
            .await?;

        let next_rotation = self.reconcile_kms(ctx, ns, status).await?;

        let image = self.desired_image(&ctx.config.core_image);
        let db_image = self
            .spec
            .db_image
            .clone()
            .unwrap_or_else(|| ctx.config.db_image.clone());
        ctx.apply(&self.new_db_service(), ns).await?;
        ctx.apply(&self.new_db_statefulset(&db_image), ns).await?;
        ctx.apply(&self.new_mgmt_service(), ns).await?;
        ctx.apply(&self.new_s3_service(), ns).await?;
        ctx.apply(&self.new_core_deployment(&image), ns).await?;

        let nsfs_stores: Vec<NamespaceStore> = ctx
            .list::<NamespaceStore>(ns)
            .await?
            .into_iter()
            .filter(|s| s.spec.is_nsfs())
            .collect();
        ctx.apply(&self.new_endpoint_deployment(&image, &nsfs_stores), ns)
            .await?;
        ctx.apply(&self.new_endpoint_hpa(), ns).await?;

        if ctx.capabilities.routes {
            ctx.apply_dynamic(&route_gvk(), &self.new_s3_route_manifest(), ns)
                .await?;
        } else if let Some(ingress) = self.new_s3_ingress() {
            ctx.apply(&ingress, ns).await?;
        }

        if self.actual_image() != Some(image.as_str()) {
            if self.image_drifted(&ctx.config.core_image) {
                info!(system = %self.name(), %image, "image changed, rolling the system");
            }
            status.actual_image = Some(image);
            status.phase = SystemPhase::Configuring;
        }
        Ok(next_rotation)
    }

    /// Creates the admin and operator secrets, creating the system in the core when needed.
    async fn bootstrap(&self, ctx: &Context, ns: &str) -> Result<(), Error> {
        let admin = match ctx.get_opt::<Secret>(ADMIN_SECRET, ns).await? {
            Some(secret) => secret,
            None => {
                let secret = self.new_admin_secret(
                    ADMIN_EMAIL,
                    &random::alphanumeric(PASSWORD_LEN),
                    &self.name(),
                    None,
                    None,
                );
                ctx.create(&secret, ns).await?
            }
        };
        let password = secret_string(&admin, "password")?;

        let rpc = ctx.rpc_client(ns, None)?;
        let token = operator_token(rpc.as_ref(), &self.name(), ADMIN_EMAIL, &password).await?;
        ctx.apply(&self.new_operator_secret(&token), ns).await?;
        Ok(())
    }

    /// `Some` while the core is not reachable yet.
    async fn connect(
        &self,
        ctx: &Context,
        ns: &str,
        status: &mut NooBaaStatus,
    ) -> Result<Option<Outcome>, Error> {
        if status.phase != SystemPhase::Configuring {
            status.phase = SystemPhase::Connecting;
        }
        let core = ctx.get_opt::<Deployment>(CORE_DEPLOYMENT, ns).await?;
        if ready_replicas(core.as_ref()) < 1 {
            return Ok(Some(Outcome::waiting(
                "CoreNotReady",
                format!("waiting for deployment {CORE_DEPLOYMENT}"),
            )));
        }

        if ctx
            .secret_value(OPERATOR_SECRET, ns, OPERATOR_TOKEN_KEY)
            .await?
            .is_none()
        {
            self.bootstrap(ctx, ns).await?;
        }
        let Some(rpc) = ctx.rpc(ns).await? else {
            return Ok(Some(Outcome::waiting(
                "MissingOperatorToken",
                format!("secret {OPERATOR_SECRET} has no token yet"),
            )));
        };
        let info = rpc.read_system().await?;
        debug!(system = %info.name, version = %info.version, "connected");
        Ok(None)
    }

    async fn configure(
        &self,
        ctx: &Context,
        ns: &str,
        status: &mut NooBaaStatus,
    ) -> Result<(), Error> {
        status.phase = SystemPhase::Configuring;
        let Some(rpc) = ctx.rpc(ns).await? else {
            return Err(Error::transient(
                "MissingOperatorToken",
                format!("secret {OPERATOR_SECRET} has no token"),
            ));
        };

        let admin = ctx.get::<Secret>(ADMIN_SECRET, ns).await?;
        let account = rpc.read_account(ADMIN_EMAIL).await?;
        if let Some(AccessKeys {
            access_key,
            secret_key,
        }) = account.access_keys.first()
        {
            let password = secret_string(&admin, "password")?;
            ctx.apply(
                &self.new_admin_secret(
                    ADMIN_EMAIL,
                    &password,
                    &self.name(),
                    Some(access_key),
                    Some(secret_key),
                ),
                ns,
            )
            .await?;
        }

        if !self.spec.manual_default_backing_store {
            if ctx
                .get_opt::<BackingStore>(DEFAULT_BACKING_STORE, ns)
                .await?
                .is_none()
            {
                info!(system = %self.name(), "creating default backing store");
                ctx.create(&new_default_backing_store(self), ns).await?;
            }
            if ctx
                .get_opt::<BucketClass>(DEFAULT_BUCKET_CLASS, ns)
                .await?
                .is_none()
            {
                info!(system = %self.name(), "creating default bucket class");
                ctx.create(&new_default_bucket_class(self), ns).await?;
            }
        }

        let endpoints = ctx.get_opt::<Deployment>(ENDPOINT_DEPLOYMENT, ns).await?;
        status.services = Some(services_status(self));
        status.endpoints = Some(EndpointsStatus {
            ready_count: ready_replicas(endpoints.as_ref()),
            virtual_hosts: self
                .spec
                .endpoints
                .as_ref()
                .map(|e| e.additional_virtual_hosts.clone())
                .unwrap_or_default(),
        });
        status.accounts = Some(AccountsStatus {
            admin: UserStatus {
                secret_ref: corev1::SecretReference {
                    name: Some(ADMIN_SECRET.to_owned()),
                    namespace: Some(ns.to_owned()),
                },
            },
        });
        status.readme = self.readme();
        Ok(())
    }
}

#[async_trait]
impl Reconciler for NooBaa {
    type Status = NooBaaStatus;

    const FINALIZER: &'static str = GRACEFUL_FINALIZER;

    fn status(&self) -> Option<&NooBaaStatus> {
        self.status.as_ref()
    }

    async fn apply(&self, ctx: &Context, status: &mut NooBaaStatus) -> Result<Outcome, Error> {
        let ns = self.namespace()?;

        status.phase = SystemPhase::Verifying;
        validation::system::validate(self)?;

        let next_rotation = self.create(ctx, &ns, status).await?;

        if let Some(waiting) = self.connect(ctx, &ns, status).await? {
            return Ok(waiting);
        }

        self.configure(ctx, &ns, status).await?;

        info!(system = %self.name(), "system is ready");
        Ok(Outcome::Ready {
            resync: next_rotation,
        })
    }

    async fn finalize(&self, _ctx: &Context) -> Result<(), Error> {
        validation::system::validate_delete(self).map_err(|e| {
            Error::persistent("DeletionNotAllowed", e.message().to_owned())
        })?;
        info!(system = %self.name(), "system deletion allowed by cleanup policy");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::reconcile::{Severity, classify};
    use crate::tests::create_test_noobaa;
    use crate::types::v1alpha1::condition::find_condition;
    use kube::runtime::controller::Action;

    #[tokio::test]
    async fn test_bootstrap_reuses_system_created_by_interrupted_pass() {
        let fake = crate::rpc::fake::FakeNoobaa::new();

        let first = operator_token(&fake, "noobaa", ADMIN_EMAIL, "secret").await.unwrap();
        assert_eq!(first, "operator-token-noobaa");
        assert_eq!(fake.count("create_system"), 1);

        // the operator secret write was lost; the next pass signs in instead of recreating
        let second = operator_token(&fake, "noobaa", ADMIN_EMAIL, "secret").await.unwrap();
        assert_eq!(second, "auth-token-noobaa");
        assert_eq!(fake.count("create_system"), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_creates_after_rejected_sign_in() {
        let fake = crate::rpc::fake::FakeNoobaa::new();
        fake.fail_next("create_auth", "UNAUTHORIZED");
        operator_token(&fake, "noobaa", ADMIN_EMAIL, "secret").await.unwrap();
        assert_eq!(fake.calls(), vec!["create_auth", "create_system"]);
    }

    #[tokio::test]
    async fn test_bootstrap_waits_while_core_unreachable() {
        let fake = crate::rpc::fake::FakeNoobaa::new();
        fake.with(|s| s.unreachable = true);
        let err = operator_token(&fake, "noobaa", ADMIN_EMAIL, "secret").await.unwrap_err();
        assert_eq!(err.severity(), Severity::Transient);
        assert_eq!(fake.count("create_system"), 0);
    }

    #[test]
    fn test_default_store_and_class_are_owned() {
        let system = create_test_noobaa();
        let store = new_default_backing_store(&system);
        assert_eq!(store.metadata.name.as_deref(), Some(DEFAULT_BACKING_STORE));
        assert!(crate::types::is_owned_by(&store, "noobaa-uid"));
        assert_eq!(store.spec.pv_pool.as_ref().unwrap().num_volumes, 1);
        assert!(store.spec.kind().is_ok());

        let class = new_default_bucket_class(&system);
        assert_eq!(
            class.spec.referenced_backing_stores(),
            vec![DEFAULT_BACKING_STORE]
        );
        assert!(validation::bucketclass::validate(&class, &[]).is_ok());
    }

    #[test]
    fn test_services_status_reports_ingress_host() {
        let mut system = create_test_noobaa();
        system.spec.ingress_host = Some("s3.example.com".to_string());
        let services = services_status(&system);
        assert_eq!(
            services.service_mgmt.internal_dns,
            vec!["https://noobaa-mgmt.noobaa.svc:443"]
        );
        assert_eq!(services.service_s3.external_dns, vec!["https://s3.example.com"]);
    }

    #[test]
    fn test_ready_replicas() {
        assert_eq!(ready_replicas(None), 0);
        let deployment = Deployment {
            status: Some(k8s_openapi::api::apps::v1::DeploymentStatus {
                ready_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(ready_replicas(Some(&deployment)), 1);
    }

    #[test]
    fn test_rejected_system_status() {
        let mut status = NooBaaStatus {
            phase: SystemPhase::Creating,
            ..Default::default()
        };
        let err: Error = kms::Error::UnknownProvider {
            provider: "ibm-kp".to_string(),
        }
        .into();
        assert_eq!(err.severity(), Severity::Persistent);
        let action = classify(&mut status, &Err(err));
        assert_eq!(action, Action::await_change());
        assert_eq!(status.phase, SystemPhase::Rejected);
        assert!(find_condition(&status.conditions, ConditionType::Degraded).is_some());
    }

    #[test]
    fn test_deletion_requires_cleanup_policy() {
        let system = create_test_noobaa();
        assert!(validation::system::validate_delete(&system).is_err());
    }
}
