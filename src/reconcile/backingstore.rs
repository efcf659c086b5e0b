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

//! BackingStore: a pool of the managed system backed by cloud storage or
//! by agent pods on persistent volumes.

use super::connection::{
    RemoteKind, connection_params, deletion_blocked, ensure_connection, load_secret, teardown,
};
use super::system::{connected_system, teardown_client};
use super::{Error, ObjectStatus, Outcome, Reconciler};
use crate::context::Context;
use crate::rpc::NoobaaApi;
use crate::rpc::types::{
    CreateCloudPoolParams, CreateHostsPoolParams, HostConfig, SystemInfo, UpdateHostsPoolParams,
};
use crate::types::v1alpha1::backingstore::{BackingStore, BackingStoreStatus, StoreMode};
use crate::types::v1alpha1::condition::Condition;
use crate::types::v1alpha1::noobaa::NooBaa;
use crate::types::v1alpha1::phase::Phase;
use crate::types::v1alpha1::store::{KindError, PvPoolSpec, StoreKind};
use crate::utils::quantity::{self, GIB};
use crate::utils::time::now_rfc3339;
use crate::validation;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Secret;
use kube::Resource;
use tracing::info;

/// Pool mode of a healthy store.
pub const MODE_OPTIMAL: &str = "OPTIMAL";

/// Pool modes that will not heal without a spec or credentials change.
pub const REJECTING_MODES: [&str; 3] = ["IO_ERRORS", "STORAGE_NOT_EXIST", "AUTH_FAILED"];

const DEFAULT_VOLUME_SIZE: u64 = 50 * GIB;

impl ObjectStatus for BackingStoreStatus {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }

    fn mark_ready(&mut self) {
        self.phase = Phase::Ready;
    }

    fn mark_rejected(&mut self) {
        self.phase = Phase::Rejected;
    }

    fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.observed_generation = generation;
    }
}

pub(super) fn invalid_type(err: KindError) -> Error {
    Error::persistent("InvalidType", format!("{err:?}"))
}

/// Maps a mode reported by the managed system onto the reconcile outcome.
pub fn mode_outcome(resource: &str, mode: &str) -> Result<Outcome, Error> {
    if mode == MODE_OPTIMAL {
        return Ok(Outcome::ready());
    }
    if REJECTING_MODES.contains(&mode) {
        return Err(Error::persistent(
            mode,
            format!("{resource} reported mode {mode}"),
        ));
    }
    Ok(Outcome::waiting(
        "ModeNotOptimal",
        format!("{resource} is in mode {mode}"),
    ))
}

/// Phase to report after a mode check. A mode that is neither healthy nor
/// rejecting leaves a settled store where it was.
pub(super) fn phase_after_mode(outcome: &Outcome, last: Phase, current: Phase) -> Phase {
    match (outcome, last) {
        (Outcome::Waiting { .. }, Phase::Ready | Phase::Rejected) => last,
        _ => current,
    }
}

pub(super) fn record_mode(status: &mut BackingStoreStatus, mode: &str) {
    if status.mode.as_ref().map(|m| m.mode_code.as_str()) != Some(mode) {
        status.mode = Some(StoreMode {
            mode_code: mode.to_owned(),
            time_stamp: Some(now_rfc3339()),
        });
    }
}

fn volume_size(pv: &PvPoolSpec) -> Result<u64, Error> {
    pv.requested_storage()
        .map(quantity::parse_bytes)
        .transpose()
        .map_err(|e| Error::persistent("InvalidVolumeSize", e.to_string()))
        .map(|size| size.unwrap_or(DEFAULT_VOLUME_SIZE))
}

/// Creates the hosts pool, or grows it when more volumes were requested.
///
/// Shrinking is never attempted.
pub(super) async fn ensure_hosts_pool(
    rpc: &dyn NoobaaApi,
    info: &SystemInfo,
    name: &str,
    pv: &PvPoolSpec,
) -> Result<(), Error> {
    match info.pool(name) {
        None => {
            info!(store = %name, volumes = pv.num_volumes, "creating hosts pool");
            rpc.create_hosts_pool(CreateHostsPoolParams {
                name: name.to_owned(),
                is_managed: true,
                host_count: pv.num_volumes,
                host_config: HostConfig {
                    volume_size: volume_size(pv)?,
                },
            })
            .await?;
        }
        Some(pool)
            if pool
                .hosts_info
                .as_ref()
                .is_some_and(|h| h.configured_count < pv.num_volumes) =>
        {
            info!(store = %name, volumes = pv.num_volumes, "scaling hosts pool");
            rpc.update_hosts_pool(UpdateHostsPoolParams {
                name: name.to_owned(),
                host_count: pv.num_volumes,
            })
            .await?;
        }
        Some(_) => {}
    }
    Ok(())
}

impl BackingStore {
    async fn reconcile_pv_pool(
        &self,
        ctx: &Context,
        rpc: &dyn NoobaaApi,
        info: &SystemInfo,
        pv: &PvPoolSpec,
        system: &NooBaa,
        ns: &str,
    ) -> Result<(), Error> {
        let name = self.pool_name();
        ensure_hosts_pool(rpc, info, &name, pv).await?;

        let config = rpc.get_hosts_pool_agent_config(&name).await?;
        ctx.apply(&self.new_agent_secret(&config), ns).await?;
        let image = system.desired_image(&ctx.config.core_image);
        ctx.apply(&self.new_pv_pool_statefulset(&image)?, ns).await?;
        Ok(())
    }

    async fn reconcile_cloud_pool(
        &self,
        ctx: &Context,
        rpc: &dyn NoobaaApi,
        info: &SystemInfo,
        kind: &StoreKind<'_>,
    ) -> Result<(), Error> {
        let secret = load_secret(ctx, self.meta(), kind).await?;
        let params = connection_params(&self.name(), kind, secret.as_ref())?;
        let connection = ensure_connection(rpc, self.meta(), info, params).await?;

        if info.pool(&self.pool_name()).is_none() {
            info!(store = %self.name(), %connection, "creating cloud pool");
            rpc.create_cloud_pool(CreateCloudPoolParams {
                name: self.pool_name(),
                connection,
                target_bucket: kind.target_bucket().unwrap_or_default().to_owned(),
            })
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for BackingStore {
    type Status = BackingStoreStatus;

    fn status(&self) -> Option<&BackingStoreStatus> {
        self.status.as_ref()
    }

    async fn apply(&self, ctx: &Context, status: &mut BackingStoreStatus) -> Result<Outcome, Error> {
        let ns = self.namespace()?;
        let last = status.phase;

        status.phase = Phase::Verifying;
        validation::backingstore::validate(self)?;
        let kind = self.spec.kind().map_err(invalid_type)?;

        status.phase = Phase::Connecting;
        let (system, rpc) = connected_system(ctx, &ns).await?;
        let info = rpc.read_system().await?;

        status.phase = Phase::Creating;
        match &kind {
            StoreKind::PvPool(pv) => {
                load_secret(ctx, self.meta(), &kind).await?;
                self.reconcile_pv_pool(ctx, rpc.as_ref(), &info, pv, &system, &ns)
                    .await?
            }
            _ => self.reconcile_cloud_pool(ctx, rpc.as_ref(), &info, &kind).await?,
        }

        let info = rpc.read_system().await?;
        let mode = info
            .pool(&self.pool_name())
            .map(|p| p.mode.clone())
            .unwrap_or_default();
        record_mode(status, &mode);
        let outcome = mode_outcome(&format!("pool {}", self.pool_name()), &mode)?;
        status.phase = phase_after_mode(&outcome, last, status.phase);
        Ok(outcome)
    }

    async fn finalize(&self, ctx: &Context) -> Result<(), Error> {
        let ns = self.namespace()?;
        if let Some(rpc) = teardown_client(ctx, &ns).await? {
            let info = rpc.read_system().await?;
            validation::backingstore::validate_delete(self, &info).map_err(deletion_blocked)?;
            teardown(rpc.as_ref(), &self.pool_name(), RemoteKind::Pool).await?;
        }
        if self.is_pv_pool() {
            ctx.delete::<StatefulSet>(&self.pv_pool_statefulset_name(), &ns)
                .await?;
            ctx.delete::<Secret>(&self.agent_secret_name(), &ns).await?;
        }
        info!(store = %self.name(), "backing store released");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::reconcile::Severity;
    use crate::rpc::fake::FakeNoobaa;
    use crate::tests::create_pv_pool_backing_store;

    #[test]
    fn test_mode_outcome() {
        assert_eq!(mode_outcome("pool a", "OPTIMAL").unwrap(), Outcome::ready());

        let err = mode_outcome("pool a", "AUTH_FAILED").unwrap_err();
        assert_eq!(err.severity(), Severity::Persistent);
        assert_eq!(err.reason(), "AUTH_FAILED");

        assert!(matches!(
            mode_outcome("pool a", "INITIALIZING").unwrap(),
            Outcome::Waiting { .. }
        ));
    }

    #[test]
    fn test_degraded_mode_keeps_settled_phase() {
        let waiting = mode_outcome("pool a", "LOW_CAPACITY").unwrap();
        assert_eq!(phase_after_mode(&waiting, Phase::Ready, Phase::Creating), Phase::Ready);
        assert_eq!(
            phase_after_mode(&waiting, Phase::Rejected, Phase::Creating),
            Phase::Rejected
        );
        // a store still coming up stays in the phase it reached
        assert_eq!(
            phase_after_mode(&waiting, Phase::Verifying, Phase::Creating),
            Phase::Creating
        );

        let ready = mode_outcome("pool a", "OPTIMAL").unwrap();
        assert_eq!(phase_after_mode(&ready, Phase::Ready, Phase::Creating), Phase::Creating);
    }

    #[test]
    fn test_record_mode_keeps_timestamp_while_unchanged() {
        let mut status = BackingStoreStatus::default();
        record_mode(&mut status, "INITIALIZING");
        let first = status.mode.clone().unwrap();
        record_mode(&mut status, "INITIALIZING");
        assert_eq!(status.mode.as_ref(), Some(&first));
        record_mode(&mut status, "OPTIMAL");
        assert_eq!(status.mode.unwrap().mode_code, "OPTIMAL");
    }

    #[test]
    fn test_volume_size_defaults() {
        let bs = create_pv_pool_backing_store("bs", 1, "20Gi");
        assert_eq!(volume_size(bs.spec.pv_pool.as_ref().unwrap()).unwrap(), 20 * GIB);
        let empty = PvPoolSpec {
            num_volumes: 1,
            ..Default::default()
        };
        assert_eq!(volume_size(&empty).unwrap(), DEFAULT_VOLUME_SIZE);
    }

    #[tokio::test]
    async fn test_hosts_pool_grows_but_never_shrinks() {
        let fake = FakeNoobaa::new();
        let bs = create_pv_pool_backing_store("bs", 2, "20Gi");
        let pv = bs.spec.pv_pool.clone().unwrap();

        let info = fake.read_system().await.unwrap();
        ensure_hosts_pool(&fake, &info, "bs", &pv).await.unwrap();
        assert_eq!(fake.count("create_hosts_pool"), 1);

        let grown = PvPoolSpec { num_volumes: 3, ..pv.clone() };
        let info = fake.read_system().await.unwrap();
        ensure_hosts_pool(&fake, &info, "bs", &grown).await.unwrap();
        assert_eq!(fake.count("update_hosts_pool"), 1);

        let shrunk = PvPoolSpec { num_volumes: 1, ..pv };
        let info = fake.read_system().await.unwrap();
        ensure_hosts_pool(&fake, &info, "bs", &shrunk).await.unwrap();
        assert_eq!(fake.count("update_hosts_pool"), 1);
        assert_eq!(fake.count("create_hosts_pool"), 1);

        let pool = fake.read_system().await.unwrap();
        let configured = pool.pool("bs").unwrap().hosts_info.as_ref().unwrap().configured_count;
        assert_eq!(configured, 3);
    }

    #[test]
    fn test_undeletable_pool_requeues_finalizer() {
        let bs = create_pv_pool_backing_store("bs", 1, "20Gi");
        for marker in ["IN_USE", "CONNECTED_BUCKET_DELETING"] {
            let info = SystemInfo {
                pools: vec![crate::rpc::types::PoolInfo {
                    name: "bs".to_owned(),
                    undeletable: Some(marker.to_owned()),
                    ..Default::default()
                }],
                ..Default::default()
            };
            let err = validation::backingstore::validate_delete(&bs, &info)
                .map_err(deletion_blocked)
                .unwrap_err();
            assert_eq!(err.severity(), Severity::Transient);
            assert_eq!(err.reason(), "DeletionBlocked");
        }
    }

    #[tokio::test]
    async fn test_new_pool_mode_drives_outcome() {
        let fake = FakeNoobaa::new();
        fake.with(|s| s.new_pool_mode = "INITIALIZING".to_owned());
        let bs = create_pv_pool_backing_store("bs", 1, "20Gi");
        let info = fake.read_system().await.unwrap();
        ensure_hosts_pool(&fake, &info, "bs", bs.spec.pv_pool.as_ref().unwrap())
            .await
            .unwrap();

        let info = fake.read_system().await.unwrap();
        let mode = &info.pool("bs").unwrap().mode;
        assert!(matches!(
            mode_outcome("pool bs", mode).unwrap(),
            Outcome::Waiting { .. }
        ));
    }
}
