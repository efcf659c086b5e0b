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

//! NamespaceStore: a namespace resource of the managed system that serves
//! objects from a cloud bucket or from a filesystem mounted into the endpoints.

use super::backingstore::{invalid_type, mode_outcome, phase_after_mode, record_mode};
use super::connection::{
    RemoteKind, connection_params, deletion_blocked, ensure_connection, load_secret, teardown,
};
use super::system::{connected_system, teardown_client};
use super::{Error, Outcome, Reconciler};
use crate::context::Context;
use crate::rpc::NoobaaApi;
use crate::rpc::types::{CreateNamespaceResourceParams, NsfsConfig, SystemInfo};
use crate::types::v1alpha1::namespacestore::{AccessMode, NamespaceStore, NamespaceStoreStatus};
use crate::types::v1alpha1::phase::Phase;
use crate::types::v1alpha1::store::StoreKind;
use crate::validation;
use async_trait::async_trait;
use kube::Resource;
use tracing::{debug, info};

fn access_mode(mode: Option<AccessMode>) -> &'static str {
    match mode.unwrap_or_default() {
        AccessMode::ReadWrite => "READ_WRITE",
        AccessMode::ReadOnly => "READ_ONLY",
    }
}

/// Payload for an nsfs namespace resource.
pub(super) fn nsfs_params(nss: &NamespaceStore) -> Result<CreateNamespaceResourceParams, Error> {
    let fs_root_path = nss
        .nsfs_root_path()
        .ok_or_else(|| Error::persistent("InvalidType", "nsfs store without an nsfs section"))?;
    Ok(CreateNamespaceResourceParams {
        name: nss.resource_name(),
        nsfs_config: Some(NsfsConfig {
            fs_root_path,
            fs_backend: nss.spec.nsfs.as_ref().and_then(|n| n.fs_backend.clone()),
        }),
        access_mode: Some(access_mode(nss.spec.access_mode).to_owned()),
        ..Default::default()
    })
}

async fn create_resource(
    rpc: &dyn NoobaaApi,
    info: &SystemInfo,
    params: CreateNamespaceResourceParams,
) -> Result<(), Error> {
    if info.namespace_resource(&params.name).is_some() {
        debug!(resource = %params.name, "namespace resource exists");
        return Ok(());
    }
    info!(resource = %params.name, "creating namespace resource");
    rpc.create_namespace_resource(params).await?;
    Ok(())
}

impl NamespaceStore {
    async fn reconcile_cloud_resource(
        &self,
        ctx: &Context,
        rpc: &dyn NoobaaApi,
        info: &SystemInfo,
        kind: &StoreKind<'_>,
    ) -> Result<(), Error> {
        let secret = load_secret(ctx, self.meta(), kind).await?;
        let params = connection_params(&self.name(), kind, secret.as_ref())?;
        let connection = ensure_connection(rpc, self.meta(), info, params).await?;
        create_resource(
            rpc,
            info,
            CreateNamespaceResourceParams {
                name: self.resource_name(),
                connection: Some(connection),
                target_bucket: kind.target_bucket().map(str::to_owned),
                access_mode: Some(access_mode(self.spec.access_mode).to_owned()),
                ..Default::default()
            },
        )
        .await
    }
}

#[async_trait]
impl Reconciler for NamespaceStore {
    type Status = NamespaceStoreStatus;

    fn status(&self) -> Option<&NamespaceStoreStatus> {
        self.status.as_ref()
    }

    async fn apply(&self, ctx: &Context, status: &mut NamespaceStoreStatus) -> Result<Outcome, Error> {
        let last = status.phase;
        status.phase = Phase::Verifying;
        validation::namespacestore::validate(self)?;
        let kind = self.spec.kind().map_err(invalid_type)?;

        status.phase = Phase::Connecting;
        let ns = self.namespace()?;
        let (_, rpc) = connected_system(ctx, &ns).await?;
        let info = rpc.read_system().await?;

        status.phase = Phase::Creating;
        match &kind {
            StoreKind::Nsfs(_) => create_resource(rpc.as_ref(), &info, nsfs_params(self)?).await?,
            _ => {
                self.reconcile_cloud_resource(ctx, rpc.as_ref(), &info, &kind)
                    .await?
            }
        }

        let resource = rpc.read_namespace_resource(&self.resource_name()).await?;
        record_mode(status, &resource.mode);
        let outcome = mode_outcome(
            &format!("namespace resource {}", resource.name),
            &resource.mode,
        )?;
        status.phase = phase_after_mode(&outcome, last, status.phase);
        Ok(outcome)
    }

    async fn finalize(&self, ctx: &Context) -> Result<(), Error> {
        let ns = self.namespace()?;
        if let Some(rpc) = teardown_client(ctx, &ns).await? {
            let info = rpc.read_system().await?;
            validation::namespacestore::validate_delete(self, &info).map_err(deletion_blocked)?;
            teardown(
                rpc.as_ref(),
                &self.resource_name(),
                RemoteKind::NamespaceResource,
            )
            .await?;
        }
        info!(store = %self.name(), "namespace store released");
        Ok(())
    }
}
