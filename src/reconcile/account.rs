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

//! NooBaaAccount: an S3 account of the managed system and the Secret that
//! carries its access keys.

use super::system::{connected_system, teardown_client};
use super::{Error, ObjectStatus, Outcome, Reconciler, escalate_after_grace};
use crate::context::Context;
use crate::provisioner::{account_keys, ensure_account};
use crate::rpc::types::{
    AccessKeys, AccountInfo, CreateAccountParams, NsfsAccountConfig, SystemInfo,
    UpdateAccountS3AccessParams,
};
use crate::rpc::{self, NoobaaApi};
use crate::types::owner_reference;
use crate::types::v1alpha1::account::{self, NooBaaAccount, NooBaaAccountStatus};
use crate::types::v1alpha1::condition::Condition;
use crate::types::v1alpha1::phase::Phase;
use crate::validation;
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use tracing::info;

pub const ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

impl ObjectStatus for NooBaaAccountStatus {
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

fn nsfs_config(config: &account::NsfsAccountConfig) -> NsfsAccountConfig {
    NsfsAccountConfig {
        uid: config.uid,
        gid: config.gid,
        distinguished_name: config.distinguished_name.clone(),
        new_buckets_path: config.new_buckets_path.clone(),
        nsfs_only: config.nsfs_only,
    }
}

/// Secret in the S3 credentials layout applications consume.
pub fn credentials_secret(
    metadata: metav1::ObjectMeta,
    keys: &AccessKeys,
) -> corev1::Secret {
    corev1::Secret {
        metadata,
        string_data: Some(
            [
                (ACCESS_KEY_ID.to_owned(), keys.access_key.clone()),
                (SECRET_ACCESS_KEY.to_owned(), keys.secret_key.clone()),
            ]
            .into_iter()
            .collect(),
        ),
        ..Default::default()
    }
}

impl NooBaaAccount {
    fn create_params(&self) -> CreateAccountParams {
        CreateAccountParams {
            name: self.name(),
            email: self.email(),
            default_resource: self.spec.default_resource.clone(),
            has_login: false,
            s3_access: true,
            allow_bucket_creation: self.spec.allow_bucket_create,
            bucket_claim_owner: None,
            nsfs_account_config: self.spec.nsfs_account_config.as_ref().map(nsfs_config),
        }
    }

    /// The update needed to bring `remote` in line with the spec, if any.
    fn drift(&self, remote: &AccountInfo) -> Option<UpdateAccountS3AccessParams> {
        let nsfs = self.spec.nsfs_account_config.as_ref().map(nsfs_config);
        let drifted = remote.default_resource != self.spec.default_resource
            && self.spec.default_resource.is_some()
            || remote.allow_bucket_creation != self.spec.allow_bucket_create
            || nsfs.is_some() && remote.nsfs_account_config != nsfs;
        drifted.then(|| UpdateAccountS3AccessParams {
            email: self.email(),
            s3_access: true,
            default_resource: self.spec.default_resource.clone(),
            allow_bucket_creation: Some(self.spec.allow_bucket_create),
            nsfs_account_config: nsfs,
        })
    }

    fn check_default_resource(&self, info: &SystemInfo) -> Result<(), Error> {
        let Some(resource) = self.spec.default_resource.as_deref() else {
            return Ok(());
        };
        if info.pool(resource).is_none() && info.namespace_resource(resource).is_none() {
            return Err(escalate_after_grace(
                &self.metadata,
                "MissingDefaultResource",
                format!("default resource {resource:?} does not exist in the system"),
            ));
        }
        Ok(())
    }

    /// Creates or updates the remote account; returns keys when creation produced them.
    async fn sync_account(&self, rpc: &dyn NoobaaApi) -> Result<Option<AccessKeys>, Error> {
        match rpc.read_account(&self.email()).await {
            Ok(remote) => {
                if let Some(update) = self.drift(&remote) {
                    info!(account = %self.email(), "updating account");
                    rpc.update_account_s3_access(update).await?;
                }
                Ok(None)
            }
            Err(e) if e.is_no_such() => Ok(Some(ensure_account(rpc, self.create_params()).await?)),
            Err(e) => Err(e.into()),
        }
    }

    fn secret_meta(&self, ns: &str) -> metav1::ObjectMeta {
        metav1::ObjectMeta {
            name: Some(self.secret_name()),
            namespace: Some(ns.to_owned()),
            owner_references: Some(vec![owner_reference(self)]),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Reconciler for NooBaaAccount {
    type Status = NooBaaAccountStatus;

    fn status(&self) -> Option<&NooBaaAccountStatus> {
        self.status.as_ref()
    }

    async fn apply(&self, ctx: &Context, status: &mut NooBaaAccountStatus) -> Result<Outcome, Error> {
        let ns = self.namespace()?;
        status.phase = Phase::Verifying;
        validation::account::validate(self)?;

        status.phase = Phase::Connecting;
        let (_, rpc) = connected_system(ctx, &ns).await?;
        let info = rpc.read_system().await?;
        self.check_default_resource(&info)?;

        status.phase = Phase::Creating;
        let created = self.sync_account(rpc.as_ref()).await?;

        if ctx
            .get_opt::<corev1::Secret>(&self.secret_name(), &ns)
            .await?
            .is_none()
        {
            let keys = match created {
                Some(keys) => keys,
                None => account_keys(rpc.as_ref(), &self.email(), Vec::new()).await?,
            };
            info!(account = %self.email(), secret = %self.secret_name(), "writing account credentials");
            ctx.apply(&credentials_secret(self.secret_meta(&ns), &keys), &ns)
                .await?;
        }

        status.secret_ref = Some(corev1::SecretReference {
            name: Some(self.secret_name()),
            namespace: Some(ns),
        });
        Ok(Outcome::ready())
    }

    async fn finalize(&self, ctx: &Context) -> Result<(), Error> {
        let ns = self.namespace()?;
        if let Some(rpc) = teardown_client(ctx, &ns).await? {
            info!(account = %self.email(), "deleting account");
            rpc::ignore_no_such(rpc.delete_account(&self.email()).await)?;
        }
        Ok(())
    }
}
