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

//! BucketClass: checks the stores a class references and, when set, has the
//! managed system validate its replication policy.

use super::system::connected_system;
use super::{Error, ObjectStatus, Outcome, Reconciler};
use crate::context::Context;
use crate::rpc::types::ValidateReplicationParams;
use crate::rpc::{NoobaaApi, codes};
use crate::types::v1alpha1::backingstore::BackingStore;
use crate::types::v1alpha1::bucketclass::{BucketClass, BucketClassStatus};
use crate::types::v1alpha1::condition::Condition;
use crate::types::v1alpha1::namespacestore::NamespaceStore;
use crate::types::v1alpha1::phase::Phase;
use crate::validation;
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

pub const REPLICATION_VALID: &str = "Valid";

impl ObjectStatus for BucketClassStatus {
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

/// Same gate as for backing stores, applied to the namespace policy's stores.
fn check_namespace_stores(bc: &BucketClass, stores: &[NamespaceStore]) -> Result<(), Error> {
    let Some(policy) = &bc.spec.namespace_policy else {
        return Ok(());
    };
    for name in policy.referenced_stores() {
        match stores.iter().find(|s| s.name_any() == name).map(|s| s.phase()) {
            None => {
                return Err(Error::persistent(
                    "MissingNamespaceStore",
                    format!("BucketClass references a missing namespace store {name:?}"),
                ));
            }
            Some(Phase::Rejected) => {
                return Err(Error::persistent(
                    "RejectedNamespaceStore",
                    format!("BucketClass references a rejected namespace store {name:?}"),
                ));
            }
            Some(phase) if !phase.is_ready() => {
                return Err(Error::transient(
                    "NamespaceStoreNotReady",
                    format!("namespace store {name:?} is in phase {phase}"),
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Asks the managed system whether `policy` is acceptable.
///
/// Rejections of the policy itself are persistent; anything else is retried.
pub async fn validate_replication(rpc: &dyn NoobaaApi, policy: &str) -> Result<(), Error> {
    let replication_policy: serde_json::Value = serde_json::from_str(policy).map_err(|e| {
        Error::persistent(
            codes::INVALID_REPLICATION_POLICY,
            format!("replication policy is not valid JSON: {e}"),
        )
    })?;

    match rpc
        .validate_replication(ValidateReplicationParams {
            bucket_name: None,
            replication_policy,
        })
        .await
    {
        Ok(()) => Ok(()),
        Err(e)
            if e.is_code(codes::INVALID_REPLICATION_POLICY)
                || e.is_code(codes::INVALID_LOG_REPLICATION_INFO) =>
        {
            Err(Error::persistent(
                e.code().unwrap_or_default().to_owned(),
                e.message(),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Reconciler for BucketClass {
    type Status = BucketClassStatus;

    fn status(&self) -> Option<&BucketClassStatus> {
        self.status.as_ref()
    }

    async fn apply(&self, ctx: &Context, status: &mut BucketClassStatus) -> Result<Outcome, Error> {
        let ns = self.namespace()?;
        status.phase = Phase::Verifying;

        let namespace_stores = ctx.list::<NamespaceStore>(&ns).await?;
        validation::bucketclass::validate(self, &namespace_stores)?;

        let backing_stores = ctx.list::<BackingStore>(&ns).await?;
        validation::bucketclass::validate_backing_stores(self, |name| {
            backing_stores
                .iter()
                .find(|bs| bs.name_any() == name)
                .map(BackingStore::phase)
        })?;
        check_namespace_stores(self, &namespace_stores)?;

        match self.spec.replication_policy.as_deref().filter(|p| !p.is_empty()) {
            Some(policy) => {
                let (_, rpc) = connected_system(ctx, &ns).await?;
                if let Err(e) = validate_replication(rpc.as_ref(), policy).await {
                    status.replication = Some(e.message());
                    return Err(e);
                }
                status.replication = Some(REPLICATION_VALID.to_owned());
            }
            None => status.replication = None,
        }

        debug!(class = %self.name(), generation = ?self.metadata.generation, "bucket class verified");
        Ok(Outcome::ready())
    }

    async fn finalize(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}
