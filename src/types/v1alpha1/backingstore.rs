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

use crate::types;
use crate::types::error::NoNamespaceSnafu;
use crate::types::v1alpha1::condition::Condition;
use crate::types::v1alpha1::phase::Phase;
use crate::types::v1alpha1::store::{
    AwsS3Spec, AzureBlobSpec, GoogleCloudStorageSpec, KindError, PvPoolSpec, S3CompatibleSpec,
    StoreKind, StoreType, populated,
};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;

mod workloads;

pub use workloads::{PV_POOL_STORAGE_MOUNT_PATH, PV_POOL_VOLUME_NAME};

/// Name of the backing store the system reconciler creates for itself.
pub const DEFAULT_BACKING_STORE: &str = "noobaa-default-backing-store";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "noobaa.io",
    version = "v1alpha1",
    kind = "BackingStore",
    namespaced,
    status = "BackingStoreStatus",
    shortname = "bs",
    plural = "backingstores",
    singular = "backingstore",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct BackingStoreSpec {
    /// One of `aws-s3`, `s3-compatible`, `ibm-cos`, `azure-blob`,
    /// `google-cloud-storage` or `pv-pool`.
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_s3: Option<AwsS3Spec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_compatible: Option<S3CompatibleSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ibm_cos: Option<S3CompatibleSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_blob: Option<AzureBlobSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_cloud_storage: Option<GoogleCloudStorageSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv_pool: Option<PvPoolSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackingStoreStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<StoreMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Last mode the managed system reported for the store's pool.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoreMode {
    pub mode_code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<String>,
}

impl BackingStoreSpec {
    /// Resolves the discriminator into the single populated sub-spec.
    pub fn kind(&self) -> Result<StoreKind<'_>, KindError> {
        let store_type: StoreType = self
            .type_
            .parse()
            .map_err(|_| KindError::UnknownType(self.type_.clone()))?;

        let count = populated(&self.aws_s3)
            + populated(&self.s3_compatible)
            + populated(&self.ibm_cos)
            + populated(&self.azure_blob)
            + populated(&self.google_cloud_storage)
            + populated(&self.pv_pool);

        let kind = match store_type {
            StoreType::AwsS3 => self.aws_s3.as_ref().map(StoreKind::AwsS3),
            StoreType::S3Compatible => self.s3_compatible.as_ref().map(StoreKind::S3Compatible),
            StoreType::IbmCos => self.ibm_cos.as_ref().map(StoreKind::IbmCos),
            StoreType::AzureBlob => self.azure_blob.as_ref().map(StoreKind::AzureBlob),
            StoreType::GoogleCloudStorage => self
                .google_cloud_storage
                .as_ref()
                .map(StoreKind::GoogleCloudStorage),
            StoreType::PvPool => self.pv_pool.as_ref().map(StoreKind::PvPool),
            StoreType::Nsfs => return Err(KindError::UnknownType(self.type_.clone())),
        };

        match kind {
            Some(kind) if count == 1 => Ok(kind),
            Some(_) => Err(KindError::ExtraSubSpec { store_type }),
            None => Err(KindError::MissingSubSpec { store_type }),
        }
    }
}

impl BackingStore {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Name of the pool this store maps to inside the managed system.
    pub fn pool_name(&self) -> String {
        self.name()
    }

    pub fn is_pv_pool(&self) -> bool {
        self.spec.type_ == <&str>::from(StoreType::PvPool)
    }
}
