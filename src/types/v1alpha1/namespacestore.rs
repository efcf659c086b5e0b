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
use crate::types::v1alpha1::backingstore::BackingStoreStatus;
use crate::types::v1alpha1::phase::Phase;
use crate::types::v1alpha1::store::{
    AwsS3Spec, AzureBlobSpec, GoogleCloudStorageSpec, KindError, NsfsSpec, S3CompatibleSpec,
    StoreKind, StoreType, nsfs_mount_path, populated,
};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;

/// Namespace stores report the same status shape as backing stores.
pub type NamespaceStoreStatus = BackingStoreStatus;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "noobaa.io",
    version = "v1alpha1",
    kind = "NamespaceStore",
    namespaced,
    status = "NamespaceStoreStatus",
    shortname = "nss",
    plural = "namespacestores",
    singular = "namespacestore",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStoreSpec {
    /// One of `aws-s3`, `s3-compatible`, `ibm-cos`, `azure-blob`,
    /// `google-cloud-storage` or `nsfs`.
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,

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
    pub nsfs: Option<NsfsSpec>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl NamespaceStoreSpec {
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
            + populated(&self.nsfs);

        let kind = match store_type {
            StoreType::AwsS3 => self.aws_s3.as_ref().map(StoreKind::AwsS3),
            StoreType::S3Compatible => self.s3_compatible.as_ref().map(StoreKind::S3Compatible),
            StoreType::IbmCos => self.ibm_cos.as_ref().map(StoreKind::IbmCos),
            StoreType::AzureBlob => self.azure_blob.as_ref().map(StoreKind::AzureBlob),
            StoreType::GoogleCloudStorage => self
                .google_cloud_storage
                .as_ref()
                .map(StoreKind::GoogleCloudStorage),
            StoreType::Nsfs => self.nsfs.as_ref().map(StoreKind::Nsfs),
            StoreType::PvPool => return Err(KindError::UnknownType(self.type_.clone())),
        };

        match kind {
            Some(kind) if count == 1 => Ok(kind),
            Some(_) => Err(KindError::ExtraSubSpec { store_type }),
            None => Err(KindError::MissingSubSpec { store_type }),
        }
    }

    pub fn is_nsfs(&self) -> bool {
        self.type_ == <&str>::from(StoreType::Nsfs)
    }
}

impl NamespaceStore {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Name of the namespace resource this store maps to in the managed system.
    pub fn resource_name(&self) -> String {
        self.name()
    }

    /// Mount path of an nsfs store's PVC inside the endpoint pods.
    pub fn nsfs_mount_path(&self) -> String {
        nsfs_mount_path(&self.name())
    }

    /// Filesystem root handed to the managed system for an nsfs store.
    pub fn nsfs_root_path(&self) -> Option<String> {
        let nsfs = self.spec.nsfs.as_ref()?;
        let mount = self.nsfs_mount_path();
        Some(match nsfs.sub_path.as_deref().filter(|p| !p.is_empty()) {
            Some(sub) => format!("{mount}/{}", sub.trim_matches('/')),
            None => mount,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    #[test]
    fn test_nsfs_root_path_joins_sub_path() {
        let nss = crate::tests::create_nsfs_namespace_store("fs1", "pvc-a", Some("/data/x/"));
        assert_eq!(nss.nsfs_root_path().as_deref(), Some("/nsfs/fs1/data/x"));

        let nss = crate::tests::create_nsfs_namespace_store("fs1", "pvc-a", None);
        assert_eq!(nss.nsfs_root_path().as_deref(), Some("/nsfs/fs1"));
    }
}
