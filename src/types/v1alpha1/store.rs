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

//! Sub-specs shared by backing stores and namespace stores.

use k8s_openapi::api::core::v1 as corev1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Discriminator of a store resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum StoreType {
    #[strum(serialize = "aws-s3")]
    AwsS3,
    #[strum(serialize = "s3-compatible")]
    S3Compatible,
    #[strum(serialize = "ibm-cos")]
    IbmCos,
    #[strum(serialize = "azure-blob")]
    AzureBlob,
    #[strum(serialize = "google-cloud-storage")]
    GoogleCloudStorage,
    #[strum(serialize = "pv-pool")]
    PvPool,
    #[strum(serialize = "nsfs")]
    Nsfs,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsS3Spec {
    pub target_bucket: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<corev1::SecretReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default)]
    pub ssl_disabled: bool,

    /// Assume this role through STS instead of using static credentials.
    #[serde(
        default,
        rename = "awsSTSRoleARN",
        skip_serializing_if = "Option::is_none"
    )]
    pub aws_sts_role_arn: Option<String>,
}

/// Used for both s3-compatible and ibm-cos stores.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3CompatibleSpec {
    pub target_bucket: String,

    #[serde(default)]
    pub secret: corev1::SecretReference,

    #[serde(default)]
    pub endpoint: String,

    /// `v2`, `v4` or unset (v4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_version: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureBlobSpec {
    pub target_blob_container: String,

    #[serde(default)]
    pub secret: corev1::SecretReference,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GoogleCloudStorageSpec {
    pub target_bucket: String,

    #[serde(default)]
    pub secret: corev1::SecretReference,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvPoolSpec {
    pub num_volumes: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::VolumeResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<corev1::SecretReference>,
}

impl PvPoolSpec {
    /// The requested storage per volume, as written in the resource.
    pub fn requested_storage(&self) -> Option<&str> {
        self.resources
            .as_ref()
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage"))
            .map(|q| q.0.as_str())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NsfsSpec {
    pub pvc_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,

    /// Filesystem backend hint passed to the endpoints (`GPFS`, `CEPH_FS`, `NFSv4`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_backend: Option<String>,
}

/// Mount root of nsfs volumes inside the endpoint pods.
pub const NSFS_MOUNT_ROOT: &str = "/nsfs/";

/// Directory an nsfs store's PVC is mounted at.
pub fn nsfs_mount_path(store_name: &str) -> String {
    format!("{NSFS_MOUNT_ROOT}{store_name}")
}

/// Keys a credentials secret must carry, by store type.
pub fn credential_keys(store_type: StoreType) -> &'static [&'static str] {
    match store_type {
        StoreType::AwsS3 | StoreType::S3Compatible => {
            &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"]
        }
        StoreType::IbmCos => &["IBM_COS_ACCESS_KEY_ID", "IBM_COS_SECRET_ACCESS_KEY"],
        StoreType::AzureBlob => &["AccountName", "AccountKey"],
        StoreType::GoogleCloudStorage => &["GoogleServiceAccountPrivateKeyJson"],
        StoreType::PvPool | StoreType::Nsfs => &[],
    }
}

/// Borrowed view of a store's single populated sub-spec.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StoreKind<'a> {
    AwsS3(&'a AwsS3Spec),
    S3Compatible(&'a S3CompatibleSpec),
    IbmCos(&'a S3CompatibleSpec),
    AzureBlob(&'a AzureBlobSpec),
    GoogleCloudStorage(&'a GoogleCloudStorageSpec),
    PvPool(&'a PvPoolSpec),
    Nsfs(&'a NsfsSpec),
}

impl<'a> StoreKind<'a> {
    pub fn store_type(&self) -> StoreType {
        match self {
            StoreKind::AwsS3(_) => StoreType::AwsS3,
            StoreKind::S3Compatible(_) => StoreType::S3Compatible,
            StoreKind::IbmCos(_) => StoreType::IbmCos,
            StoreKind::AzureBlob(_) => StoreType::AzureBlob,
            StoreKind::GoogleCloudStorage(_) => StoreType::GoogleCloudStorage,
            StoreKind::PvPool(_) => StoreType::PvPool,
            StoreKind::Nsfs(_) => StoreType::Nsfs,
        }
    }

    /// Secret holding the cloud credentials, if the kind uses one.
    pub fn secret(&self) -> Option<&'a corev1::SecretReference> {
        match self {
            StoreKind::AwsS3(s) => s.secret.as_ref(),
            StoreKind::S3Compatible(s) | StoreKind::IbmCos(s) => Some(&s.secret),
            StoreKind::AzureBlob(s) => Some(&s.secret),
            StoreKind::GoogleCloudStorage(s) => Some(&s.secret),
            StoreKind::PvPool(s) => s.secret.as_ref(),
            StoreKind::Nsfs(_) => None,
        }
    }

    /// Target bucket (or blob container) of cloud kinds.
    pub fn target_bucket(&self) -> Option<&'a str> {
        match self {
            StoreKind::AwsS3(s) => Some(&s.target_bucket),
            StoreKind::S3Compatible(s) | StoreKind::IbmCos(s) => Some(&s.target_bucket),
            StoreKind::AzureBlob(s) => Some(&s.target_blob_container),
            StoreKind::GoogleCloudStorage(s) => Some(&s.target_bucket),
            StoreKind::PvPool(_) | StoreKind::Nsfs(_) => None,
        }
    }

    pub fn is_cloud(&self) -> bool {
        self.target_bucket().is_some()
    }
}

/// Counts populated sub-specs, used to enforce discriminator coherence.
pub(crate) fn populated<T>(field: &Option<T>) -> usize {
    usize::from(field.is_some())
}

/// Reasons a store's discriminator does not resolve to exactly one sub-spec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KindError {
    UnknownType(String),
    MissingSubSpec { store_type: StoreType },
    ExtraSubSpec { store_type: StoreType },
}
