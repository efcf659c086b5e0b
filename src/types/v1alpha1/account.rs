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
use k8s_openapi::api::core::v1 as corev1;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "noobaa.io",
    version = "v1alpha1",
    kind = "NooBaaAccount",
    namespaced,
    status = "NooBaaAccountStatus",
    shortname = "nba",
    plural = "noobaaaccounts",
    singular = "noobaaaccount",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct NooBaaAccountSpec {
    #[serde(default)]
    pub allow_bucket_create: bool,

    /// Backing store or namespace store new buckets are placed on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_resource: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfs_account_config: Option<NsfsAccountConfig>,
}

/// Filesystem identity used when the account accesses nsfs buckets.
///
/// Either the numeric `uid`/`gid` pair or a `distinguishedName` identifies the
/// account, never both.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NsfsAccountConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinguished_name: Option<String>,

    #[serde(default)]
    pub new_buckets_path: String,

    #[serde(default)]
    pub nsfs_only: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NooBaaAccountStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Secret holding the account's S3 access keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<corev1::SecretReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl NooBaaAccount {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    /// Identity of the account inside the managed system.
    pub fn email(&self) -> String {
        self.name()
    }

    pub fn secret_name(&self) -> String {
        format!("noobaa-account-{}", self.name())
    }
}
