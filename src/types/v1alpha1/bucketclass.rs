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
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use strum::Display;

/// Name of the bucket class the system reconciler creates for itself.
pub const DEFAULT_BUCKET_CLASS: &str = "noobaa-default-bucket-class";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "noobaa.io",
    version = "v1alpha1",
    kind = "BucketClass",
    namespaced,
    status = "BucketClassStatus",
    shortname = "bc",
    plural = "bucketclasses",
    singular = "bucketclass",
    printcolumn = r#"{"name":"Placement", "type":"string", "jsonPath":".spec.placementPolicy"}"#,
    printcolumn = r#"{"name":"NamespacePolicy", "type":"string", "jsonPath":".spec.namespacePolicy"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct BucketClassSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_policy: Option<PlacementPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_policy: Option<NamespacePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<Quota>,

    /// Opaque replication policy JSON, validated by the managed system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_policy: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacementPolicy {
    pub tiers: Vec<Tier>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,

    pub backing_stores: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema, Display)]
pub enum Placement {
    #[default]
    #[serde(alias = "mirror")]
    Mirror,
    #[serde(alias = "spread")]
    Spread,
}

impl Placement {
    /// Data placement keyword understood by the managed system.
    pub fn data_placement(&self) -> &'static str {
        match self {
            Placement::Mirror => "MIRROR",
            Placement::Spread => "SPREAD",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespacePolicy {
    #[serde(rename = "type")]
    pub type_: NamespacePolicyType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single: Option<SingleNamespacePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi: Option<MultiNamespacePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheNamespacePolicy>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema, Display)]
pub enum NamespacePolicyType {
    #[default]
    #[serde(alias = "single")]
    Single,
    #[serde(alias = "multi")]
    Multi,
    #[serde(alias = "cache")]
    Cache,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SingleNamespacePolicy {
    pub resource: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultiNamespacePolicy {
    pub write_resource: String,

    #[serde(default)]
    pub read_resources: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheNamespacePolicy {
    pub hub_resource: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<CacheSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    /// Cache time-to-live in milliseconds.
    #[serde(default)]
    pub ttl: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    /// Quantity string, e.g. `10Gi`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<String>,

    /// Non-negative integer string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_objects: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketClassStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation last reconciled to Ready; bucket claims compare against it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Outcome of the last replication policy validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<String>,
}

impl NamespacePolicy {
    /// Every namespace store name the policy refers to, write resource first.
    pub fn referenced_stores(&self) -> Vec<&str> {
        match self.type_ {
            NamespacePolicyType::Single => self
                .single
                .iter()
                .map(|s| s.resource.as_str())
                .collect(),
            NamespacePolicyType::Multi => self
                .multi
                .iter()
                .flat_map(|m| {
                    std::iter::once(m.write_resource.as_str())
                        .chain(m.read_resources.iter().map(String::as_str))
                })
                .collect(),
            NamespacePolicyType::Cache => self
                .cache
                .iter()
                .map(|c| c.hub_resource.as_str())
                .collect(),
        }
    }
}

impl BucketClassSpec {
    /// Every backing store name referenced by the placement tiers.
    pub fn referenced_backing_stores(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .placement_policy
            .iter()
            .flat_map(|p| p.tiers.iter())
            .flat_map(|t| t.backing_stores.iter().map(String::as_str))
            .collect();
        names.dedup();
        names
    }
}

impl BucketClass {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Generation that reached Ready, if any.
    pub fn ready_generation(&self) -> Option<i64> {
        self.status
            .as_ref()
            .filter(|s| s.phase.is_ready())
            .and_then(|s| s.observed_generation)
    }
}
