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

//! `objectbucket.io` bucket-claim types. These are consumed, not owned: the
//! CRDs are installed by the bucket provisioner library, so they are never
//! printed by `crd`.

use crate::types::v1alpha1::condition::Condition;
use crate::types::v1alpha1::k8s::ReclaimPolicy;
use k8s_openapi::api::core::v1 as corev1;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const GROUP: &str = "objectbucket.io";
pub const FINALIZER: &str = const_str::concat!(GROUP, "/finalizer");

/// Claim annotation recording the bucket class generation the bucket was last synced to.
pub const BUCKET_CLASS_GENERATION_ANNOTATION: &str = "noobaa.io/bucketclass-generation";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "objectbucket.io",
    version = "v1alpha1",
    kind = "ObjectBucketClaim",
    namespaced,
    status = "ObjectBucketClaimStatus",
    shortname = "obc",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectBucketClaimSpec {
    #[serde(default)]
    pub storage_class_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_bucket_name: Option<String>,

    /// Free-form options; `bucketclass` selects the class.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_config: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_bucket_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ClaimPhase {
    #[default]
    Pending,
    Bound,
    Released,
    Failed,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectBucketClaimStatus {
    #[serde(default)]
    pub phase: ClaimPhase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "objectbucket.io",
    version = "v1alpha1",
    kind = "ObjectBucket",
    status = "ObjectBucketStatus",
    shortname = "ob",
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectBucketSpec {
    #[serde(default)]
    pub storage_class_name: String,

    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<corev1::ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<BucketEndpoint>,

    /// Provisioner-private state; carries the scoped account and the class.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_state: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketEndpoint {
    pub bucket_host: String,
    pub bucket_port: i32,
    pub bucket_name: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub sub_region: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_config: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectBucketStatus {
    #[serde(default)]
    pub phase: ClaimPhase,
}

impl ObjectBucketClaim {
    /// Bucket class named by the claim itself, if any.
    pub fn bucket_class(&self) -> Option<&str> {
        self.spec
            .additional_config
            .get("bucketclass")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn phase(&self) -> ClaimPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Name of the cluster-scoped ObjectBucket bound to this claim.
    pub fn object_bucket_name(&self) -> String {
        format!(
            "obc-{}-{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }

    /// Bucket class generation the bound bucket was last synced to.
    pub fn synced_generation(&self) -> Option<i64> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(BUCKET_CLASS_GENERATION_ANNOTATION))
            .and_then(|g| g.parse().ok())
    }
}

impl ObjectBucket {
    pub fn account_name(&self) -> Option<&str> {
        self.spec.additional_state.get("account").map(String::as_str)
    }

    pub fn bucket_class(&self) -> Option<&str> {
        self.spec.additional_state.get("bucketclass").map(String::as_str)
    }

    pub fn bucket_name(&self) -> Option<&str> {
        self.spec.endpoint.as_ref().map(|e| e.bucket_name.as_str())
    }

    /// Whether the bucket pre-existed and the claim was only granted access.
    pub fn is_granted(&self) -> bool {
        self.spec.additional_state.get("grant").is_some_and(|g| g == "true")
    }
}
