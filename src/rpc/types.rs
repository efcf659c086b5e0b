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

//! Request and reply payloads of the management RPC.
//!
//! Field names follow the managed system's wire schema (snake_case).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex sha256 of a connection secret, as reported in [`ExternalConnectionInfo::secret_digest`].
pub fn secret_digest(secret: &str) -> String {
    Sha256::digest(secret.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SystemInfo {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub pools: Vec<PoolInfo>,

    #[serde(default)]
    pub accounts: Vec<AccountInfo>,

    #[serde(default)]
    pub buckets: Vec<BucketInfo>,

    #[serde(default)]
    pub namespace_resources: Vec<NamespaceResourceInfo>,

    #[serde(default)]
    pub external_connections: Vec<ExternalConnectionInfo>,
}

impl SystemInfo {
    pub fn pool(&self, name: &str) -> Option<&PoolInfo> {
        self.pools.iter().find(|p| p.name == name)
    }

    pub fn namespace_resource(&self, name: &str) -> Option<&NamespaceResourceInfo> {
        self.namespace_resources.iter().find(|r| r.name == name)
    }

    /// The system's internal pool, used as a fallback default resource.
    pub fn internal_pool(&self) -> Option<&PoolInfo> {
        self.pools
            .iter()
            .find(|p| p.resource_type == POOL_TYPE_INTERNAL)
    }

    /// Accounts whose default resource is `resource`.
    pub fn accounts_defaulting_to<'a>(
        &'a self,
        resource: &'a str,
    ) -> impl Iterator<Item = &'a AccountInfo> + 'a {
        self.accounts
            .iter()
            .filter(move |a| a.default_resource.as_deref() == Some(resource))
    }

    /// Whether any pool or namespace resource other than `except` uses the connection.
    pub fn connection_in_use(&self, connection: &str, except: &str) -> bool {
        let pools = self.pools.iter().filter(|p| p.name != except).any(|p| {
            p.cloud_info
                .as_ref()
                .is_some_and(|c| c.connection_name.as_deref() == Some(connection))
        });
        let resources = self
            .namespace_resources
            .iter()
            .filter(|r| r.name != except)
            .any(|r| r.connection_name.as_deref() == Some(connection));
        pools || resources
    }
}

pub const POOL_TYPE_HOSTS: &str = "HOSTS";
pub const POOL_TYPE_CLOUD: &str = "CLOUD";
pub const POOL_TYPE_INTERNAL: &str = "INTERNAL";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct PoolInfo {
    pub name: String,

    #[serde(default)]
    pub resource_type: String,

    /// `OPTIMAL`, `IO_ERRORS`, `STORAGE_NOT_EXIST`, `AUTH_FAILED`, `INITIALIZING`, ...
    #[serde(default)]
    pub mode: String,

    /// Why the pool cannot be deleted right now, if it cannot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undeletable: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_info: Option<CloudInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts_info: Option<HostsInfo>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CloudInfo {
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub endpoint_type: String,

    #[serde(default)]
    pub target_bucket: String,

    #[serde(default)]
    pub identity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct HostsInfo {
    #[serde(default)]
    pub configured_count: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NamespaceResourceInfo {
    pub name: String,

    #[serde(default)]
    pub mode: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undeletable: Option<String>,

    #[serde(default)]
    pub endpoint_type: String,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub target_bucket: String,

    #[serde(default)]
    pub identity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ExternalConnectionInfo {
    pub name: String,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub endpoint_type: String,

    #[serde(default)]
    pub identity: String,

    /// Digest of the secret the connection was registered with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_digest: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AccountInfo {
    #[serde(default)]
    pub name: String,

    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_resource: Option<String>,

    #[serde(default)]
    pub access_keys: Vec<AccessKeys>,

    #[serde(default)]
    pub allow_bucket_creation: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_claim_owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfs_account_config: Option<NsfsAccountConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
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

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct BucketInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiering: Option<TieringRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<NamespaceBucketInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_claim: Option<BucketClaimInfo>,

    #[serde(default)]
    pub mode: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct TieringRef {
    pub name: String,
}

/// Identifies the claim a bucket was provisioned for.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketClaimInfo {
    pub bucket_class: String,
    pub namespace: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NamespaceBucketInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_resource: Option<String>,

    #[serde(default)]
    pub read_resources: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<CacheConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CacheConfig {
    pub ttl_ms: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct QuotaConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<QuotaSize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<QuotaQuantity>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct QuotaSize {
    pub value: u64,
    pub unit: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct QuotaQuantity {
    pub value: u64,
}

/// Signs in to an existing system with account credentials.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateAuthParams {
    pub system: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateAuthReply {
    pub token: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateSystemParams {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateSystemReply {
    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub operator_token: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateHostsPoolParams {
    pub name: String,
    pub is_managed: bool,
    pub host_count: i32,
    pub host_config: HostConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct HostConfig {
    pub volume_size: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct UpdateHostsPoolParams {
    pub name: String,
    pub host_count: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateCloudPoolParams {
    pub name: String,
    pub connection: String,
    pub target_bucket: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ExternalConnectionParams {
    pub name: String,
    pub endpoint: String,
    pub endpoint_type: String,
    pub identity: String,
    pub secret: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_sts_arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct UpdateExternalConnectionParams {
    pub name: String,
    pub identity: String,
    pub secret: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CheckExternalConnectionReply {
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CheckError>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CheckError {
    #[serde(default)]
    pub code: String,

    #[serde(default)]
    pub message: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateNamespaceResourceParams {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfs_config: Option<NsfsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct NsfsConfig {
    pub fs_root_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_backend: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateTierParams {
    pub name: String,
    pub attached_pools: Vec<String>,
    pub data_placement: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateTieringPolicyParams {
    pub name: String,
    pub tiers: Vec<TierOrder>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct TierOrder {
    pub order: usize,
    pub tier: String,

    #[serde(default)]
    pub spillover: bool,

    #[serde(default)]
    pub disabled: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateBucketParams {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiering: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<NamespaceBucketInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_claim: Option<BucketClaimInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaConfig>,

    /// Opaque policy; only the managed system interprets it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_policy: Option<Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct UpdateBucketParams {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiering: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ListBucketsReply {
    #[serde(default)]
    pub buckets: Vec<BucketName>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct BucketName {
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateAccountParams {
    pub name: String,
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_resource: Option<String>,

    pub has_login: bool,
    pub s3_access: bool,
    pub allow_bucket_creation: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_claim_owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfs_account_config: Option<NsfsAccountConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CreateAccountReply {
    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub access_keys: Vec<AccessKeys>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct UpdateAccountS3AccessParams {
    pub email: String,
    pub s3_access: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_resource: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_bucket_creation: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfs_account_config: Option<NsfsAccountConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ValidateReplicationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,

    pub replication_policy: Value,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AgentConfigReply {
    /// Base64 agent configuration for the pv-pool pods.
    pub config: String,
}
