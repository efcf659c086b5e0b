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

//! Contract of the managed system's management RPC.
//!
//! Reconcilers and the provisioner only talk to [`NoobaaApi`]; the HTTP
//! transport lives in [`client`], and tests use an in-memory fake.

use async_trait::async_trait;
use snafu::Snafu;
use self::types::*;

pub mod client;
#[cfg(test)]
pub mod fake;
pub mod types;

pub use client::RpcClient;

/// Remote error codes the operator reacts to.
pub mod codes {
    pub const NO_SUCH_PREFIX: &str = "NO_SUCH_";
    pub const NO_SUCH_BUCKET: &str = "NO_SUCH_BUCKET";
    pub const NO_SUCH_ACCOUNT: &str = "NO_SUCH_ACCOUNT";
    pub const NO_SUCH_POOL: &str = "NO_SUCH_POOL";
    pub const NO_SUCH_NAMESPACE_RESOURCE: &str = "NO_SUCH_NAMESPACE_RESOURCE";
    pub const NO_SUCH_CONNECTION: &str = "NO_SUCH_CONNECTION";
    pub const BUCKET_ALREADY_EXISTS: &str = "BUCKET_ALREADY_EXISTS";
    pub const IN_USE: &str = "IN_USE";
    pub const CONNECTED_BUCKET_DELETING: &str = "CONNECTED_BUCKET_DELETING";
    pub const INVALID_SCHEMA_PARAMS: &str = "INVALID_SCHEMA_PARAMS";
    pub const INVALID_REPLICATION_POLICY: &str = "INVALID_REPLICATION_POLICY";
    pub const INVALID_LOG_REPLICATION_INFO: &str = "INVALID_LOG_REPLICATION_INFO";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{api}.{method} failed: {code}: {message}"))]
    Remote {
        api: String,
        method: String,
        code: String,
        message: String,
    },

    #[snafu(display("{api}.{method} transport error: {source}"))]
    Transport {
        api: String,
        method: String,
        source: reqwest::Error,
    },

    #[snafu(display("{api}.{method} returned http {status}"))]
    HttpStatus {
        api: String,
        method: String,
        status: u16,
    },

    #[snafu(display("{api}.{method} reply decode error: {source}"))]
    Decode {
        api: String,
        method: String,
        source: serde_json::Error,
    },

    #[snafu(display("invalid management address {address:?}: {source}"))]
    InvalidAddress {
        address: String,
        source: url::ParseError,
    },

    #[snafu(display("build http client: {source}"))]
    Build { source: reqwest::Error },
}

/// The distinguishable remote conditions; everything else is transient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classified {
    NoSuch,
    BucketAlreadyExists,
    InUse,
    ConnectedBucketDeleting,
    InvalidSchemaParams,
    Other,
}

impl Error {
    pub fn remote(api: &str, method: &str, code: &str, message: &str) -> Self {
        Error::Remote {
            api: api.to_owned(),
            method: method.to_owned(),
            code: code.to_owned(),
            message: message.to_owned(),
        }
    }

    /// The remote RPC code, when the managed system produced a structured failure.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Remote { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Error::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_code(&self, code: &str) -> bool {
        self.code() == Some(code)
    }

    pub fn is_no_such(&self) -> bool {
        self.code()
            .is_some_and(|c| c.starts_with(codes::NO_SUCH_PREFIX))
    }

    pub fn classify(&self) -> Classified {
        match self.code() {
            Some(c) if c.starts_with(codes::NO_SUCH_PREFIX) => Classified::NoSuch,
            Some(codes::BUCKET_ALREADY_EXISTS) => Classified::BucketAlreadyExists,
            Some(codes::IN_USE) => Classified::InUse,
            Some(codes::CONNECTED_BUCKET_DELETING) => Classified::ConnectedBucketDeleting,
            Some(codes::INVALID_SCHEMA_PARAMS) => Classified::InvalidSchemaParams,
            _ => Classified::Other,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Treats `NO_SUCH_*` as success, for idempotent teardown.
pub fn ignore_no_such(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_no_such() => Ok(()),
        other => other,
    }
}

/// The management API surface the operator consumes.
#[async_trait]
pub trait NoobaaApi: Send + Sync {
    async fn read_system(&self) -> Result<SystemInfo>;
    async fn create_system(&self, params: CreateSystemParams) -> Result<CreateSystemReply>;
    async fn create_auth(&self, params: CreateAuthParams) -> Result<CreateAuthReply>;

    async fn create_hosts_pool(&self, params: CreateHostsPoolParams) -> Result<()>;
    async fn get_hosts_pool_agent_config(&self, pool: &str) -> Result<String>;
    async fn update_hosts_pool(&self, params: UpdateHostsPoolParams) -> Result<()>;
    async fn create_cloud_pool(&self, params: CreateCloudPoolParams) -> Result<()>;
    async fn delete_pool(&self, name: &str) -> Result<()>;

    async fn add_external_connection(&self, params: ExternalConnectionParams) -> Result<()>;
    async fn check_external_connection(
        &self,
        params: ExternalConnectionParams,
    ) -> Result<CheckExternalConnectionReply>;
    async fn update_external_connection(
        &self,
        params: UpdateExternalConnectionParams,
    ) -> Result<()>;
    async fn delete_external_connection(&self, name: &str) -> Result<()>;

    async fn create_namespace_resource(&self, params: CreateNamespaceResourceParams)
    -> Result<()>;
    async fn read_namespace_resource(&self, name: &str) -> Result<NamespaceResourceInfo>;
    async fn delete_namespace_resource(&self, name: &str) -> Result<()>;

    async fn create_tier(&self, params: CreateTierParams) -> Result<()>;
    async fn create_tiering_policy(&self, params: CreateTieringPolicyParams) -> Result<()>;

    async fn create_bucket(&self, params: CreateBucketParams) -> Result<()>;
    async fn read_bucket(&self, name: &str) -> Result<BucketInfo>;
    async fn update_bucket(&self, params: UpdateBucketParams) -> Result<()>;
    async fn delete_bucket(&self, name: &str) -> Result<()>;
    async fn delete_bucket_and_objects(&self, name: &str) -> Result<()>;
    async fn list_buckets(&self) -> Result<ListBucketsReply>;

    async fn create_account(&self, params: CreateAccountParams) -> Result<CreateAccountReply>;
    async fn read_account(&self, email: &str) -> Result<AccountInfo>;
    async fn update_account_s3_access(&self, params: UpdateAccountS3AccessParams) -> Result<()>;
    async fn delete_account(&self, email: &str) -> Result<()>;

    async fn validate_replication(&self, params: ValidateReplicationParams) -> Result<()>;
}
