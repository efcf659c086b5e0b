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

//! JSON-over-HTTPS transport for the management RPC.

use super::types::*;
use super::{
    BuildSnafu, DecodeSnafu, Error, HttpStatusSnafu, InvalidAddressSnafu, NoobaaApi, Result,
    TransportSnafu,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use snafu::ResultExt;
use std::time::Duration;
use tracing::debug;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct Request<'a, P> {
    api: &'a str,
    method: &'a str,
    params: P,

    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<&'a str>,
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    reply: Value,

    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Deserialize)]
struct RemoteError {
    #[serde(default)]
    rpc_code: String,

    #[serde(default)]
    message: String,
}

/// RPC client bound to one management address and token.
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Clone, Debug)]
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl RpcClient {
    /// `address` is the management base URL, e.g. `https://noobaa-mgmt.noobaa.svc:443`.
    pub fn new(address: &str, token: Option<String>) -> Result<Self> {
        let base = Url::parse(address).context(InvalidAddressSnafu { address })?;
        let endpoint = base
            .join("/rpc/")
            .context(InvalidAddressSnafu { address })?;

        // the management service presents a cluster-internal self-signed certificate
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .context(BuildSnafu)?;

        Ok(Self {
            http,
            endpoint,
            token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn with_token(&self, token: Option<String>) -> Self {
        Self {
            token,
            ..self.clone()
        }
    }

    async fn call<P, R>(&self, api: &str, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        debug!(api, method, "rpc call");
        let body = Request {
            api,
            method,
            params,
            auth_token: self.token.as_deref(),
        };

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .context(TransportSnafu { api, method })?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 500 {
            return HttpStatusSnafu {
                api,
                method,
                status: status.as_u16(),
            }
            .fail();
        }

        let reply: Reply = response
            .json()
            .await
            .context(TransportSnafu { api, method })?;
        decode_reply(api, method, reply)
    }
}

fn decode_reply<R: DeserializeOwned>(api: &str, method: &str, reply: Reply) -> Result<R> {
    if let Some(err) = reply.error {
        return Err(Error::remote(api, method, &err.rpc_code, &err.message));
    }
    serde_json::from_value(reply.reply).context(DecodeSnafu { api, method })
}

/// Replies carrying nothing of interest.
struct Unit;

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        serde::de::IgnoredAny::deserialize(deserializer).map(|_| Unit)
    }
}

#[async_trait]
impl NoobaaApi for RpcClient {
    async fn read_system(&self) -> Result<SystemInfo> {
        self.call("system_api", "read_system", json!({})).await
    }

    async fn create_system(&self, params: CreateSystemParams) -> Result<CreateSystemReply> {
        self.call("system_api", "create_system", params).await
    }

    async fn create_auth(&self, params: CreateAuthParams) -> Result<CreateAuthReply> {
        self.call("auth_api", "create_auth", params).await
    }

    async fn create_hosts_pool(&self, params: CreateHostsPoolParams) -> Result<()> {
        self.call::<_, Unit>("pool_api", "create_hosts_pool", params)
            .await
            .map(drop)
    }

    async fn get_hosts_pool_agent_config(&self, pool: &str) -> Result<String> {
        self.call("pool_api", "get_hosts_pool_agent_config", json!({ "name": pool }))
            .await
    }

    async fn update_hosts_pool(&self, params: UpdateHostsPoolParams) -> Result<()> {
        self.call::<_, Unit>("pool_api", "update_hosts_pool", params)
            .await
            .map(drop)
    }

    async fn create_cloud_pool(&self, params: CreateCloudPoolParams) -> Result<()> {
        self.call::<_, Unit>("pool_api", "create_cloud_pool", params)
            .await
            .map(drop)
    }

    async fn delete_pool(&self, name: &str) -> Result<()> {
        self.call::<_, Unit>("pool_api", "delete_pool", json!({ "name": name }))
            .await
            .map(drop)
    }

    async fn add_external_connection(&self, params: ExternalConnectionParams) -> Result<()> {
        self.call::<_, Unit>("account_api", "add_external_connection", params)
            .await
            .map(drop)
    }

    async fn check_external_connection(
        &self,
        params: ExternalConnectionParams,
    ) -> Result<CheckExternalConnectionReply> {
        self.call("account_api", "check_external_connection", params)
            .await
    }

    async fn update_external_connection(
        &self,
        params: UpdateExternalConnectionParams,
    ) -> Result<()> {
        self.call::<_, Unit>("account_api", "update_external_connection", params)
            .await
            .map(drop)
    }

    async fn delete_external_connection(&self, name: &str) -> Result<()> {
        self.call::<_, Unit>(
            "account_api",
            "delete_external_connection",
            json!({ "connection_name": name }),
        )
        .await
        .map(drop)
    }

    async fn create_namespace_resource(
        &self,
        params: CreateNamespaceResourceParams,
    ) -> Result<()> {
        self.call::<_, Unit>("pool_api", "create_namespace_resource", params)
            .await
            .map(drop)
    }

    async fn read_namespace_resource(&self, name: &str) -> Result<NamespaceResourceInfo> {
        self.call("pool_api", "read_namespace_resource", json!({ "name": name }))
            .await
    }

    async fn delete_namespace_resource(&self, name: &str) -> Result<()> {
        self.call::<_, Unit>("pool_api", "delete_namespace_resource", json!({ "name": name }))
            .await
            .map(drop)
    }

    async fn create_tier(&self, params: CreateTierParams) -> Result<()> {
        self.call::<_, Unit>("tier_api", "create_tier", params)
            .await
            .map(drop)
    }

    async fn create_tiering_policy(&self, params: CreateTieringPolicyParams) -> Result<()> {
        self.call::<_, Unit>("tiering_policy_api", "create_policy", params)
            .await
            .map(drop)
    }

    async fn create_bucket(&self, params: CreateBucketParams) -> Result<()> {
        self.call::<_, Unit>("bucket_api", "create_bucket", params)
            .await
            .map(drop)
    }

    async fn read_bucket(&self, name: &str) -> Result<BucketInfo> {
        self.call("bucket_api", "read_bucket", json!({ "name": name }))
            .await
    }

    async fn update_bucket(&self, params: UpdateBucketParams) -> Result<()> {
        self.call::<_, Unit>("bucket_api", "update_bucket", params)
            .await
            .map(drop)
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.call::<_, Unit>("bucket_api", "delete_bucket", json!({ "name": name }))
            .await
            .map(drop)
    }

    async fn delete_bucket_and_objects(&self, name: &str) -> Result<()> {
        self.call::<_, Unit>(
            "bucket_api",
            "delete_bucket_and_objects",
            json!({ "name": name }),
        )
        .await
        .map(drop)
    }

    async fn list_buckets(&self) -> Result<ListBucketsReply> {
        self.call("bucket_api", "list_buckets", json!({})).await
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<CreateAccountReply> {
        self.call("account_api", "create_account", params).await
    }

    async fn read_account(&self, email: &str) -> Result<AccountInfo> {
        self.call("account_api", "read_account", json!({ "email": email }))
            .await
    }

    async fn update_account_s3_access(&self, params: UpdateAccountS3AccessParams) -> Result<()> {
        self.call::<_, Unit>("account_api", "update_account_s3_access", params)
            .await
            .map(drop)
    }

    async fn delete_account(&self, email: &str) -> Result<()> {
        self.call::<_, Unit>("account_api", "delete_account", json!({ "email": email }))
            .await
            .map(drop)
    }

    async fn validate_replication(&self, params: ValidateReplicationParams) -> Result<()> {
        self.call::<_, Unit>("bucket_api", "validate_replication", params)
            .await
            .map(drop)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_rpc_path() {
        let client = RpcClient::new("https://noobaa-mgmt.noobaa.svc:443", None).unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://noobaa-mgmt.noobaa.svc/rpc/"
        );
        assert!(RpcClient::new("not a url", None).is_err());
    }

    #[test]
    fn test_request_envelope_shape() {
        let body = Request {
            api: "bucket_api",
            method: "read_bucket",
            params: json!({ "name": "b1" }),
            auth_token: Some("tok"),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "api": "bucket_api",
                "method": "read_bucket",
                "params": { "name": "b1" },
                "auth_token": "tok",
            })
        );
    }

    #[test]
    fn test_remote_error_keeps_code() {
        let reply: Reply = serde_json::from_value(json!({
            "error": { "rpc_code": "NO_SUCH_BUCKET", "message": "gone" }
        }))
        .unwrap();
        let err = decode_reply::<BucketInfo>("bucket_api", "read_bucket", reply).unwrap_err();
        assert_eq!(err.code(), Some("NO_SUCH_BUCKET"));
        assert!(err.is_no_such());
    }

    #[test]
    fn test_unit_reply_accepts_anything() {
        let reply: Reply = serde_json::from_value(json!({ "reply": { "ok": 1 } })).unwrap();
        assert!(decode_reply::<Unit>("pool_api", "delete_pool", reply).is_ok());
    }
}
