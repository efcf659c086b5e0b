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

//! In-memory management system for tests.

use super::types::*;
use super::{Error, NoobaaApi, Result, codes};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
pub struct State {
    pub pools: BTreeMap<String, PoolInfo>,
    pub accounts: BTreeMap<String, AccountInfo>,
    pub buckets: BTreeMap<String, BucketInfo>,
    pub namespace_resources: BTreeMap<String, NamespaceResourceInfo>,
    pub connections: BTreeMap<String, ExternalConnectionInfo>,
    pub tiers: BTreeMap<String, CreateTierParams>,
    pub policies: BTreeMap<String, CreateTieringPolicyParams>,
    pub created_buckets: Vec<CreateBucketParams>,
    pub calls: Vec<String>,
    /// Set once `create_system` succeeded.
    pub system: Option<CreateSystemParams>,

    /// Status returned by `check_external_connection`.
    pub check_status: String,
    /// Mode given to newly created pools.
    pub new_pool_mode: String,
    /// Drop access keys from `create_account` replies.
    pub omit_keys_on_create: bool,
    /// Rejection returned by `validate_replication`, as `(code, message)`.
    pub replication_error: Option<(String, String)>,
    /// One-shot failures by method name.
    pub failures: HashMap<String, (String, String)>,
    /// Every call fails without a structured reply, like an unreachable core.
    pub unreachable: bool,

    next_key: u32,
}

pub struct FakeNoobaa {
    pub state: Mutex<State>,
}

impl Default for FakeNoobaa {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeNoobaa {
    pub fn new() -> Self {
        let mut state = State {
            check_status: "SUCCESS".to_owned(),
            new_pool_mode: "OPTIMAL".to_owned(),
            ..Default::default()
        };
        state.pools.insert(
            "system-internal-storage-pool".to_owned(),
            PoolInfo {
                name: "system-internal-storage-pool".to_owned(),
                resource_type: POOL_TYPE_INTERNAL.to_owned(),
                mode: "OPTIMAL".to_owned(),
                ..Default::default()
            },
        );
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn fail_next(&self, method: &str, code: &str) {
        self.with(|s| {
            s.failures
                .insert(method.to_owned(), (code.to_owned(), format!("{method} failed")))
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn count(&self, method: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| *c == method).count())
    }

    pub fn add_pool(&self, name: &str, resource_type: &str, mode: &str) {
        self.with(|s| {
            s.pools.insert(
                name.to_owned(),
                PoolInfo {
                    name: name.to_owned(),
                    resource_type: resource_type.to_owned(),
                    mode: mode.to_owned(),
                    ..Default::default()
                },
            )
        });
    }

    pub fn add_account(&self, email: &str, default_resource: Option<&str>) {
        self.with(|s| {
            s.accounts.insert(
                email.to_owned(),
                AccountInfo {
                    name: email.to_owned(),
                    email: email.to_owned(),
                    default_resource: default_resource.map(str::to_owned),
                    ..Default::default()
                },
            )
        });
    }

    fn enter(&self, method: &str) -> Result<()> {
        self.with(|s| {
            s.calls.push(method.to_owned());
            if s.unreachable {
                return Err(Error::HttpStatus {
                    api: "fake".to_owned(),
                    method: method.to_owned(),
                    status: 503,
                });
            }
            match s.failures.remove(method) {
                Some((code, message)) => Err(Error::remote("fake", method, &code, &message)),
                None => Ok(()),
            }
        })
    }
}

fn remote(method: &str, code: &str, message: impl Into<String>) -> Error {
    Error::remote("fake", method, code, &message.into())
}

fn pool_in_use(s: &State, pool: &str) -> bool {
    let by_tier = s.tiers.values().any(|t| t.attached_pools.iter().any(|p| p == pool));
    let by_account = s
        .accounts
        .values()
        .any(|a| a.default_resource.as_deref() == Some(pool));
    by_tier || by_account
}

#[async_trait]
impl NoobaaApi for FakeNoobaa {
    async fn read_system(&self) -> Result<SystemInfo> {
        self.enter("read_system")?;
        Ok(self.with(|s| SystemInfo {
            name: "noobaa".to_owned(),
            version: "fake".to_owned(),
            pools: s
                .pools
                .values()
                .cloned()
                .map(|mut p| {
                    if p.undeletable.is_none() && pool_in_use(s, &p.name) {
                        p.undeletable = Some(codes::IN_USE.to_owned());
                    }
                    p
                })
                .collect(),
            accounts: s.accounts.values().cloned().collect(),
            buckets: s.buckets.values().cloned().collect(),
            namespace_resources: s.namespace_resources.values().cloned().collect(),
            external_connections: s.connections.values().cloned().collect(),
        }))
    }

    async fn create_system(&self, params: CreateSystemParams) -> Result<CreateSystemReply> {
        self.enter("create_system")?;
        self.with(|s| {
            if s.system.is_some() {
                return Err(remote("create_system", "CONFLICT", "system already exists"));
            }
            let reply = CreateSystemReply {
                token: format!("admin-token-{}", params.name),
                operator_token: format!("operator-token-{}", params.name),
            };
            s.system = Some(params);
            Ok(reply)
        })
    }

    async fn create_auth(&self, params: CreateAuthParams) -> Result<CreateAuthReply> {
        self.enter("create_auth")?;
        self.with(|s| match &s.system {
            Some(system)
                if system.name == params.system
                    && system.email == params.email
                    && system.password == params.password =>
            {
                Ok(CreateAuthReply {
                    token: format!("auth-token-{}", params.system),
                })
            }
            _ => Err(remote("create_auth", codes::UNAUTHORIZED, "credentials not accepted")),
        })
    }

    async fn create_hosts_pool(&self, params: CreateHostsPoolParams) -> Result<()> {
        self.enter("create_hosts_pool")?;
        self.with(|s| {
            let mode = s.new_pool_mode.clone();
            s.pools.entry(params.name.clone()).or_insert(PoolInfo {
                name: params.name,
                resource_type: POOL_TYPE_HOSTS.to_owned(),
                mode,
                hosts_info: Some(HostsInfo {
                    configured_count: params.host_count,
                }),
                ..Default::default()
            });
        });
        Ok(())
    }

    async fn get_hosts_pool_agent_config(&self, pool: &str) -> Result<String> {
        self.enter("get_hosts_pool_agent_config")?;
        Ok(format!("agent-config-{pool}"))
    }

    async fn update_hosts_pool(&self, params: UpdateHostsPoolParams) -> Result<()> {
        self.enter("update_hosts_pool")?;
        self.with(|s| match s.pools.get_mut(&params.name) {
            Some(pool) => {
                pool.hosts_info = Some(HostsInfo {
                    configured_count: params.host_count,
                });
                Ok(())
            }
            None => Err(remote("update_hosts_pool", codes::NO_SUCH_POOL, params.name)),
        })
    }

    async fn create_cloud_pool(&self, params: CreateCloudPoolParams) -> Result<()> {
        self.enter("create_cloud_pool")?;
        self.with(|s| {
            let Some(conn) = s.connections.get(&params.connection).cloned() else {
                return Err(remote(
                    "create_cloud_pool",
                    codes::NO_SUCH_CONNECTION,
                    params.connection,
                ));
            };
            let mode = s.new_pool_mode.clone();
            s.pools.insert(
                params.name.clone(),
                PoolInfo {
                    name: params.name,
                    resource_type: POOL_TYPE_CLOUD.to_owned(),
                    mode,
                    cloud_info: Some(CloudInfo {
                        endpoint: conn.endpoint,
                        endpoint_type: conn.endpoint_type,
                        target_bucket: params.target_bucket,
                        identity: conn.identity,
                        connection_name: Some(conn.name),
                    }),
                    ..Default::default()
                },
            );
            Ok(())
        })
    }

    async fn delete_pool(&self, name: &str) -> Result<()> {
        self.enter("delete_pool")?;
        self.with(|s| {
            if !s.pools.contains_key(name) {
                return Err(remote("delete_pool", codes::NO_SUCH_POOL, name));
            }
            if pool_in_use(s, name) {
                return Err(remote("delete_pool", codes::IN_USE, name));
            }
            s.pools.remove(name);
            Ok(())
        })
    }

    async fn add_external_connection(&self, params: ExternalConnectionParams) -> Result<()> {
        self.enter("add_external_connection")?;
        self.with(|s| {
            s.connections.insert(
                params.name.clone(),
                ExternalConnectionInfo {
                    name: params.name,
                    endpoint: params.endpoint,
                    endpoint_type: params.endpoint_type,
                    identity: params.identity,
                    secret_digest: Some(secret_digest(&params.secret)),
                },
            )
        });
        Ok(())
    }

    async fn check_external_connection(
        &self,
        _params: ExternalConnectionParams,
    ) -> Result<CheckExternalConnectionReply> {
        self.enter("check_external_connection")?;
        Ok(self.with(|s| CheckExternalConnectionReply {
            status: s.check_status.clone(),
            error: None,
        }))
    }

    async fn update_external_connection(
        &self,
        params: UpdateExternalConnectionParams,
    ) -> Result<()> {
        self.enter("update_external_connection")?;
        self.with(|s| match s.connections.get_mut(&params.name) {
            Some(conn) => {
                conn.identity = params.identity;
                conn.secret_digest = Some(secret_digest(&params.secret));
                Ok(())
            }
            None => Err(remote(
                "update_external_connection",
                codes::NO_SUCH_CONNECTION,
                params.name,
            )),
        })
    }

    async fn delete_external_connection(&self, name: &str) -> Result<()> {
        self.enter("delete_external_connection")?;
        self.with(|s| {
            if s.connections.remove(name).is_none() {
                return Err(remote(
                    "delete_external_connection",
                    codes::NO_SUCH_CONNECTION,
                    name,
                ));
            }
            Ok(())
        })
    }

    async fn create_namespace_resource(
        &self,
        params: CreateNamespaceResourceParams,
    ) -> Result<()> {
        self.enter("create_namespace_resource")?;
        self.with(|s| {
            let conn = params
                .connection
                .as_ref()
                .and_then(|c| s.connections.get(c))
                .cloned()
                .unwrap_or_default();
            s.namespace_resources.insert(
                params.name.clone(),
                NamespaceResourceInfo {
                    name: params.name,
                    mode: "OPTIMAL".to_owned(),
                    endpoint_type: conn.endpoint_type,
                    endpoint: conn.endpoint,
                    target_bucket: params.target_bucket.unwrap_or_default(),
                    identity: conn.identity,
                    connection_name: params.connection,
                    ..Default::default()
                },
            );
        });
        Ok(())
    }

    async fn read_namespace_resource(&self, name: &str) -> Result<NamespaceResourceInfo> {
        self.enter("read_namespace_resource")?;
        self.with(|s| {
            s.namespace_resources.get(name).cloned().ok_or_else(|| {
                remote(
                    "read_namespace_resource",
                    codes::NO_SUCH_NAMESPACE_RESOURCE,
                    name,
                )
            })
        })
    }

    async fn delete_namespace_resource(&self, name: &str) -> Result<()> {
        self.enter("delete_namespace_resource")?;
        self.with(|s| {
            let used = s.buckets.values().any(|b| {
                b.namespace.as_ref().is_some_and(|ns| {
                    ns.write_resource.as_deref() == Some(name)
                        || ns.read_resources.iter().any(|r| r == name)
                })
            });
            if used {
                return Err(remote("delete_namespace_resource", codes::IN_USE, name));
            }
            match s.namespace_resources.remove(name) {
                Some(_) => Ok(()),
                None => Err(remote(
                    "delete_namespace_resource",
                    codes::NO_SUCH_NAMESPACE_RESOURCE,
                    name,
                )),
            }
        })
    }

    async fn create_tier(&self, params: CreateTierParams) -> Result<()> {
        self.enter("create_tier")?;
        self.with(|s| {
            if let Some(missing) = params
                .attached_pools
                .iter()
                .find(|p| !s.pools.contains_key(*p))
            {
                return Err(remote("create_tier", codes::NO_SUCH_POOL, missing.clone()));
            }
            s.tiers.insert(params.name.clone(), params);
            Ok(())
        })
    }

    async fn create_tiering_policy(&self, params: CreateTieringPolicyParams) -> Result<()> {
        self.enter("create_tiering_policy")?;
        self.with(|s| {
            s.policies.insert(params.name.clone(), params);
        });
        Ok(())
    }

    async fn create_bucket(&self, params: CreateBucketParams) -> Result<()> {
        self.enter("create_bucket")?;
        self.with(|s| {
            if s.buckets.contains_key(&params.name) {
                return Err(remote(
                    "create_bucket",
                    codes::BUCKET_ALREADY_EXISTS,
                    params.name,
                ));
            }
            if let Some(policy) = &params.tiering
                && !s.policies.contains_key(policy)
            {
                return Err(remote(
                    "create_bucket",
                    "NO_SUCH_TIERING_POLICY",
                    policy.clone(),
                ));
            }
            s.buckets.insert(
                params.name.clone(),
                BucketInfo {
                    name: params.name.clone(),
                    tiering: params.tiering.clone().map(|name| TieringRef { name }),
                    namespace: params.namespace.clone(),
                    bucket_claim: params.bucket_claim.clone(),
                    mode: "OPTIMAL".to_owned(),
                },
            );
            s.created_buckets.push(params);
            Ok(())
        })
    }

    async fn read_bucket(&self, name: &str) -> Result<BucketInfo> {
        self.enter("read_bucket")?;
        self.with(|s| {
            s.buckets
                .get(name)
                .cloned()
                .ok_or_else(|| remote("read_bucket", codes::NO_SUCH_BUCKET, name))
        })
    }

    async fn update_bucket(&self, params: UpdateBucketParams) -> Result<()> {
        self.enter("update_bucket")?;
        self.with(|s| match s.buckets.get_mut(&params.name) {
            Some(bucket) => {
                if let Some(tiering) = params.tiering {
                    bucket.tiering = Some(TieringRef { name: tiering });
                }
                Ok(())
            }
            None => Err(remote("update_bucket", codes::NO_SUCH_BUCKET, params.name)),
        })
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.enter("delete_bucket")?;
        self.with(|s| match s.buckets.remove(name) {
            Some(_) => Ok(()),
            None => Err(remote("delete_bucket", codes::NO_SUCH_BUCKET, name)),
        })
    }

    async fn delete_bucket_and_objects(&self, name: &str) -> Result<()> {
        self.enter("delete_bucket_and_objects")?;
        self.with(|s| match s.buckets.remove(name) {
            Some(_) => Ok(()),
            None => Err(remote(
                "delete_bucket_and_objects",
                codes::NO_SUCH_BUCKET,
                name,
            )),
        })
    }

    async fn list_buckets(&self) -> Result<ListBucketsReply> {
        self.enter("list_buckets")?;
        Ok(self.with(|s| ListBucketsReply {
            buckets: s
                .buckets
                .keys()
                .map(|name| BucketName { name: name.clone() })
                .collect(),
        }))
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<CreateAccountReply> {
        self.enter("create_account")?;
        self.with(|s| {
            if s.accounts.contains_key(&params.email) {
                return Err(remote(
                    "create_account",
                    "ACCOUNT_ALREADY_EXISTS",
                    params.email,
                ));
            }
            s.next_key += 1;
            let keys = AccessKeys {
                access_key: format!("AK{:04}", s.next_key),
                secret_key: format!("SK{:04}", s.next_key),
            };
            s.accounts.insert(
                params.email.clone(),
                AccountInfo {
                    name: params.name,
                    email: params.email,
                    default_resource: params.default_resource,
                    access_keys: vec![keys.clone()],
                    allow_bucket_creation: params.allow_bucket_creation,
                    bucket_claim_owner: params.bucket_claim_owner,
                    nsfs_account_config: params.nsfs_account_config,
                },
            );
            Ok(CreateAccountReply {
                token: String::new(),
                access_keys: if s.omit_keys_on_create {
                    Vec::new()
                } else {
                    vec![keys]
                },
            })
        })
    }

    async fn read_account(&self, email: &str) -> Result<AccountInfo> {
        self.enter("read_account")?;
        self.with(|s| {
            s.accounts
                .get(email)
                .cloned()
                .ok_or_else(|| remote("read_account", codes::NO_SUCH_ACCOUNT, email))
        })
    }

    async fn update_account_s3_access(&self, params: UpdateAccountS3AccessParams) -> Result<()> {
        self.enter("update_account_s3_access")?;
        self.with(|s| match s.accounts.get_mut(&params.email) {
            Some(account) => {
                if params.default_resource.is_some() {
                    account.default_resource = params.default_resource;
                }
                if let Some(allow) = params.allow_bucket_creation {
                    account.allow_bucket_creation = allow;
                }
                if params.nsfs_account_config.is_some() {
                    account.nsfs_account_config = params.nsfs_account_config;
                }
                Ok(())
            }
            None => Err(remote(
                "update_account_s3_access",
                codes::NO_SUCH_ACCOUNT,
                params.email,
            )),
        })
    }

    async fn delete_account(&self, email: &str) -> Result<()> {
        self.enter("delete_account")?;
        self.with(|s| match s.accounts.remove(email) {
            Some(_) => Ok(()),
            None => Err(remote("delete_account", codes::NO_SUCH_ACCOUNT, email)),
        })
    }

    async fn validate_replication(&self, _params: ValidateReplicationParams) -> Result<()> {
        self.enter("validate_replication")?;
        self.with(|s| match &s.replication_error {
            Some((code, message)) => Err(remote("validate_replication", code, message.clone())),
            None => Ok(()),
        })
    }
}
