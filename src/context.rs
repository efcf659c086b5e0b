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

use crate::config::OperatorConfig;
use crate::controller::discovery::Capabilities;
use crate::rpc::{self, NoobaaApi, RpcClient};
use crate::types;
use crate::types::v1alpha1::noobaa::{MGMT_SERVICE, OPERATOR_SECRET};
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
    PostParams,
};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Resource, ResourceExt, api::Api};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::futures::TryFutureExt;
use snafu::{ResultExt, Snafu};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Field manager used for every server-side apply.
pub const FIELD_MANAGER: &str = "noobaa-operator";

/// Secret key holding the operator's RPC token.
pub const OPERATOR_TOKEN_KEY: &str = "auth_token";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(display("record event error: {}", source))]
    Record { source: kube::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(display("secret '{}' missing required key '{}'", secret_name, key))]
    SecretMissingKey { secret_name: String, key: String },

    #[snafu(display("secret '{}' has invalid data encoding for key '{}'", secret_name, key))]
    SecretInvalidEncoding { secret_name: String, key: String },

    #[snafu(display("rpc client error: {}", source))]
    RpcClient { source: rpc::Error },

    #[snafu(transparent)]
    Serde { source: serde_json::Error },
}

pub struct Context {
    pub(crate) client: kube::Client,
    pub(crate) recorder: Recorder,
    pub(crate) config: Arc<OperatorConfig>,
    pub(crate) capabilities: Capabilities,
    rpc_pool: DashMap<String, Arc<dyn NoobaaApi>>,
}

impl Context {
    pub fn new(client: kube::Client, config: Arc<OperatorConfig>) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: Some(config.identity.clone()),
        };

        let recorder = Recorder::new(client.clone(), reporter);
        Self {
            client,
            recorder,
            config,
            capabilities: Capabilities::default(),
            rpc_pool: DashMap::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// send event
    #[inline]
    pub async fn record<K>(
        &self,
        resource: &K,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), Error>
    where
        K: Resource<DynamicType = ()>,
    {
        self.recorder
            .publish(
                &Event {
                    type_: event_type,
                    reason: reason.to_owned(),
                    note: Some(message.into()),
                    action: "Reconcile".into(),
                    secondary: None,
                },
                &resource.object_ref(&()),
            )
            .context(RecordSnafu)
            .await
    }

    pub async fn get<T>(&self, name: &str, namespace: &str) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).context(KubeSnafu).await
    }

    pub async fn get_opt<T>(&self, name: &str, namespace: &str) -> Result<Option<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).context(KubeSnafu).await
    }

    pub async fn create<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), resource)
            .context(KubeSnafu)
            .await
    }

    pub async fn list<T>(&self, namespace: &str) -> Result<Vec<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).context(KubeSnafu).await?;
        Ok(list.items)
    }

    pub async fn apply<T>(&self, resource: &T, namespace: &str) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            &resource.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(resource),
        )
        .context(KubeSnafu)
        .await
    }

    /// Deletes the object if it exists; a missing object is not an error.
    pub async fn delete<T>(&self, name: &str, namespace: &str) -> Result<(), Error>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        if api.get_opt(name).context(KubeSnafu).await?.is_none() {
            return Ok(());
        }
        api.delete(name, &DeleteParams::background())
            .context(KubeSnafu)
            .await?;
        Ok(())
    }

    /// Server-side applies a raw manifest of a kind without typed bindings.
    pub async fn apply_dynamic(
        &self,
        gvk: &GroupVersionKind,
        manifest: &serde_json::Value,
        namespace: &str,
    ) -> Result<(), Error> {
        let resource = ApiResource::from_gvk(gvk);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);
        let name = manifest
            .pointer("/metadata/name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(manifest),
        )
        .context(KubeSnafu)
        .await?;
        Ok(())
    }

    pub async fn get_cluster_opt<T>(&self, name: &str) -> Result<Option<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = ClusterResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        api.get_opt(name).context(KubeSnafu).await
    }

    pub async fn apply_cluster<T>(&self, resource: &T) -> Result<T, Error>
    where
        T: Clone + Serialize + DeserializeOwned + Debug + Resource<Scope = ClusterResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        api.patch(
            &resource.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(resource),
        )
        .context(KubeSnafu)
        .await
    }

    pub async fn delete_cluster<T>(&self, name: &str) -> Result<(), Error>
    where
        T: Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Debug,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        if api.get_opt(name).context(KubeSnafu).await?.is_none() {
            return Ok(());
        }
        api.delete(name, &DeleteParams::background())
            .context(KubeSnafu)
            .await?;
        Ok(())
    }

    /// Replaces the status subresource with `status` via a merge patch.
    pub async fn patch_status<T, S>(&self, resource: &T, status: &S) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
        S: Serialize,
    {
        let namespace = resource
            .namespace()
            .ok_or(types::error::Error::NoNamespace)?;
        let api: Api<T> = Api::namespaced(self.client.clone(), &namespace);
        let body = serde_json::json!({ "status": status });
        api.patch_status(
            &resource.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&body),
        )
        .context(KubeSnafu)
        .await
    }

    /// Merge-patches the main resource with `body`.
    pub async fn patch_merge<T>(&self, resource: &T, body: &serde_json::Value) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let namespace = resource
            .namespace()
            .ok_or(types::error::Error::NoNamespace)?;
        let api: Api<T> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(&resource.name_any(), &PatchParams::default(), &Patch::Merge(body))
            .context(KubeSnafu)
            .await
    }

    async fn patch_finalizers<T>(&self, resource: &T, finalizers: Vec<String>) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let body = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        self.patch_merge(resource, &body).await
    }

    pub async fn add_finalizer<T>(&self, resource: &T, finalizer: &str) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        if types::has_finalizer(resource, finalizer) {
            return Ok(resource.clone());
        }
        let mut finalizers = resource.finalizers().to_vec();
        finalizers.push(finalizer.to_owned());
        debug!(name = %resource.name_any(), finalizer, "adding finalizer");
        self.patch_finalizers(resource, finalizers).await
    }

    pub async fn remove_finalizer<T>(&self, resource: &T, finalizer: &str) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        if !types::has_finalizer(resource, finalizer) {
            return Ok(resource.clone());
        }
        let finalizers = resource
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();
        debug!(name = %resource.name_any(), finalizer, "removing finalizer");
        self.patch_finalizers(resource, finalizers).await
    }

    /// Reads one key of a secret as UTF-8; `None` if the secret does not exist.
    pub async fn secret_value(
        &self,
        name: &str,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, Error> {
        let Some(secret) = self.get_opt::<Secret>(name, namespace).await? else {
            return Ok(None);
        };
        secret_string(&secret, key).map(Some)
    }

    /// Management address of the system running in `namespace`.
    pub fn mgmt_address(&self, namespace: &str) -> String {
        self.config
            .mgmt_address
            .clone()
            .unwrap_or_else(|| format!("https://{MGMT_SERVICE}.{namespace}.svc:443"))
    }

    /// A pooled RPC client for `namespace`, authenticated with `token`.
    pub fn rpc_client(
        &self,
        namespace: &str,
        token: Option<String>,
    ) -> Result<Arc<dyn NoobaaApi>, Error> {
        let address = self.mgmt_address(namespace);
        let key = format!("{address}#{}", token.as_deref().unwrap_or_default());
        if let Some(client) = self.rpc_pool.get(&key) {
            return Ok(client.value().clone());
        }
        let client: Arc<dyn NoobaaApi> =
            Arc::new(RpcClient::new(&address, token).context(RpcClientSnafu)?);
        self.rpc_pool.insert(key, client.clone());
        Ok(client)
    }

    /// The operator's RPC client, or `None` before the system was bootstrapped.
    pub async fn rpc(&self, namespace: &str) -> Result<Option<Arc<dyn NoobaaApi>>, Error> {
        let Some(token) = self
            .secret_value(OPERATOR_SECRET, namespace, OPERATOR_TOKEN_KEY)
            .await?
        else {
            return Ok(None);
        };
        self.rpc_client(namespace, Some(token)).map(Some)
    }
}

/// Reads `key` from either `data` or `stringData` of a secret.
pub fn secret_string(secret: &Secret, key: &str) -> Result<String, Error> {
    let secret_name = secret.name_any();
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(bytes.0.clone()).map_err(|_| Error::SecretInvalidEncoding {
            secret_name,
            key: key.to_owned(),
        });
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned()
        .ok_or(Error::SecretMissingKey {
            secret_name,
            key: key.to_owned(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_secret_string_reads_data_and_string_data() {
        let mut secret = Secret::default();
        secret.metadata.name = Some("s".to_string());
        secret.data = Some([("a".to_string(), ByteString(b"one".to_vec()))].into());
        secret.string_data = Some([("b".to_string(), "two".to_string())].into());

        assert_eq!(secret_string(&secret, "a").unwrap(), "one");
        assert_eq!(secret_string(&secret, "b").unwrap(), "two");
        assert!(matches!(
            secret_string(&secret, "c"),
            Err(Error::SecretMissingKey { .. })
        ));

        secret.data = Some([("a".to_string(), ByteString(vec![0xff, 0xfe]))].into());
        assert!(matches!(
            secret_string(&secret, "a"),
            Err(Error::SecretInvalidEncoding { .. })
        ));
    }
}
