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

//! HashiCorp Vault KV version 2 backend.

use super::k8s::secret_data;
use super::{BackendError, Driver, Error, HttpSnafu, KubeSnafu, Provider, Result, VaultSnafu};
use crate::types::v1alpha1::noobaa::KmsSpec;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use reqwest::StatusCode;
use serde::Deserialize;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

pub const VAULT_ADDR: &str = "VAULT_ADDR";
pub const VAULT_BACKEND_PATH: &str = "VAULT_BACKEND_PATH";
pub const VAULT_NAMESPACE: &str = "VAULT_NAMESPACE";
pub const VAULT_CACERT: &str = "VAULT_CACERT";
pub const VAULT_CLIENT_CERT: &str = "VAULT_CLIENT_CERT";
pub const VAULT_CLIENT_KEY: &str = "VAULT_CLIENT_KEY";

const DEFAULT_BACKEND_PATH: &str = "secret";
const TOKEN_KEY: &str = "token";
const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct VaultConfig {
    pub addr: Url,
    pub mount: String,
    pub namespace: Option<String>,
    pub ca_secret: Option<String>,
    pub client_cert_secret: Option<String>,
    pub client_key_secret: Option<String>,
}

impl VaultConfig {
    pub fn from_spec(spec: &KmsSpec) -> Result<Self> {
        let details = &spec.connection_details;
        let missing = |key: &str| Error::MissingConfig { key: key.to_owned() };
        let addr = details.get(VAULT_ADDR).ok_or_else(|| missing(VAULT_ADDR))?;
        let addr = Url::parse(addr).map_err(|_| missing(VAULT_ADDR))?;
        let mount = details
            .get(VAULT_BACKEND_PATH)
            .map(|p| p.trim_matches('/').to_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_BACKEND_PATH.to_owned());

        Ok(Self {
            addr,
            mount,
            namespace: details.get(VAULT_NAMESPACE).cloned(),
            ca_secret: details.get(VAULT_CACERT).cloned(),
            client_cert_secret: details.get(VAULT_CLIENT_CERT).cloned(),
            client_key_secret: details.get(VAULT_CLIENT_KEY).cloned(),
        })
    }

    fn url(&self, section: &str, path: &str) -> String {
        format!(
            "{}/v1/{}/{section}/{path}",
            self.addr.as_str().trim_end_matches('/'),
            self.mount
        )
    }

    pub fn data_url(&self, path: &str) -> String {
        self.url("data", path)
    }

    pub fn metadata_url(&self, path: &str) -> String {
        self.url("metadata", path)
    }
}

#[derive(Deserialize)]
struct ReadResponse {
    data: ReadData,
}

#[derive(Deserialize)]
struct ReadData {
    #[serde(default)]
    data: Option<BTreeMap<String, String>>,
}

pub struct VaultDriver {
    http: reqwest::Client,
    config: VaultConfig,
    token: String,
    prefix: String,
}

async fn secret_bytes(api: &Api<Secret>, name: &str, key: &str) -> Result<Vec<u8>> {
    let secret = api
        .get_opt(name)
        .await
        .context(KubeSnafu)
        .map_err(|source| Error::Read {
            name: name.to_owned(),
            source,
        })?
        .ok_or_else(|| Error::MissingConfig {
            key: format!("secret {name}"),
        })?;
    secret_data(&secret)
        .remove(key)
        .map(String::into_bytes)
        .ok_or_else(|| Error::MissingConfig {
            key: format!("{key} in secret {name}"),
        })
}

impl VaultDriver {
    /// Reads the token and TLS material from Secrets in `namespace`.
    pub async fn connect(client: kube::Client, namespace: &str, spec: KmsSpec) -> Result<Self> {
        let config = VaultConfig::from_spec(&spec)?;
        let secrets: Api<Secret> = Api::namespaced(client, namespace);

        let token_secret = spec
            .token_secret_name
            .as_deref()
            .ok_or_else(|| Error::MissingConfig {
                key: "tokenSecretName".to_owned(),
            })?;
        let token = String::from_utf8_lossy(&secret_bytes(&secrets, token_secret, TOKEN_KEY).await?)
            .trim()
            .to_owned();

        let mut builder = reqwest::Client::builder().timeout(TIMEOUT).use_rustls_tls();
        if let Some(name) = &config.ca_secret {
            let pem = secret_bytes(&secrets, name, "cert").await?;
            let ca = reqwest::Certificate::from_pem(&pem)
                .context(HttpSnafu)
                .map_err(|source| Error::Read {
                    name: name.clone(),
                    source,
                })?;
            builder = builder.add_root_certificate(ca);
        }
        if let (Some(cert), Some(key)) = (&config.client_cert_secret, &config.client_key_secret) {
            let mut pem = secret_bytes(&secrets, cert, "cert").await?;
            pem.push(b'\n');
            pem.extend(secret_bytes(&secrets, key, "key").await?);
            let identity = reqwest::Identity::from_pem(&pem)
                .context(HttpSnafu)
                .map_err(|source| Error::Read {
                    name: cert.clone(),
                    source,
                })?;
            builder = builder.identity(identity);
        }
        let http = builder
            .build()
            .context(HttpSnafu)
            .map_err(|source| Error::Read {
                name: config.addr.to_string(),
                source,
            })?;

        Ok(Self {
            http,
            config,
            token,
            prefix: namespace.to_owned(),
        })
    }

    fn path(&self, name: &str) -> String {
        format!("{}/{name}", self.prefix)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let req = self
            .http
            .request(method, url)
            .header("X-Vault-Token", &self.token);
        match &self.config.namespace {
            Some(ns) => req.header("X-Vault-Namespace", ns),
            None => req,
        }
    }
}

async fn failure(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    VaultSnafu { status, message }.build()
}

#[async_trait]
impl Driver for VaultDriver {
    fn provider(&self) -> Provider {
        Provider::Vault
    }

    async fn get(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, BackendError> {
        let url = self.config.data_url(&self.path(name));
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .context(HttpSnafu)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body: ReadResponse = response.json().await.context(HttpSnafu)?;
                // a deleted latest version reads back with null data
                Ok(body.data.data)
            }
            _ => Err(failure(response).await),
        }
    }

    async fn set(&self, name: &str, data: &BTreeMap<String, String>) -> Result<(), BackendError> {
        let url = self.config.data_url(&self.path(name));
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({ "data": data }))
            .send()
            .await
            .context(HttpSnafu)?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        let url = self.config.metadata_url(&self.path(name));
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .context(HttpSnafu)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            _ => Err(failure(response).await),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn spec(details: &[(&str, &str)]) -> KmsSpec {
        KmsSpec {
            connection_details: details
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            token_secret_name: Some("vault-token".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_defaults_and_urls() {
        let config = VaultConfig::from_spec(&spec(&[("VAULT_ADDR", "https://vault:8200/")])).unwrap();
        assert_eq!(config.mount, "secret");
        assert_eq!(
            config.data_url("noobaa/noobaa-root-master-key-backend"),
            "https://vault:8200/v1/secret/data/noobaa/noobaa-root-master-key-backend"
        );
        assert_eq!(
            config.metadata_url("noobaa/k"),
            "https://vault:8200/v1/secret/metadata/noobaa/k"
        );

        let config = VaultConfig::from_spec(&spec(&[
            ("VAULT_ADDR", "https://vault:8200"),
            ("VAULT_BACKEND_PATH", "/kv-noobaa/"),
        ]))
        .unwrap();
        assert_eq!(config.data_url("x"), "https://vault:8200/v1/kv-noobaa/data/x");
    }

    #[test]
    fn test_config_requires_address() {
        let err = VaultConfig::from_spec(&spec(&[])).unwrap_err();
        assert!(matches!(err, Error::MissingConfig { ref key } if key == VAULT_ADDR));
        assert!(err.is_persistent());
    }

    #[test]
    fn test_read_response_shapes() {
        let body: ReadResponse = serde_json::from_value(serde_json::json!({
            "data": { "data": { "active_root_key": "key-1", "key-1": "abc" }, "metadata": {} }
        }))
        .unwrap();
        assert_eq!(body.data.data.unwrap()["key-1"], "abc");

        let deleted: ReadResponse =
            serde_json::from_value(serde_json::json!({ "data": { "data": null } })).unwrap();
        assert!(deleted.data.data.is_none());
    }
}
