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

//! Root keys kept in Secrets of the system namespace.

use super::{BackendError, Driver, KubeSnafu, Provider};
use crate::context::FIELD_MANAGER;
use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use snafu::ResultExt;
use std::collections::BTreeMap;

pub struct SecretDriver {
    api: Api<Secret>,
}

impl SecretDriver {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

/// Decodes every value of a secret, skipping entries that are not UTF-8.
pub(crate) fn secret_data(secret: &Secret) -> BTreeMap<String, String> {
    let mut data: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .filter_map(|(k, v)| Some((k.clone(), String::from_utf8(v.0.clone()).ok()?)))
        .collect();
    if let Some(string_data) = &secret.string_data {
        data.extend(string_data.clone());
    }
    data
}

#[async_trait]
impl Driver for SecretDriver {
    fn provider(&self) -> Provider {
        Provider::Kubernetes
    }

    async fn get(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, BackendError> {
        let secret = self.api.get_opt(name).await.context(KubeSnafu)?;
        Ok(secret.as_ref().map(secret_data))
    }

    async fn set(&self, name: &str, data: &BTreeMap<String, String>) -> Result<(), BackendError> {
        let secret = Secret {
            metadata: metav1::ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            type_: Some("Opaque".to_owned()),
            ..Default::default()
        };
        // keys left out of the applied object are pruned by server-side apply
        self.api
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await
            .context(KubeSnafu)?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        if self.api.get_opt(name).await.context(KubeSnafu)?.is_none() {
            return Ok(());
        }
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .context(KubeSnafu)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_data_merges_string_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("a".to_owned(), ByteString(b"1".to_vec())),
                ("bad".to_owned(), ByteString(vec![0xff])),
            ])),
            string_data: Some(BTreeMap::from([("b".to_owned(), "2".to_owned())])),
            ..Default::default()
        };
        let data = secret_data(&secret);
        assert_eq!(data.len(), 2);
        assert_eq!(data["a"], "1");
        assert_eq!(data["b"], "2");
    }
}
