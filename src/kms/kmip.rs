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

//! Remote key manager speaking KMIP over mutual TLS.
//!
//! Each stored name maps to one symmetric key on the server. The mapping of
//! names to KMIP unique identifiers is kept as JSON under `UniqueIdentifier`
//! in the certificates Secret and updated with the Secret's resourceVersion
//! as an optimistic lock.

pub mod ttlv;

use self::ttlv::{Item, tag};
use super::k8s::secret_data;
use super::{
    BackendError, Driver, Error, IoSnafu, JsonSnafu, KubeSnafu, ProtocolSnafu, Provider, Result,
    SINGLE_KEY, TlsSnafu, Version,
};
use crate::types::v1alpha1::noobaa::KmsSpec;
use crate::utils::tls;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

pub const KMIP_ENDPOINT: &str = "KMIP_ENDPOINT";
pub const KMIP_CERTS_SECRET: &str = "KMIP_CERTS_SECRET";
pub const KMIP_TLS_SERVER_NAME: &str = "TLS_SERVER_NAME";
pub const CA_CERT: &str = "CA_CERT";
pub const CLIENT_CERT: &str = "CLIENT_CERT";
pub const CLIENT_KEY: &str = "CLIENT_KEY";
pub const UNIQUE_IDENTIFIER: &str = "UniqueIdentifier";

const TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE: usize = 1 << 20;

/// Header version of the discovery request itself.
const DISCOVERY_VERSION: (i32, i32) = (1, 1);

/// Protocol versions offered during discovery, most preferred first.
const SUPPORTED_VERSIONS: [(i32, i32); 5] = [(1, 4), (1, 3), (1, 2), (1, 1), (1, 0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Operation {
    Register = 0x03,
    Get = 0x0A,
    Activate = 0x12,
    Revoke = 0x13,
    Destroy = 0x14,
    DiscoverVersions = 0x1E,
}

const OBJECT_TYPE_SYMMETRIC_KEY: u32 = 2;
const KEY_FORMAT_RAW: u32 = 1;
const ALGORITHM_AES: u32 = 3;
const KEY_LENGTH_BITS: i32 = 256;
const USAGE_ENCRYPT_DECRYPT: i32 = 0x04 | 0x08;
const REVOCATION_CESSATION_OF_OPERATION: u32 = 6;
const RESULT_SUCCESS: u32 = 0;
const RESULT_REASON_ITEM_NOT_FOUND: u32 = 1;

fn request(version: (i32, i32), operation: Operation, payload: Vec<Item>) -> Item {
    Item::structure(
        tag::REQUEST_MESSAGE,
        vec![
            Item::structure(
                tag::REQUEST_HEADER,
                vec![
                    protocol_version(version),
                    Item::integer(tag::BATCH_COUNT, 1),
                ],
            ),
            Item::structure(
                tag::BATCH_ITEM,
                vec![
                    Item::enumeration(tag::OPERATION, operation as u32),
                    Item::structure(tag::REQUEST_PAYLOAD, payload),
                ],
            ),
        ],
    )
}

fn protocol_version((major, minor): (i32, i32)) -> Item {
    Item::structure(
        tag::PROTOCOL_VERSION,
        vec![
            Item::integer(tag::PROTOCOL_VERSION_MAJOR, major),
            Item::integer(tag::PROTOCOL_VERSION_MINOR, minor),
        ],
    )
}

fn register_payload(material: Vec<u8>) -> Vec<Item> {
    vec![
        Item::enumeration(tag::OBJECT_TYPE, OBJECT_TYPE_SYMMETRIC_KEY),
        Item::structure(
            tag::TEMPLATE_ATTRIBUTE,
            vec![Item::structure(
                tag::ATTRIBUTE,
                vec![
                    Item::text(tag::ATTRIBUTE_NAME, "Cryptographic Usage Mask"),
                    Item::integer(tag::ATTRIBUTE_VALUE, USAGE_ENCRYPT_DECRYPT),
                ],
            )],
        ),
        Item::structure(
            tag::SYMMETRIC_KEY,
            vec![Item::structure(
                tag::KEY_BLOCK,
                vec![
                    Item::enumeration(tag::KEY_FORMAT_TYPE, KEY_FORMAT_RAW),
                    Item::structure(tag::KEY_VALUE, vec![Item::bytes(tag::KEY_MATERIAL, material)]),
                    Item::enumeration(tag::CRYPTOGRAPHIC_ALGORITHM, ALGORITHM_AES),
                    Item::integer(tag::CRYPTOGRAPHIC_LENGTH, KEY_LENGTH_BITS),
                ],
            )],
        ),
    ]
}

fn uid_payload(uid: &str) -> Vec<Item> {
    vec![Item::text(tag::UNIQUE_IDENTIFIER, uid)]
}

fn revoke_payload(uid: &str) -> Vec<Item> {
    vec![
        Item::text(tag::UNIQUE_IDENTIFIER, uid),
        Item::structure(
            tag::REVOCATION_REASON,
            vec![Item::enumeration(
                tag::REVOCATION_REASON_CODE,
                REVOCATION_CESSATION_OF_OPERATION,
            )],
        ),
    ]
}

/// Outcome of one batch item.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Success(Item),
    NotFound,
}

/// Extracts the payload of the single batch item in `response`.
fn parse_response(operation: Operation, response: &Item) -> Result<Reply, BackendError> {
    let batch = response
        .child(tag::BATCH_ITEM)
        .ok_or_else(|| protocol("response has no batch item"))?;
    let status = batch
        .child(tag::RESULT_STATUS)
        .and_then(Item::as_enum)
        .ok_or_else(|| protocol("response has no result status"))?;
    if status == RESULT_SUCCESS {
        let payload = batch
            .child(tag::RESPONSE_PAYLOAD)
            .cloned()
            .unwrap_or_else(|| Item::structure(tag::RESPONSE_PAYLOAD, vec![]));
        return Ok(Reply::Success(payload));
    }
    let reason = batch.child(tag::RESULT_REASON).and_then(Item::as_enum);
    if reason == Some(RESULT_REASON_ITEM_NOT_FOUND) {
        return Ok(Reply::NotFound);
    }
    Err(BackendError::Kmip {
        operation: format!("{operation:?}"),
        reason: reason.map(|r| format!("{r:#x}")).unwrap_or_default(),
        message: batch
            .child(tag::RESULT_MESSAGE)
            .and_then(Item::as_text)
            .unwrap_or_default()
            .to_owned(),
    })
}

fn protocol(message: &str) -> BackendError {
    ProtocolSnafu { message }.build()
}

fn unique_identifier(payload: &Item) -> Result<String, BackendError> {
    payload
        .child(tag::UNIQUE_IDENTIFIER)
        .and_then(Item::as_text)
        .map(str::to_owned)
        .ok_or_else(|| protocol("payload has no unique identifier"))
}

fn key_material(payload: &Item) -> Result<Vec<u8>, BackendError> {
    payload
        .path(&[tag::SYMMETRIC_KEY, tag::KEY_BLOCK, tag::KEY_VALUE, tag::KEY_MATERIAL])
        .and_then(Item::as_bytes)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| protocol("payload has no symmetric key material"))
}

/// Picks the first offered version the server also lists.
fn negotiate(payload: &Item) -> Option<(i32, i32)> {
    let server: Vec<(i32, i32)> = payload
        .children(tag::PROTOCOL_VERSION)
        .filter_map(|v| {
            Some((
                v.child(tag::PROTOCOL_VERSION_MAJOR)?.as_integer()?,
                v.child(tag::PROTOCOL_VERSION_MINOR)?.as_integer()?,
            ))
        })
        .collect();
    // an empty list means the server accepts what was offered
    if server.is_empty() {
        return SUPPORTED_VERSIONS.first().copied();
    }
    server
        .into_iter()
        .find(|v| SUPPORTED_VERSIONS.contains(v))
}

pub struct KmipDriver {
    secrets: Api<Secret>,
    certs_secret: String,
    endpoint: String,
    server_name: String,
    connector: TlsConnector,
    version: (i32, i32),
}

impl KmipDriver {
    pub async fn connect(client: kube::Client, namespace: &str, spec: KmsSpec) -> Result<Self> {
        let details = &spec.connection_details;
        let missing = |key: &str| Error::MissingConfig { key: key.to_owned() };
        let endpoint = details
            .get(KMIP_ENDPOINT)
            .cloned()
            .ok_or_else(|| missing(KMIP_ENDPOINT))?;
        let certs_secret = details
            .get(KMIP_CERTS_SECRET)
            .cloned()
            .ok_or_else(|| missing(KMIP_CERTS_SECRET))?;
        let server_name = details.get(KMIP_TLS_SERVER_NAME).cloned().unwrap_or_else(|| {
            endpoint
                .rsplit_once(':')
                .map(|(host, _)| host.to_owned())
                .unwrap_or_else(|| endpoint.clone())
        });

        let secrets: Api<Secret> = Api::namespaced(client, namespace);
        let secret = secrets
            .get_opt(&certs_secret)
            .await
            .context(KubeSnafu)
            .map_err(|source| Error::Read {
                name: certs_secret.clone(),
                source,
            })?
            .ok_or_else(|| missing(&format!("secret {certs_secret}")))?;
        let data = secret_data(&secret);
        let pem = |key: &str| {
            data.get(key)
                .map(|v| v.as_bytes().to_vec())
                .ok_or_else(|| missing(&format!("{key} in secret {certs_secret}")))
        };
        let (ca, cert, key) = (pem(CA_CERT)?, pem(CLIENT_CERT)?, pem(CLIENT_KEY)?);
        let config = tls::client_config(Some(&ca), Some((&cert, &key)))
            .context(TlsSnafu)
            .map_err(|source| Error::Read {
                name: certs_secret.clone(),
                source,
            })?;

        let mut driver = Self {
            secrets,
            certs_secret,
            endpoint,
            server_name,
            connector: TlsConnector::from(Arc::new(config)),
            version: DISCOVERY_VERSION,
        };
        driver.version = driver.discover_versions().await.map_err(|source| Error::Read {
            name: driver.endpoint.clone(),
            source,
        })?;
        info!(endpoint = %driver.endpoint, version = ?driver.version, "connected to kmip server");
        Ok(driver)
    }

    async fn roundtrip(&self, message: &Item) -> Result<Item, BackendError> {
        let name = tls::server_name(&self.server_name).context(TlsSnafu)?;
        let exchange = async {
            let tcp = TcpStream::connect(self.endpoint.as_str()).await.context(IoSnafu)?;
            let mut stream = self.connector.connect(name, tcp).await.context(IoSnafu)?;
            stream.write_all(&message.encode()).await.context(IoSnafu)?;
            stream.flush().await.context(IoSnafu)?;

            let mut header = [0u8; ttlv::HEADER_LEN];
            stream.read_exact(&mut header).await.context(IoSnafu)?;
            let total = Item::encoded_len(&header);
            if total > MAX_RESPONSE {
                return Err(protocol("response too large"));
            }
            let mut buf = header.to_vec();
            buf.resize(total, 0);
            stream
                .read_exact(&mut buf[ttlv::HEADER_LEN..])
                .await
                .context(IoSnafu)?;
            Item::decode(&buf).map_err(|e| protocol(&e.to_string()))
        };
        tokio::time::timeout(TIMEOUT, exchange)
            .await
            .map_err(|_| protocol("request timed out"))?
    }

    async fn call(&self, operation: Operation, payload: Vec<Item>) -> Result<Reply, BackendError> {
        debug!(?operation, "kmip request");
        let response = self
            .roundtrip(&request(self.version, operation, payload))
            .await?;
        parse_response(operation, &response)
    }

    async fn call_ok(&self, operation: Operation, payload: Vec<Item>) -> Result<Item, BackendError> {
        match self.call(operation, payload).await? {
            Reply::Success(payload) => Ok(payload),
            Reply::NotFound => Err(protocol(&format!("{operation:?}: item not found"))),
        }
    }

    async fn discover_versions(&self) -> Result<(i32, i32), BackendError> {
        let offered = SUPPORTED_VERSIONS.iter().copied().map(protocol_version).collect();
        let payload = self.call_ok(Operation::DiscoverVersions, offered).await?;
        negotiate(&payload).ok_or_else(|| protocol("no common protocol version"))
    }

    async fn register(&self, material: Vec<u8>) -> Result<String, BackendError> {
        let payload = self
            .call_ok(Operation::Register, register_payload(material))
            .await?;
        let uid = unique_identifier(&payload)?;
        self.call_ok(Operation::Activate, uid_payload(&uid)).await?;
        Ok(uid)
    }

    async fn fetch(&self, uid: &str) -> Result<Option<Vec<u8>>, BackendError> {
        match self.call(Operation::Get, uid_payload(uid)).await? {
            Reply::Success(payload) => key_material(&payload).map(Some),
            Reply::NotFound => Ok(None),
        }
    }

    async fn destroy(&self, uid: &str) -> Result<(), BackendError> {
        // an active key has to be revoked before the server allows destroying it
        if let Reply::NotFound = self.call(Operation::Revoke, revoke_payload(uid)).await? {
            return Ok(());
        }
        self.call(Operation::Destroy, uid_payload(uid)).await?;
        Ok(())
    }

    async fn load_ids(&self) -> Result<(Secret, BTreeMap<String, String>), BackendError> {
        let secret = self.secrets.get(&self.certs_secret).await.context(KubeSnafu)?;
        let ids = match secret_data(&secret).get(UNIQUE_IDENTIFIER) {
            Some(json) if !json.is_empty() => serde_json::from_str(json).context(JsonSnafu)?,
            _ => BTreeMap::new(),
        };
        Ok((secret, ids))
    }

    /// Writes `ids` back; fails if the Secret changed since it was read.
    async fn store_ids(
        &self,
        mut secret: Secret,
        ids: &BTreeMap<String, String>,
    ) -> Result<(), BackendError> {
        let json = serde_json::to_string(ids).context(JsonSnafu)?;
        secret
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(UNIQUE_IDENTIFIER.to_owned(), ByteString(json.into_bytes()));
        if let Some(string_data) = secret.string_data.as_mut() {
            string_data.remove(UNIQUE_IDENTIFIER);
        }
        self.secrets
            .replace(&self.certs_secret, &PostParams::default(), &secret)
            .await
            .context(KubeSnafu)?;
        Ok(())
    }
}

#[async_trait]
impl Driver for KmipDriver {
    fn provider(&self) -> Provider {
        Provider::Kmip
    }

    fn version(&self) -> Version {
        Version::Single
    }

    async fn get(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, BackendError> {
        let (_, ids) = self.load_ids().await?;
        let Some(uid) = ids.get(name) else {
            return Ok(None);
        };
        let material = self.fetch(uid).await?;
        Ok(material.map(|m| BTreeMap::from([(SINGLE_KEY.to_owned(), STANDARD.encode(m))])))
    }

    async fn set(&self, name: &str, data: &BTreeMap<String, String>) -> Result<(), BackendError> {
        let material = data
            .get(SINGLE_KEY)
            .and_then(|v| STANDARD.decode(v).ok())
            .ok_or_else(|| protocol("root key is not valid base64"))?;
        let (secret, mut ids) = self.load_ids().await?;
        let uid = self.register(material).await?;
        let previous = ids.insert(name.to_owned(), uid.clone());
        if let Err(e) = self.store_ids(secret, &ids).await {
            // the key was never recorded, so nothing else can reference it
            self.destroy(&uid).await?;
            return Err(e);
        }
        if let Some(previous) = previous.filter(|p| *p != uid) {
            self.destroy(&previous).await?;
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        let (secret, mut ids) = self.load_ids().await?;
        let Some(uid) = ids.remove(name) else {
            return Ok(());
        };
        self.destroy(&uid).await?;
        self.store_ids(secret, &ids).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn response(batch: Vec<Item>) -> Item {
        Item::structure(
            tag::RESPONSE_MESSAGE,
            vec![
                Item::structure(tag::RESPONSE_HEADER, vec![]),
                Item::structure(tag::BATCH_ITEM, batch),
            ],
        )
    }

    #[test]
    fn test_request_layout() {
        let msg = request((1, 4), Operation::Get, uid_payload("7"));
        let op = msg
            .path(&[tag::BATCH_ITEM, tag::OPERATION])
            .and_then(Item::as_enum);
        assert_eq!(op, Some(0x0A));
        let count = msg
            .path(&[tag::REQUEST_HEADER, tag::BATCH_COUNT])
            .and_then(Item::as_integer);
        assert_eq!(count, Some(1));
        let decoded = Item::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_register_payload_carries_aes_key() {
        let payload = Item::structure(tag::REQUEST_PAYLOAD, register_payload(vec![7; 32]));
        let block = payload.path(&[tag::SYMMETRIC_KEY, tag::KEY_BLOCK]).unwrap();
        assert_eq!(
            block.child(tag::CRYPTOGRAPHIC_ALGORITHM).and_then(Item::as_enum),
            Some(ALGORITHM_AES)
        );
        assert_eq!(
            block.child(tag::CRYPTOGRAPHIC_LENGTH).and_then(Item::as_integer),
            Some(256)
        );
        assert_eq!(key_material(&payload).unwrap(), vec![7; 32]);
    }

    #[test]
    fn test_parse_success_and_not_found() {
        let ok = response(vec![
            Item::enumeration(tag::OPERATION, Operation::Register as u32),
            Item::enumeration(tag::RESULT_STATUS, RESULT_SUCCESS),
            Item::structure(tag::RESPONSE_PAYLOAD, uid_payload("abc")),
        ]);
        let Reply::Success(payload) = parse_response(Operation::Register, &ok).unwrap() else {
            panic!("expected success");
        };
        assert_eq!(unique_identifier(&payload).unwrap(), "abc");

        let missing = response(vec![
            Item::enumeration(tag::RESULT_STATUS, 1),
            Item::enumeration(tag::RESULT_REASON, RESULT_REASON_ITEM_NOT_FOUND),
        ]);
        assert_eq!(
            parse_response(Operation::Get, &missing).unwrap(),
            Reply::NotFound
        );
    }

    #[test]
    fn test_parse_failure_carries_message() {
        let failed = response(vec![
            Item::enumeration(tag::RESULT_STATUS, 1),
            Item::enumeration(tag::RESULT_REASON, 0x0E),
            Item::text(tag::RESULT_MESSAGE, "permission denied"),
        ]);
        let err = parse_response(Operation::Destroy, &failed).unwrap_err();
        assert!(err.to_string().contains("permission denied"));
        assert!(err.to_string().contains("Destroy"));
    }

    #[test]
    fn test_negotiate_version() {
        let payload = Item::structure(
            tag::RESPONSE_PAYLOAD,
            vec![protocol_version((2, 0)), protocol_version((1, 2))],
        );
        assert_eq!(negotiate(&payload), Some((1, 2)));

        let none = Item::structure(tag::RESPONSE_PAYLOAD, vec![protocol_version((2, 1))]);
        assert_eq!(negotiate(&none), None);

        let empty = Item::structure(tag::RESPONSE_PAYLOAD, vec![]);
        assert_eq!(negotiate(&empty), Some((1, 4)));
    }
}
