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

//! Root key material of the managed system.
//!
//! A [`Driver`] stores string maps under a name in some backend. On top of
//! it, [`SingleSecret`] holds one base64 key and [`RotatingSecret`] holds a
//! [`RootKeys`] set. [`sync_root_keys`] brings the backend to the expected
//! shape (creating, migrating or rotating) and projects the result into the
//! system through a [`Projector`].

use crate::types::v1alpha1::noobaa::{KmsSpec, NooBaa};
use crate::utils::{random, time, tls};
use crate::validation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::collections::BTreeMap;
use std::str::FromStr;
use strum::{Display, EnumString};
use tracing::info;

pub mod k8s;
pub mod kmip;
pub mod rotation;
pub mod vault;

pub use rotation::RootKeys;

/// Connection detail selecting the driver.
pub const KMS_PROVIDER: &str = "KMS_PROVIDER";

/// Map key of a single stored root key.
pub const SINGLE_KEY: &str = "cipher_key_b64";

/// Failures of a storage backend.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("kubernetes: {source}"))]
    Kube { source: kube::Error },

    #[snafu(display("http: {source}"))]
    Http { source: reqwest::Error },

    #[snafu(display("vault responded {status}: {message}"))]
    Vault { status: u16, message: String },

    #[snafu(display("kmip {operation} failed: {reason}: {message}"))]
    Kmip {
        operation: String,
        reason: String,
        message: String,
    },

    #[snafu(display("kmip protocol: {message}"))]
    Protocol { message: String },

    #[snafu(display("io: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("tls: {source}"))]
    Tls { source: tls::Error },

    #[snafu(display("{source}"))]
    Json { source: serde_json::Error },
}

impl BackendError {
    fn is_persistent(&self) -> bool {
        match self {
            BackendError::Vault { status, .. } => matches!(status, 400 | 401 | 403),
            BackendError::Tls { .. } => true,
            _ => false,
        }
    }
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("unknown KMS provider {provider:?}"))]
    UnknownProvider { provider: String },

    #[snafu(display("KMS connection detail {key} is required"))]
    MissingConfig { key: String },

    #[snafu(transparent)]
    InvalidSchedule { source: validation::Error },

    #[snafu(display("root key {name} is malformed: {message}"))]
    InvalidKey { name: String, message: String },

    #[snafu(display("read {name}: {source}"))]
    Read { name: String, source: BackendError },

    #[snafu(display("write {name}: {source}"))]
    Write { name: String, source: BackendError },
}

impl Error {
    pub fn is_persistent(&self) -> bool {
        match self {
            Error::Read { source, .. } | Error::Write { source, .. } => source.is_persistent(),
            _ => true,
        }
    }

    /// Reason recorded on the `KMSStatus` condition.
    pub fn status(&self) -> KmsStatus {
        match self {
            Error::Read { .. } => KmsStatus::ErrorRead,
            Error::Write { .. } => KmsStatus::ErrorWrite,
            _ => KmsStatus::Invalid,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reasons of the `KMSStatus` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum KmsStatus {
    Init,
    Sync,
    Invalid,
    ErrorRead,
    ErrorWrite,
    KeyRotate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Provider {
    #[strum(to_string = "kubernetes", serialize = "k8s")]
    Kubernetes,
    #[strum(to_string = "vault")]
    Vault,
    #[strum(to_string = "kmip")]
    Kmip,
}

/// Provider named by the KMS connection details; Kubernetes when unset.
pub fn provider(spec: Option<&KmsSpec>) -> Result<Provider> {
    match spec.and_then(|s| s.connection_details.get(KMS_PROVIDER)) {
        None => Ok(Provider::Kubernetes),
        Some(p) if p.is_empty() => Ok(Provider::Kubernetes),
        Some(p) => Provider::from_str(p).map_err(|_| Error::UnknownProvider {
            provider: p.clone(),
        }),
    }
}

/// Shape in which a driver keeps the root key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Single,
    Rotating,
}

/// Backend name of the root key of `system`.
pub fn secret_name(system: &str, version: Version) -> String {
    match version {
        Version::Single => format!("{system}-root-master-key"),
        Version::Rotating => format!("{system}-root-master-key-backend"),
    }
}

#[async_trait]
pub trait Driver: Send + Sync {
    fn provider(&self) -> Provider;

    /// The version this backend keeps; only it is written.
    fn version(&self) -> Version {
        Version::Rotating
    }

    async fn get(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, BackendError>;

    async fn set(&self, name: &str, data: &BTreeMap<String, String>) -> Result<(), BackendError>;

    /// Removes `name`; absent entries are not an error.
    async fn delete(&self, name: &str) -> Result<(), BackendError>;
}

/// Pushes root key material into the running system.
#[async_trait]
pub trait Projector: Send + Sync {
    async fn project_string(&self, value: &str) -> Result<(), BackendError>;

    async fn project_map(&self, keys: &BTreeMap<String, String>) -> Result<(), BackendError>;
}

pub struct SingleSecret<'a> {
    driver: &'a dyn Driver,
    name: String,
}

impl<'a> SingleSecret<'a> {
    pub fn new(driver: &'a dyn Driver, system: &str) -> Self {
        Self {
            driver,
            name: secret_name(system, Version::Single),
        }
    }

    pub async fn get(&self) -> Result<Option<String>> {
        let data = self
            .driver
            .get(&self.name)
            .await
            .map_err(|source| Error::Read {
                name: self.name.clone(),
                source,
            })?;
        let Some(data) = data else {
            return Ok(None);
        };
        match data.get(SINGLE_KEY) {
            Some(v) if !v.is_empty() => Ok(Some(v.clone())),
            _ => Err(Error::InvalidKey {
                name: self.name.clone(),
                message: format!("missing {SINGLE_KEY}"),
            }),
        }
    }

    pub async fn set(&self, value: &str) -> Result<()> {
        let data = BTreeMap::from([(SINGLE_KEY.to_owned(), value.to_owned())]);
        self.driver
            .set(&self.name, &data)
            .await
            .map_err(|source| Error::Write {
                name: self.name.clone(),
                source,
            })
    }

    pub async fn delete(&self) -> Result<()> {
        self.driver
            .delete(&self.name)
            .await
            .map_err(|source| Error::Write {
                name: self.name.clone(),
                source,
            })
    }

    pub async fn reconcile(&self, projector: &dyn Projector) -> Result<KmsStatus> {
        let (value, status) = match self.get().await? {
            Some(value) => (value, KmsStatus::Sync),
            None => {
                let value = random::key_b64();
                self.set(&value).await?;
                (value, KmsStatus::Init)
            }
        };
        projector
            .project_string(&value)
            .await
            .map_err(|source| Error::Write {
                name: "root key volume".to_owned(),
                source,
            })?;
        Ok(status)
    }
}

pub struct RotatingSecret<'a> {
    driver: &'a dyn Driver,
    name: String,
}

impl<'a> RotatingSecret<'a> {
    pub fn new(driver: &'a dyn Driver, system: &str) -> Self {
        Self {
            driver,
            name: secret_name(system, Version::Rotating),
        }
    }

    pub async fn get(&self) -> Result<Option<RootKeys>> {
        let data = self
            .driver
            .get(&self.name)
            .await
            .map_err(|source| Error::Read {
                name: self.name.clone(),
                source,
            })?;
        let Some(data) = data else {
            return Ok(None);
        };
        let keys = RootKeys::from_map(data);
        if keys.active().is_none() {
            return Err(Error::InvalidKey {
                name: self.name.clone(),
                message: "active_root_key does not reference a stored key".to_owned(),
            });
        }
        Ok(Some(keys))
    }

    pub async fn put(&self, keys: &RootKeys) -> Result<()> {
        self.driver
            .set(&self.name, keys.as_map())
            .await
            .map_err(|source| Error::Write {
                name: self.name.clone(),
                source,
            })
    }

    /// Makes `value` the active key, pruning old ones.
    pub async fn set(&self, value: &str, now: DateTime<Utc>) -> Result<RootKeys> {
        let mut keys = self.get().await?.unwrap_or_default();
        keys.rotate(value, now);
        self.put(&keys).await?;
        Ok(keys)
    }

    pub async fn delete(&self) -> Result<()> {
        self.driver
            .delete(&self.name)
            .await
            .map_err(|source| Error::Write {
                name: self.name.clone(),
                source,
            })
    }
}

/// Rotation settings of a system.
pub struct RotationPolicy {
    pub enabled: bool,
    pub schedule: cron::Schedule,
    pub last_rotate: Option<DateTime<Utc>>,
}

impl RotationPolicy {
    pub fn for_system(system: &NooBaa) -> Result<Self> {
        let spec = system.kms();
        Ok(Self {
            enabled: spec.is_some_and(|s| s.enable_key_rotation),
            schedule: rotation::schedule(spec.and_then(|s| s.schedule.as_deref()))?,
            last_rotate: system
                .status
                .as_ref()
                .and_then(|s| s.last_key_rotate_time.as_deref())
                .and_then(time::parse_rfc3339),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeySync {
    pub status: KmsStatus,
    /// New value of `status.lastKeyRotateTime`.
    pub last_rotate: Option<DateTime<Utc>>,
    pub next_rotation: Option<DateTime<Utc>>,
}

/// Ensures the backend holds a usable root key for `system` and projects it.
pub async fn sync_root_keys(
    driver: &dyn Driver,
    projector: &dyn Projector,
    system: &str,
    policy: &RotationPolicy,
    now: DateTime<Utc>,
) -> Result<KeySync> {
    if driver.version() == Version::Single {
        let status = SingleSecret::new(driver, system).reconcile(projector).await?;
        return Ok(KeySync {
            status,
            last_rotate: policy.last_rotate,
            next_rotation: None,
        });
    }

    let rotating = RotatingSecret::new(driver, system);
    let mut status = KmsStatus::Sync;
    let mut last_rotate = policy.last_rotate;

    let mut keys = match rotating.get().await? {
        Some(keys) => keys,
        None => {
            let single = SingleSecret::new(driver, system);
            let keys = match single.get().await? {
                Some(old) => {
                    info!(%system, "migrating root key to rotating storage");
                    let keys = RootKeys::new(&old, now);
                    rotating.put(&keys).await?;
                    single.delete().await?;
                    keys
                }
                None => {
                    let keys = RootKeys::new(&random::key_b64(), now);
                    rotating.put(&keys).await?;
                    status = KmsStatus::Init;
                    keys
                }
            };
            last_rotate = Some(now);
            keys
        }
    };

    if policy.enabled {
        let last = *last_rotate.get_or_insert(now);
        if rotation::rotation_due(&policy.schedule, last, now) {
            info!(%system, "rotating root key");
            keys.rotate(&random::key_b64(), now);
            rotating.put(&keys).await?;
            status = KmsStatus::KeyRotate;
            last_rotate = Some(now);
        }
    }

    projector
        .project_map(keys.as_map())
        .await
        .map_err(|source| Error::Write {
            name: "root key volume".to_owned(),
            source,
        })?;

    let next_rotation = policy
        .enabled
        .then(|| last_rotate.and_then(|last| rotation::next_rotation(&policy.schedule, last)))
        .flatten();

    Ok(KeySync {
        status,
        last_rotate,
        next_rotation,
    })
}

/// Builds the driver selected for `system`.
pub async fn driver(client: kube::Client, system: &NooBaa) -> Result<Box<dyn Driver>> {
    let namespace = system.namespace().map_err(|_| Error::MissingConfig {
        key: "metadata.namespace".to_owned(),
    })?;
    let spec = system.kms();
    Ok(match provider(spec)? {
        Provider::Kubernetes => Box::new(k8s::SecretDriver::new(client, &namespace)),
        Provider::Vault => {
            Box::new(vault::VaultDriver::connect(client, &namespace, spec.cloned().unwrap_or_default()).await?)
        }
        Provider::Kmip => {
            Box::new(kmip::KmipDriver::connect(client, &namespace, spec.cloned().unwrap_or_default()).await?)
        }
    })
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::sync::Mutex;

    /// Backend keeping everything in process memory.
    #[derive(Default)]
    pub struct MemoryDriver {
        pub version: Option<Version>,
        pub data: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    }

    #[async_trait]
    impl Driver for MemoryDriver {
        fn provider(&self) -> Provider {
            Provider::Kubernetes
        }

        fn version(&self) -> Version {
            self.version.unwrap_or(Version::Rotating)
        }

        async fn get(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, BackendError> {
            Ok(self.data.lock().unwrap().get(name).cloned())
        }

        async fn set(&self, name: &str, data: &BTreeMap<String, String>) -> Result<(), BackendError> {
            self.data.lock().unwrap().insert(name.to_owned(), data.clone());
            Ok(())
        }

        async fn delete(&self, name: &str) -> Result<(), BackendError> {
            self.data.lock().unwrap().remove(name);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MemoryProjector {
        pub single: Mutex<Option<String>>,
        pub map: Mutex<Option<BTreeMap<String, String>>>,
    }

    #[async_trait]
    impl Projector for MemoryProjector {
        async fn project_string(&self, value: &str) -> Result<(), BackendError> {
            *self.single.lock().unwrap() = Some(value.to_owned());
            Ok(())
        }

        async fn project_map(&self, keys: &BTreeMap<String, String>) -> Result<(), BackendError> {
            *self.map.lock().unwrap() = Some(keys.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::memory::{MemoryDriver, MemoryProjector};
    use super::*;
    use chrono::TimeZone;

    fn policy(enabled: bool, last_rotate: Option<DateTime<Utc>>) -> RotationPolicy {
        RotationPolicy {
            enabled,
            schedule: rotation::schedule(None).unwrap(),
            last_rotate,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_provider_selection() {
        assert_eq!(provider(None).unwrap(), Provider::Kubernetes);
        let mut spec = KmsSpec::default();
        spec.connection_details
            .insert(KMS_PROVIDER.to_owned(), "k8s".to_owned());
        assert_eq!(provider(Some(&spec)).unwrap(), Provider::Kubernetes);
        spec.connection_details
            .insert(KMS_PROVIDER.to_owned(), "vault".to_owned());
        assert_eq!(provider(Some(&spec)).unwrap(), Provider::Vault);
        spec.connection_details
            .insert(KMS_PROVIDER.to_owned(), "ibm-kp".to_owned());
        let err = provider(Some(&spec)).unwrap_err();
        assert!(err.is_persistent());
        assert_eq!(err.status(), KmsStatus::Invalid);
    }

    #[tokio::test]
    async fn test_initial_sync_creates_rotating_key() {
        let driver = MemoryDriver::default();
        let projector = MemoryProjector::default();

        let sync = sync_root_keys(&driver, &projector, "noobaa", &policy(false, None), now())
            .await
            .unwrap();
        assert_eq!(sync.status, KmsStatus::Init);
        assert_eq!(sync.next_rotation, None);

        let stored = driver.data.lock().unwrap().clone();
        let keys = RootKeys::from_map(stored["noobaa-root-master-key-backend"].clone());
        assert!(keys.active().is_some());
        assert_eq!(projector.map.lock().unwrap().as_ref(), Some(keys.as_map()));

        let again = sync_root_keys(&driver, &projector, "noobaa", &policy(false, None), now())
            .await
            .unwrap();
        assert_eq!(again.status, KmsStatus::Sync);
    }

    #[tokio::test]
    async fn test_single_key_is_migrated() {
        let driver = MemoryDriver::default();
        let projector = MemoryProjector::default();
        SingleSecret::new(&driver, "noobaa").set("b2xk").await.unwrap();

        sync_root_keys(&driver, &projector, "noobaa", &policy(false, None), now())
            .await
            .unwrap();

        let stored = driver.data.lock().unwrap().clone();
        assert!(!stored.contains_key("noobaa-root-master-key"));
        let keys = RootKeys::from_map(stored["noobaa-root-master-key-backend"].clone());
        assert_eq!(keys.active(), Some("b2xk"));
    }

    #[tokio::test]
    async fn test_rotation_when_schedule_fires() {
        let driver = MemoryDriver::default();
        let projector = MemoryProjector::default();
        let before = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        RotatingSecret::new(&driver, "noobaa")
            .put(&RootKeys::new("first", before))
            .await
            .unwrap();

        let sync = sync_root_keys(&driver, &projector, "noobaa", &policy(true, Some(before)), now())
            .await
            .unwrap();
        assert_eq!(sync.status, KmsStatus::KeyRotate);
        assert_eq!(sync.last_rotate, Some(now()));
        assert_eq!(
            sync.next_rotation,
            Some(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap())
        );

        let keys = RotatingSecret::new(&driver, "noobaa").get().await.unwrap().unwrap();
        assert_ne!(keys.active(), Some("first"));
        assert_eq!(keys.key_ids().count(), 2);
    }

    #[tokio::test]
    async fn test_rotation_not_due() {
        let driver = MemoryDriver::default();
        let projector = MemoryProjector::default();
        let recent = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        RotatingSecret::new(&driver, "noobaa")
            .put(&RootKeys::new("first", recent))
            .await
            .unwrap();

        let sync = sync_root_keys(&driver, &projector, "noobaa", &policy(true, Some(recent)), now())
            .await
            .unwrap();
        assert_eq!(sync.status, KmsStatus::Sync);
        assert_eq!(sync.last_rotate, Some(recent));
    }

    #[tokio::test]
    async fn test_single_version_driver_projects_string() {
        let driver = MemoryDriver {
            version: Some(Version::Single),
            ..Default::default()
        };
        let projector = MemoryProjector::default();

        let sync = sync_root_keys(&driver, &projector, "noobaa", &policy(true, None), now())
            .await
            .unwrap();
        assert_eq!(sync.status, KmsStatus::Init);
        assert!(projector.single.lock().unwrap().is_some());
        assert!(projector.map.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_rotating_secret_is_rejected() {
        let driver = MemoryDriver::default();
        driver.data.lock().unwrap().insert(
            "noobaa-root-master-key-backend".to_owned(),
            BTreeMap::from([("active_root_key".to_owned(), "key-1".to_owned())]),
        );
        let err = RotatingSecret::new(&driver, "noobaa").get().await.unwrap_err();
        assert!(matches!(err, Error::InvalidKey { .. }));
        assert!(err.is_persistent());
    }
}
