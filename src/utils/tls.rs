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

//! PEM loading and rustls configs for the admission webhook and the KMS clients.

use rustls::crypto::ring::sign;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pemfile::Item;
use snafu::{ResultExt, Snafu};
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::Arc;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("parse certificate error"))]
    InvalidCertificate { source: io::Error },

    #[snafu(display("no certificate"))]
    NonCertificate,

    #[snafu(display("parse private key error"))]
    InvalidPrivateKey { source: io::Error },

    #[snafu(display("no private key"))]
    NonPrivateKey,

    #[snafu(display("key pair match failed"))]
    MatchFailed { source: rustls::Error },

    #[snafu(display("no supported sign type"))]
    NoSupportedSignType { source: rustls::Error },

    #[snafu(display("no supported pem type"))]
    NoSupportedPEMType,

    #[snafu(display("read {path}: {source}"))]
    ReadFile { path: String, source: io::Error },

    #[snafu(display("build tls config: {source}"))]
    Config { source: rustls::Error },

    #[snafu(display("invalid server name {name:?}"))]
    InvalidServerName { name: String },
}

pub(crate) fn load_certs(cert: &[u8]) -> Result<Vec<CertificateDer<'static>>, Error> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(cert))
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .context(InvalidCertificateSnafu)?;

    if certs.is_empty() {
        return NonCertificateSnafu.fail();
    }

    Ok(certs)
}

fn load_private_key(private_key: &[u8]) -> Result<PrivateKeyDer<'static>, Error> {
    let item = rustls_pemfile::read_one(&mut Cursor::new(private_key))
        .context(InvalidPrivateKeySnafu)?
        .ok_or(Error::NonPrivateKey)?;

    // only pkcs8/pkcs1/sec1 supported
    Ok(match item {
        Item::Pkcs8Key(key) => key.into(),
        Item::Pkcs1Key(key) => key.into(),
        Item::Sec1Key(key) => key.into(),
        _ => Err(Error::NoSupportedPEMType)?,
    })
}

/// Checks that the private key signs for the certificate chain.
pub fn x509_key_pair<T: AsRef<[u8]>>(cert_pem: T, key_pem: T) -> Result<(), Error> {
    let certs = load_certs(cert_pem.as_ref())?;
    let private_key = load_private_key(key_pem.as_ref())?;

    let signing_key = sign::any_supported_type(&private_key).context(NoSupportedSignTypeSnafu)?;

    let certified_key = CertifiedKey::new(certs, signing_key);
    certified_key.keys_match().context(MatchFailedSnafu)
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Server config for the admission webhook from a PEM certificate and key.
pub fn server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<ServerConfig, Error> {
    x509_key_pair(cert_pem, key_pem)?;
    let certs = load_certs(cert_pem)?;
    let key = load_private_key(key_pem)?;

    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .context(ConfigSnafu)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context(ConfigSnafu)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Reads the webhook certificate pair from disk.
pub async fn server_config_from_files(cert: &Path, key: &Path) -> Result<ServerConfig, Error> {
    let cert_pem = tokio::fs::read(cert).await.context(ReadFileSnafu {
        path: cert.display().to_string(),
    })?;
    let key_pem = tokio::fs::read(key).await.context(ReadFileSnafu {
        path: key.display().to_string(),
    })?;
    server_config(&cert_pem, &key_pem)
}

/// Client config trusting `ca_pem`, optionally presenting a client certificate.
pub fn client_config(
    ca_pem: Option<&[u8]>,
    identity: Option<(&[u8], &[u8])>,
) -> Result<ClientConfig, Error> {
    let mut roots = RootCertStore::empty();
    if let Some(ca_pem) = ca_pem {
        for cert in load_certs(ca_pem)? {
            roots.add(cert).context(ConfigSnafu)?;
        }
    }

    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .context(ConfigSnafu)?
        .with_root_certificates(roots);

    match identity {
        Some((cert_pem, key_pem)) => builder
            .with_client_auth_cert(load_certs(cert_pem)?, load_private_key(key_pem)?)
            .context(ConfigSnafu),
        None => Ok(builder.with_no_client_auth()),
    }
}

pub fn server_name(host: &str) -> Result<ServerName<'static>, Error> {
    ServerName::try_from(host.to_owned()).map_err(|_| Error::InvalidServerName {
        name: host.to_owned(),
    })
}
