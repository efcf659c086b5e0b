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

//! Rules shared by backing stores and namespace stores.

use super::{Error, Result};
use crate::types::v1alpha1::store::{
    KindError, NSFS_MOUNT_ROOT, NsfsSpec, S3CompatibleSpec, StoreKind, StoreType,
    credential_keys, nsfs_mount_path,
};
use k8s_openapi::api::core::v1 as corev1;
use url::Url;

pub(super) const MAX_MOUNT_PATH_LEN: usize = 63;

/// Maps a discriminator failure to the message admission shows.
pub(super) fn kind_error(kind: &str, err: KindError) -> Error {
    match err {
        KindError::UnknownType(_) => Error::invalid(format!(
            "Invalid {kind} type, please provide a valid {kind} type"
        )),
        KindError::MissingSubSpec { store_type } => Error::invalid(format!(
            "{kind} type {store_type} requires its matching spec section"
        )),
        KindError::ExtraSubSpec { store_type } => Error::invalid(format!(
            "{kind} of type {store_type} must not set spec sections of other types"
        )),
    }
}

/// A secret reference, or for aws-s3 an STS role, must be present where the kind needs one.
pub(super) fn validate_credentials(kind: &StoreKind<'_>) -> Result {
    match kind {
        StoreKind::PvPool(_) | StoreKind::Nsfs(_) => Ok(()),
        StoreKind::AwsS3(aws) if aws.aws_sts_role_arn.as_deref().is_some_and(|a| !a.is_empty()) => {
            Ok(())
        }
        other => match other.secret() {
            Some(secret) if secret.name.as_deref().is_some_and(|n| !n.is_empty()) => Ok(()),
            _ => Err(Error::invalid(format!(
                "Failed to verify secret reference of {} store, a secret with credentials is required",
                other.store_type()
            ))),
        },
    }
}

pub(super) fn validate_target_bucket(kind: &StoreKind<'_>) -> Result {
    match kind.target_bucket() {
        Some("") => Err(Error::invalid(format!(
            "Failed to verify target bucket of {} store, a target bucket name is required",
            kind.store_type()
        ))),
        _ => Ok(()),
    }
}

pub(super) fn validate_s3_compatible(spec: &S3CompatibleSpec) -> Result {
    match spec.signature_version.as_deref() {
        None | Some("") | Some("v2") | Some("v4") => {}
        Some(other) => {
            return Err(Error::invalid(format!(
                "Invalid s3 signature version {other:?}, please provide v2 or v4"
            )));
        }
    }

    endpoint_url(&spec.endpoint).map(|_| ())
}

/// Parses an endpoint, assuming `https` when no scheme is given.
pub fn endpoint_url(endpoint: &str) -> Result<Url> {
    let invalid = || Error::invalid(format!("Invalid endpoint url {endpoint:?}"));
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&with_scheme).map_err(|_| invalid())?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid());
    }
    Ok(url)
}

pub(super) fn validate_nsfs(store_name: &str, spec: &NsfsSpec) -> Result {
    if spec.pvc_name.is_empty() {
        return Err(Error::invalid(
            "NSFS namespace store requires a non-empty pvcName",
        ));
    }

    if let Some(sub_path) = spec.sub_path.as_deref().filter(|p| !p.is_empty()) {
        if sub_path.starts_with('/') {
            return Err(Error::invalid(format!(
                "NSFS subPath {sub_path:?} must be a relative path"
            )));
        }
        if sub_path.split('/').any(|part| part == "..") {
            return Err(Error::invalid(format!(
                "NSFS subPath {sub_path:?} must not contain '..'"
            )));
        }
    }

    let mount_path = nsfs_mount_path(store_name);
    if mount_path.len() > MAX_MOUNT_PATH_LEN {
        return Err(Error::invalid(format!(
            "NSFS mount path {mount_path:?} exceeds {MAX_MOUNT_PATH_LEN} characters, \
             shorten the store name (at most {} characters)",
            MAX_MOUNT_PATH_LEN - NSFS_MOUNT_ROOT.len()
        )));
    }

    Ok(())
}

/// Checks the credentials secret carries the keys the store type needs.
///
/// Runs in the reconciler once the secret has been read.
pub fn validate_secret_keys(store_type: StoreType, secret: &corev1::Secret) -> Result {
    let missing: Vec<&str> = credential_keys(store_type)
        .iter()
        .copied()
        .filter(|key| {
            let in_data = secret
                .data
                .as_ref()
                .and_then(|d| d.get(*key))
                .is_some_and(|v| !v.0.is_empty());
            let in_string_data = secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(*key))
                .is_some_and(|v| !v.is_empty());
            !in_data && !in_string_data
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::persistent(
            "InvalidSecret",
            format!(
                "secret {:?} is missing keys {}",
                secret.metadata.name.as_deref().unwrap_or_default(),
                missing.join(", ")
            ),
        ))
    }
}

/// Shared undeletable-state rule for pools and namespace resources.
pub(super) fn validate_undeletable(what: &str, name: &str, undeletable: Option<&str>) -> Result {
    match undeletable {
        None | Some("") | Some("IS_BACKINGSTORE") | Some("BEING_DELETED") => Ok(()),
        Some(state) => Err(Error::invalid(format!(
            "cannot complete because {what} \"{name}\" in \"{state}\" state"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_endpoint_defaults_to_https() {
        let url = endpoint_url("s3.example.com:9000").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.port(), Some(9000));

        let url = endpoint_url("http://minio.local").unwrap();
        assert_eq!(url.scheme(), "http");

        assert!(endpoint_url("").is_err());
        assert!(endpoint_url("http://").is_err());
    }

    #[test]
    fn test_nsfs_sub_path_rules() {
        let spec = |sub: &str| NsfsSpec {
            pvc_name: "pvc".to_string(),
            sub_path: Some(sub.to_string()),
            fs_backend: None,
        };
        assert!(validate_nsfs("fs", &spec("data/a")).is_ok());
        assert!(validate_nsfs("fs", &spec("/abs")).is_err());
        assert!(validate_nsfs("fs", &spec("a/../b")).is_err());

        let long_name = "n".repeat(58);
        assert!(validate_nsfs(&long_name, &spec("")).is_err());
        assert!(validate_nsfs(&"n".repeat(57), &spec("")).is_ok());
    }

    #[test]
    fn test_secret_keys_checked_per_type() {
        let secret = corev1::Secret {
            data: Some(
                [(
                    "AWS_ACCESS_KEY_ID".to_string(),
                    ByteString(b"AKIA".to_vec()),
                )]
                .into(),
            ),
            ..Default::default()
        };
        let err = validate_secret_keys(StoreType::AwsS3, &secret).unwrap_err();
        assert!(err.message().contains("AWS_SECRET_ACCESS_KEY"));
        assert!(validate_secret_keys(StoreType::PvPool, &secret).is_ok());
    }

    #[test]
    fn test_undeletable_marker_states_allow_delete() {
        assert!(validate_undeletable("pool", "p", Some("IS_BACKINGSTORE")).is_ok());
        assert!(validate_undeletable("pool", "p", Some("BEING_DELETED")).is_ok());
        let err = validate_undeletable("pool", "p", Some("CONNECTED_BUCKET_DELETING")).unwrap_err();
        assert_eq!(
            err.message(),
            "cannot complete because pool \"p\" in \"CONNECTED_BUCKET_DELETING\" state"
        );
    }
}
