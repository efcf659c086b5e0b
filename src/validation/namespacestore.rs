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

use super::store::{
    kind_error, validate_credentials, validate_nsfs, validate_s3_compatible,
    validate_target_bucket, validate_undeletable,
};
use super::{Error, Result};
use crate::rpc::types::SystemInfo;
use crate::types::v1alpha1::namespacestore::NamespaceStore;
use crate::types::v1alpha1::store::StoreKind;

const KIND: &str = "Namespacestore";

pub fn validate(nss: &NamespaceStore) -> Result {
    let kind = nss.spec.kind().map_err(|e| kind_error(KIND, e))?;

    validate_credentials(&kind)?;
    validate_target_bucket(&kind)?;

    match kind {
        StoreKind::Nsfs(nsfs) => validate_nsfs(&nss.name(), nsfs),
        StoreKind::S3Compatible(s3) | StoreKind::IbmCos(s3) => validate_s3_compatible(s3),
        _ => Ok(()),
    }
}

pub fn validate_update(new: &NamespaceStore, old: &NamespaceStore) -> Result {
    validate(new)?;

    let (Ok(new_kind), Ok(old_kind)) = (new.spec.kind(), old.spec.kind()) else {
        return Ok(());
    };

    if new_kind.target_bucket() != old_kind.target_bucket() {
        return Err(Error::invalid(
            "Changing a NamespaceStore target bucket is unsupported",
        ));
    }

    Ok(())
}

pub fn validate_delete(nss: &NamespaceStore, system: &SystemInfo) -> Result {
    let name = nss.resource_name();
    match system.namespace_resource(&name) {
        Some(resource) => validate_undeletable(
            "namespace resource",
            &name,
            resource.undeletable.as_deref(),
        ),
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rpc::types::NamespaceResourceInfo;
    use crate::tests::{create_nsfs_namespace_store, create_s3_compatible_namespace_store};

    #[test]
    fn test_invalid_type_denied() {
        let mut nss = create_s3_compatible_namespace_store("ns", "bucket-a");
        nss.spec.type_ = "pv-pool".to_string();
        assert_eq!(
            validate(&nss).unwrap_err().message(),
            "Invalid Namespacestore type, please provide a valid Namespacestore type"
        );
    }

    #[test]
    fn test_target_bucket_immutable() {
        let old = create_s3_compatible_namespace_store("ns", "bucket-a");
        let new = create_s3_compatible_namespace_store("ns", "bucket-b");
        assert_eq!(
            validate_update(&new, &old).unwrap_err().message(),
            "Changing a NamespaceStore target bucket is unsupported"
        );
    }

    #[test]
    fn test_target_bucket_immutable_across_type_change() {
        let old = create_s3_compatible_namespace_store("ns", "bucket-a");
        let mut new = old.clone();
        let mut section = new.spec.s3_compatible.take().unwrap();
        section.target_bucket = "bucket-b".to_string();
        new.spec.type_ = "ibm-cos".to_string();
        new.spec.ibm_cos = Some(section);
        assert!(validate(&new).is_ok());
        assert_eq!(
            validate_update(&new, &old).unwrap_err().message(),
            "Changing a NamespaceStore target bucket is unsupported"
        );
    }

    #[test]
    fn test_signature_version_whitelist() {
        let mut nss = create_s3_compatible_namespace_store("ns", "bucket-a");
        nss.spec.s3_compatible.as_mut().unwrap().signature_version = Some("v3".to_string());
        assert!(validate(&nss).is_err());
        nss.spec.s3_compatible.as_mut().unwrap().signature_version = Some("v2".to_string());
        assert!(validate(&nss).is_ok());
    }

    #[test]
    fn test_nsfs_rules_apply() {
        assert!(validate(&create_nsfs_namespace_store("fs", "pvc", Some("a/b"))).is_ok());
        assert!(validate(&create_nsfs_namespace_store("fs", "", None)).is_err());
        assert!(validate(&create_nsfs_namespace_store("fs", "pvc", Some("../x"))).is_err());
    }

    #[test]
    fn test_delete_denied_while_in_use() {
        let nss = create_s3_compatible_namespace_store("ns", "bucket-a");
        let system = SystemInfo {
            namespace_resources: vec![NamespaceResourceInfo {
                name: "ns".to_string(),
                undeletable: Some("IN_USE".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(validate_delete(&nss, &system).is_err());
    }
}
