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
    kind_error, validate_credentials, validate_s3_compatible, validate_target_bucket,
    validate_undeletable,
};
use super::{Error, Result};
use crate::rpc::types::SystemInfo;
use crate::types::v1alpha1::backingstore::BackingStore;
use crate::types::v1alpha1::store::{PvPoolSpec, StoreKind};
use crate::utils::quantity::{self, GIB};

const KIND: &str = "Backingstore";

pub const MAX_PV_POOL_NAME_LEN: usize = 43;
pub const MIN_PV_POOL_VOLUMES: i32 = 1;
pub const MAX_PV_POOL_VOLUMES: i32 = 20;
pub const MIN_PV_POOL_VOLUME_SIZE: u64 = 16 * GIB;

pub fn validate(bs: &BackingStore) -> Result {
    let kind = bs.spec.kind().map_err(|e| kind_error(KIND, e))?;

    validate_credentials(&kind)?;
    validate_target_bucket(&kind)?;

    match kind {
        StoreKind::PvPool(pv) => validate_pv_pool(&bs.name(), pv),
        StoreKind::S3Compatible(s3) | StoreKind::IbmCos(s3) => validate_s3_compatible(s3),
        _ => Ok(()),
    }
}

fn validate_pv_pool(name: &str, pv: &PvPoolSpec) -> Result {
    if name.len() > MAX_PV_POOL_NAME_LEN {
        return Err(Error::invalid(format!(
            "Unsupported BackingStore name length, please provide a name shorter than {} characters",
            MAX_PV_POOL_NAME_LEN + 1
        )));
    }

    if !(MIN_PV_POOL_VOLUMES..=MAX_PV_POOL_VOLUMES).contains(&pv.num_volumes) {
        return Err(Error::invalid(format!(
            "Unsupported volume count, the number of volumes must be between \
             {MIN_PV_POOL_VOLUMES} and {MAX_PV_POOL_VOLUMES}"
        )));
    }

    if let Some(storage) = pv.requested_storage() {
        let bytes = quantity::parse_bytes(storage)
            .map_err(|_| Error::invalid(format!("Invalid volume size {storage:?}")))?;
        if bytes < MIN_PV_POOL_VOLUME_SIZE {
            return Err(Error::invalid(
                "Invalid volume size, minimum volume size is 16Gi",
            ));
        }
    }

    Ok(())
}

pub fn validate_update(new: &BackingStore, old: &BackingStore) -> Result {
    validate(new)?;

    let (Ok(new_kind), Ok(old_kind)) = (new.spec.kind(), old.spec.kind()) else {
        return Ok(());
    };

    if let (StoreKind::PvPool(new_pv), StoreKind::PvPool(old_pv)) = (new_kind, old_kind)
        && new_pv.num_volumes < old_pv.num_volumes
    {
        return Err(Error::invalid(
            "Scaling down the number of nodes is not currently supported",
        ));
    }

    if new_kind.target_bucket() != old_kind.target_bucket() {
        return Err(Error::invalid(
            "Changing a Backingstore target bucket is unsupported",
        ));
    }

    Ok(())
}

/// Denies deletion while the managed system reports the pool as undeletable.
pub fn validate_delete(bs: &BackingStore, system: &SystemInfo) -> Result {
    let pool_name = bs.pool_name();
    match system.pool(&pool_name) {
        Some(pool) => validate_undeletable("pool", &pool_name, pool.undeletable.as_deref()),
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rpc::types::PoolInfo;
    use crate::tests::{create_pv_pool_backing_store, create_s3_backing_store};

    #[test]
    fn test_invalid_type_denied() {
        let mut bs = create_pv_pool_backing_store("bs", 1, "16Gi");
        bs.spec.type_ = "invalid".to_string();
        assert_eq!(
            validate(&bs).unwrap_err(),
            Error::invalid("Invalid Backingstore type, please provide a valid Backingstore type")
        );
    }

    #[test]
    fn test_pv_pool_bounds() {
        assert!(validate(&create_pv_pool_backing_store("bs", 2, "20Gi")).is_ok());
        assert!(validate(&create_pv_pool_backing_store("bs", 0, "20Gi")).is_err());
        assert!(validate(&create_pv_pool_backing_store("bs", 21, "20Gi")).is_err());
        assert!(validate(&create_pv_pool_backing_store("bs", 1, "15Gi")).is_err());
        assert!(validate(&create_pv_pool_backing_store(&"a".repeat(44), 1, "16Gi")).is_err());
        assert!(validate(&create_pv_pool_backing_store(&"a".repeat(43), 1, "16Gi")).is_ok());
    }

    #[test]
    fn test_discriminator_must_match_single_sub_spec() {
        let mut bs = create_pv_pool_backing_store("bs", 1, "16Gi");
        bs.spec.type_ = "aws-s3".to_string();
        assert!(validate(&bs).is_err());

        let mut bs = create_s3_backing_store("bs", "bucket-a");
        bs.spec.pv_pool = create_pv_pool_backing_store("x", 1, "16Gi").spec.pv_pool;
        assert!(validate(&bs).is_err());
    }

    #[test]
    fn test_credentials_or_sts_role_required() {
        let mut bs = create_s3_backing_store("bs", "bucket-a");
        bs.spec.aws_s3.as_mut().unwrap().secret = None;
        assert!(validate(&bs).is_err());

        bs.spec.aws_s3.as_mut().unwrap().aws_sts_role_arn =
            Some("arn:aws:iam::123:role/noobaa".to_string());
        assert!(validate(&bs).is_ok());
    }

    #[test]
    fn test_scale_down_denied() {
        let old = create_pv_pool_backing_store("bs", 2, "20Gi");
        let new = create_pv_pool_backing_store("bs", 1, "20Gi");
        assert_eq!(
            validate_update(&new, &old).unwrap_err().message(),
            "Scaling down the number of nodes is not currently supported"
        );
        let up = create_pv_pool_backing_store("bs", 3, "20Gi");
        assert!(validate_update(&up, &old).is_ok());
    }

    #[test]
    fn test_target_bucket_immutable() {
        let old = create_s3_backing_store("bs", "bucket-a");
        let new = create_s3_backing_store("bs", "bucket-b");
        assert_eq!(
            validate_update(&new, &old).unwrap_err().message(),
            "Changing a Backingstore target bucket is unsupported"
        );
        assert!(validate_update(&old, &old).is_ok());
    }

    #[test]
    fn test_target_bucket_immutable_across_type_change() {
        let old = create_s3_backing_store("bs", "bucket-a");
        let mut new = old.clone();
        let secret = old.spec.aws_s3.as_ref().unwrap().secret.clone().unwrap();
        new.spec.type_ = "s3-compatible".to_string();
        new.spec.aws_s3 = None;
        new.spec.s3_compatible = Some(crate::types::v1alpha1::store::S3CompatibleSpec {
            target_bucket: "bucket-b".to_string(),
            secret,
            endpoint: "https://s3.example.com".to_string(),
            signature_version: None,
        });
        assert!(validate(&new).is_ok());
        assert_eq!(
            validate_update(&new, &old).unwrap_err().message(),
            "Changing a Backingstore target bucket is unsupported"
        );
    }

    #[test]
    fn test_default_store_in_use_denied() {
        let bs = create_pv_pool_backing_store("noobaa-default-backing-store", 1, "16Gi");
        let system = SystemInfo {
            pools: vec![PoolInfo {
                name: "noobaa-default-backing-store".to_string(),
                undeletable: Some("IN_USE".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = validate_delete(&bs, &system).unwrap_err();
        assert!(
            err.message()
                .contains(r#"pool "noobaa-default-backing-store" in "IN_USE" state"#)
        );

        assert!(validate_delete(&bs, &SystemInfo::default()).is_ok());
    }
}
