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

use super::{Error, Result};
use crate::types::v1alpha1::account::{NooBaaAccount, NsfsAccountConfig};

fn validate_nsfs_config(config: &NsfsAccountConfig) -> Result {
    if config.uid.is_some_and(|uid| uid < 0) {
        return Err(Error::invalid("UID must be a non-negative integer"));
    }
    if config.gid.is_some_and(|gid| gid < 0) {
        return Err(Error::invalid("GID must be a non-negative integer"));
    }

    let has_ids = config.uid.is_some() || config.gid.is_some();
    let has_dn = config
        .distinguished_name
        .as_deref()
        .is_some_and(|dn| !dn.is_empty());
    match (has_ids, has_dn) {
        (true, true) => Err(Error::invalid(
            "NSFS account config must set either UID and GID or a distinguished name, not both",
        )),
        (false, false) => Err(Error::invalid(
            "NSFS account config must set UID and GID or a distinguished name",
        )),
        (true, false) if config.uid.is_none() || config.gid.is_none() => Err(Error::invalid(
            "NSFS account config must set both UID and GID",
        )),
        _ => Ok(()),
    }
}

pub fn validate(account: &NooBaaAccount) -> Result {
    if let Some(config) = &account.spec.nsfs_account_config {
        validate_nsfs_config(config)?;
    }
    if account
        .spec
        .default_resource
        .as_deref()
        .is_some_and(str::is_empty)
    {
        return Err(Error::invalid("defaultResource must not be empty when set"));
    }
    Ok(())
}

pub fn validate_update(new: &NooBaaAccount, old: &NooBaaAccount) -> Result {
    validate(new)?;
    if old.spec.nsfs_account_config.is_some() && new.spec.nsfs_account_config.is_none() {
        return Err(Error::invalid(
            "Removing the NSFS account config is unsupported",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::create_test_account;

    fn nsfs(uid: Option<i64>, gid: Option<i64>, dn: Option<&str>) -> NsfsAccountConfig {
        NsfsAccountConfig {
            uid,
            gid,
            distinguished_name: dn.map(str::to_string),
            new_buckets_path: "/".to_string(),
            nsfs_only: false,
        }
    }

    #[test]
    fn test_identity_rules() {
        assert!(validate_nsfs_config(&nsfs(Some(0), Some(0), None)).is_ok());
        assert!(validate_nsfs_config(&nsfs(None, None, Some("cn=user"))).is_ok());
        assert!(validate_nsfs_config(&nsfs(Some(-1), Some(0), None)).is_err());
        assert!(validate_nsfs_config(&nsfs(Some(1), None, None)).is_err());
        assert!(validate_nsfs_config(&nsfs(Some(1), Some(1), Some("cn=user"))).is_err());
        assert!(validate_nsfs_config(&nsfs(None, None, None)).is_err());
    }

    #[test]
    fn test_nsfs_config_cannot_be_removed() {
        let mut old = create_test_account("acc", Some("bs"));
        old.spec.nsfs_account_config = Some(nsfs(Some(1000), Some(1000), None));
        let mut new = old.clone();
        assert!(validate_update(&new, &old).is_ok());

        new.spec.nsfs_account_config = None;
        let err = validate_update(&new, &old).unwrap_err();
        assert!(err.is_invalid());
    }
}
