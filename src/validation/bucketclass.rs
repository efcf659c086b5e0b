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
use crate::types::v1alpha1::IMMUTABLE_LABEL_PREFIX;
use crate::types::v1alpha1::bucketclass::{BucketClass, NamespacePolicy, NamespacePolicyType, Quota};
use crate::types::v1alpha1::namespacestore::NamespaceStore;
use crate::types::v1alpha1::phase::Phase;
use crate::utils::quantity::{self, GIB};
use kube::ResourceExt;

pub const MIN_TIERS: usize = 1;
pub const MAX_TIERS: usize = 2;
pub const MIN_QUOTA_SIZE: u64 = GIB;

/// Structural rules; `namespace_stores` are the stores the class may reference.
pub fn validate(bc: &BucketClass, namespace_stores: &[NamespaceStore]) -> Result {
    let spec = &bc.spec;
    match (&spec.placement_policy, &spec.namespace_policy) {
        (Some(_), Some(_)) => {
            return Err(Error::invalid(
                "BucketClass must set either placementPolicy or namespacePolicy, not both",
            ));
        }
        (None, None) => {
            return Err(Error::invalid(
                "BucketClass must set a placementPolicy or a namespacePolicy",
            ));
        }
        (Some(placement), None) => {
            let tiers = placement.tiers.len();
            if !(MIN_TIERS..=MAX_TIERS).contains(&tiers) {
                return Err(Error::invalid(format!(
                    "BucketClass placementPolicy must have {MIN_TIERS} or {MAX_TIERS} tiers, got {tiers}"
                )));
            }
            if let Some(i) = placement.tiers.iter().position(|t| t.backing_stores.is_empty()) {
                return Err(Error::invalid(format!(
                    "BucketClass tier {i} must list at least one backing store"
                )));
            }
        }
        (None, Some(policy)) => validate_namespace_policy(policy, namespace_stores)?,
    }

    if let Some(quota) = &spec.quota {
        validate_quota(quota)?;
    }

    Ok(())
}

fn validate_namespace_policy(policy: &NamespacePolicy, stores: &[NamespaceStore]) -> Result {
    let section_ok = match policy.type_ {
        NamespacePolicyType::Single => policy
            .single
            .as_ref()
            .is_some_and(|s| !s.resource.is_empty()),
        NamespacePolicyType::Multi => policy
            .multi
            .as_ref()
            .is_some_and(|m| !m.write_resource.is_empty()),
        NamespacePolicyType::Cache => policy
            .cache
            .as_ref()
            .is_some_and(|c| !c.hub_resource.is_empty()),
    };
    if !section_ok {
        return Err(Error::invalid(format!(
            "BucketClass namespacePolicy of type {} requires its matching section",
            policy.type_
        )));
    }

    let references_nsfs = policy.referenced_stores().iter().any(|name| {
        stores
            .iter()
            .any(|s| s.name_any() == *name && s.spec.is_nsfs())
    });
    if references_nsfs && policy.type_ != NamespacePolicyType::Single {
        return Err(Error::invalid(
            "NSFS namespace stores can only be used in a namespacePolicy of type single",
        ));
    }

    Ok(())
}

pub fn validate_quota(quota: &Quota) -> Result {
    if let Some(max_size) = quota.max_size.as_deref() {
        let bytes = quantity::parse_bytes(max_size)
            .map_err(|_| Error::invalid(format!("Invalid quota maxSize {max_size:?}")))?;
        if bytes < MIN_QUOTA_SIZE {
            return Err(Error::invalid(
                "Invalid quota maxSize, the minimum quota size is 1Gi",
            ));
        }
    }

    if let Some(max_objects) = quota.max_objects.as_deref()
        && max_objects.parse::<u64>().is_err()
    {
        return Err(Error::invalid(format!(
            "Invalid quota maxObjects {max_objects:?}, must be a non-negative integer"
        )));
    }

    Ok(())
}

pub fn validate_update(
    new: &BucketClass,
    old: &BucketClass,
    namespace_stores: &[NamespaceStore],
) -> Result {
    validate(new, namespace_stores)?;

    let immutable = |bc: &BucketClass| {
        bc.labels()
            .iter()
            .filter(|(k, _)| k.starts_with(IMMUTABLE_LABEL_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>()
    };
    if immutable(new) != immutable(old) {
        return Err(Error::invalid(format!(
            "Changing labels with the {IMMUTABLE_LABEL_PREFIX} prefix is unsupported"
        )));
    }

    Ok(())
}

/// Reconcile-time check of the referenced backing stores.
///
/// `phase_of` returns the phase of a backing store, or `None` if it does not exist.
pub fn validate_backing_stores(
    bc: &BucketClass,
    phase_of: impl Fn(&str) -> Option<Phase>,
) -> Result {
    for name in bc.spec.referenced_backing_stores() {
        match phase_of(name) {
            None => {
                return Err(Error::persistent(
                    "MissingBackingStore",
                    format!("BucketClass references a missing backing store {name:?}"),
                ));
            }
            Some(Phase::Rejected) => {
                return Err(Error::persistent(
                    "RejectedBackingStore",
                    format!("BucketClass references a rejected backing store {name:?}"),
                ));
            }
            Some(phase) if !phase.is_ready() => {
                return Err(Error::transient(
                    "BackingStoreNotReady",
                    format!("backing store {name:?} is in phase {phase}"),
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
