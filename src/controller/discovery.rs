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


//! API discovery restricted to the groups the operator works with.
//!
//! Scanning every group of a large cluster is slow, so discovery only
//! covers [`ALLOWED_GROUPS`]. A kind missing from the cached result
//! triggers exactly one rediscovery before it is reported.

use crate::types::objectbucket::{ObjectBucket, ObjectBucketClaim};
use crate::types::v1alpha1::account::NooBaaAccount;
use crate::types::v1alpha1::backingstore::BackingStore;
use crate::types::v1alpha1::bucketclass::BucketClass;
use crate::types::v1alpha1::namespacestore::NamespaceStore;
use crate::types::v1alpha1::noobaa::NooBaa;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::Resource;
use kube::api::{ApiResource, GroupVersionKind};
use kube::discovery::Discovery;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

pub const ROUTE_GROUP: &str = "route.openshift.io";

pub const ALLOWED_GROUPS: &[&str] = &[
    crate::types::v1alpha1::GROUP,
    crate::types::objectbucket::GROUP,
    ROUTE_GROUP,
    "storage.k8s.io",
];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("api discovery failed: {source}"))]
    Discovery { source: kube::Error },

    #[snafu(display("no matches for kind {} in group {:?}", gvk.kind, gvk.group))]
    NoKindMatch { gvk: GroupVersionKind },
}

/// Optional APIs present on the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// OpenShift routes are served; the S3 service is exposed through a Route.
    pub routes: bool,
}

fn gvk_of<K: Resource<DynamicType = ()>>() -> GroupVersionKind {
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

/// Kinds the controllers watch; startup fails if one is not served.
pub fn required_kinds() -> Vec<GroupVersionKind> {
    vec![
        gvk_of::<NooBaa>(),
        gvk_of::<BackingStore>(),
        gvk_of::<NamespaceStore>(),
        gvk_of::<BucketClass>(),
        gvk_of::<NooBaaAccount>(),
        gvk_of::<ObjectBucketClaim>(),
        gvk_of::<ObjectBucket>(),
        gvk_of::<StorageClass>(),
    ]
}

pub struct Mapper {
    client: kube::Client,
    discovery: Discovery,
}

impl Mapper {
    pub async fn new(client: kube::Client) -> Result<Self, Error> {
        let discovery = Self::discover(&client).await?;
        Ok(Self { client, discovery })
    }

    async fn discover(client: &kube::Client) -> Result<Discovery, Error> {
        let discovery = Discovery::new(client.clone())
            .filter(ALLOWED_GROUPS)
            .run()
            .await
            .context(DiscoverySnafu)?;
        debug!(groups = ?discovery.groups().map(|g| g.name()).collect::<Vec<_>>(), "discovered api groups");
        Ok(discovery)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            routes: self.discovery.has_group(ROUTE_GROUP),
        }
    }

    /// Resolves `gvk`, rediscovering once if the cached result does not know it.
    pub async fn resolve(&mut self, gvk: &GroupVersionKind) -> Result<ApiResource, Error> {
        if let Some((resource, _)) = self.discovery.resolve_gvk(gvk) {
            return Ok(resource);
        }

        info!(kind = %gvk.kind, group = %gvk.group, "kind not in discovery cache, rediscovering");
        self.discovery = Self::discover(&self.client).await?;
        self.discovery
            .resolve_gvk(gvk)
            .map(|(resource, _)| resource)
            .ok_or_else(|| Error::NoKindMatch { gvk: gvk.clone() })
    }

    pub async fn ensure(&mut self, gvks: &[GroupVersionKind]) -> Result<(), Error> {
        for gvk in gvks {
            self.resolve(gvk).await?;
        }
        Ok(())
    }
}
