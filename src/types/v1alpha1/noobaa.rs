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

use crate::types;
use crate::types::error::NoNamespaceSnafu;
use crate::types::owner_reference;
use crate::types::v1alpha1::condition::Condition;
use crate::types::v1alpha1::k8s;
use crate::types::v1alpha1::phase::SystemPhase;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::BTreeMap;

mod secrets;
mod services;
mod workloads;

pub use secrets::{
    ADMIN_SECRET, DB_SECRET, OPERATOR_SECRET, ROOT_KEY_VOLUME_SECRET, SERVER_SECRET,
};
pub use services::{DB_SERVICE, MGMT_SERVICE, S3_SERVICE};
pub use workloads::{
    CONFIG_HASH_ANNOTATION, CORE_DEPLOYMENT, DB_STATEFULSET, ENDPOINT_DEPLOYMENT, ENDPOINT_HPA,
    config_hash,
};

pub const DEFAULT_ENDPOINT_MIN_COUNT: i32 = 1;
pub const DEFAULT_ENDPOINT_MAX_COUNT: i32 = 2;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[kube(
    group = "noobaa.io",
    version = "v1alpha1",
    kind = "NooBaa",
    namespaced,
    status = "NooBaaStatus",
    shortname = "nb",
    plural = "noobaas",
    singular = "noobaa",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".status.actualImage"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    crates(serde_json = "k8s_openapi::serde_json")
)]
#[serde(rename_all = "camelCase")]
pub struct NooBaaSpec {
    /// Core image; defaults to the operator's configured core image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<k8s::ImagePullPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<corev1::LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_storage_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_volume_resources: Option<corev1::VolumeResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<EndpointsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecuritySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_policy: Option<CleanupPolicy>,

    /// Labels propagated to every object the operator creates for the system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Annotations propagated to every object the operator creates for the system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Skip creating the default backing store and bucket class.
    #[serde(default)]
    pub manual_default_backing_store: bool,

    /// Expose the S3 service through an Ingress with this host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_host: Option<String>,

    #[serde(default)]
    pub disable_load_balancer_service: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_count: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_virtual_hosts: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms: Option<KmsSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KmsSpec {
    /// Driver specific settings; `KMS_PROVIDER` selects the driver.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connection_details: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_name: Option<String>,

    #[serde(default)]
    pub enable_key_rotation: bool,

    /// Five-field cron expression for key rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPolicy {
    #[serde(default)]
    pub allow_noobaa_deletion: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NooBaaStatus {
    #[serde(default)]
    pub phase: SystemPhase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<AccountsStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<EndpointsStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_key_rotate_time: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub readme: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServicesStatus {
    pub service_mgmt: ServiceStatus,
    pub service_s3: ServiceStatus,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub internal_dns: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_dns: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_ports: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountsStatus {
    pub admin: UserStatus,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub secret_ref: corev1::SecretReference,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointsStatus {
    pub ready_count: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub virtual_hosts: Vec<String>,
}

impl NooBaa {
    pub fn namespace(&self) -> Result<String, types::error::Error> {
        ResourceExt::namespace(self).context(NoNamespaceSnafu)
    }

    pub fn name(&self) -> String {
        ResourceExt::name_any(self)
    }

    pub fn phase(&self) -> SystemPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn allows_deletion(&self) -> bool {
        self.spec
            .cleanup_policy
            .as_ref()
            .is_some_and(|p| p.allow_noobaa_deletion)
    }

    pub fn kms(&self) -> Option<&KmsSpec> {
        self.spec.security.as_ref().and_then(|s| s.kms.as_ref())
    }

    /// Core image requested by the spec, or the operator's default.
    pub fn desired_image(&self, default_image: &str) -> String {
        self.spec
            .image
            .clone()
            .unwrap_or_else(|| default_image.to_owned())
    }

    pub fn actual_image(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.actual_image.as_deref())
    }

    /// Whether the running image differs from the desired one.
    pub fn image_drifted(&self, default_image: &str) -> bool {
        self.actual_image()
            .is_some_and(|actual| actual != self.desired_image(default_image))
    }

    pub fn endpoint_bounds(&self) -> (i32, i32) {
        let spec = self.spec.endpoints.as_ref();
        let min = spec
            .and_then(|e| e.min_count)
            .unwrap_or(DEFAULT_ENDPOINT_MIN_COUNT)
            .max(1);
        let max = spec
            .and_then(|e| e.max_count)
            .unwrap_or(DEFAULT_ENDPOINT_MAX_COUNT)
            .max(min);
        (min, max)
    }

    pub fn common_labels(&self) -> BTreeMap<String, String> {
        let mut labels: BTreeMap<String, String> = [
            ("app".to_owned(), "noobaa".to_owned()),
            (
                "app.kubernetes.io/managed-by".to_owned(),
                "noobaa-operator".to_owned(),
            ),
        ]
        .into_iter()
        .collect();
        if let Some(user_labels) = &self.spec.labels {
            labels.extend(user_labels.clone());
        }
        labels
    }

    pub fn selector_labels(&self, component: &str) -> BTreeMap<String, String> {
        [
            ("app".to_owned(), "noobaa".to_owned()),
            ("noobaa-s3".to_owned(), self.name()),
            ("noobaa.io/component".to_owned(), component.to_owned()),
        ]
        .into_iter()
        .collect()
    }

    /// Metadata shared by every object the system owns.
    pub(crate) fn owned_meta(&self, name: &str) -> metav1::ObjectMeta {
        metav1::ObjectMeta {
            name: Some(name.to_owned()),
            namespace: self.namespace().ok(),
            owner_references: Some(vec![owner_reference(self)]),
            labels: Some(self.common_labels()),
            annotations: self.spec.annotations.clone(),
            ..Default::default()
        }
    }

    /// Markdown summary shown in `status.readme`.
    pub fn readme(&self) -> String {
        let ns = self.namespace().unwrap_or_default();
        format!(
            "\n\tWelcome to NooBaa!\n\t-----------------\n\
             \tS3 endpoint: https://{S3_SERVICE}.{ns}.svc:443\n\
             \tManagement: https://{MGMT_SERVICE}.{ns}.svc:443\n\
             \tAdmin credentials are in Secret {ADMIN_SECRET}.\n"
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    #[test]
    fn test_image_drift_detection() {
        let mut nb = crate::tests::create_test_noobaa();
        nb.spec.image = Some("noobaa/noobaa-core:5.18".to_string());
        assert!(!nb.image_drifted("default"), "no status means no drift yet");

        nb.status = Some(super::NooBaaStatus {
            actual_image: Some("noobaa/noobaa-core:5.17".to_string()),
            ..Default::default()
        });
        assert!(nb.image_drifted("default"));

        nb.status.as_mut().unwrap().actual_image = Some("noobaa/noobaa-core:5.18".to_string());
        assert!(!nb.image_drifted("default"));
    }

    #[test]
    fn test_endpoint_bounds_are_ordered() {
        let mut nb = crate::tests::create_test_noobaa();
        nb.spec.endpoints = Some(super::EndpointsSpec {
            min_count: Some(3),
            max_count: Some(1),
            ..Default::default()
        });
        assert_eq!(nb.endpoint_bounds(), (3, 3));

        nb.spec.endpoints = None;
        assert_eq!(nb.endpoint_bounds(), (1, 2));
    }

    #[test]
    fn test_user_labels_merge_over_common() {
        let mut nb = crate::tests::create_test_noobaa();
        nb.spec.labels = Some([("team".to_string(), "storage".to_string())].into());
        let labels = nb.common_labels();
        assert_eq!(labels["app"], "noobaa");
        assert_eq!(labels["team"], "storage");
    }
}
