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

use super::BackingStore;
use crate::types;
use crate::types::owner_reference;
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::BTreeMap;

pub const PV_POOL_VOLUME_NAME: &str = "noobaastorage";
pub const PV_POOL_STORAGE_MOUNT_PATH: &str = "/noobaa_storage";
const AGENT_CONFIG_KEY: &str = "AGENT_CONFIG";
const DEFAULT_VOLUME_SIZE: &str = "50Gi";

impl BackingStore {
    pub fn pv_pool_labels(&self) -> BTreeMap<String, String> {
        [
            ("app".to_owned(), "noobaa".to_owned()),
            ("pool".to_owned(), self.name()),
        ]
        .into_iter()
        .collect()
    }

    pub fn pv_pool_statefulset_name(&self) -> String {
        format!("{}-noobaa-pod", self.name())
    }

    pub fn agent_secret_name(&self) -> String {
        format!("backing-store-pv-pool-{}", self.name())
    }

    /// Secret carrying the agent configuration returned by the managed system.
    pub fn new_agent_secret(&self, agent_config: &str) -> corev1::Secret {
        corev1::Secret {
            metadata: metav1::ObjectMeta {
                name: Some(self.agent_secret_name()),
                namespace: self.namespace().ok(),
                owner_references: Some(vec![owner_reference(self)]),
                labels: Some(self.pv_pool_labels()),
                ..Default::default()
            },
            data: Some(
                [(
                    AGENT_CONFIG_KEY.to_owned(),
                    ByteString(agent_config.as_bytes().to_vec()),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        }
    }

    /// The agent StatefulSet backing a pv-pool store: one pod per volume.
    pub fn new_pv_pool_statefulset(
        &self,
        image: &str,
    ) -> Result<v1::StatefulSet, types::error::Error> {
        let pv_pool = self
            .spec
            .pv_pool
            .as_ref()
            .ok_or(types::error::Error::InternalError {
                msg: "backing store has no pvPool section".to_string(),
            })?;
        let labels = self.pv_pool_labels();

        let storage = pv_pool
            .requested_storage()
            .unwrap_or(DEFAULT_VOLUME_SIZE)
            .to_owned();

        let claim_template = corev1::PersistentVolumeClaim {
            metadata: metav1::ObjectMeta {
                name: Some(PV_POOL_VOLUME_NAME.to_owned()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(corev1::PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                storage_class_name: pv_pool.storage_class.clone(),
                resources: Some(corev1::VolumeResourceRequirements {
                    requests: Some(
                        [("storage".to_owned(), Quantity(storage))]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = corev1::Container {
            name: "noobaa-agent".to_owned(),
            image: Some(image.to_owned()),
            command: Some(vec!["/noobaa_init_files/noobaa_init.sh".to_owned(), "agent".to_owned()]),
            env: Some(vec![corev1::EnvVar {
                name: AGENT_CONFIG_KEY.to_owned(),
                value_from: Some(corev1::EnvVarSource {
                    secret_key_ref: Some(corev1::SecretKeySelector {
                        name: self.agent_secret_name(),
                        key: AGENT_CONFIG_KEY.to_owned(),
                        optional: Some(false),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ports: Some(vec![corev1::ContainerPort {
                container_port: 60101,
                name: Some("agent".to_owned()),
                protocol: Some("TCP".to_owned()),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![corev1::VolumeMount {
                name: PV_POOL_VOLUME_NAME.to_owned(),
                mount_path: PV_POOL_STORAGE_MOUNT_PATH.to_owned(),
                ..Default::default()
            }]),
            ..Default::default()
        };

        Ok(v1::StatefulSet {
            metadata: metav1::ObjectMeta {
                name: Some(self.pv_pool_statefulset_name()),
                namespace: self.namespace().ok(),
                owner_references: Some(vec![owner_reference(self)]),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(v1::StatefulSetSpec {
                replicas: Some(pv_pool.num_volumes),
                service_name: Some(self.pv_pool_statefulset_name()),
                pod_management_policy: Some("Parallel".to_owned()),
                selector: metav1::LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
                volume_claim_templates: Some(vec![claim_template]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::{PV_POOL_STORAGE_MOUNT_PATH, PV_POOL_VOLUME_NAME};

    #[test]
    fn test_pv_pool_statefulset_one_pod_per_volume() {
        let bs = crate::tests::create_pv_pool_backing_store("pv-store", 3, "20Gi");

        let sts = bs
            .new_pv_pool_statefulset("noobaa/noobaa-core:test")
            .expect("Should build StatefulSet");
        let spec = sts.spec.expect("StatefulSet should have spec");

        assert_eq!(spec.replicas, Some(3));
        let templates = spec
            .volume_claim_templates
            .expect("pv-pool needs a claim template");
        assert_eq!(templates.len(), 1);

        let requests = templates[0]
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .expect("claim template should request storage");
        assert_eq!(requests["storage"].0, "20Gi");

        let pod = spec.template.spec.expect("pod template should have spec");
        let mount = &pod.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.name, PV_POOL_VOLUME_NAME);
        assert_eq!(mount.mount_path, PV_POOL_STORAGE_MOUNT_PATH);
    }

    #[test]
    fn test_pv_pool_statefulset_owned_by_store() {
        let bs = crate::tests::create_pv_pool_backing_store("pv-store", 1, "16Gi");
        let sts = bs.new_pv_pool_statefulset("img").unwrap();
        let owners = sts.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "BackingStore");
        assert_eq!(owners[0].name, "pv-store");
    }
}
