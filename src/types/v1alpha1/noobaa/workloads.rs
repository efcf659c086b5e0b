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

use super::NooBaa;
use super::secrets::{DB_SECRET, ROOT_KEY_VOLUME_SECRET, SERVER_SECRET};
use super::services::{DB_SERVICE, MGMT_SERVICE};
use crate::types::v1alpha1::namespacestore::NamespaceStore;
use k8s_openapi::api::apps::v1;
use k8s_openapi::api::autoscaling::v2 as autoscalingv2;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use sha2::{Digest, Sha256};
use std::fmt::Write;

pub const CORE_DEPLOYMENT: &str = "noobaa-core";
pub const ENDPOINT_DEPLOYMENT: &str = "noobaa-endpoint";
pub const ENDPOINT_HPA: &str = "noobaa-endpoint";
pub const DB_STATEFULSET: &str = "noobaa-db-pg";

pub(super) const CORE_COMPONENT: &str = "core";
pub(super) const ENDPOINT_COMPONENT: &str = "endpoint";
const DB_COMPONENT: &str = "postgres";

/// Pod template annotation holding the sha256 of the rendered template.
pub const CONFIG_HASH_ANNOTATION: &str = "noobaa.io/config-hash";

const ROOT_KEY_MOUNT_PATH: &str = "/etc/noobaa-server/root_keys";
const DB_VOLUME_NAME: &str = "db";
const DEFAULT_DB_VOLUME_SIZE: &str = "50Gi";
const ENDPOINT_TARGET_CPU_UTILIZATION: i32 = 80;

fn env(name: &str, value: impl Into<String>) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_owned(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_owned(),
        value_from: Some(corev1::EnvVarSource {
            secret_key_ref: Some(corev1::SecretKeySelector {
                name: secret.to_owned(),
                key: key.to_owned(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Hex sha256 of a pod template's JSON rendering.
pub fn config_hash(template: &corev1::PodTemplateSpec) -> String {
    let rendered = serde_json::to_vec(template).unwrap_or_default();
    Sha256::digest(&rendered)
        .iter()
        .fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

/// Stamps the template with its own hash so drift rolls the pods.
fn with_config_hash(mut template: corev1::PodTemplateSpec) -> corev1::PodTemplateSpec {
    let hash = config_hash(&template);
    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(Default::default)
        .insert(CONFIG_HASH_ANNOTATION.to_owned(), hash);
    template
}

impl NooBaa {
    fn pod_labels(&self, component: &str) -> std::collections::BTreeMap<String, String> {
        let mut labels = self.common_labels();
        labels.extend(self.selector_labels(component));
        labels
    }

    fn pull_secrets(&self) -> Option<Vec<corev1::LocalObjectReference>> {
        self.spec.image_pull_secret.clone().map(|s| vec![s])
    }

    fn pull_policy(&self) -> Option<String> {
        self.spec.image_pull_policy.as_ref().map(|p| p.to_string())
    }

    fn shared_env(&self) -> Vec<corev1::EnvVar> {
        let ns = self.namespace().unwrap_or_default();
        vec![
            env("POSTGRES_HOST", format!("{DB_SERVICE}.{ns}.svc")),
            env("POSTGRES_DBNAME", "nbcore"),
            secret_env("POSTGRES_USER", DB_SECRET, "user"),
            secret_env("POSTGRES_PASSWORD", DB_SECRET, "password"),
            secret_env("JWT_SECRET", SERVER_SECRET, "jwt"),
            secret_env("SERVER_SECRET", SERVER_SECRET, "server_secret"),
            env("MGMT_ADDR", format!("wss://{MGMT_SERVICE}.{ns}.svc:443")),
        ]
    }

    /// The core server, a single replica.
    pub fn new_core_deployment(&self, image: &str) -> v1::Deployment {
        let labels = self.pod_labels(CORE_COMPONENT);
        let template = with_config_hash(corev1::PodTemplateSpec {
            metadata: Some(metav1::ObjectMeta {
                labels: Some(labels),
                annotations: self.spec.annotations.clone(),
                ..Default::default()
            }),
            spec: Some(corev1::PodSpec {
                service_account_name: Some("noobaa".to_owned()),
                image_pull_secrets: self.pull_secrets(),
                containers: vec![corev1::Container {
                    name: CORE_COMPONENT.to_owned(),
                    image: Some(image.to_owned()),
                    image_pull_policy: self.pull_policy(),
                    env: Some(self.shared_env()),
                    resources: self.spec.core_resources.clone(),
                    ports: Some(vec![
                        corev1::ContainerPort {
                            container_port: 8080,
                            name: Some("mgmt".to_owned()),
                            ..Default::default()
                        },
                        corev1::ContainerPort {
                            container_port: 8443,
                            name: Some("mgmt-https".to_owned()),
                            ..Default::default()
                        },
                    ]),
                    volume_mounts: Some(vec![corev1::VolumeMount {
                        name: "root-keys".to_owned(),
                        mount_path: ROOT_KEY_MOUNT_PATH.to_owned(),
                        read_only: Some(true),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                volumes: Some(vec![corev1::Volume {
                    name: "root-keys".to_owned(),
                    secret: Some(corev1::SecretVolumeSource {
                        secret_name: Some(ROOT_KEY_VOLUME_SECRET.to_owned()),
                        optional: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        });

        v1::Deployment {
            metadata: self.owned_meta(CORE_DEPLOYMENT),
            spec: Some(v1::DeploymentSpec {
                replicas: Some(1),
                selector: metav1::LabelSelector {
                    match_labels: Some(self.selector_labels(CORE_COMPONENT)),
                    ..Default::default()
                },
                strategy: Some(v1::DeploymentStrategy {
                    type_: Some("Recreate".to_owned()),
                    ..Default::default()
                }),
                template,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// S3 endpoints; every nsfs namespace store's PVC is mounted under `/nsfs/`.
    pub fn new_endpoint_deployment(
        &self,
        image: &str,
        nsfs_stores: &[NamespaceStore],
    ) -> v1::Deployment {
        let labels = self.pod_labels(ENDPOINT_COMPONENT);
        let (min, _) = self.endpoint_bounds();

        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        for store in nsfs_stores {
            let Some(nsfs) = store.spec.nsfs.as_ref() else {
                continue;
            };
            let volume_name = format!("nsfs-{}", store.name());
            volumes.push(corev1::Volume {
                name: volume_name.clone(),
                persistent_volume_claim: Some(corev1::PersistentVolumeClaimVolumeSource {
                    claim_name: nsfs.pvc_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            });
            mounts.push(corev1::VolumeMount {
                name: volume_name,
                mount_path: store.nsfs_mount_path(),
                ..Default::default()
            });
        }

        let mut env = self.shared_env();
        if let Some(hosts) = self
            .spec
            .endpoints
            .as_ref()
            .map(|e| &e.additional_virtual_hosts)
            .filter(|h| !h.is_empty())
        {
            env.push(self::env("VIRTUAL_HOSTS", hosts.join(" ")));
        }

        let template = with_config_hash(corev1::PodTemplateSpec {
            metadata: Some(metav1::ObjectMeta {
                labels: Some(labels),
                annotations: self.spec.annotations.clone(),
                ..Default::default()
            }),
            spec: Some(corev1::PodSpec {
                service_account_name: Some("noobaa-endpoint".to_owned()),
                image_pull_secrets: self.pull_secrets(),
                containers: vec![corev1::Container {
                    name: ENDPOINT_COMPONENT.to_owned(),
                    image: Some(image.to_owned()),
                    image_pull_policy: self.pull_policy(),
                    command: Some(vec!["/noobaa_init_files/noobaa_init.sh".to_owned(), "init_endpoint".to_owned()]),
                    env: Some(env),
                    resources: self.spec.endpoints.as_ref().and_then(|e| e.resources.clone()),
                    ports: Some(vec![
                        corev1::ContainerPort {
                            container_port: 6001,
                            name: Some("s3".to_owned()),
                            ..Default::default()
                        },
                        corev1::ContainerPort {
                            container_port: 6443,
                            name: Some("s3-https".to_owned()),
                            ..Default::default()
                        },
                    ]),
                    volume_mounts: (!mounts.is_empty()).then_some(mounts),
                    ..Default::default()
                }],
                volumes: (!volumes.is_empty()).then_some(volumes),
                ..Default::default()
            }),
        });

        v1::Deployment {
            metadata: self.owned_meta(ENDPOINT_DEPLOYMENT),
            spec: Some(v1::DeploymentSpec {
                replicas: Some(min),
                selector: metav1::LabelSelector {
                    match_labels: Some(self.selector_labels(ENDPOINT_COMPONENT)),
                    ..Default::default()
                },
                template,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Scales the endpoint deployment between the spec bounds on CPU.
    pub fn new_endpoint_hpa(&self) -> autoscalingv2::HorizontalPodAutoscaler {
        let (min, max) = self.endpoint_bounds();
        autoscalingv2::HorizontalPodAutoscaler {
            metadata: self.owned_meta(ENDPOINT_HPA),
            spec: Some(autoscalingv2::HorizontalPodAutoscalerSpec {
                min_replicas: Some(min),
                max_replicas: max,
                scale_target_ref: autoscalingv2::CrossVersionObjectReference {
                    api_version: Some("apps/v1".to_owned()),
                    kind: "Deployment".to_owned(),
                    name: ENDPOINT_DEPLOYMENT.to_owned(),
                },
                metrics: Some(vec![autoscalingv2::MetricSpec {
                    type_: "Resource".to_owned(),
                    resource: Some(autoscalingv2::ResourceMetricSource {
                        name: "cpu".to_owned(),
                        target: autoscalingv2::MetricTarget {
                            type_: "Utilization".to_owned(),
                            average_utilization: Some(ENDPOINT_TARGET_CPU_UTILIZATION),
                            ..Default::default()
                        },
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Postgres for the core's metadata.
    pub fn new_db_statefulset(&self, image: &str) -> v1::StatefulSet {
        let labels = self.pod_labels(DB_COMPONENT);
        let storage = self
            .spec
            .db_volume_resources
            .as_ref()
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get("storage").cloned())
            .unwrap_or_else(|| Quantity(DEFAULT_DB_VOLUME_SIZE.to_owned()));

        v1::StatefulSet {
            metadata: self.owned_meta(DB_STATEFULSET),
            spec: Some(v1::StatefulSetSpec {
                replicas: Some(1),
                service_name: Some(DB_SERVICE.to_owned()),
                selector: metav1::LabelSelector {
                    match_labels: Some(self.selector_labels(DB_COMPONENT)),
                    ..Default::default()
                },
                template: corev1::PodTemplateSpec {
                    metadata: Some(metav1::ObjectMeta {
                        labels: Some(labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(corev1::PodSpec {
                        image_pull_secrets: self.pull_secrets(),
                        containers: vec![corev1::Container {
                            name: "db".to_owned(),
                            image: Some(image.to_owned()),
                            env: Some(vec![
                                env("POSTGRESQL_DATABASE", "nbcore"),
                                secret_env("POSTGRESQL_USER", DB_SECRET, "user"),
                                secret_env("POSTGRESQL_PASSWORD", DB_SECRET, "password"),
                            ]),
                            resources: self.spec.db_resources.clone(),
                            ports: Some(vec![corev1::ContainerPort {
                                container_port: 5432,
                                name: Some("postgres".to_owned()),
                                ..Default::default()
                            }]),
                            volume_mounts: Some(vec![corev1::VolumeMount {
                                name: DB_VOLUME_NAME.to_owned(),
                                mount_path: "/var/lib/pgsql".to_owned(),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                volume_claim_templates: Some(vec![corev1::PersistentVolumeClaim {
                    metadata: metav1::ObjectMeta {
                        name: Some(DB_VOLUME_NAME.to_owned()),
                        labels: Some(labels),
                        ..Default::default()
                    },
                    spec: Some(corev1::PersistentVolumeClaimSpec {
                        access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                        storage_class_name: self.spec.db_storage_class.clone(),
                        resources: Some(corev1::VolumeResourceRequirements {
                            requests: Some([("storage".to_owned(), storage)].into()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
