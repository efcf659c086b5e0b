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
use super::workloads::{CORE_COMPONENT, ENDPOINT_COMPONENT};
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::networking::v1 as networkingv1;
use k8s_openapi::apimachinery::pkg::util::intstr;

pub const MGMT_SERVICE: &str = "noobaa-mgmt";
pub const S3_SERVICE: &str = "s3";
pub const DB_SERVICE: &str = "noobaa-db-pg";

fn port(name: &str, port: i32, target: i32) -> corev1::ServicePort {
    corev1::ServicePort {
        name: Some(name.to_owned()),
        port,
        target_port: Some(intstr::IntOrString::Int(target)),
        protocol: Some("TCP".to_owned()),
        ..Default::default()
    }
}

impl NooBaa {
    /// Management API service fronting the core pod.
    pub fn new_mgmt_service(&self) -> corev1::Service {
        corev1::Service {
            metadata: self.owned_meta(MGMT_SERVICE),
            spec: Some(corev1::ServiceSpec {
                type_: Some("ClusterIP".to_owned()),
                selector: Some(self.selector_labels(CORE_COMPONENT)),
                ports: Some(vec![
                    port("mgmt", 80, 8080),
                    port("mgmt-https", 443, 8443),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// S3 service fronting the endpoint pods.
    pub fn new_s3_service(&self) -> corev1::Service {
        let type_ = if self.spec.disable_load_balancer_service {
            "ClusterIP"
        } else {
            "LoadBalancer"
        };
        corev1::Service {
            metadata: self.owned_meta(S3_SERVICE),
            spec: Some(corev1::ServiceSpec {
                type_: Some(type_.to_owned()),
                selector: Some(self.selector_labels(ENDPOINT_COMPONENT)),
                ports: Some(vec![port("s3", 80, 6001), port("s3-https", 443, 6443)]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn new_db_service(&self) -> corev1::Service {
        corev1::Service {
            metadata: self.owned_meta(DB_SERVICE),
            spec: Some(corev1::ServiceSpec {
                type_: Some("ClusterIP".to_owned()),
                selector: Some(self.selector_labels("postgres")),
                ports: Some(vec![port("postgres", 5432, 5432)]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Ingress for the S3 service, only when a host is configured.
    pub fn new_s3_ingress(&self) -> Option<networkingv1::Ingress> {
        let host = self.spec.ingress_host.clone()?;
        Some(networkingv1::Ingress {
            metadata: self.owned_meta(S3_SERVICE),
            spec: Some(networkingv1::IngressSpec {
                rules: Some(vec![networkingv1::IngressRule {
                    host: Some(host),
                    http: Some(networkingv1::HTTPIngressRuleValue {
                        paths: vec![networkingv1::HTTPIngressPath {
                            path: Some("/".to_owned()),
                            path_type: "Prefix".to_owned(),
                            backend: networkingv1::IngressBackend {
                                service: Some(networkingv1::IngressServiceBackend {
                                    name: S3_SERVICE.to_owned(),
                                    port: Some(networkingv1::ServiceBackendPort {
                                        name: Some("s3".to_owned()),
                                        ..Default::default()
                                    }),
                                }),
                                ..Default::default()
                            },
                        }],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// OpenShift route for the S3 service, as a raw manifest.
    pub fn new_s3_route_manifest(&self) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "route.openshift.io/v1",
            "kind": "Route",
            "metadata": self.owned_meta(S3_SERVICE),
            "spec": {
                "to": {"kind": "Service", "name": S3_SERVICE},
                "port": {"targetPort": "s3-https"},
                "tls": {"termination": "reencrypt", "insecureEdgeTerminationPolicy": "Allow"},
            }
        })
    }

    /// Cluster-internal DNS names of a service.
    pub fn internal_dns(&self, service: &str) -> Vec<String> {
        let ns = self.namespace().unwrap_or_default();
        vec![format!("https://{service}.{ns}.svc:443")]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    #[test]
    fn test_s3_service_type_follows_spec() {
        let mut nb = crate::tests::create_test_noobaa();
        let svc = nb.new_s3_service();
        assert_eq!(svc.spec.unwrap().type_.as_deref(), Some("LoadBalancer"));

        nb.spec.disable_load_balancer_service = true;
        let svc = nb.new_s3_service();
        assert_eq!(svc.spec.unwrap().type_.as_deref(), Some("ClusterIP"));
    }

    #[test]
    fn test_ingress_only_with_host() {
        let mut nb = crate::tests::create_test_noobaa();
        assert!(nb.new_s3_ingress().is_none());

        nb.spec.ingress_host = Some("s3.example.com".to_string());
        let ingress = nb.new_s3_ingress().expect("host set, ingress expected");
        let rules = ingress.spec.unwrap().rules.unwrap();
        assert_eq!(rules[0].host.as_deref(), Some("s3.example.com"));
    }
}
