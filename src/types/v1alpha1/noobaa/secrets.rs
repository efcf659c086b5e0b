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
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;

pub const SERVER_SECRET: &str = "noobaa-server";
pub const DB_SECRET: &str = "noobaa-db";
pub const OPERATOR_SECRET: &str = "noobaa-operator";
pub const ADMIN_SECRET: &str = "noobaa-admin";
pub const ROOT_KEY_VOLUME_SECRET: &str = "noobaa-root-master-key-volume";

impl NooBaa {
    fn new_string_secret(&self, name: &str, data: BTreeMap<String, String>) -> corev1::Secret {
        corev1::Secret {
            metadata: self.owned_meta(name),
            string_data: Some(data),
            type_: Some("Opaque".to_owned()),
            ..Default::default()
        }
    }

    /// Server-side JWT and server secrets shared by core and endpoints.
    pub fn new_server_secret(&self, jwt: &str, server_secret: &str) -> corev1::Secret {
        self.new_string_secret(
            SERVER_SECRET,
            [
                ("jwt".to_owned(), jwt.to_owned()),
                ("server_secret".to_owned(), server_secret.to_owned()),
            ]
            .into(),
        )
    }

    pub fn new_db_secret(&self, password: &str) -> corev1::Secret {
        self.new_string_secret(
            DB_SECRET,
            [
                ("user".to_owned(), "noobaa".to_owned()),
                ("password".to_owned(), password.to_owned()),
            ]
            .into(),
        )
    }

    /// Token the operator authenticates its RPC calls with.
    pub fn new_operator_secret(&self, token: &str) -> corev1::Secret {
        self.new_string_secret(OPERATOR_SECRET, [("auth_token".to_owned(), token.to_owned())].into())
    }

    pub fn new_admin_secret(
        &self,
        email: &str,
        password: &str,
        system: &str,
        access_key: Option<&str>,
        secret_key: Option<&str>,
    ) -> corev1::Secret {
        let mut data: BTreeMap<String, String> = [
            ("email".to_owned(), email.to_owned()),
            ("password".to_owned(), password.to_owned()),
            ("system".to_owned(), system.to_owned()),
        ]
        .into();
        if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
            data.insert("AWS_ACCESS_KEY_ID".to_owned(), access_key.to_owned());
            data.insert("AWS_SECRET_ACCESS_KEY".to_owned(), secret_key.to_owned());
        }
        self.new_string_secret(ADMIN_SECRET, data)
    }

    /// Root master key material mounted into the core pod.
    pub fn new_root_key_volume_secret(&self, data: BTreeMap<String, String>) -> corev1::Secret {
        self.new_string_secret(ROOT_KEY_VOLUME_SECRET, data)
    }
}
