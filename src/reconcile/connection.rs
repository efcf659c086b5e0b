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

//! External connections and remote teardown shared by the store reconcilers.

use super::{Error, escalate_after_grace};
use crate::context::{Context, secret_string};
use crate::rpc::types::{
    CheckExternalConnectionReply, ExternalConnectionParams, POOL_TYPE_INTERNAL, SystemInfo,
    UpdateAccountS3AccessParams, UpdateExternalConnectionParams, secret_digest,
};
use crate::rpc::{self, Classified, NoobaaApi};
use crate::types::v1alpha1::store::StoreKind;
use crate::validation::{self, endpoint_url, validate_secret_keys};
use k8s_openapi::api::core::v1 as corev1;
use kube::api::ObjectMeta;
use tracing::{debug, info};

const AWS_ENDPOINT: &str = "https://s3.amazonaws.com";
const AZURE_ENDPOINT: &str = "https://blob.core.windows.net";
const GOOGLE_ENDPOINT: &str = "https://www.googleapis.com";

/// Endpoint type the managed system expects for a store kind.
pub fn endpoint_type(kind: &StoreKind<'_>) -> &'static str {
    match kind {
        StoreKind::AwsS3(_) => "AWS",
        StoreKind::S3Compatible(_) => "S3_COMPATIBLE",
        StoreKind::IbmCos(_) => "IBM_COS",
        StoreKind::AzureBlob(_) => "AZURE",
        StoreKind::GoogleCloudStorage(_) => "GOOGLE",
        StoreKind::PvPool(_) | StoreKind::Nsfs(_) => "",
    }
}

fn auth_method(signature_version: Option<&str>) -> Option<String> {
    match signature_version {
        Some("v2") => Some("AWS_V2".to_owned()),
        Some("v4") => Some("AWS_V4".to_owned()),
        _ => None,
    }
}

fn read_key(secret: Option<&corev1::Secret>, key: &str) -> Result<String, Error> {
    let secret = secret.ok_or_else(|| {
        Error::persistent("MissingSecret", "a credentials secret is required")
    })?;
    secret_string(secret, key)
        .map_err(|e| Error::persistent("InvalidSecret", e.to_string()))
}

/// Builds the connection payload for a cloud store.
///
/// `secret` is the already loaded credentials secret; aws-s3 with an STS
/// role needs none.
pub fn connection_params(
    name: &str,
    kind: &StoreKind<'_>,
    secret: Option<&corev1::Secret>,
) -> Result<ExternalConnectionParams, Error> {
    let mut params = ExternalConnectionParams {
        name: name.to_owned(),
        endpoint_type: endpoint_type(kind).to_owned(),
        ..Default::default()
    };

    match kind {
        StoreKind::AwsS3(aws) => {
            params.endpoint = if aws.ssl_disabled {
                AWS_ENDPOINT.replacen("https", "http", 1)
            } else {
                AWS_ENDPOINT.to_owned()
            };
            params.region = aws.region.clone();
            params.auth_method = Some("AWS_V4".to_owned());
            if let Some(arn) = aws.aws_sts_role_arn.as_deref().filter(|a| !a.is_empty()) {
                params.aws_sts_arn = Some(arn.to_owned());
            } else {
                params.identity = read_key(secret, "AWS_ACCESS_KEY_ID")?;
                params.secret = read_key(secret, "AWS_SECRET_ACCESS_KEY")?;
            }
        }
        StoreKind::S3Compatible(s3) => {
            params.endpoint = endpoint_url(&s3.endpoint)?.to_string();
            params.auth_method = auth_method(s3.signature_version.as_deref());
            params.identity = read_key(secret, "AWS_ACCESS_KEY_ID")?;
            params.secret = read_key(secret, "AWS_SECRET_ACCESS_KEY")?;
        }
        StoreKind::IbmCos(cos) => {
            params.endpoint = endpoint_url(&cos.endpoint)?.to_string();
            params.auth_method = auth_method(cos.signature_version.as_deref());
            params.identity = read_key(secret, "IBM_COS_ACCESS_KEY_ID")?;
            params.secret = read_key(secret, "IBM_COS_SECRET_ACCESS_KEY")?;
        }
        StoreKind::AzureBlob(_) => {
            params.endpoint = AZURE_ENDPOINT.to_owned();
            params.identity = read_key(secret, "AccountName")?;
            params.secret = read_key(secret, "AccountKey")?;
        }
        StoreKind::GoogleCloudStorage(_) => {
            let json = read_key(secret, "GoogleServiceAccountPrivateKeyJson")?;
            let parsed: serde_json::Value = serde_json::from_str(&json).map_err(|e| {
                Error::persistent("InvalidSecret", format!("invalid service account json: {e}"))
            })?;
            params.endpoint = GOOGLE_ENDPOINT.to_owned();
            params.identity = parsed
                .get("private_key_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned();
            params.secret = json;
        }
        StoreKind::PvPool(_) | StoreKind::Nsfs(_) => {
            return Err(Error::persistent(
                "InvalidConnectionParams",
                format!("{} stores have no external connection", kind.store_type()),
            ));
        }
    }

    Ok(params)
}

/// What has to happen to obtain a usable connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionPlan {
    Reuse(String),
    Update(UpdateExternalConnectionParams),
    Add(ExternalConnectionParams),
}

pub fn plan_connection(system: &SystemInfo, params: &ExternalConnectionParams) -> ConnectionPlan {
    let digest = secret_digest(&params.secret);
    let update = |name: &str| {
        ConnectionPlan::Update(UpdateExternalConnectionParams {
            name: name.to_owned(),
            identity: params.identity.clone(),
            secret: params.secret.clone(),
        })
    };

    let matching = system.external_connections.iter().find(|c| {
        c.endpoint_type == params.endpoint_type
            && c.endpoint == params.endpoint
            && c.identity == params.identity
    });
    if let Some(conn) = matching {
        return match conn.secret_digest.as_deref() {
            Some(d) if d != digest => update(&conn.name),
            _ => ConnectionPlan::Reuse(conn.name.clone()),
        };
    }

    if system
        .external_connections
        .iter()
        .any(|c| c.name == params.name)
    {
        return update(&params.name);
    }

    ConnectionPlan::Add(params.clone())
}

/// Maps a `CheckExternalConnection` reply onto the error taxonomy.
pub fn check_result(meta: &ObjectMeta, reply: &CheckExternalConnectionReply) -> Result<(), Error> {
    let detail = reply
        .error
        .as_ref()
        .map(|e| format!("{}: {}", e.code, e.message))
        .unwrap_or_default();
    let message = format!("external connection check returned {} {detail}", reply.status)
        .trim_end()
        .to_owned();

    match reply.status.as_str() {
        "SUCCESS" => Ok(()),
        "INVALID_CREDENTIALS" | "INVALID_ENDPOINT" => {
            Err(escalate_after_grace(meta, reply.status.clone(), message))
        }
        "TIME_SKEW" | "NOT_SUPPORTED" | "NOT_EXIST" => {
            Err(Error::persistent(reply.status.clone(), message))
        }
        _ => Err(Error::transient(reply.status.clone(), message)),
    }
}

/// Loads and checks the credentials secret a store kind refers to.
///
/// A missing secret is retried during the creation grace period.
pub async fn load_secret(
    ctx: &Context,
    meta: &ObjectMeta,
    kind: &StoreKind<'_>,
) -> Result<Option<corev1::Secret>, Error> {
    let Some(reference) = kind.secret() else {
        return Ok(None);
    };
    let name = reference.name.as_deref().unwrap_or_default();
    let namespace = reference
        .namespace
        .as_deref()
        .or(meta.namespace.as_deref())
        .unwrap_or_default();
    let Some(secret) = ctx.get_opt::<corev1::Secret>(name, namespace).await? else {
        return Err(escalate_after_grace(
            meta,
            "MissingSecret",
            format!("secret {namespace}/{name} does not exist"),
        ));
    };
    validate_secret_keys(kind.store_type(), &secret)?;
    Ok(Some(secret))
}

/// Checks the connection and then adds, updates or reuses it; returns its name.
pub async fn ensure_connection(
    api: &dyn NoobaaApi,
    meta: &ObjectMeta,
    system: &SystemInfo,
    params: ExternalConnectionParams,
) -> Result<String, Error> {
    let reply = api.check_external_connection(params.clone()).await?;
    check_result(meta, &reply)?;

    match plan_connection(system, &params) {
        ConnectionPlan::Reuse(name) => {
            debug!(connection = %name, "reusing external connection");
            Ok(name)
        }
        ConnectionPlan::Update(update) => {
            info!(connection = %update.name, "updating external connection credentials");
            let name = update.name.clone();
            api.update_external_connection(update).await?;
            Ok(name)
        }
        ConnectionPlan::Add(add) => {
            info!(connection = %add.name, endpoint = %add.endpoint, "adding external connection");
            let name = add.name.clone();
            api.add_external_connection(add).await?;
            Ok(name)
        }
    }
}

/// Which kind of managed-system resource a store is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    Pool,
    NamespaceResource,
}

fn in_use(err: rpc::Error, resource: &str) -> Error {
    match err.classify() {
        Classified::InUse | Classified::ConnectedBucketDeleting => Error::transient(
            err.code().unwrap_or_default().to_owned(),
            format!("{resource} is still in use, delete its dependents first"),
        ),
        _ => err.into(),
    }
}

/// A store the managed system marks undeletable holds its finalizer until the marker clears.
pub fn deletion_blocked(err: validation::Error) -> Error {
    Error::transient("DeletionBlocked", err.message())
}

/// Deletes a store's managed-system resource and its connection when unused.
///
/// Accounts that default to the resource are first moved to the internal pool.
pub async fn teardown(api: &dyn NoobaaApi, resource: &str, kind: RemoteKind) -> Result<(), Error> {
    let system = api.read_system().await?;

    let dependents: Vec<String> = system
        .accounts_defaulting_to(resource)
        .map(|a| a.email.clone())
        .collect();
    if !dependents.is_empty() {
        let internal = system
            .internal_pool()
            .map(|p| p.name.clone())
            .ok_or_else(|| {
                Error::transient(
                    "MissingInternalPool",
                    format!("no {POOL_TYPE_INTERNAL} pool to rebind accounts of {resource}"),
                )
            })?;
        for email in dependents {
            info!(account = %email, from = %resource, to = %internal, "rebinding account default resource");
            api.update_account_s3_access(UpdateAccountS3AccessParams {
                email,
                s3_access: true,
                default_resource: Some(internal.clone()),
                ..Default::default()
            })
            .await?;
        }
    }

    let connection = match kind {
        RemoteKind::Pool => system
            .pool(resource)
            .and_then(|p| p.cloud_info.as_ref())
            .and_then(|c| c.connection_name.clone()),
        RemoteKind::NamespaceResource => system
            .namespace_resource(resource)
            .and_then(|r| r.connection_name.clone()),
    };

    let deleted = match kind {
        RemoteKind::Pool => api.delete_pool(resource).await,
        RemoteKind::NamespaceResource => api.delete_namespace_resource(resource).await,
    };
    rpc::ignore_no_such(deleted).map_err(|e| in_use(e, resource))?;

    if let Some(connection) = connection
        && !system.connection_in_use(&connection, resource)
    {
        info!(%connection, "deleting unused external connection");
        rpc::ignore_no_such(api.delete_external_connection(&connection).await)?;
    }

    Ok(())
}
