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


use crate::config::{OperatorConfig, WebhookConfig};
use crate::context::Context;
use crate::controller::discovery::{self, Mapper};
use crate::controller::leader::{self, LeaderElector};
use crate::types::v1alpha1::account::NooBaaAccount;
use crate::types::v1alpha1::backingstore::BackingStore;
use crate::types::v1alpha1::bucketclass::BucketClass;
use crate::types::v1alpha1::namespacestore::NamespaceStore;
use crate::types::v1alpha1::noobaa::NooBaa;
use kube::{Client, CustomResourceExt};
use snafu::{ResultExt, Snafu};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod config;
mod context;
pub mod controller;
pub mod kms;
pub mod provisioner;
pub mod reconcile;
pub mod rpc;
pub mod types;
pub mod utils;
pub mod validation;
pub mod webhook;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("kube client: {source}"))]
    Client { source: kube::Error },

    #[snafu(transparent)]
    Discovery { source: discovery::Error },

    #[snafu(transparent)]
    Leader { source: leader::Error },

    #[snafu(transparent)]
    Webhook { source: webhook::Error },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();
}

/// Runs the controllers while this replica holds the leader lease.
///
/// Returns an error when the lease is lost so the process exits and a
/// fresh replica takes over.
pub async fn run(config: OperatorConfig) -> Result<(), Error> {
    init_tracing();
    info!(namespace = %config.namespace, identity = %config.identity, "starting operator");

    let client = Client::try_default().await.context(ClientSnafu)?;

    let mut mapper = Mapper::new(client.clone()).await?;
    mapper.ensure(&discovery::required_kinds()).await?;
    let capabilities = mapper.capabilities();
    info!(?capabilities, "api discovery complete");

    let elector = LeaderElector::new(
        client.clone(),
        &config.namespace,
        &config.lease_name,
        &config.identity,
    );
    elector.acquire().await?;

    let ctx = Arc::new(Context::new(client, Arc::new(config)).with_capabilities(capabilities));
    let shutdown = CancellationToken::new();

    let signal = {
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = utils::signal::shutdown_signal() => shutdown.cancel(),
                _ = shutdown.cancelled() => {}
            }
        }
    };
    let controllers = {
        let shutdown = shutdown.clone();
        async move {
            controller::run(ctx, shutdown.clone()).await;
            shutdown.cancel();
        }
    };

    let (held, (), ()) = tokio::join!(elector.hold(shutdown), controllers, signal);
    held?;

    info!("operator stopped");
    Ok(())
}

/// Runs the admission webhook server.
pub async fn run_webhook(config: WebhookConfig) -> Result<(), Error> {
    init_tracing();
    info!(port = config.port, "starting admission webhook");
    webhook::serve(config).await?;
    Ok(())
}

/// Every noobaa.io CRD as a multi-document YAML stream.
pub fn crd_yaml() -> Result<String, serde_yaml_ng::Error> {
    let docs = [
        serde_yaml_ng::to_string(&NooBaa::crd())?,
        serde_yaml_ng::to_string(&BackingStore::crd())?,
        serde_yaml_ng::to_string(&NamespaceStore::crd())?,
        serde_yaml_ng::to_string(&BucketClass::crd())?,
        serde_yaml_ng::to_string(&NooBaaAccount::crd())?,
    ];
    Ok(docs.join("---\n"))
}

pub async fn crd(file: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    writer.write_all(crd_yaml()?.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}
