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


//! Validating admission webhook.
//!
//! Decodes the admission review, dispatches on resource and operation, and
//! answers with the first validation failure verbatim. Nothing is mutated.

use crate::config::{OperatorConfig, WebhookConfig};
use crate::context::{self, Context};
use crate::rpc::{self, types::SystemInfo};
use crate::types::v1alpha1::account::NooBaaAccount;
use crate::types::v1alpha1::backingstore::BackingStore;
use crate::types::v1alpha1::bucketclass::BucketClass;
use crate::types::v1alpha1::namespacestore::NamespaceStore;
use crate::types::v1alpha1::noobaa::NooBaa;
use crate::utils::signal::shutdown_signal;
use crate::utils::tls;
use crate::validation;
use async_trait::async_trait;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Set on hand-deployed installs; selects the certificate location.
pub const CLI_DEPLOYMENT_ENV: &str = "NOOBAA_CLI_DEPLOYMENT";

const CLI_CERT_DIR: &str = "/etc/certs";
const OLM_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_PENDING_HANDSHAKES: usize = 256;
const HANDSHAKE_BACKLOG: usize = 64;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Validation { source: validation::Error },

    #[snafu(display("decode {kind}: {source}"))]
    Decode {
        kind: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("request for {kind} carries no object"))]
    MissingObject { kind: &'static str },

    #[snafu(display("lookup failed: {source}"))]
    Lookup { source: context::Error },

    #[snafu(display("failed to read the system: {source}"))]
    ReadSystem { source: rpc::Error },

    #[snafu(display("kube client: {source}"))]
    Client { source: kube::Error },

    #[snafu(display("load certificate: {source}"))]
    Certificate { source: tls::Error },

    #[snafu(display("bind port {port}: {source}"))]
    Bind { port: u16, source: std::io::Error },

    #[snafu(display("serve: {source}"))]
    Serve { source: std::io::Error },

    #[snafu(display("server task: {source}"))]
    Join { source: tokio::task::JoinError },
}

impl Error {
    /// Text returned to the API client when the request is denied.
    pub fn denial_message(&self) -> String {
        match self {
            Error::Validation { source } => source.message().to_owned(),
            other => other.to_string(),
        }
    }
}

/// Cluster state the validators need beyond the request itself.
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    async fn namespace_stores(&self, namespace: &str) -> Result<Vec<NamespaceStore>, Error>;

    /// `None` while no system is reachable in `namespace`.
    async fn system_info(&self, namespace: &str) -> Result<Option<SystemInfo>, Error>;
}

pub struct KubeBackend {
    ctx: Context,
}

impl KubeBackend {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl AdmissionBackend for KubeBackend {
    async fn namespace_stores(&self, namespace: &str) -> Result<Vec<NamespaceStore>, Error> {
        self.ctx.list(namespace).await.context(LookupSnafu)
    }

    async fn system_info(&self, namespace: &str) -> Result<Option<SystemInfo>, Error> {
        let Some(rpc) = self.ctx.rpc(namespace).await.context(LookupSnafu)? else {
            return Ok(None);
        };
        rpc.read_system().await.context(ReadSystemSnafu).map(Some)
    }
}

#[derive(Clone)]
struct AppState {
    backend: Arc<dyn AdmissionBackend>,
    namespace: String,
}

pub fn router(backend: Arc<dyn AdmissionBackend>, namespace: impl Into<String>) -> Router {
    let state = AppState {
        backend,
        namespace: namespace.into(),
    };
    Router::new()
        .route("/validate", post(validate))
        .route("/healthz", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn validate(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            warn!(error = %err, "invalid admission review");
            return Json(AdmissionResponse::invalid(err.to_string()).into_review());
        }
    };

    let response = AdmissionResponse::from(&req);
    let namespace = req.namespace.as_deref().unwrap_or(&state.namespace);
    let response = match admit(state.backend.as_ref(), namespace, &req).await {
        Ok(()) => {
            debug!(resource = %req.resource.resource, name = %req.name, "allowed");
            response
        }
        Err(err) => {
            info!(
                resource = %req.resource.resource,
                name = %req.name,
                op = ?req.operation,
                error = %err,
                "denied"
            );
            response.deny(err.denial_message())
        }
    };
    Json(response.into_review())
}

fn decode<T: DeserializeOwned>(
    kind: &'static str,
    obj: Option<&DynamicObject>,
) -> Result<T, Error> {
    let obj = obj.ok_or(Error::MissingObject { kind })?;
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .context(DecodeSnafu { kind })
}

async fn admit(
    backend: &dyn AdmissionBackend,
    namespace: &str,
    req: &AdmissionRequest<DynamicObject>,
) -> Result<(), Error> {
    let new = req.object.as_ref();
    let old = req.old_object.as_ref();

    match (req.resource.resource.as_str(), &req.operation) {
        ("noobaas", Operation::Delete) => {
            validation::system::validate_delete(&decode::<NooBaa>("NooBaa", old)?)?
        }
        ("noobaas", Operation::Create | Operation::Update) => {
            validation::system::validate(&decode::<NooBaa>("NooBaa", new)?)?
        }

        ("backingstores", Operation::Create) => {
            validation::backingstore::validate(&decode::<BackingStore>("BackingStore", new)?)?
        }
        ("backingstores", Operation::Update) => validation::backingstore::validate_update(
            &decode::<BackingStore>("BackingStore", new)?,
            &decode::<BackingStore>("BackingStore", old)?,
        )?,
        ("backingstores", Operation::Delete) => {
            let bs = decode::<BackingStore>("BackingStore", old)?;
            if let Some(system) = backend.system_info(namespace).await? {
                validation::backingstore::validate_delete(&bs, &system)?;
            }
        }

        ("namespacestores", Operation::Create) => {
            validation::namespacestore::validate(&decode::<NamespaceStore>("NamespaceStore", new)?)?
        }
        ("namespacestores", Operation::Update) => validation::namespacestore::validate_update(
            &decode::<NamespaceStore>("NamespaceStore", new)?,
            &decode::<NamespaceStore>("NamespaceStore", old)?,
        )?,
        ("namespacestores", Operation::Delete) => {
            let nss = decode::<NamespaceStore>("NamespaceStore", old)?;
            if let Some(system) = backend.system_info(namespace).await? {
                validation::namespacestore::validate_delete(&nss, &system)?;
            }
        }

        ("bucketclasses", Operation::Create) => {
            let bc = decode::<BucketClass>("BucketClass", new)?;
            let stores = backend.namespace_stores(namespace).await?;
            validation::bucketclass::validate(&bc, &stores)?;
        }
        ("bucketclasses", Operation::Update) => {
            let bc = decode::<BucketClass>("BucketClass", new)?;
            let old = decode::<BucketClass>("BucketClass", old)?;
            let stores = backend.namespace_stores(namespace).await?;
            validation::bucketclass::validate_update(&bc, &old, &stores)?;
        }

        ("noobaaaccounts", Operation::Create) => {
            validation::account::validate(&decode::<NooBaaAccount>("NooBaaAccount", new)?)?
        }
        ("noobaaaccounts", Operation::Update) => validation::account::validate_update(
            &decode::<NooBaaAccount>("NooBaaAccount", new)?,
            &decode::<NooBaaAccount>("NooBaaAccount", old)?,
        )?,

        _ => {}
    }
    Ok(())
}

/// Certificate and key paths for this deployment flavour.
pub fn cert_paths(cli_deployment: bool) -> (PathBuf, PathBuf) {
    if cli_deployment {
        (
            PathBuf::from(CLI_CERT_DIR).join("tls.cert"),
            PathBuf::from(CLI_CERT_DIR).join("tls.key"),
        )
    } else {
        (
            PathBuf::from(OLM_CERT_DIR).join("tls.crt"),
            PathBuf::from(OLM_CERT_DIR).join("tls.key"),
        )
    }
}

/// TCP listener whose TLS handshakes run in their own tasks, so a client
/// that stalls its handshake never holds up the next connection.
struct TlsListener {
    incoming: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
    acceptor_task: JoinHandle<()>,
}

impl TlsListener {
    fn new(inner: TcpListener, acceptor: TlsAcceptor) -> std::io::Result<Self> {
        let local_addr = inner.local_addr()?;
        let (tx, incoming) = mpsc::channel(HANDSHAKE_BACKLOG);
        let acceptor_task = tokio::spawn(accept_loop(inner, acceptor, tx));
        Ok(TlsListener {
            incoming,
            local_addr,
            acceptor_task,
        })
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        self.acceptor_task.abort();
    }
}

async fn accept_loop(
    inner: TcpListener,
    acceptor: TlsAcceptor,
    tx: mpsc::Sender<(TlsStream<TcpStream>, SocketAddr)>,
) {
    let handshakes = Arc::new(Semaphore::new(MAX_PENDING_HANDSHAKES));
    while !tx.is_closed() {
        let (stream, addr) = match inner.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let Ok(permit) = handshakes.clone().acquire_owned().await else {
            return;
        };
        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(tls)) => {
                    if tx.send((tls, addr)).await.is_err() {
                        debug!(%addr, "listener closed before the connection was served");
                    }
                }
                Ok(Err(err)) => debug!(%addr, error = %err, "tls handshake failed"),
                Err(_) => debug!(%addr, "tls handshake timed out"),
            }
        });
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.incoming.recv().await {
            Some(accepted) => accepted,
            // the accept loop only stops once this listener is dropped
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// Serves `POST /validate` over TLS until SIGINT/SIGTERM, then drains for a bounded time.
pub async fn serve(config: WebhookConfig) -> Result<(), Error> {
    let client = kube::Client::try_default().await.context(ClientSnafu)?;
    let operator = OperatorConfig {
        namespace: config.namespace.clone(),
        ..Default::default()
    };
    let backend = KubeBackend::new(Context::new(client, Arc::new(operator)));

    let (cert, key) = cert_paths(std::env::var_os(CLI_DEPLOYMENT_ENV).is_some());
    let tls_config = tls::server_config_from_files(&cert, &key)
        .await
        .context(CertificateSnafu)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TlsListener::new(
        TcpListener::bind(addr)
            .await
            .context(BindSnafu { port: config.port })?,
        TlsAcceptor::from(Arc::new(tls_config)),
    )
    .context(BindSnafu { port: config.port })?;
    info!(%addr, cert = %cert.display(), "admission webhook listening");

    let shutdown = CancellationToken::new();
    let app = router(Arc::new(backend), config.namespace);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let mut handle = tokio::spawn(server.into_future());

    tokio::select! {
        joined = &mut handle => return joined.context(JoinSnafu)?.context(ServeSnafu),
        _ = shutdown_signal() => {}
    }

    shutdown.cancel();
    match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
        Ok(joined) => joined.context(JoinSnafu)?.context(ServeSnafu),
        Err(_) => {
            warn!(timeout = ?DRAIN_TIMEOUT, "drain timed out, dropping open connections");
            Ok(())
        }
    }
}
