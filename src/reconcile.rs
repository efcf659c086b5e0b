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

//! Reconciler template shared by every resource kind.
//!
//! Each kind implements [`Reconciler`]; [`reconcile`] drives the common
//! steps: load the latest object, run the deletion path or ensure the
//! finalizer, apply the phases, classify the outcome into status and the
//! next [`Action`].

use crate::context::{self, Context};
use crate::types::v1alpha1::condition::{Condition, set_available, set_degraded, set_progressing};
use crate::types::{self, has_finalizer, is_deleting};
use crate::utils::time;
use crate::{kms, provisioner, rpc, validation};
use async_trait::async_trait;
use futures::FutureExt;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::Snafu;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod account;
pub mod backingstore;
pub mod bucketclaim;
pub mod bucketclass;
pub mod connection;
pub mod namespacestore;
pub mod system;

/// Delay before retrying a transient failure.
pub const TRANSIENT_REQUEUE: Duration = Duration::from_secs(3);

/// Window after creation during which credential and endpoint failures are retried.
pub const CREATION_GRACE: chrono::Duration = chrono::Duration::minutes(5);

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(transparent)]
    Validation { source: validation::Error },

    #[snafu(transparent)]
    Rpc { source: rpc::Error },

    #[snafu(transparent)]
    Kms { source: kms::Error },

    #[snafu(transparent)]
    Provisioner { source: provisioner::Error },

    #[snafu(display("{reason}: {message}"))]
    Persistent { reason: String, message: String },

    #[snafu(display("{reason}: {message}"))]
    Transient { reason: String, message: String },

    #[snafu(display("reconcile panicked: {message}"))]
    Panicked { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Validation,
    Persistent,
    Transient,
}

impl Error {
    pub fn persistent(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Persistent {
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn transient(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transient {
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Error::Validation { source } => match source {
                validation::Error::Invalid { .. } => Severity::Validation,
                validation::Error::Persistent { .. } => Severity::Persistent,
                validation::Error::Transient { .. } => Severity::Transient,
            },
            Error::Types { .. } | Error::Persistent { .. } => Severity::Persistent,
            Error::Kms { source } if source.is_persistent() => Severity::Persistent,
            Error::Provisioner { source } if source.is_persistent() => Severity::Persistent,
            _ => Severity::Transient,
        }
    }

    /// Short machine-readable reason used for conditions and events.
    pub fn reason(&self) -> String {
        match self {
            Error::Validation { source } => match source {
                validation::Error::Invalid { .. } => "ValidationFailed".to_owned(),
                validation::Error::Persistent { reason, .. }
                | validation::Error::Transient { reason, .. } => reason.clone(),
            },
            Error::Persistent { reason, .. } | Error::Transient { reason, .. } => reason.clone(),
            Error::Rpc { source } => source
                .code()
                .map(str::to_owned)
                .unwrap_or_else(|| "RpcError".to_owned()),
            Error::Context { .. } => "KubernetesError".to_owned(),
            Error::Types { .. } => "InvalidObject".to_owned(),
            Error::Kms { .. } => "KMSError".to_owned(),
            Error::Provisioner { .. } => "ProvisionerError".to_owned(),
            Error::Panicked { .. } => "Panicked".to_owned(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Error::Validation { source } => source.message().to_owned(),
            Error::Persistent { message, .. } | Error::Transient { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Transient while `meta` is younger than [`CREATION_GRACE`], persistent afterwards.
pub fn escalate_after_grace(
    meta: &kube::api::ObjectMeta,
    reason: impl Into<String>,
    message: impl Into<String>,
) -> Error {
    if time::age(meta) < CREATION_GRACE {
        Error::transient(reason, message)
    } else {
        Error::persistent(reason, message)
    }
}

/// Result of a successful pass over the phases.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Everything converged; optionally re-sync after the given delay.
    Ready { resync: Option<Duration> },

    /// Progressing normally but not yet converged; the phase is left as set.
    Waiting {
        reason: String,
        message: String,
        requeue: Duration,
    },
}

impl Outcome {
    pub fn ready() -> Self {
        Outcome::Ready { resync: None }
    }

    pub fn waiting(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Outcome::Waiting {
            reason: reason.into(),
            message: message.into(),
            requeue: TRANSIENT_REQUEUE,
        }
    }
}

/// Status subresource shape common to every kind.
pub trait ObjectStatus: Default + Clone + Debug + Serialize + Send + Sync {
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
    fn mark_ready(&mut self);
    fn mark_rejected(&mut self);
    fn set_observed_generation(&mut self, generation: Option<i64>);
}

#[async_trait]
pub trait Reconciler:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    type Status: ObjectStatus;

    const FINALIZER: &'static str = types::v1alpha1::FINALIZER;

    fn status(&self) -> Option<&Self::Status>;

    /// Whether this operator is responsible for the object at all.
    async fn is_managed(&self, _ctx: &Context) -> Result<bool, Error> {
        Ok(true)
    }

    /// Runs the phases in order; the first error stops the sequence.
    async fn apply(&self, ctx: &Context, status: &mut Self::Status) -> Result<Outcome, Error>;

    /// Releases everything the object holds; the finalizer is removed on success.
    async fn finalize(&self, ctx: &Context) -> Result<(), Error>;
}

async fn guarded<T, F>(fut: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>> + Send,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            Err(Error::Panicked { message })
        }
    }
}

/// Applies the outcome of a pass to `status` and picks the next action.
pub fn classify<S: ObjectStatus>(status: &mut S, result: &Result<Outcome, Error>) -> Action {
    match result {
        Ok(Outcome::Ready { resync }) => {
            status.mark_ready();
            set_available(status.conditions_mut(), "Ready", "resource is ready");
            resync.map(Action::requeue).unwrap_or_else(Action::await_change)
        }
        Ok(Outcome::Waiting {
            reason,
            message,
            requeue,
        }) => {
            set_progressing(status.conditions_mut(), reason, message);
            Action::requeue(*requeue)
        }
        Err(e) => match e.severity() {
            Severity::Validation | Severity::Persistent => {
                status.mark_rejected();
                set_degraded(status.conditions_mut(), &e.reason(), &e.message());
                Action::await_change()
            }
            Severity::Transient => {
                set_progressing(status.conditions_mut(), &e.reason(), &e.message());
                Action::requeue(TRANSIENT_REQUEUE)
            }
        },
    }
}

pub async fn reconcile<K: Reconciler>(obj: Arc<K>, ctx: Arc<Context>) -> Result<Action, Error> {
    let ns = obj.namespace().ok_or(types::error::Error::NoNamespace)?;
    let name = obj.name_any();
    let Some(latest) = ctx.get_opt::<K>(&name, &ns).await? else {
        debug!(kind = %K::kind(&()), %name, "object is gone");
        return Ok(Action::await_change());
    };

    if is_deleting(&latest) {
        if !has_finalizer(&latest, K::FINALIZER) {
            return Ok(Action::await_change());
        }
        info!(kind = %K::kind(&()), %name, "finalizing");
        guarded(latest.finalize(&ctx)).await?;
        ctx.remove_finalizer(&latest, K::FINALIZER).await?;
        info!(kind = %K::kind(&()), %name, "finalized");
        return Ok(Action::await_change());
    }

    if !latest.is_managed(&ctx).await? {
        debug!(kind = %K::kind(&()), %name, "not managed by this operator");
        return Ok(Action::await_change());
    }

    let latest = ctx.add_finalizer(&latest, K::FINALIZER).await?;

    let mut status = latest.status().cloned().unwrap_or_default();
    let result = guarded(latest.apply(&ctx, &mut status)).await;
    let action = classify(&mut status, &result);

    if let Err(e) = &result {
        match e.severity() {
            Severity::Transient => {
                warn!(kind = %K::kind(&()), %name, reason = %e.reason(), "{}", e.message());
            }
            Severity::Validation | Severity::Persistent => {
                error!(kind = %K::kind(&()), %name, reason = %e.reason(), "{}", e.message());
                ctx.record(&latest, EventType::Warning, &e.reason(), &e.message())
                    .await?;
            }
        }
    }

    status.set_observed_generation(latest.meta().generation);
    ctx.patch_status(&latest, &status).await?;

    Ok(action)
}

/// Requeue policy for errors that escaped [`reconcile`].
pub fn error_policy<K: Reconciler>(obj: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    match error.severity() {
        Severity::Transient => {
            warn!(kind = %K::kind(&()), name = %obj.name_any(), "reconcile failed: {}", error);
            Action::requeue(TRANSIENT_REQUEUE)
        }
        Severity::Validation | Severity::Persistent => {
            error!(kind = %K::kind(&()), name = %obj.name_any(), "reconcile failed: {}", error);
            Action::await_change()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::v1alpha1::backingstore::BackingStoreStatus;
    use crate::types::v1alpha1::condition::{ConditionStatus, ConditionType, find_condition};
    use crate::types::v1alpha1::phase::Phase;

    fn condition(status: &BackingStoreStatus, type_: ConditionType) -> ConditionStatus {
        find_condition(&status.conditions, type_).unwrap().status
    }

    #[test]
    fn test_persistent_error_rejects() {
        let mut status = BackingStoreStatus {
            phase: Phase::Connecting,
            ..Default::default()
        };
        let action = classify(
            &mut status,
            &Err(Error::persistent("InvalidSecret", "secret is missing keys")),
        );
        assert_eq!(action, Action::await_change());
        assert_eq!(status.phase, Phase::Rejected);
        assert_eq!(condition(&status, ConditionType::Degraded), ConditionStatus::True);
    }

    #[test]
    fn test_transient_error_keeps_phase() {
        let mut status = BackingStoreStatus {
            phase: Phase::Connecting,
            ..Default::default()
        };
        let action = classify(
            &mut status,
            &Err(Error::transient("TIMEOUT", "endpoint did not answer")),
        );
        assert_eq!(action, Action::requeue(TRANSIENT_REQUEUE));
        assert_eq!(status.phase, Phase::Connecting);
        let progressing = find_condition(&status.conditions, ConditionType::Progressing).unwrap();
        assert_eq!(progressing.status, ConditionStatus::True);
        assert_eq!(progressing.message, "endpoint did not answer");
    }

    #[test]
    fn test_validation_error_rejects() {
        let mut status = BackingStoreStatus::default();
        let err: Error = validation::Error::invalid("bad spec").into();
        assert_eq!(err.severity(), Severity::Validation);
        classify(&mut status, &Err(err));
        assert_eq!(status.phase, Phase::Rejected);
    }

    #[test]
    fn test_ready_sets_phase_and_resync() {
        let mut status = BackingStoreStatus::default();
        let action = classify(
            &mut status,
            &Ok(Outcome::Ready {
                resync: Some(Duration::from_secs(60)),
            }),
        );
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
        assert_eq!(status.phase, Phase::Ready);
        assert_eq!(condition(&status, ConditionType::Available), ConditionStatus::True);
    }

    #[test]
    fn test_rpc_errors_are_transient() {
        let err: Error = rpc::Error::Remote {
            api: "pool_api".to_string(),
            method: "create_hosts_pool".to_string(),
            code: "INTERNAL".to_string(),
            message: "boom".to_string(),
        }
        .into();
        assert_eq!(err.severity(), Severity::Transient);
        assert_eq!(err.reason(), "INTERNAL");
    }

    fn explode() -> Result<(), Error> {
        panic!("bad state")
    }

    #[tokio::test]
    async fn test_panics_become_transient() {
        let res = guarded(async { explode() }).await;
        let err = res.unwrap_err();
        assert!(matches!(err, Error::Panicked { ref message } if message == "bad state"));
        assert_eq!(err.severity(), Severity::Transient);
    }
}
