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


//! Lease-based leader election.
//!
//! One operator replica holds the `coordination.k8s.io` Lease and runs the
//! controllers. Writes go through `replace`, so the Lease's resourceVersion
//! serializes competing replicas. A holder that cannot renew within the
//! lease duration gives up, since another replica may already have taken over.

use crate::utils::time::{from_micro_time, to_micro_time};
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use snafu::{ResultExt, Snafu};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const LEASE_DURATION_SECONDS: i32 = 15;
pub const RENEW_INTERVAL: Duration = Duration::from_secs(5);

const LEASE_DURATION: Duration = Duration::from_secs(LEASE_DURATION_SECONDS as u64);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("read lease {name}: {source}"))]
    Read { name: String, source: kube::Error },

    #[snafu(display("lost lease {name}{}", holder.as_ref().map(|h| format!(" to {h}")).unwrap_or_default()))]
    Lost { name: String, holder: Option<String> },
}

#[derive(Debug, PartialEq, Eq)]
enum Decision {
    Renew,
    Acquire,
    Wait { holder: String },
}

/// What to do with the lease as it stands at `now`.
fn decide(spec: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> Decision {
    let Some(spec) = spec else {
        return Decision::Acquire;
    };
    let holder = spec.holder_identity.as_deref().unwrap_or_default();
    if holder == identity {
        return Decision::Renew;
    }
    if holder.is_empty() {
        return Decision::Acquire;
    }

    let duration = chrono::Duration::seconds(i64::from(
        spec.lease_duration_seconds.unwrap_or(LEASE_DURATION_SECONDS),
    ));
    match spec.renew_time.as_ref().and_then(from_micro_time) {
        Some(renewed) if now - renewed < duration => Decision::Wait {
            holder: holder.to_owned(),
        },
        _ => Decision::Acquire,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Attempt {
    Held,
    HeldBy(String),
    Rejected,
}

pub struct LeaderElector {
    api: Api<Lease>,
    name: String,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: kube::Client, namespace: &str, name: &str, identity: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            identity: identity.to_owned(),
        }
    }

    fn spec(&self, now: DateTime<Utc>, acquired: Option<&LeaseSpec>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
            acquire_time: acquired
                .and_then(|s| s.acquire_time.clone())
                .or_else(|| to_micro_time(now)),
            renew_time: to_micro_time(now),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }

    async fn attempt(&self) -> Result<Attempt, Error> {
        let now = Utc::now();
        let existing = self
            .api
            .get_opt(&self.name)
            .await
            .context(ReadSnafu { name: &self.name })?;

        let Some(lease) = existing else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.name.clone()),
                    namespace: Some(self.namespace.clone()),
                    ..Default::default()
                },
                spec: Some(self.spec(now, None, 0)),
            };
            return Ok(match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Attempt::Held,
                Err(err) => {
                    debug!(lease = %self.name, error = %err, "lease create rejected");
                    Attempt::Rejected
                }
            });
        };

        let current = lease.spec.as_ref();
        let spec = match decide(current, &self.identity, now) {
            Decision::Wait { holder } => return Ok(Attempt::HeldBy(holder)),
            Decision::Renew => self.spec(now, current, current.and_then(|s| s.lease_transitions).unwrap_or(0)),
            Decision::Acquire => {
                let transitions = current.and_then(|s| s.lease_transitions).unwrap_or(0);
                self.spec(now, None, transitions + 1)
            }
        };

        let mut updated = lease.clone();
        updated.spec = Some(spec);
        Ok(match self.api.replace(&self.name, &PostParams::default(), &updated).await {
            Ok(_) => Attempt::Held,
            Err(err) => {
                debug!(lease = %self.name, error = %err, "lease update rejected");
                Attempt::Rejected
            }
        })
    }

    /// Blocks until this replica holds the lease.
    pub async fn acquire(&self) -> Result<(), Error> {
        let mut announced = false;
        loop {
            match self.attempt().await? {
                Attempt::Held => {
                    info!(lease = %self.name, identity = %self.identity, "became leader");
                    return Ok(());
                }
                Attempt::HeldBy(holder) if !announced => {
                    info!(lease = %self.name, %holder, "waiting for leadership");
                    announced = true;
                }
                _ => {}
            }
            tokio::time::sleep(RENEW_INTERVAL).await;
        }
    }

    /// Renews the lease until `cancel` fires. On loss, cancels `cancel` and returns [`Error::Lost`].
    pub async fn hold(&self, cancel: CancellationToken) -> Result<(), Error> {
        let mut renewed_at = Instant::now();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.release().await;
                    return Ok(());
                }
                _ = tokio::time::sleep(RENEW_INTERVAL) => {}
            }

            match self.attempt().await {
                Ok(Attempt::Held) => renewed_at = Instant::now(),
                Ok(Attempt::HeldBy(holder)) => {
                    cancel.cancel();
                    return LostSnafu {
                        name: &self.name,
                        holder: Some(holder),
                    }
                    .fail();
                }
                Ok(Attempt::Rejected) => warn!(lease = %self.name, "lease renewal rejected"),
                Err(err) => warn!(lease = %self.name, error = %err, "lease renewal failed"),
            }

            if renewed_at.elapsed() >= LEASE_DURATION {
                cancel.cancel();
                return LostSnafu {
                    name: &self.name,
                    holder: None::<String>,
                }
                .fail();
            }
        }
    }

    /// Clears the holder so a standby takes over without waiting for expiry.
    async fn release(&self) {
        let Ok(Some(mut lease)) = self.api.get_opt(&self.name).await else {
            return;
        };
        let Some(spec) = lease.spec.as_mut() else {
            return;
        };
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            return;
        }
        spec.holder_identity = None;
        match self.api.replace(&self.name, &PostParams::default(), &lease).await {
            Ok(_) => info!(lease = %self.name, "released leadership"),
            Err(err) => debug!(lease = %self.name, error = %err, "lease release failed"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed: DateTime<Utc>) -> LeaseSpec {
        LeaseSpec {
            holder_identity: holder.map(str::to_owned),
            lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
            renew_time: to_micro_time(renewed),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_or_released_lease_is_acquired() {
        let now = Utc::now();
        assert_eq!(decide(None, "me", now), Decision::Acquire);
        assert_eq!(decide(Some(&lease(None, now)), "me", now), Decision::Acquire);
    }

    #[test]
    fn test_own_lease_is_renewed() {
        let now = Utc::now();
        let spec = lease(Some("me"), now - chrono::Duration::seconds(60));
        assert_eq!(decide(Some(&spec), "me", now), Decision::Renew);
    }

    #[test]
    fn test_live_foreign_lease_waits() {
        let now = Utc::now();
        let spec = lease(Some("other"), now - chrono::Duration::seconds(5));
        assert_eq!(
            decide(Some(&spec), "me", now),
            Decision::Wait {
                holder: "other".to_owned()
            }
        );
    }

    #[test]
    fn test_expired_foreign_lease_is_taken_over() {
        let now = Utc::now();
        let spec = lease(Some("other"), now - chrono::Duration::seconds(16));
        assert_eq!(decide(Some(&spec), "me", now), Decision::Acquire);

        let never_renewed = LeaseSpec {
            holder_identity: Some("other".to_owned()),
            ..Default::default()
        };
        assert_eq!(decide(Some(&never_renewed), "me", now), Decision::Acquire);
    }

    #[test]
    fn test_renew_interval_fits_lease() {
        assert!(RENEW_INTERVAL * 3 <= LEASE_DURATION);
    }
}
