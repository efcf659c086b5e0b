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

//! Validation of the custom resources.
//!
//! The same functions back the admission webhook and the first phase of
//! every reconcile. They never perform I/O: whatever state a rule needs
//! (a managed-system snapshot, the referenced stores) is passed in.

use snafu::Snafu;

pub mod account;
pub mod backingstore;
pub mod bucketclass;
pub mod namespacestore;
mod store;
pub mod system;

pub use store::{endpoint_url, validate_secret_keys};

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Rejects the request at admission; the message is shown to the user verbatim.
    #[snafu(display("{message}"))]
    Invalid { message: String },

    /// Will not resolve on its own; the resource is rejected until its spec changes.
    #[snafu(display("{reason}: {message}"))]
    Persistent { reason: String, message: String },

    /// Expected to resolve; the reconcile is retried.
    #[snafu(display("{reason}: {message}"))]
    Transient { reason: String, message: String },
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::Invalid {
            message: message.into(),
        }
    }

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

    pub fn message(&self) -> &str {
        match self {
            Error::Invalid { message }
            | Error::Persistent { message, .. }
            | Error::Transient { message, .. } => message,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Error::Invalid { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }
}

pub type Result<T = (), E = Error> = std::result::Result<T, E>;
