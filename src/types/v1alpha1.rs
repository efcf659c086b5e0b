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

//! `noobaa.io/v1alpha1` custom resources.

pub mod account;
pub mod backingstore;
pub mod bucketclass;
pub mod condition;
pub mod k8s;
pub mod namespacestore;
pub mod noobaa;
pub mod phase;
pub mod store;

/// API group of every resource in this module.
pub const GROUP: &str = "noobaa.io";

/// Finalizer installed by every reconciler on the resources it owns.
pub const FINALIZER: &str = const_str::concat!(GROUP, "/finalizer");

/// Finalizer held by the system resource while its teardown is in progress.
pub const GRACEFUL_FINALIZER: &str = const_str::concat!(GROUP, "/graceful_finalizer");

/// Label keys under this prefix may not change once set on a bucket class.
pub const IMMUTABLE_LABEL_PREFIX: &str = const_str::concat!("immutable.", GROUP, "/");
