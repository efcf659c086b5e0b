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

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Coarse lifecycle state of the system resource.
#[derive(Default, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Display)]
pub enum SystemPhase {
    Rejected,
    #[default]
    Verifying,
    Creating,
    #[serde(alias = "WaitingToConnect")]
    Connecting,
    Configuring,
    Ready,
    Deleting,
}

/// Coarse lifecycle state of stores, bucket classes and accounts.
#[derive(Default, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Display)]
pub enum Phase {
    Rejected,
    #[default]
    Verifying,
    Connecting,
    Creating,
    Ready,
    Deleting,
}

impl Phase {
    pub fn is_ready(&self) -> bool {
        *self == Phase::Ready
    }

    pub fn is_rejected(&self) -> bool {
        *self == Phase::Rejected
    }
}
