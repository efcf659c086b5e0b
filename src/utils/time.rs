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

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Converts an apimachinery timestamp through its RFC 3339 wire form.
pub fn from_k8s_time(time: &metav1::Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    parse_rfc3339(value.as_str()?)
}

/// Same as [`from_k8s_time`], for the microsecond timestamps of leases.
pub fn from_micro_time(time: &metav1::MicroTime) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    parse_rfc3339(value.as_str()?)
}

pub fn to_micro_time(at: DateTime<Utc>) -> Option<metav1::MicroTime> {
    let wire = at.to_rfc3339_opts(SecondsFormat::Micros, true);
    serde_json::from_value(serde_json::Value::String(wire)).ok()
}

/// Time elapsed since the object was created. Unknown creation time counts as new.
pub fn age(meta: &metav1::ObjectMeta) -> chrono::Duration {
    meta.creation_timestamp
        .as_ref()
        .and_then(from_k8s_time)
        .map(|created| Utc::now() - created)
        .unwrap_or_else(chrono::Duration::zero)
}
