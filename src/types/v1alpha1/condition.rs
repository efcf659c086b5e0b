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

use crate::utils::time::now_rfc3339;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Condition types reported by the operator's resources.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, JsonSchema)]
pub enum ConditionType {
    Available,
    Progressing,
    Degraded,
    Upgradeable,
    #[serde(rename = "KMS-Status")]
    #[strum(serialize = "KMS-Status")]
    KmsStatus,
    #[serde(rename = "KMS-Type")]
    #[strum(serialize = "KMS-Type")]
    KmsType,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display, JsonSchema, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Sets (or inserts) the condition of the given type.
///
/// The heartbeat is always refreshed. `lastTransitionTime` only moves when
/// the status, reason or message actually changed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) {
    let now = now_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let changed =
            existing.status != status || existing.reason != reason || existing.message != message;
        existing.status = status;
        existing.reason = reason.to_owned();
        existing.message = message.to_owned();
        existing.last_heartbeat_time = Some(now.clone());
        if changed || existing.last_transition_time.is_none() {
            existing.last_transition_time = Some(now);
        }
        return;
    }

    conditions.push(Condition {
        type_,
        status,
        reason: reason.to_owned(),
        message: message.to_owned(),
        last_heartbeat_time: Some(now.clone()),
        last_transition_time: Some(now),
    });
}

pub fn find_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// The standard available/progressing/degraded triplet for a healthy resource.
pub fn set_available(conditions: &mut Vec<Condition>, reason: &str, message: &str) {
    set_condition(conditions, ConditionType::Available, ConditionStatus::True, reason, message);
    set_condition(conditions, ConditionType::Progressing, ConditionStatus::False, reason, message);
    set_condition(conditions, ConditionType::Degraded, ConditionStatus::False, reason, message);
    set_condition(conditions, ConditionType::Upgradeable, ConditionStatus::True, reason, message);
}

pub fn set_progressing(conditions: &mut Vec<Condition>, reason: &str, message: &str) {
    set_condition(conditions, ConditionType::Available, ConditionStatus::False, reason, message);
    set_condition(conditions, ConditionType::Progressing, ConditionStatus::True, reason, message);
    set_condition(conditions, ConditionType::Degraded, ConditionStatus::False, reason, message);
    set_condition(conditions, ConditionType::Upgradeable, ConditionStatus::False, reason, message);
}

pub fn set_degraded(conditions: &mut Vec<Condition>, reason: &str, message: &str) {
    set_condition(conditions, ConditionType::Available, ConditionStatus::False, reason, message);
    set_condition(conditions, ConditionType::Progressing, ConditionStatus::False, reason, message);
    set_condition(conditions, ConditionType::Degraded, ConditionStatus::True, reason, message);
    set_condition(conditions, ConditionType::Upgradeable, ConditionStatus::False, reason, message);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_time_kept_when_unchanged() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            ConditionType::Available,
            ConditionStatus::True,
            "Ready",
            "all good",
        );
        conditions[0].last_transition_time = Some("2020-01-01T00:00:00Z".to_string());

        set_condition(
            &mut conditions,
            ConditionType::Available,
            ConditionStatus::True,
            "Ready",
            "all good",
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2020-01-01T00:00:00Z"),
            "an unchanged condition must keep its transition time"
        );
    }

    #[test]
    fn test_transition_time_moves_on_status_change() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            ConditionType::Degraded,
            ConditionStatus::False,
            "Ready",
            "",
        );
        conditions[0].last_transition_time = Some("2020-01-01T00:00:00Z".to_string());

        set_condition(
            &mut conditions,
            ConditionType::Degraded,
            ConditionStatus::True,
            "TemporaryError",
            "connection refused",
        );

        assert_ne!(
            conditions[0].last_transition_time.as_deref(),
            Some("2020-01-01T00:00:00Z")
        );
        assert_eq!(conditions[0].reason, "TemporaryError");
    }

    #[test]
    fn test_set_available_sets_all_four() {
        let mut conditions = Vec::new();
        set_available(&mut conditions, "Ready", "ok");
        assert_eq!(conditions.len(), 4);
        assert_eq!(
            find_condition(&conditions, ConditionType::Available).unwrap().status,
            ConditionStatus::True
        );
        assert_eq!(
            find_condition(&conditions, ConditionType::Degraded).unwrap().status,
            ConditionStatus::False
        );
    }
}
