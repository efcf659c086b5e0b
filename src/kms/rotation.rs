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

//! Rotating root keys and the rotation schedule.

use crate::validation::system::{DEFAULT_ROTATION_SCHEDULE, parse_schedule};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Map key naming the currently active root key.
pub const ACTIVE_ROOT_KEY: &str = "active_root_key";

/// Keys younger than this are always retained.
pub const MAX_KEY_AGE: chrono::Duration = chrono::Duration::days(182);

/// Older keys are still retained until at least this many remain.
pub const MIN_KEYS: usize = 50;

const KEY_PREFIX: &str = "key-";

/// The rotating secret: `active_root_key -> key-<nanos>` plus every `key-<nanos> -> value`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RootKeys(BTreeMap<String, String>);

pub fn key_id(at: DateTime<Utc>) -> String {
    format!(
        "{KEY_PREFIX}{}",
        at.timestamp_nanos_opt().unwrap_or_else(|| at.timestamp_micros() * 1000)
    )
}

fn key_time(id: &str) -> Option<DateTime<Utc>> {
    let nanos: i64 = id.strip_prefix(KEY_PREFIX)?.parse().ok()?;
    Some(DateTime::from_timestamp_nanos(nanos))
}

impl RootKeys {
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        RootKeys(map)
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// A fresh map whose only key is `value`, active from `at`.
    pub fn new(value: &str, at: DateTime<Utc>) -> Self {
        let mut keys = RootKeys::default();
        keys.push(value, at);
        keys
    }

    pub fn active_id(&self) -> Option<&str> {
        self.0.get(ACTIVE_ROOT_KEY).map(String::as_str)
    }

    /// Value of the active key, if the map is consistent.
    pub fn active(&self) -> Option<&str> {
        self.active_id()
            .and_then(|id| self.0.get(id))
            .map(String::as_str)
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.0
            .keys()
            .filter(|k| k.starts_with(KEY_PREFIX))
            .map(String::as_str)
    }

    fn push(&mut self, value: &str, at: DateTime<Utc>) {
        let id = key_id(at);
        self.0.insert(id.clone(), value.to_owned());
        self.0.insert(ACTIVE_ROOT_KEY.to_owned(), id);
    }

    /// Prunes the existing keys, then adds `value` as the new active key.
    pub fn rotate(&mut self, value: &str, now: DateTime<Utc>) {
        self.prune(now);
        self.push(value, now);
    }

    /// Drops keys older than [`MAX_KEY_AGE`] while keeping at least [`MIN_KEYS`]
    /// of the newest and always the active one.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let active = self.active_id().map(str::to_owned);
        let mut ids: Vec<(String, Option<DateTime<Utc>>)> = self
            .key_ids()
            .map(|id| (id.to_owned(), key_time(id)))
            .collect();
        // newest first; unparsable ids sort last and are dropped first
        ids.sort_by(|a, b| b.1.cmp(&a.1));

        let drop: Vec<String> = ids
            .into_iter()
            .enumerate()
            .filter(|(rank, (id, at))| {
                let young = at.is_some_and(|t| now - t < MAX_KEY_AGE);
                !young && *rank >= MIN_KEYS && active.as_deref() != Some(id.as_str())
            })
            .map(|(_, (id, _))| id)
            .collect();

        for id in drop {
            self.0.remove(&id);
        }
    }
}

/// The configured schedule, or the monthly default.
pub fn schedule(expr: Option<&str>) -> Result<cron::Schedule, crate::validation::Error> {
    parse_schedule(expr.unwrap_or(DEFAULT_ROTATION_SCHEDULE))
}

/// First fire time of `schedule` after `last`.
pub fn next_rotation(schedule: &cron::Schedule, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&last).next()
}

/// Whether a rotation fired between `last` and `now`.
pub fn rotation_due(schedule: &cron::Schedule, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    next_rotation(schedule, last).is_some_and(|next| next <= now)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(days_ago: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(days_ago)
    }

    #[test]
    fn test_rotate_switches_active() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut keys = RootKeys::new("first", now);
        assert_eq!(keys.active(), Some("first"));

        keys.rotate("second", now + chrono::Duration::seconds(1));
        assert_eq!(keys.active(), Some("second"));
        assert_eq!(keys.key_ids().count(), 2);
    }

    #[test]
    fn test_prune_keeps_min_keys_and_active() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let mut keys = RootKeys::default();
        // 60 keys, all a year old
        for i in 0..60 {
            keys.push(&format!("v{i}"), at(365, now) + chrono::Duration::seconds(i));
        }
        // make the oldest one active
        let oldest = keys.key_ids().next().unwrap().to_owned();
        keys.0.insert(ACTIVE_ROOT_KEY.to_owned(), oldest.clone());

        keys.prune(now);
        assert_eq!(keys.key_ids().count(), MIN_KEYS + 1);
        assert!(keys.as_map().contains_key(&oldest));
        assert_eq!(keys.active_id(), Some(oldest.as_str()));
    }

    #[test]
    fn test_prune_keeps_young_keys_beyond_min() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let mut keys = RootKeys::new("old", at(400, now));
        for i in 0..70 {
            keys.push(&format!("v{i}"), at(30, now) + chrono::Duration::seconds(i));
        }
        assert_eq!(keys.active(), Some("v69"));
        keys.rotate("new", now);
        // the 70 young keys stay, the old one ranks beyond MIN_KEYS, plus the new active key
        assert_eq!(keys.key_ids().count(), 71);
        assert!(!keys.as_map().values().any(|v| v == "old"));
        assert_eq!(keys.active(), Some("new"));
    }

    #[test]
    fn test_rotation_schedule() {
        let schedule = schedule(None).unwrap();
        let last = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let next = next_rotation(&schedule, last).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        assert!(!rotation_due(&schedule, last, last + chrono::Duration::days(1)));
        assert!(rotation_due(&schedule, last, next));
    }
}
