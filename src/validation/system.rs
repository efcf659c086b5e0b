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

use super::{Error, Result};
use crate::types::v1alpha1::noobaa::NooBaa;
use std::str::FromStr;

/// Rotation schedule used when the spec does not carry one: midnight on the 1st.
pub const DEFAULT_ROTATION_SCHEDULE: &str = "0 0 1 * *";

/// Parses a five-field cron expression, or a shorthand such as `@monthly`,
/// into a schedule.
///
/// The `cron` crate expects a leading seconds field, so one is prepended.
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule> {
    let expr = expr.trim();
    let full = if expr.starts_with('@') {
        expr.to_owned()
    } else if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        return Err(Error::invalid(format!(
            "Invalid key rotation schedule {expr:?}, expected 5 fields"
        )));
    };
    cron::Schedule::from_str(&full)
        .map_err(|e| Error::invalid(format!("Invalid key rotation schedule {expr:?}: {e}")))
}

pub fn validate(noobaa: &NooBaa) -> Result {
    if let Some(schedule) = noobaa.kms().and_then(|k| k.schedule.as_deref()) {
        parse_schedule(schedule)?;
    }

    if let Some(endpoints) = &noobaa.spec.endpoints {
        if endpoints.min_count.is_some_and(|n| n < 1) {
            return Err(Error::invalid("endpoints minCount must be at least 1"));
        }
        if let (Some(min), Some(max)) = (endpoints.min_count, endpoints.max_count)
            && max < min
        {
            return Err(Error::invalid(
                "endpoints maxCount must not be lower than minCount",
            ));
        }
    }

    Ok(())
}

pub fn validate_delete(noobaa: &NooBaa) -> Result {
    if noobaa.allows_deletion() {
        return Ok(());
    }
    Err(Error::invalid(format!(
        "NooBaa {:?} deletion is not allowed, set spec.cleanupPolicy.allowNoobaaDeletion to true first",
        noobaa.name()
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::tests::create_test_noobaa;
    use crate::types::v1alpha1::noobaa::{CleanupPolicy, EndpointsSpec};

    #[test]
    fn test_delete_requires_cleanup_policy() {
        let mut noobaa = create_test_noobaa();
        assert!(validate_delete(&noobaa).unwrap_err().is_invalid());

        noobaa.spec.cleanup_policy = Some(CleanupPolicy {
            allow_noobaa_deletion: true,
            confirmation: None,
        });
        assert!(validate_delete(&noobaa).is_ok());
    }

    #[test]
    fn test_schedule_parsing() {
        assert!(parse_schedule(DEFAULT_ROTATION_SCHEDULE).is_ok());
        assert!(parse_schedule("*/5 * * * *").is_ok());
        assert!(parse_schedule("0 0 1 * * *").is_err());
        assert!(parse_schedule("not a schedule").is_err());
    }

    #[test]
    fn test_schedule_shorthand() {
        let monthly = parse_schedule("@monthly").unwrap();
        let default = parse_schedule(DEFAULT_ROTATION_SCHEDULE).unwrap();
        assert_eq!(
            monthly.upcoming(chrono::Utc).next(),
            default.upcoming(chrono::Utc).next()
        );
        assert!(parse_schedule("@fortnightly").is_err());
    }

    #[test]
    fn test_endpoint_bounds() {
        let mut noobaa = create_test_noobaa();
        noobaa.spec.endpoints = Some(EndpointsSpec {
            min_count: Some(3),
            max_count: Some(2),
            ..Default::default()
        });
        assert!(validate(&noobaa).is_err());

        noobaa.spec.endpoints = Some(EndpointsSpec {
            min_count: Some(1),
            max_count: Some(4),
            ..Default::default()
        });
        assert!(validate(&noobaa).is_ok());
    }
}
