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

//! Byte quantities as written in Kubernetes resource requests.

use crate::types::error::{Error, InvalidQuantitySnafu};

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;
pub const TIB: u64 = 1 << 40;
pub const PIB: u64 = 1 << 50;

const SUFFIXES: &[(&str, u64)] = &[
    ("Ki", KIB),
    ("Mi", MIB),
    ("Gi", GIB),
    ("Ti", TIB),
    ("Pi", PIB),
    ("Ei", 1 << 60),
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// Parses a quantity like `16Gi`, `500M` or `1.5Ti` into bytes.
///
/// Fractions are truncated toward zero after scaling.
pub fn parse_bytes(value: &str) -> Result<u64, Error> {
    let trimmed = value.trim();
    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| trimmed.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((trimmed, 1));

    if number.is_empty() || number.starts_with('-') {
        return InvalidQuantitySnafu { value }.fail();
    }

    if let Ok(n) = number.parse::<u64>() {
        return n
            .checked_mul(multiplier)
            .ok_or_else(|| Error::InvalidQuantity { value: value.to_owned() });
    }

    let n: f64 = number
        .parse()
        .map_err(|_| Error::InvalidQuantity { value: value.to_owned() })?;
    if !n.is_finite() || n < 0.0 {
        return InvalidQuantitySnafu { value }.fail();
    }
    Ok((n * multiplier as f64) as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_and_decimal_suffixes() {
        assert_eq!(parse_bytes("16Gi").unwrap(), 16 * GIB);
        assert_eq!(parse_bytes("20G").unwrap(), 20_000_000_000);
        assert_eq!(parse_bytes("512").unwrap(), 512);
        assert_eq!(parse_bytes("1.5Ki").unwrap(), 1536);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_bytes("").is_err());
        assert!(parse_bytes("Gi").is_err());
        assert!(parse_bytes("-1Gi").is_err());
        assert!(parse_bytes("ten").is_err());
    }
}
