//! Deterministic addressing of resource payloads.
//!
//! A [`PayloadAddress`] identifies one stored payload: the resource type id,
//! the logical id, the version and the payload key of the write attempt that
//! produced it. It serializes to the storage path
//! `{resourceTypeId}/{logicalId}/{version}/{payloadKey}` and parses back.
//!
//! ```
//! use helios_payload::address::PayloadAddress;
//!
//! let address = PayloadAddress::new(1, "p1", 2, "k2").unwrap();
//! assert_eq!(address.path(), "1/p1/2/k2");
//! assert_eq!(PayloadAddress::parse("1/p1/2/k2").unwrap(), address);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FormatError;

const DELIMITER: char = '/';

/// Address of one stored payload.
///
/// Two addresses are equal iff all four fields are equal. The ordering is
/// field-wise, which keeps all versions of one logical id adjacent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PayloadAddress {
    resource_type_id: u32,
    logical_id: String,
    version: u32,
    payload_key: String,
}

impl PayloadAddress {
    /// Creates an address, validating every field.
    ///
    /// `resource_type_id` and `version` must be positive; `logical_id` and
    /// `payload_key` must be non-empty and must not contain `/`.
    pub fn new(
        resource_type_id: u32,
        logical_id: impl Into<String>,
        version: u32,
        payload_key: impl Into<String>,
    ) -> Result<Self, FormatError> {
        let logical_id = logical_id.into();
        let payload_key = payload_key.into();

        let display = || format!("{resource_type_id}/{logical_id}/{version}/{payload_key}");
        if resource_type_id == 0 {
            return Err(FormatError::NotPositive {
                path: display(),
                field: "resourceTypeId",
                value: "0".to_string(),
            });
        }
        if version == 0 {
            return Err(FormatError::NotPositive {
                path: display(),
                field: "version",
                value: "0".to_string(),
            });
        }
        check_text("logicalId", &logical_id, &display)?;
        check_text("payloadKey", &payload_key, &display)?;

        Ok(Self {
            resource_type_id,
            logical_id,
            version,
            payload_key,
        })
    }

    /// Creates an address with a freshly generated payload key.
    ///
    /// Every write attempt should use a new key so that a retried write of
    /// the same version lands at a distinct address.
    pub fn generate(
        resource_type_id: u32,
        logical_id: impl Into<String>,
        version: u32,
    ) -> Result<Self, FormatError> {
        Self::new(
            resource_type_id,
            logical_id,
            version,
            new_payload_key(),
        )
    }

    /// Parses a storage path of the form
    /// `resourceTypeId/logicalId/version/payloadKey`.
    pub fn parse(path: &str) -> Result<Self, FormatError> {
        let segments: Vec<&str> = path.split(DELIMITER).collect();
        if path.is_empty() || segments.len() != 4 {
            return Err(FormatError::SegmentCount {
                path: path.to_string(),
                segments: if path.is_empty() { 0 } else { segments.len() },
            });
        }

        let resource_type_id = parse_positive(path, "resourceTypeId", segments[0])?;
        let version = parse_positive(path, "version", segments[2])?;
        for (field, value) in [("logicalId", segments[1]), ("payloadKey", segments[3])] {
            if value.is_empty() {
                return Err(FormatError::EmptySegment {
                    path: path.to_string(),
                    field,
                });
            }
        }

        Ok(Self {
            resource_type_id,
            logical_id: segments[1].to_string(),
            version,
            payload_key: segments[3].to_string(),
        })
    }

    /// Formats this address as its storage path.
    pub fn path(&self) -> String {
        self.to_string()
    }

    /// Returns the resource type id.
    pub fn resource_type_id(&self) -> u32 {
        self.resource_type_id
    }

    /// Returns the logical id.
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Returns the version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the payload key.
    pub fn payload_key(&self) -> &str {
        &self.payload_key
    }

    /// Path prefix covering every payload of this address's logical id.
    pub fn logical_prefix(&self) -> String {
        logical_prefix(self.resource_type_id, &self.logical_id)
    }
}

/// Path prefix covering every stored payload of one logical resource.
pub fn logical_prefix(resource_type_id: u32, logical_id: &str) -> String {
    format!("{resource_type_id}{DELIMITER}{logical_id}{DELIMITER}")
}

/// Path prefix covering every payload key of one version.
pub fn version_prefix(resource_type_id: u32, logical_id: &str, version: u32) -> String {
    format!("{resource_type_id}{DELIMITER}{logical_id}{DELIMITER}{version}{DELIMITER}")
}

/// Generates a payload key for a new write attempt.
pub fn new_payload_key() -> String {
    Uuid::new_v4().simple().to_string()
}

impl fmt::Display for PayloadAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{d}{}{d}{}{d}{}",
            self.resource_type_id,
            self.logical_id,
            self.version,
            self.payload_key,
            d = DELIMITER
        )
    }
}

impl FromStr for PayloadAddress {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PayloadAddress {
    type Error = FormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PayloadAddress> for String {
    fn from(value: PayloadAddress) -> Self {
        value.to_string()
    }
}

fn check_text(
    field: &'static str,
    value: &str,
    display: &dyn Fn() -> String,
) -> Result<(), FormatError> {
    if value.is_empty() {
        return Err(FormatError::EmptySegment {
            path: display(),
            field,
        });
    }
    if value.contains(DELIMITER) {
        return Err(FormatError::ContainsDelimiter {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn parse_positive(path: &str, field: &'static str, value: &str) -> Result<u32, FormatError> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(FormatError::NotPositive {
            path: path.to_string(),
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cases = [
            (1, "p1", 1, "k1"),
            (42, "a-b.c_d", 7, "0f8e2c"),
            (u32::MAX, "x", u32::MAX, "y"),
        ];
        for (type_id, id, version, key) in cases {
            let address = PayloadAddress::new(type_id, id, version, key).unwrap();
            assert_eq!(PayloadAddress::parse(&address.path()).unwrap(), address);
        }
    }

    #[test]
    fn test_path_format() {
        let address = PayloadAddress::new(12, "patient-1", 3, "abc").unwrap();
        assert_eq!(address.path(), "12/patient-1/3/abc");
        assert_eq!(address.logical_prefix(), "12/patient-1/");
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        assert!(matches!(
            PayloadAddress::parse("a/b"),
            Err(FormatError::SegmentCount { segments: 2, .. })
        ));
        assert!(matches!(
            PayloadAddress::parse("a/b/c"),
            Err(FormatError::SegmentCount { .. })
        ));
        assert!(matches!(
            PayloadAddress::parse(""),
            Err(FormatError::SegmentCount { segments: 0, .. })
        ));
        assert!(matches!(
            PayloadAddress::parse("a/p1/1/k1"),
            Err(FormatError::NotPositive {
                field: "resourceTypeId",
                ..
            })
        ));
        assert!(matches!(
            PayloadAddress::parse("1/p1/0/k1"),
            Err(FormatError::NotPositive {
                field: "version",
                ..
            })
        ));
        assert!(matches!(
            PayloadAddress::parse("1/p1/-2/k1"),
            Err(FormatError::NotPositive { .. })
        ));
        assert!(matches!(
            PayloadAddress::parse("1//1/k1"),
            Err(FormatError::EmptySegment {
                field: "logicalId",
                ..
            })
        ));
        assert!(matches!(
            PayloadAddress::parse("1/p1/1/k1/extra"),
            Err(FormatError::SegmentCount { segments: 5, .. })
        ));
    }

    #[test]
    fn test_new_rejects_delimiters_and_zero() {
        assert!(matches!(
            PayloadAddress::new(1, "a/b", 1, "k"),
            Err(FormatError::ContainsDelimiter {
                field: "logicalId",
                ..
            })
        ));
        assert!(PayloadAddress::new(0, "p", 1, "k").is_err());
        assert!(PayloadAddress::new(1, "p", 0, "k").is_err());
        assert!(PayloadAddress::new(1, "p", 1, "").is_err());
    }

    #[test]
    fn test_generate_uses_distinct_keys() {
        let a = PayloadAddress::generate(1, "p1", 1).unwrap();
        let b = PayloadAddress::generate(1, "p1", 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.logical_prefix(), b.logical_prefix());
    }

    #[test]
    fn test_serde_as_path() {
        let address = PayloadAddress::new(1, "p1", 2, "k2").unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"1/p1/2/k2\"");
        let back: PayloadAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
        assert!(serde_json::from_str::<PayloadAddress>("\"1/p1\"").is_err());
    }
}
