//! Tenant and datastore identifier types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Datastore id used when a tenant configures a single datastore.
pub const DEFAULT_DATASTORE: &str = "default";

/// An opaque tenant identifier.
///
/// # Examples
///
/// ```
/// use helios_payload::tenant::TenantId;
///
/// let tenant = TenantId::new("acme");
/// assert_eq!(tenant.as_str(), "acme");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant ID from the given string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of one datastore within a tenant.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatastoreId(String);

impl DatastoreId {
    /// Creates a new datastore ID from the given string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the default datastore ID.
    pub fn default_datastore() -> Self {
        Self(DEFAULT_DATASTORE.to_string())
    }

    /// Returns the datastore ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DatastoreId {
    fn default() -> Self {
        Self::default_datastore()
    }
}

/// A tenant/datastore pair.
///
/// Each pair owns exactly one payload store session for the lifetime of
/// the tenant context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatastoreKey {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Datastore within the tenant.
    pub datastore: DatastoreId,
}

impl DatastoreKey {
    /// Creates a key for the given tenant and datastore.
    pub fn new(tenant: impl Into<TenantId>, datastore: impl Into<DatastoreId>) -> Self {
        Self {
            tenant: tenant.into(),
            datastore: datastore.into(),
        }
    }
}

impl fmt::Display for DatastoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.datastore)
    }
}

macro_rules! string_id_impls {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($ty), self.0)
            }
        }

        impl FromStr for $ty {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self::new(s))
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id_impls!(TenantId);
string_id_impls!(DatastoreId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_creation() {
        let tenant = TenantId::new("test-tenant");
        assert_eq!(tenant.as_str(), "test-tenant");
        assert_eq!(tenant.to_string(), "test-tenant");
        assert_eq!(format!("{:?}", tenant), "TenantId(\"test-tenant\")");
    }

    #[test]
    fn test_default_datastore() {
        assert_eq!(DatastoreId::default().as_str(), DEFAULT_DATASTORE);
    }

    #[test]
    fn test_datastore_key_display() {
        let key = DatastoreKey::new("acme", "default");
        assert_eq!(key.to_string(), "acme/default");
    }

    #[test]
    fn test_serde_roundtrip() {
        let key = DatastoreKey::new("acme", "archive");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"tenant":"acme","datastore":"archive"}"#);
        let back: DatastoreKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
