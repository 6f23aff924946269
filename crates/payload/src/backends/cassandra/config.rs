use serde::{Deserialize, Serialize};

use crate::error::{BackendError, PayloadResult};
use crate::tenant::DatastoreKey;

const MAX_KEYSPACE_LEN: usize = 48;

/// Connection settings of the Cassandra payload backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CassandraPayloadConfig {
    /// `host:port` contact points.
    pub contact_points: Vec<String>,

    /// Keyspace holding the payload table. Derived from the tenant and
    /// datastore ids when unset.
    #[serde(default)]
    pub keyspace: Option<String>,

    /// Plain-text authentication user.
    #[serde(default)]
    pub username: Option<String>,

    /// Plain-text authentication password.
    #[serde(default)]
    pub password: Option<String>,

    /// Create the keyspace and table if missing.
    #[serde(default)]
    pub create_schema: bool,

    /// Replication factor used when creating the keyspace.
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
}

fn default_replication_factor() -> u32 {
    1
}

impl Default for CassandraPayloadConfig {
    fn default() -> Self {
        Self {
            contact_points: vec!["127.0.0.1:9042".to_string()],
            keyspace: None,
            username: None,
            password: None,
            create_schema: false,
            replication_factor: default_replication_factor(),
        }
    }
}

impl CassandraPayloadConfig {
    /// Validates configuration invariants.
    pub fn validate(&self) -> PayloadResult<()> {
        if self.contact_points.is_empty() {
            return Err(invalid("at least one contact point is required"));
        }
        for point in &self.contact_points {
            match point.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
                _ => {
                    return Err(invalid(format!(
                        "contact point '{point}' must have the form host:port"
                    )));
                }
            }
        }
        if let Some(keyspace) = &self.keyspace {
            if !is_valid_keyspace(keyspace) {
                return Err(invalid(format!(
                    "keyspace '{keyspace}' must be 1-{MAX_KEYSPACE_LEN} alphanumeric or '_' characters"
                )));
            }
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(invalid("username and password must be set together"));
        }
        if self.replication_factor == 0 {
            return Err(invalid("replication_factor must be > 0"));
        }
        Ok(())
    }

    /// Keyspace of one tenant datastore.
    pub fn keyspace_for(&self, key: &DatastoreKey) -> String {
        match &self.keyspace {
            Some(keyspace) => keyspace.clone(),
            None => {
                let raw = format!("{}_{}", key.tenant, key.datastore);
                let mut name: String = raw
                    .chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() {
                            c.to_ascii_lowercase()
                        } else {
                            '_'
                        }
                    })
                    .collect();
                if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
                    name.insert(0, 'p');
                }
                name.truncate(MAX_KEYSPACE_LEN);
                name
            }
        }
    }
}

fn is_valid_keyspace(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_KEYSPACE_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(message: impl Into<String>) -> crate::error::PayloadError {
    BackendError::configuration("cassandra", message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(CassandraPayloadConfig::default().validate().is_ok());

        let config = CassandraPayloadConfig {
            contact_points: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CassandraPayloadConfig {
            contact_points: vec!["cassandra".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CassandraPayloadConfig {
            keyspace: Some("bad-name".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CassandraPayloadConfig {
            username: Some("cassandra".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keyspace_derivation() {
        let config = CassandraPayloadConfig::default();
        assert_eq!(
            config.keyspace_for(&DatastoreKey::new("Acme-Health", "default")),
            "acme_health_default"
        );
        assert_eq!(
            config.keyspace_for(&DatastoreKey::new("42", "ds")),
            "p42_ds"
        );

        let config = CassandraPayloadConfig {
            keyspace: Some("payloads".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.keyspace_for(&DatastoreKey::new("acme", "default")),
            "payloads"
        );
    }
}
