use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, PayloadResult};
use crate::tenant::TenantId;

/// Tenant-to-bucket resolution for S3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum S3TenancyMode {
    /// All tenants share one bucket with tenant-specific key prefixes.
    PrefixPerTenant {
        /// Shared bucket name.
        bucket: String,
    },

    /// Each tenant maps to a specific bucket.
    BucketPerTenant {
        /// Explicit tenant -> bucket map.
        tenant_bucket_map: HashMap<String, String>,
        /// Bucket used for tenants missing from the map.
        default_bucket: Option<String>,
    },
}

/// Connection settings of the S3 payload backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3PayloadConfig {
    /// How tenant data is mapped to buckets/prefixes.
    pub tenancy_mode: S3TenancyMode,

    /// Optional global key prefix applied before payload paths.
    #[serde(default)]
    pub prefix: Option<String>,

    /// AWS region override (falls back to provider chain if unset).
    #[serde(default)]
    pub region: Option<String>,

    /// Optional S3-compatible endpoint URL (for example, MinIO).
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Force path-style bucket addressing.
    #[serde(default)]
    pub force_path_style: bool,

    /// Allow insecure HTTP endpoint URLs.
    #[serde(default)]
    pub allow_http: bool,

    /// Check the bucket with `HeadBucket` when the store is created.
    #[serde(default)]
    pub validate_bucket_on_startup: bool,

    /// `max-keys` of each listing request issued by a scan.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: i32,
}

fn default_list_page_size() -> i32 {
    1000
}

impl Default for S3PayloadConfig {
    fn default() -> Self {
        Self {
            tenancy_mode: S3TenancyMode::PrefixPerTenant {
                bucket: "hfs-payload".to_string(),
            },
            prefix: None,
            region: None,
            endpoint_url: None,
            force_path_style: false,
            allow_http: false,
            validate_bucket_on_startup: false,
            list_page_size: default_list_page_size(),
        }
    }
}

impl S3PayloadConfig {
    /// Validates configuration invariants.
    pub fn validate(&self) -> PayloadResult<()> {
        if self.list_page_size <= 0 {
            return Err(invalid("list_page_size must be > 0"));
        }

        if let Some(endpoint_url) = self.endpoint_url.as_deref() {
            let endpoint_url = endpoint_url.trim();
            if endpoint_url.is_empty() {
                return Err(invalid("endpoint_url must not be empty when provided"));
            }

            let lower = endpoint_url.to_ascii_lowercase();
            let is_http = lower.starts_with("http://");
            let is_https = lower.starts_with("https://");
            if !is_http && !is_https {
                return Err(invalid("endpoint_url must start with http:// or https://"));
            }
            if is_http && !self.allow_http {
                return Err(invalid("http endpoint_url requires allow_http=true"));
            }
        }

        match &self.tenancy_mode {
            S3TenancyMode::PrefixPerTenant { bucket } => {
                if bucket.trim().is_empty() {
                    return Err(invalid("prefix-per-tenant bucket must not be empty"));
                }
            }
            S3TenancyMode::BucketPerTenant {
                tenant_bucket_map,
                default_bucket,
            } => {
                if tenant_bucket_map.is_empty() && default_bucket.is_none() {
                    return Err(invalid(
                        "bucket-per-tenant requires at least one mapped bucket or default_bucket",
                    ));
                }
                if tenant_bucket_map.values().any(|b| b.trim().is_empty()) {
                    return Err(invalid(
                        "bucket-per-tenant mapping contains empty bucket name",
                    ));
                }
                if default_bucket
                    .as_ref()
                    .is_some_and(|b| b.trim().is_empty())
                {
                    return Err(invalid("default_bucket must not be empty when provided"));
                }
            }
        }

        Ok(())
    }

    /// Resolves the bucket holding `tenant`'s payloads.
    pub fn bucket_for(&self, tenant: &TenantId) -> PayloadResult<String> {
        match &self.tenancy_mode {
            S3TenancyMode::PrefixPerTenant { bucket } => Ok(bucket.clone()),
            S3TenancyMode::BucketPerTenant {
                tenant_bucket_map,
                default_bucket,
            } => tenant_bucket_map
                .get(tenant.as_str())
                .or(default_bucket.as_ref())
                .cloned()
                .ok_or_else(|| invalid(format!("no bucket mapped for tenant '{tenant}'"))),
        }
    }

    /// Returns true if tenants share a bucket and are separated by prefix.
    pub fn uses_tenant_prefix(&self) -> bool {
        matches!(self.tenancy_mode, S3TenancyMode::PrefixPerTenant { .. })
    }

    /// Returns a de-duplicated set of all buckets referenced by this config.
    pub fn configured_buckets(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        match &self.tenancy_mode {
            S3TenancyMode::PrefixPerTenant { bucket } => {
                out.insert(bucket.clone());
            }
            S3TenancyMode::BucketPerTenant {
                tenant_bucket_map,
                default_bucket,
            } => {
                out.extend(tenant_bucket_map.values().cloned());
                if let Some(bucket) = default_bucket {
                    out.insert(bucket.clone());
                }
            }
        }
        out
    }
}

fn invalid(message: impl Into<String>) -> crate::error::PayloadError {
    BackendError::configuration("s3", message).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> S3PayloadConfig {
        S3PayloadConfig {
            tenancy_mode: S3TenancyMode::PrefixPerTenant {
                bucket: "test-bucket".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn validate_accepts_https_endpoint_without_allow_http() {
        let mut config = base_config();
        config.endpoint_url = Some("https://minio.example.local:9000".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_http_endpoint_when_allow_http_false() {
        let mut config = base_config();
        config.endpoint_url = Some("http://127.0.0.1:9000".to_string());
        assert!(config.validate().is_err());

        config.allow_http = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_malformed_endpoint_and_empty_bucket() {
        let mut config = base_config();
        config.endpoint_url = Some("ftp://minio.local:9000".to_string());
        config.allow_http = true;
        assert!(config.validate().is_err());

        let config = S3PayloadConfig {
            tenancy_mode: S3TenancyMode::PrefixPerTenant {
                bucket: " ".to_string(),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bucket_per_tenant_resolution() {
        let config = S3PayloadConfig {
            tenancy_mode: S3TenancyMode::BucketPerTenant {
                tenant_bucket_map: HashMap::from([("acme".to_string(), "acme-bucket".to_string())]),
                default_bucket: None,
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(
            config.bucket_for(&TenantId::new("acme")).unwrap(),
            "acme-bucket"
        );
        assert!(config.bucket_for(&TenantId::new("other")).is_err());
        assert!(!config.uses_tenant_prefix());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: S3PayloadConfig = serde_json::from_str(
            r#"{"tenancy_mode": {"mode": "prefix_per_tenant", "bucket": "payloads"}}"#,
        )
        .unwrap();
        assert_eq!(config.list_page_size, 1000);
        assert!(!config.force_path_style);
        assert_eq!(config.configured_buckets().len(), 1);
    }
}
