//! S3 payload backend.
//!
//! Payloads are objects at `{prefix}/{tenant}/{datastore}/{payload path}`
//! (the tenant segment is dropped when each tenant has its own bucket).
//! The store logic talks to an [`S3Api`] client; the AWS SDK client is
//! compiled with the `s3` feature.

#[cfg(feature = "s3")]
mod aws;
mod client;
mod config;
mod keyspace;
mod store;

#[cfg(test)]
mod tests;

#[cfg(feature = "s3")]
pub use aws::AwsS3Client;
pub use client::{
    ListObjectItem, ListObjectsResult, ListRequest, ObjectData, ObjectMetadata, S3Api,
    S3ClientError,
};
pub use config::{S3PayloadConfig, S3TenancyMode};
pub use keyspace::S3Keyspace;
pub use store::S3PayloadStore;
