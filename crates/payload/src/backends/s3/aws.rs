use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};

use super::client::{
    ListObjectItem, ListObjectsResult, ListRequest, ObjectData, ObjectMetadata, S3Api,
    S3ClientError,
};
use super::config::S3PayloadConfig;

/// [`S3Api`] over the AWS SDK.
#[derive(Debug, Clone)]
pub struct AwsS3Client {
    client: Client,
}

impl AwsS3Client {
    /// Wraps a client built from an already loaded SDK config.
    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    /// Builds a client from the provider chain, applying the endpoint and
    /// addressing overrides of `config`.
    pub async fn connect(config: &S3PayloadConfig) -> Self {
        let sdk_config = Self::load_sdk_config(config.region.as_deref()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint_url) = config.endpoint_url.as_deref() {
            builder = builder.endpoint_url(endpoint_url.trim());
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Loads the default provider chain, overriding the region when given.
    pub async fn load_sdk_config(region: Option<&str>) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        loader.load().await
    }
}

#[async_trait]
impl S3Api for AwsS3Client {
    async fn head_bucket(&self, bucket: &str) -> Result<(), S3ClientError> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, S3ClientError> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => Ok(Some(ObjectMetadata {
                etag: out.e_tag().map(|s| s.to_string()),
                last_modified: out.last_modified().and_then(to_chrono),
                size: out.content_length().unwrap_or_default(),
            })),
            Err(err) => match map_sdk_error(err) {
                S3ClientError::NotFound => Ok(None),
                mapped => Err(mapped),
            },
        }
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectData>, S3ClientError> {
        match self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => {
                let etag = out.e_tag().map(|s| s.to_string());
                let last_modified = out.last_modified().and_then(to_chrono);
                let bytes = out
                    .body
                    .collect()
                    .await
                    .map_err(|e| {
                        S3ClientError::Internal(format!("failed to collect object body: {e}"))
                    })?
                    .into_bytes()
                    .to_vec();
                Ok(Some(ObjectData {
                    metadata: ObjectMetadata {
                        etag,
                        last_modified,
                        size: bytes.len() as i64,
                    },
                    bytes,
                }))
            }
            Err(err) => match map_sdk_error(err) {
                S3ClientError::NotFound => Ok(None),
                mapped => Err(mapped),
            },
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<ObjectMetadata, S3ClientError> {
        let size = body.len() as i64;
        let mut req = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body));

        if let Some(content_type) = content_type {
            req = req.content_type(content_type);
        }

        let out = req.send().await.map_err(map_sdk_error)?;

        Ok(ObjectMetadata {
            etag: out.e_tag().map(|s| s.to_string()),
            last_modified: None,
            size,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ClientError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        request: ListRequest<'_>,
    ) -> Result<ListObjectsResult, S3ClientError> {
        let mut req = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(request.prefix);

        if let Some(start_after) = request.start_after {
            req = req.start_after(start_after);
        }
        if let Some(token) = request.continuation {
            req = req.continuation_token(token);
        }
        if let Some(max_keys) = request.max_keys {
            req = req.max_keys(max_keys);
        }

        let out = req.send().await.map_err(map_sdk_error)?;
        let items = out
            .contents()
            .iter()
            .filter_map(|item| {
                item.key().map(|key| ListObjectItem {
                    key: key.to_string(),
                    last_modified: item.last_modified().and_then(to_chrono),
                    size: item.size().unwrap_or_default(),
                })
            })
            .collect();

        Ok(ListObjectsResult {
            items,
            next_continuation_token: out.next_continuation_token().map(|s| s.to_string()),
        })
    }
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> S3ClientError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    let fallback = format!("{err:?}");

    match err {
        aws_sdk_s3::error::SdkError::ServiceError(service_err) => {
            let code = service_err.err().code().unwrap_or("Unknown");
            let message = service_err
                .err()
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| fallback.clone());
            match code {
                "NoSuchKey" | "NotFound" | "NoSuchBucket" => S3ClientError::NotFound,
                "PreconditionFailed" => S3ClientError::PreconditionFailed,
                "SlowDown" | "Throttling" | "ThrottlingException" | "RequestLimitExceeded" => {
                    S3ClientError::Throttled(message)
                }
                "ServiceUnavailable" | "InternalError" => S3ClientError::Unavailable(message),
                "InvalidBucketName" | "InvalidArgument" => S3ClientError::InvalidInput(message),
                _ => S3ClientError::Internal(message),
            }
        }
        aws_sdk_s3::error::SdkError::TimeoutError(_) => S3ClientError::Unavailable(fallback),
        aws_sdk_s3::error::SdkError::DispatchFailure(_) => S3ClientError::Unavailable(fallback),
        _ => S3ClientError::Internal(fallback),
    }
}
