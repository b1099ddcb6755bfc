/*!
S3-compatible object store.

Talks to any endpoint speaking the S3 API (AWS, MinIO, Ceph RGW, LocalStack)
through the official AWS SDK. Requests are made one at a time on a runtime
owned by the store, and the SDK's own retry layer is switched off: a failed
request fails the run.
*/

use std::path::Path;
use std::sync::Arc;

use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

use super::ObjectStore;
#[cfg(feature = "metrics")]
use crate::observability::MetricsTimer;
use crate::config::ObjectStorageConfig;
use crate::{CacheError, Result};

const CREDENTIALS_PROVIDER: &str = "pipecache";

/// Object store backed by an S3-compatible service
///
/// # Authentication
/// When both an access key id and a secret are configured they are used as
/// static credentials. Otherwise the standard AWS provider chain applies
/// (environment variables, shared credentials file, instance roles). The
/// chain is resolved on the first request, so missing credentials surface
/// as a backend error from that request rather than from `new`.
///
/// # Example
/// ```rust,no_run
/// use pipecache_core::config::ObjectStorageConfig;
/// use pipecache_core::store::{ObjectStore, S3ObjectStore};
/// use std::path::Path;
///
/// let settings = ObjectStorageConfig {
///     endpoint: "minio.internal:9000".to_string(),
///     bucket: "build-cache".to_string(),
///     insecure: true,
///     ..Default::default()
/// };
/// let store = S3ObjectStore::new(&settings)?;
/// store.put_file("my-org/my-repo/relative/target", Path::new(".cache/0.zip"))?;
/// # Ok::<(), pipecache_core::CacheError>(())
/// ```
#[derive(Debug)]
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    runtime: Arc<Runtime>,
}

impl S3ObjectStore {
    /// Build a client for the configured endpoint and bucket
    pub fn new(settings: &ObjectStorageConfig) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| {
            CacheError::backend(format!("Failed to create async runtime for S3 client: {e}"))
        })?;

        let endpoint = settings.endpoint_url();
        let region = settings.region_or_default().to_string();

        let sdk_config = runtime.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region))
                .retry_config(RetryConfig::disabled());

            if let (Some(access_key), Some(secret)) =
                (&settings.access_key_id, &settings.secret_access_key)
            {
                loader = loader.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret.clone(),
                    None,
                    None,
                    CREDENTIALS_PROVIDER,
                ));
            }

            loader.load().await
        });

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .build();
        let client = S3Client::from_conf(s3_config);

        info!(endpoint = %endpoint, bucket = %settings.bucket, "Initialized S3 object store");

        Ok(Self {
            client,
            bucket: settings.bucket.clone(),
            runtime: Arc::new(runtime),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn download(&self, key: &str, destination: &Path) -> Result<u64> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_s3_error("get_object", e, key))?;

        let mut body = output.body;
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| CacheError::io(destination, e))?;

        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await.map_err(|e| {
            CacheError::backend(format!("Failed to read S3 object '{key}' stream: {e}"))
        })? {
            file.write_all(&chunk)
                .await
                .map_err(|e| CacheError::io(destination, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| CacheError::io(destination, e))?;

        Ok(written)
    }

    async fn upload(&self, key: &str, source: &Path) -> Result<()> {
        let body = ByteStream::from_path(source).await.map_err(|e| {
            CacheError::backend(format!(
                "Failed to open {} for upload: {e}",
                source.display()
            ))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| map_s3_error("put_object", e, key))?;
        Ok(())
    }
}

impl ObjectStore for S3ObjectStore {
    fn put_file(&self, key: &str, source: &Path) -> Result<()> {
        info!(bucket = %self.bucket, key = %key, "Uploading object to S3");

        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start_upload();

        let result = self.runtime.block_on(self.upload(key, source));

        #[cfg(feature = "metrics")]
        match &result {
            Ok(()) => timer.finish(),
            Err(_) => timer.finish_with_error(),
        }

        match &result {
            Ok(()) => debug!(bucket = %self.bucket, key = %key, "Uploaded object to S3"),
            Err(e) => error!(bucket = %self.bucket, key = %key, error = %e, "Failed to upload object to S3"),
        }
        result
    }

    fn get_file(&self, key: &str, destination: &Path) -> Result<()> {
        info!(bucket = %self.bucket, key = %key, "Downloading object from S3");

        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start_download();

        let result = self.runtime.block_on(self.download(key, destination));

        #[cfg(feature = "metrics")]
        match &result {
            Ok(_) => timer.finish(),
            Err(_) => timer.finish_with_error(),
        }

        match result {
            Ok(size) => {
                debug!(bucket = %self.bucket, key = %key, size, "Downloaded object from S3");
                Ok(())
            }
            Err(e) => {
                error!(bucket = %self.bucket, key = %key, error = %e, "Failed to download object from S3");
                Err(e)
            }
        }
    }
}

/// Map AWS SDK errors to `CacheError::Backend` with the failing key attached
fn map_s3_error<E>(op: &str, error: SdkError<E>, key: &str) -> CacheError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &error {
        SdkError::TimeoutError(_) => {
            CacheError::backend(format!("S3 {op} request timed out (key: {key})"))
        }
        SdkError::DispatchFailure(_) => CacheError::backend(format!(
            "S3 {op} request failed to dispatch (key: {key}): {}",
            DisplayErrorContext(&error)
        )),
        SdkError::ServiceError(service_err) => match service_err.err().code() {
            Some("NoSuchKey") | Some("NotFound") => {
                CacheError::backend(format!("S3 object '{key}' not found"))
            }
            Some("NoSuchBucket") => CacheError::backend("S3 bucket not found"),
            Some("AccessDenied") | Some("Forbidden") => CacheError::backend(
                "Access denied to S3 (check credentials and permissions)",
            ),
            Some(code) => CacheError::backend(format!(
                "S3 {op} service error ({code}) for key {key}: {}",
                service_err.err().message().unwrap_or("Unknown error")
            )),
            None => CacheError::backend(format!(
                "S3 {op} service error for key {key}: {}",
                DisplayErrorContext(&error)
            )),
        },
        _ => CacheError::backend(format!(
            "S3 {op} error for key {key}: {}",
            DisplayErrorContext(&error)
        )),
    }
}
