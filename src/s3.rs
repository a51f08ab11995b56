//! AWS S3 Backend
//!
//! `StorageBackend` over `aws-sdk-s3`, for AWS S3 and S3-compatible
//! services (MinIO, LocalStack). The SDK owns credentials, signing and
//! transport retry; this module only translates requests and reports
//! failures as `RemoteError`.
//!
//! Checksums travel base64-encoded, as S3 expects. Composite multipart
//! checksums come back as `<base64>-<parts>`.

use crate::backend::{
    BackendFuture, BatchDeleteReport, BatchItemError, CompletedPart, Container, Item, ItemBody,
    ItemId, ItemPage, PutReceipt, RemoteError, StorageBackend,
};
use crate::checksum::{Checksum, ChecksumAlgorithm};
use crate::config::ClientConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types as s3;
use aws_sdk_s3::Client;
use aws_smithy_types::base64;
use bytes::Bytes;
use tracing::debug;

/// Translate an SDK failure without interpreting it
fn remote_error<E>(err: SdkError<E, HttpResponse>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            RemoteError::Service {
                code: inner.code().unwrap_or_default().to_string(),
                message: inner.message().unwrap_or_default().to_string(),
                status: Some(service.raw().status().as_u16()),
            }
        }
        _ => RemoteError::transport(DisplayErrorContext(&err).to_string()),
    }
}

fn invalid_request(err: impl std::fmt::Display) -> RemoteError {
    RemoteError::Service {
        code: "InvalidRequest".to_string(),
        message: err.to_string(),
        status: None,
    }
}

fn to_millis(time: Option<&DateTime>) -> Option<u64> {
    time.and_then(|t| t.to_millis().ok()).map(|ms| ms as u64)
}

fn sdk_algorithm(algorithm: ChecksumAlgorithm) -> s3::ChecksumAlgorithm {
    match algorithm {
        ChecksumAlgorithm::Sha256 => s3::ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha1 => s3::ChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Crc32 => s3::ChecksumAlgorithm::Crc32,
    }
}

/// Parse `<base64>` or `<base64>-<parts>`
fn parse_checksum(algorithm: ChecksumAlgorithm, value: &str) -> Option<Checksum> {
    let (encoded, part_count) = match value.split_once('-') {
        Some((encoded, parts)) => (encoded, Some(parts.parse::<u32>().ok()?)),
        None => (value, None),
    };
    let digest = base64::decode(encoded).ok()?;
    Some(Checksum {
        algorithm,
        digest,
        part_count,
    })
}

fn stored_checksum(sha256: Option<&str>, sha1: Option<&str>, crc32: Option<&str>) -> Option<Checksum> {
    sha256
        .and_then(|v| parse_checksum(ChecksumAlgorithm::Sha256, v))
        .or_else(|| sha1.and_then(|v| parse_checksum(ChecksumAlgorithm::Sha1, v)))
        .or_else(|| crc32.and_then(|v| parse_checksum(ChecksumAlgorithm::Crc32, v)))
}

/// Encoded checksum in the slot matching its algorithm
struct ChecksumFields {
    sha256: Option<String>,
    sha1: Option<String>,
    crc32: Option<String>,
}

impl ChecksumFields {
    fn for_checksum(checksum: Option<&Checksum>) -> Self {
        let mut fields = ChecksumFields {
            sha256: None,
            sha1: None,
            crc32: None,
        };
        if let Some(checksum) = checksum {
            let encoded = Some(base64::encode(&checksum.digest));
            match checksum.algorithm {
                ChecksumAlgorithm::Sha256 => fields.sha256 = encoded,
                ChecksumAlgorithm::Sha1 => fields.sha1 = encoded,
                ChecksumAlgorithm::Crc32 => fields.crc32 = encoded,
            }
        }
        fields
    }
}

/// S3 backend
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Client,
    region: String,
}

impl S3Backend {
    /// Build an SDK client from the client configuration.
    ///
    /// Static credentials take precedence over the default provider chain.
    /// A custom endpoint switches to path-style addressing.
    pub async fn connect(config: &ClientConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        if let Some(creds) = &config.credentials {
            loader = loader.credentials_provider(Credentials::new(
                &creds.access_key_id,
                &creds.secret_access_key,
                creds.session_token.clone(),
                None,
                "convergent-store",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if config.endpoint.is_some() {
            builder = builder.force_path_style(true);
        }
        debug!(region = %config.region, endpoint = ?config.endpoint, "s3 client configured");

        S3Backend {
            client: Client::from_conf(builder.build()),
            region: config.region.clone(),
        }
    }

    /// Wrap an existing SDK client
    pub fn from_client(client: Client, region: impl Into<String>) -> Self {
        S3Backend {
            client,
            region: region.into(),
        }
    }
}

impl StorageBackend for S3Backend {
    fn create_container<'a>(
        &'a self,
        name: &'a str,
        region: Option<&'a str>,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let region = region.unwrap_or(&self.region);
            let mut request = self.client.create_bucket().bucket(name);
            // us-east-1 rejects an explicit location constraint
            if region != "us-east-1" {
                request = request.create_bucket_configuration(
                    s3::CreateBucketConfiguration::builder()
                        .location_constraint(s3::BucketLocationConstraint::from(region))
                        .build(),
                );
            }
            request.send().await.map_err(remote_error)?;
            Ok(())
        })
    }

    fn delete_container<'a>(&'a self, name: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .delete_bucket()
                .bucket(name)
                .send()
                .await
                .map_err(remote_error)?;
            Ok(())
        })
    }

    fn head_container<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Container> {
        Box::pin(async move {
            self.client
                .head_bucket()
                .bucket(name)
                .send()
                .await
                .map_err(remote_error)?;
            Ok(Container {
                name: name.to_string(),
                created_at_ms: None,
                region: None,
            })
        })
    }

    fn list_containers(&self) -> BackendFuture<'_, Vec<Container>> {
        Box::pin(async move {
            let output = self
                .client
                .list_buckets()
                .send()
                .await
                .map_err(remote_error)?;
            Ok(output
                .buckets()
                .iter()
                .filter_map(|bucket| {
                    bucket.name().map(|name| Container {
                        name: name.to_string(),
                        created_at_ms: to_millis(bucket.creation_date()),
                        region: None,
                    })
                })
                .collect())
        })
    }

    fn put_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        body: Bytes,
        checksum: Option<&'a Checksum>,
    ) -> BackendFuture<'a, PutReceipt> {
        Box::pin(async move {
            let fields = ChecksumFields::for_checksum(checksum);
            let output = self
                .client
                .put_object()
                .bucket(container)
                .key(key)
                .body(ByteStream::from(body))
                .set_checksum_algorithm(checksum.map(|c| sdk_algorithm(c.algorithm)))
                .set_checksum_sha256(fields.sha256)
                .set_checksum_sha1(fields.sha1)
                .set_checksum_crc32(fields.crc32)
                .send()
                .await
                .map_err(remote_error)?;
            Ok(PutReceipt {
                etag: output.e_tag().map(str::to_string),
                version_id: output.version_id().map(str::to_string),
            })
        })
    }

    fn head_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        version_id: Option<&'a str>,
    ) -> BackendFuture<'a, Item> {
        Box::pin(async move {
            let output = self
                .client
                .head_object()
                .bucket(container)
                .key(key)
                .set_version_id(version_id.map(str::to_string))
                .checksum_mode(s3::ChecksumMode::Enabled)
                .send()
                .await
                .map_err(remote_error)?;
            Ok(Item {
                key: key.to_string(),
                version_id: output.version_id().map(str::to_string),
                size_bytes: output.content_length().unwrap_or(0).max(0) as u64,
                last_modified_ms: to_millis(output.last_modified()),
                etag: output.e_tag().map(str::to_string),
                checksum: stored_checksum(
                    output.checksum_sha256(),
                    output.checksum_sha1(),
                    output.checksum_crc32(),
                ),
            })
        })
    }

    fn get_item<'a>(&'a self, container: &'a str, key: &'a str) -> BackendFuture<'a, ItemBody> {
        Box::pin(async move {
            let output = self
                .client
                .get_object()
                .bucket(container)
                .key(key)
                .send()
                .await
                .map_err(remote_error)?;

            let body = futures::stream::try_unfold(output.body, |mut body| async move {
                match body.try_next().await {
                    Ok(Some(chunk)) => Ok(Some((chunk, body))),
                    Ok(None) => Ok(None),
                    Err(e) => Err(RemoteError::transport(DisplayErrorContext(&e).to_string())),
                }
            });
            let body: ItemBody = Box::pin(body);
            Ok(body)
        })
    }

    fn delete_item<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        version_id: Option<&'a str>,
        bypass_governance: bool,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .delete_object()
                .bucket(container)
                .key(key)
                .set_version_id(version_id.map(str::to_string))
                .set_bypass_governance_retention(bypass_governance.then_some(true))
                .send()
                .await
                .map_err(remote_error)?;
            Ok(())
        })
    }

    fn delete_items<'a>(
        &'a self,
        container: &'a str,
        items: &'a [ItemId],
        bypass_governance: bool,
    ) -> BackendFuture<'a, BatchDeleteReport> {
        Box::pin(async move {
            let objects = items
                .iter()
                .map(|item| {
                    s3::ObjectIdentifier::builder()
                        .key(&item.key)
                        .set_version_id(item.version_id.clone())
                        .build()
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid_request)?;
            // quiet mode would omit the deleted list, which the caller needs
            let delete = s3::Delete::builder()
                .set_objects(Some(objects))
                .quiet(false)
                .build()
                .map_err(invalid_request)?;

            let output = self
                .client
                .delete_objects()
                .bucket(container)
                .delete(delete)
                .set_bypass_governance_retention(bypass_governance.then_some(true))
                .send()
                .await
                .map_err(remote_error)?;

            let deleted = output
                .deleted()
                .iter()
                .filter_map(|d| {
                    d.key().map(|key| ItemId {
                        key: key.to_string(),
                        version_id: d.version_id().map(str::to_string),
                    })
                })
                .collect();
            let errors = output
                .errors()
                .iter()
                .map(|e| BatchItemError {
                    key: e.key().unwrap_or_default().to_string(),
                    version_id: e.version_id().map(str::to_string),
                    code: e.code().unwrap_or("Unknown").to_string(),
                    message: e.message().unwrap_or_default().to_string(),
                })
                .collect();
            Ok(BatchDeleteReport { deleted, errors })
        })
    }

    fn list_items<'a>(
        &'a self,
        container: &'a str,
        continuation_token: Option<&'a str>,
    ) -> BackendFuture<'a, ItemPage> {
        Box::pin(async move {
            let output = self
                .client
                .list_objects_v2()
                .bucket(container)
                .set_continuation_token(continuation_token.map(str::to_string))
                .send()
                .await
                .map_err(remote_error)?;

            let items = output
                .contents()
                .iter()
                .filter_map(|object| {
                    object.key().map(|key| Item {
                        key: key.to_string(),
                        version_id: None,
                        size_bytes: object.size().unwrap_or(0).max(0) as u64,
                        last_modified_ms: to_millis(object.last_modified()),
                        etag: object.e_tag().map(str::to_string),
                        checksum: None,
                    })
                })
                .collect();
            let next_token = if output.is_truncated().unwrap_or(false) {
                output.next_continuation_token().map(str::to_string)
            } else {
                None
            };
            Ok(ItemPage { items, next_token })
        })
    }

    fn create_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        algorithm: Option<ChecksumAlgorithm>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let output = self
                .client
                .create_multipart_upload()
                .bucket(container)
                .key(key)
                .set_checksum_algorithm(algorithm.map(sdk_algorithm))
                .send()
                .await
                .map_err(remote_error)?;
            output
                .upload_id()
                .map(str::to_string)
                .ok_or_else(|| invalid_request("service returned no upload id"))
        })
    }

    fn upload_part<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        body: Bytes,
        checksum: Option<&'a Checksum>,
    ) -> BackendFuture<'a, CompletedPart> {
        Box::pin(async move {
            let fields = ChecksumFields::for_checksum(checksum);
            let output = self
                .client
                .upload_part()
                .bucket(container)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number as i32)
                .body(ByteStream::from(body))
                .set_checksum_algorithm(checksum.map(|c| sdk_algorithm(c.algorithm)))
                .set_checksum_sha256(fields.sha256)
                .set_checksum_sha1(fields.sha1)
                .set_checksum_crc32(fields.crc32)
                .send()
                .await
                .map_err(remote_error)?;
            Ok(CompletedPart {
                part_number,
                etag: output.e_tag().map(str::to_string),
                checksum: checksum.cloned(),
            })
        })
    }

    fn complete_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BackendFuture<'a, PutReceipt> {
        Box::pin(async move {
            let parts = parts
                .iter()
                .map(|part| {
                    let fields = ChecksumFields::for_checksum(part.checksum.as_ref());
                    s3::CompletedPart::builder()
                        .part_number(part.part_number as i32)
                        .set_e_tag(part.etag.clone())
                        .set_checksum_sha256(fields.sha256)
                        .set_checksum_sha1(fields.sha1)
                        .set_checksum_crc32(fields.crc32)
                        .build()
                })
                .collect();
            let output = self
                .client
                .complete_multipart_upload()
                .bucket(container)
                .key(key)
                .upload_id(upload_id)
                .multipart_upload(
                    s3::CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build(),
                )
                .send()
                .await
                .map_err(remote_error)?;
            Ok(PutReceipt {
                etag: output.e_tag().map(str::to_string),
                version_id: output.version_id().map(str::to_string),
            })
        })
    }

    fn abort_multipart<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
        upload_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .abort_multipart_upload()
                .bucket(container)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
                .map_err(remote_error)?;
            Ok(())
        })
    }
}
