//! S3 implementation of the storage seam.
//!
//! Bodies larger than one part are sent as multipart uploads with the same
//! part size the fingerprinter uses, so the resulting ETags can be compared
//! with local fingerprints directly.

use crate::error::{DeployError, DeployResult};
use crate::fingerprint::Fingerprint;
use crate::session::AwsSession;
use crate::storage::StorageCollaborator;
use crate::types::{BucketSummary, CreateBucketOutcome, Manifest, RemoteObject};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
    CreateBucketConfiguration, ErrorDocument, IndexDocument, WebsiteConfiguration,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// S3 transport for bucket management and object transfer.
pub struct S3Transport {
    client: S3Client,
    chunk_size: u64,
}

impl S3Transport {
    pub fn new(session: &AwsSession, chunk_size: u64) -> Self {
        Self {
            client: session.s3_client(),
            chunk_size: chunk_size.max(1),
        }
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> DeployResult<()> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| DeployError::transfer(key, format!("cannot read {}: {e}", source.display())))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| DeployError::transfer(key, format!("put object failed: {e}")))?;

        Ok(())
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> DeployResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| DeployError::transfer(key, format!("create multipart upload failed: {e}")))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| DeployError::transfer(key, "S3 returned no multipart upload id"))?
            .to_string();

        let result = match self.upload_parts(bucket, key, &upload_id, source).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        DeployError::transfer(key, format!("complete multipart upload failed: {e}"))
                    })
            }
            Err(e) => Err(e),
        };

        if result.is_err() {
            // Nothing becomes visible until completion; drop the stored parts.
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!("failed to abort multipart upload {upload_id} for {key}: {e}");
            }
        }

        result
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        source: &Path,
    ) -> DeployResult<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|e| DeployError::transfer(key, format!("cannot open {}: {e}", source.display())))?;

        let mut parts = Vec::new();
        let mut part_number: i32 = 1;

        loop {
            let mut buf = Vec::with_capacity(self.chunk_size as usize);
            let n = (&mut file)
                .take(self.chunk_size)
                .read_to_end(&mut buf)
                .await
                .map_err(|e| DeployError::transfer(key, format!("read failed: {e}")))?;
            if n == 0 {
                break;
            }

            let content_md5 = BASE64.encode(Md5::digest(&buf));
            let resp = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_md5(content_md5)
                .body(ByteStream::from(buf))
                .send()
                .await
                .map_err(|e| {
                    DeployError::transfer(key, format!("upload of part {part_number} failed: {e}"))
                })?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(resp.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            debug!("uploaded part {part_number} ({n} bytes) of {key}");

            if (n as u64) < self.chunk_size {
                break;
            }
            part_number += 1;
        }

        Ok(parts)
    }
}

#[async_trait]
impl StorageCollaborator for S3Transport {
    async fn list_buckets(&self) -> DeployResult<Vec<BucketSummary>> {
        let resp = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| DeployError::S3(format!("list buckets failed: {e}")))?;

        let buckets = resp
            .buckets()
            .iter()
            .filter_map(|b| {
                b.name().map(|name| BucketSummary {
                    name: name.to_string(),
                    created_at: b
                        .creation_date()
                        .and_then(|d| DateTime::<Utc>::from_timestamp(d.secs(), d.subsec_nanos())),
                })
            })
            .collect();

        Ok(buckets)
    }

    async fn create_bucket(&self, name: &str, region: &str) -> DeployResult<CreateBucketOutcome> {
        let mut request = self.client.create_bucket().bucket(name);

        // us-east-1 rejects an explicit location constraint
        if region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                debug!("created bucket {name} in {region}");
                Ok(CreateBucketOutcome::Created)
            }
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_bucket_already_owned_by_you() {
                    Ok(CreateBucketOutcome::AlreadyOwned)
                } else if service_err.is_bucket_already_exists() {
                    Err(DeployError::Precondition(format!(
                        "bucket {name} already exists and is owned by another account"
                    )))
                } else {
                    Err(DeployError::S3(format!("create bucket {name} failed: {service_err}")))
                }
            }
        }
    }

    async fn bucket_region(&self, name: &str) -> DeployResult<String> {
        let resp = self
            .client
            .get_bucket_location()
            .bucket(name)
            .send()
            .await
            .map_err(|e| DeployError::S3(format!("get bucket location for {name} failed: {e}")))?;

        let region = match resp.location_constraint().map(|c| c.as_str()) {
            None | Some("") => "us-east-1",
            Some("EU") => "eu-west-1",
            Some(other) => other,
        };
        Ok(region.to_string())
    }

    async fn allow_public_policies(&self, name: &str) -> DeployResult<()> {
        self.client
            .delete_public_access_block()
            .bucket(name)
            .send()
            .await
            .map_err(|e| DeployError::S3(format!("remove public access block on {name} failed: {e}")))?;
        Ok(())
    }

    async fn set_bucket_policy(&self, name: &str, policy: &str) -> DeployResult<()> {
        self.client
            .put_bucket_policy()
            .bucket(name)
            .policy(policy)
            .send()
            .await
            .map_err(|e| DeployError::S3(format!("put bucket policy on {name} failed: {e}")))?;
        Ok(())
    }

    async fn set_website_config(
        &self,
        name: &str,
        index_document: &str,
        error_document: &str,
    ) -> DeployResult<()> {
        let index = IndexDocument::builder()
            .suffix(index_document)
            .build()
            .map_err(|e| DeployError::Config(format!("index document: {e}")))?;
        let error = ErrorDocument::builder()
            .key(error_document)
            .build()
            .map_err(|e| DeployError::Config(format!("error document: {e}")))?;

        self.client
            .put_bucket_website()
            .bucket(name)
            .website_configuration(
                WebsiteConfiguration::builder()
                    .index_document(index)
                    .error_document(error)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| DeployError::S3(format!("put website config on {name} failed: {e}")))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> DeployResult<Manifest> {
        let mut manifest = Manifest::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| DeployError::S3(format!("list objects in {bucket} failed: {e}")))?;

            for obj in resp.contents() {
                let Some(key) = obj.key() else { continue };
                let fingerprint = obj
                    .e_tag()
                    .map(Fingerprint::from_etag)
                    .unwrap_or(Fingerprint::Unknown);
                manifest.insert(
                    key.to_string(),
                    RemoteObject {
                        key: key.to_string(),
                        fingerprint,
                        size: obj.size().unwrap_or(0).max(0) as u64,
                    },
                );
            }

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!("listed {} objects in s3://{bucket}", manifest.len());
        Ok(manifest)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        content_type: &str,
    ) -> DeployResult<()> {
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| DeployError::transfer(key, format!("cannot stat {}: {e}", source.display())))?
            .len();

        if size > self.chunk_size {
            self.put_multipart(bucket, key, source, content_type).await?;
        } else {
            self.put_single(bucket, key, source, content_type).await?;
        }

        debug!("uploaded {size} bytes to s3://{bucket}/{key}");
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> DeployResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| DeployError::transfer(key, format!("delete failed: {e}")))?;
        Ok(())
    }
}
