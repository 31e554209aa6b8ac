use std::time::Duration;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as SdkDateTime};
use aws_sdk_s3::types::{Delete, Grant, ObjectCannedAcl, ObjectIdentifier, Permission, Type};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, warn};

use super::{ListOptions, ObjectClient, ObjectListing, ObjectMeta, ObjectSummary, PutOutcome};
use crate::config::AdapterConfig;
use crate::{Error, Result};

const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
const DELETE_BATCH_SIZE: usize = 1000;

/// Characters left as-is in an `x-amz-copy-source` value.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone)]
pub struct S3Client {
    client: Client,
    endpoint: String,
}

impl S3Client {
    pub async fn new(config: &AdapterConfig) -> Result<Self> {
        config.validate()?;

        let region_provider = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(crate::config::DEFAULT_REGION));

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .credentials_provider(Credentials::new(
                &config.access_key,
                &config.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&config.endpoint)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style())
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            endpoint: config.endpoint.clone(),
        })
    }
}

fn to_chrono(dt: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE))
}

/// Collapse an ACL grant list into the canned ACL name it corresponds to.
fn canned_acl(grants: &[Grant]) -> &'static str {
    let mut read = false;
    let mut write = false;

    for grant in grants {
        let Some(grantee) = grant.grantee() else {
            continue;
        };
        if *grantee.r#type() != Type::Group || grantee.uri() != Some(ALL_USERS_URI) {
            continue;
        }
        match grant.permission() {
            Some(Permission::Read) => read = true,
            Some(Permission::Write) => write = true,
            Some(Permission::FullControl) => {
                read = true;
                write = true;
            }
            _ => {}
        }
    }

    match (read, write) {
        (true, true) => "public-read-write",
        (true, false) => "public-read",
        _ => "private",
    }
}

#[async_trait]
impl ObjectClient for S3Client {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<PutOutcome> {
        let response = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| Error::S3(e.into()))?;

        Ok(PutOutcome {
            etag: response.e_tag().map(str::to_string),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_no_such_key() {
                        return Err(Error::NotFound(key.to_string()));
                    }
                }
                return Err(Error::S3(err.into()));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn list_objects(&self, bucket: &str, opts: ListOptions) -> Result<ObjectListing> {
        let mut listing = ObjectListing::default();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(opts.prefix.clone())
                .set_delimiter(opts.delimiter.clone())
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| Error::S3(e.into()))?;

            for object in response.contents() {
                listing.objects.push(ObjectSummary {
                    key: object.key().unwrap_or_default().to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }

            for prefix in response.common_prefixes() {
                if let Some(prefix) = prefix.prefix() {
                    listing.prefixes.push(prefix.to_string());
                }
            }

            continuation_token = response.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(listing)
    }

    async fn copy_object(
        &self,
        from_bucket: &str,
        from_key: &str,
        to_bucket: &str,
        to_key: &str,
    ) -> Result<bool> {
        let response = self
            .client
            .copy_object()
            .copy_source(copy_source(from_bucket, from_key))
            .bucket(to_bucket)
            .key(to_key)
            .send()
            .await
            .map_err(|e| Error::S3(e.into()))?;

        Ok(response.copy_object_result().is_some())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<bool> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::S3(e.into()))?;
        Ok(true)
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>> {
        let mut deleted = Vec::with_capacity(keys.len());

        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let mut objects = Vec::with_capacity(batch.len());
            for key in batch {
                let id = ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| Error::InvalidData(e.to_string()))?;
                objects.push(id);
            }
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| Error::InvalidData(e.to_string()))?;

            let response = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| Error::S3(e.into()))?;

            for err in response.errors() {
                warn!(
                    bucket = bucket,
                    key = err.key().unwrap_or_default(),
                    code = err.code().unwrap_or_default(),
                    "object not deleted"
                );
            }
            deleted.extend(
                response
                    .deleted()
                    .iter()
                    .filter_map(|d| d.key().map(str::to_string)),
            );
        }

        Ok(deleted)
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: &str) -> Result<()> {
        self.client
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::from(acl))
            .send()
            .await
            .map_err(|e| Error::S3(e.into()))?;
        Ok(())
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<String> {
        let response = self
            .client
            .get_object_acl()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::S3(e.into()))?;

        Ok(canned_acl(response.grants()).to_string())
    }

    async fn get_object_meta(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        let response = match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_not_found() {
                        return Err(Error::NotFound(key.to_string()));
                    }
                }
                return Err(Error::S3(err.into()));
            }
        };

        Ok(ObjectMeta {
            content_type: response.content_type().map(str::to_string),
            last_modified: response.last_modified().and_then(to_chrono),
            content_length: response.content_length().unwrap_or(0).max(0) as u64,
            etag: response.e_tag().map(str::to_string),
        })
    }

    async fn does_object_exist(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_not_found() {
                        return Ok(false);
                    }
                }
                Err(Error::S3(err.into()))
            }
        }
    }

    async fn sign_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires_in)?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| Error::S3(e.into()))?;

        debug!(endpoint = %self.endpoint, bucket = bucket, key = key, "signed url");
        Ok(request.uri().to_string())
    }

    async fn create_object_dir(&self, bucket: &str, dir: &str) -> Result<bool> {
        let marker = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{}/", dir)
        };
        self.put_object(bucket, &marker, Vec::new(), None).await?;
        Ok(true)
    }
}

impl std::fmt::Display for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S3Client(endpoint: {})", self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::types::Grantee;

    fn group_grant(uri: &str, permission: Permission) -> Grant {
        Grant::builder()
            .grantee(Grantee::builder().r#type(Type::Group).uri(uri).build().unwrap())
            .permission(permission)
            .build()
    }

    fn owner_grant() -> Grant {
        Grant::builder()
            .grantee(
                Grantee::builder()
                    .r#type(Type::CanonicalUser)
                    .id("owner")
                    .build()
                    .unwrap(),
            )
            .permission(Permission::FullControl)
            .build()
    }

    #[test]
    fn test_canned_acl() {
        assert_eq!(canned_acl(&[owner_grant()]), "private");
        assert_eq!(
            canned_acl(&[owner_grant(), group_grant(ALL_USERS_URI, Permission::Read)]),
            "public-read"
        );
        assert_eq!(
            canned_acl(&[
                group_grant(ALL_USERS_URI, Permission::Read),
                group_grant(ALL_USERS_URI, Permission::Write),
            ]),
            "public-read-write"
        );
        assert_eq!(
            canned_acl(&[group_grant(
                "http://acs.amazonaws.com/groups/global/AuthenticatedUsers",
                Permission::Read
            )]),
            "private"
        );
    }

    #[test]
    fn test_copy_source_encoding() {
        assert_eq!(copy_source("b", "dir/a b+c.txt"), "b/dir/a%20b%2Bc.txt");
        assert_eq!(copy_source("b", "plain-key_1.txt"), "b/plain-key_1.txt");
    }

    #[test]
    fn test_to_chrono() {
        let dt = SdkDateTime::from_secs(1_700_000_000);
        assert_eq!(to_chrono(&dt).unwrap().timestamp(), 1_700_000_000);
    }
}
