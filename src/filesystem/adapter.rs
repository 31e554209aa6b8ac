use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    to_directory_prefix, DirectoryRecord, Entry, FileRecord, FileSystem, Visibility,
    VisibilityRecord, WriteOptions, WriteResult,
};
use crate::client::{ListOptions, ObjectClient, ObjectStream, S3Client};
use crate::config::AdapterConfig;
use crate::{Error, Result};

/// Lifetime of URLs signed for `read_stream`.
pub const SIGNED_URL_EXPIRY: Duration = Duration::from_secs(3600);

const DELIMITER: &str = "/";

/// [`FileSystem`] over a single bucket of an object store.
#[derive(Debug)]
pub struct ObjectStorageAdapter<C: ObjectClient> {
    client: C,
    bucket: String,
}

impl ObjectStorageAdapter<S3Client> {
    pub async fn connect(config: &AdapterConfig) -> Result<Self> {
        let client = S3Client::new(config).await?;
        Ok(Self::new(client, &config.bucket))
    }
}

impl<C: ObjectClient> ObjectStorageAdapter<C> {
    pub fn new(client: C, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub async fn signed_url(&self, path: &str, expires_in: Duration) -> Result<String> {
        self.client.sign_url(&self.bucket, path, expires_in).await
    }
}

/// The root prefix is sent as "no prefix".
fn query_prefix(prefix: &str) -> Option<String> {
    if prefix == DELIMITER {
        None
    } else {
        Some(prefix.to_string())
    }
}

fn guess_mimetype(path: &str) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

impl<C: ObjectClient> ObjectStorageAdapter<C> {
    /// Apply a canned ACL; a failed call is logged and reported as `false`.
    async fn apply_acl(&self, path: &str, visibility: Visibility) -> bool {
        match self
            .client
            .put_object_acl(&self.bucket, path, visibility.acl())
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(bucket = %self.bucket, path = path, error = %err, "put_object_acl failed");
                false
            }
        }
    }
}

#[async_trait]
impl<C: ObjectClient> FileSystem for ObjectStorageAdapter<C> {
    async fn write(&self, path: &str, contents: Vec<u8>, opts: WriteOptions) -> Result<WriteResult> {
        let size = contents.len() as u64;
        let mimetype = opts.content_type.unwrap_or_else(|| guess_mimetype(path));
        debug!(bucket = %self.bucket, path = path, size = size, "write");

        let outcome = self
            .client
            .put_object(&self.bucket, path, contents, Some(mimetype.as_str()))
            .await?;

        // Only a visibility the store accepted is reported back.
        let mut visibility = None;
        if let Some(requested) = opts.visibility {
            if self.apply_acl(path, requested).await {
                visibility = Some(requested);
            }
        }

        Ok(WriteResult {
            path: path.to_string(),
            size,
            etag: outcome.etag,
            mimetype: Some(mimetype),
            visibility,
        })
    }

    async fn write_stream(&self, path: &str, stream: ObjectStream, opts: WriteOptions) -> Result<WriteResult> {
        let contents = stream.read_to_end().await?;
        self.write(path, contents, opts).await
    }

    async fn rename(&self, path: &str, new_path: &str) -> Result<bool> {
        debug!(bucket = %self.bucket, path = path, new_path = new_path, "rename");
        if !self.copy(path, new_path).await? {
            return Ok(false);
        }
        self.delete(path).await
    }

    async fn copy(&self, path: &str, new_path: &str) -> Result<bool> {
        self.client
            .copy_object(&self.bucket, path, &self.bucket, new_path)
            .await
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        debug!(bucket = %self.bucket, path = path, "delete");
        self.client.delete_object(&self.bucket, path).await
    }

    async fn delete_dir(&self, dirname: &str) -> Result<bool> {
        let prefix = to_directory_prefix(dirname);
        if prefix == DELIMITER {
            return Err(Error::Validation(
                "refusing to delete the bucket root".to_string(),
            ));
        }

        let listing = self
            .client
            .list_objects(
                &self.bucket,
                ListOptions {
                    prefix: Some(prefix.clone()),
                    delimiter: None,
                },
            )
            .await?;

        let keys: Vec<String> = listing
            .objects
            .into_iter()
            .map(|object| object.key)
            .filter(|key| *key != prefix)
            .collect();
        debug!(bucket = %self.bucket, prefix = %prefix, objects = keys.len(), "delete_dir");

        if !keys.is_empty() {
            self.client.delete_objects(&self.bucket, &keys).await?;
        }

        self.client.delete_object(&self.bucket, &prefix).await
    }

    async fn create_dir(&self, dirname: &str) -> Result<bool> {
        let prefix = to_directory_prefix(dirname);
        debug!(bucket = %self.bucket, prefix = %prefix, "create_dir");
        self.client.create_object_dir(&self.bucket, &prefix).await
    }

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<bool> {
        self.apply_acl(path, visibility).await;
        Ok(true)
    }

    async fn has(&self, path: &str) -> Result<bool> {
        self.client.does_object_exist(&self.bucket, path).await
    }

    async fn read(&self, path: &str) -> Result<FileRecord> {
        let contents = self.client.get_object(&self.bucket, path).await?;
        Ok(FileRecord {
            contents: Some(contents),
            ..FileRecord::new(path)
        })
    }

    async fn read_stream(&self, path: &str) -> Result<FileRecord> {
        let url = self.signed_url(path, SIGNED_URL_EXPIRY).await?;
        let stream = self.client.open_url(&url).await?;
        Ok(FileRecord {
            stream: Some(stream),
            ..FileRecord::new(path)
        })
    }

    /// Lists one level below `directory`. `recursive` is accepted but not
    /// acted on: the result is the same single-level listing either way.
    async fn list_contents(&self, directory: &str, recursive: bool) -> Result<Vec<Entry>> {
        let prefix = to_directory_prefix(directory);
        let listing = self
            .client
            .list_objects(
                &self.bucket,
                ListOptions {
                    prefix: query_prefix(&prefix),
                    delimiter: Some(DELIMITER.to_string()),
                },
            )
            .await?;

        let mut entries = Vec::with_capacity(listing.objects.len() + listing.prefixes.len());
        for object in listing.objects {
            if object.key == prefix {
                continue;
            }
            entries.push(Entry::File(FileRecord {
                timestamp: object.last_modified.map(|t| t.timestamp()),
                size: Some(object.size),
                ..FileRecord::new(&object.key)
            }));
        }
        for dir in &listing.prefixes {
            entries.push(Entry::Dir(DirectoryRecord::new(dir)));
        }

        debug!(bucket = %self.bucket, prefix = %prefix, recursive = recursive, entries = entries.len(), "list_contents");
        Ok(entries)
    }

    async fn get_metadata(&self, path: &str) -> Result<FileRecord> {
        let meta = self.client.get_object_meta(&self.bucket, path).await?;
        Ok(FileRecord {
            mimetype: meta.content_type,
            timestamp: meta.last_modified.map(|t| t.timestamp()),
            size: Some(meta.content_length),
            ..FileRecord::new(path)
        })
    }

    async fn get_visibility(&self, path: &str) -> Result<VisibilityRecord> {
        let acl = self.client.get_object_acl(&self.bucket, path).await?;
        Ok(VisibilityRecord {
            path: path.to_string(),
            visibility: acl,
        })
    }
}
