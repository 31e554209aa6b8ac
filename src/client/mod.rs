use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, Stream, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use crate::{Error, Result};

pub mod memory;
pub mod s3;

pub use memory::{MemoryClient, Operation};
pub use s3::S3Client;

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One listing response, every page merged.
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    pub objects: Vec<ObjectSummary>,
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_length: u64,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PutOutcome {
    pub etag: Option<String>,
}

/// The object-store calls the adapter is built on.
///
/// Boolean results carry the provider's acknowledgement; `Err` is a failed call.
#[async_trait]
pub trait ObjectClient: Send + Sync + std::fmt::Debug {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<PutOutcome>;
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    async fn list_objects(&self, bucket: &str, opts: ListOptions) -> Result<ObjectListing>;
    async fn copy_object(
        &self,
        from_bucket: &str,
        from_key: &str,
        to_bucket: &str,
        to_key: &str,
    ) -> Result<bool>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<bool>;
    /// Returns the keys the provider reports as deleted.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>>;
    async fn put_object_acl(&self, bucket: &str, key: &str, acl: &str) -> Result<()>;
    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<String>;
    async fn get_object_meta(&self, bucket: &str, key: &str) -> Result<ObjectMeta>;
    async fn does_object_exist(&self, bucket: &str, key: &str) -> Result<bool>;
    async fn sign_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String>;
    async fn create_object_dir(&self, bucket: &str, dir: &str) -> Result<bool>;

    /// Open a byte stream on a URL produced by [`ObjectClient::sign_url`].
    async fn open_url(&self, url: &str) -> Result<ObjectStream> {
        let response = reqwest::get(url).await?.error_for_status()?;
        Ok(ObjectStream::new(response.bytes_stream().map_err(Error::from)))
    }
}

/// Owned byte stream handed into writes and out of `read_stream`.
///
/// Dropping the stream closes whatever it reads from.
pub struct ObjectStream {
    inner: BoxStream<'static, Result<Bytes>>,
}

impl ObjectStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self::new(stream::once(async move { Ok(data) }))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(stream::try_unfold(reader, next_chunk))
    }

    pub async fn read_to_end(mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        while let Some(chunk) = self.inner.try_next().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

async fn next_chunk<R>(mut reader: R) -> Result<Option<(Bytes, R)>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some((Bytes::from(buf), reader)))
}

impl Stream for ObjectStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream").finish_non_exhaustive()
    }
}

impl From<Vec<u8>> for ObjectStream {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_to_end_joins_chunks() {
        let chunks = vec![Ok(Bytes::from_static(b"hel")), Ok(Bytes::from_static(b"lo"))];
        let data = ObjectStream::new(stream::iter(chunks)).read_to_end().await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_read_to_end_surfaces_errors() {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(Error::Storage("reset".into())),
        ];
        let err = ObjectStream::new(stream::iter(chunks)).read_to_end().await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_from_reader() {
        let data = vec![7u8; READ_CHUNK_SIZE + 10];
        let reader = std::io::Cursor::new(data.clone());
        let read = ObjectStream::from_reader(reader).read_to_end().await.unwrap();
        assert_eq!(read, data);
    }
}
