use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use tokio::sync::Mutex;
use url::Url;

use super::{ListOptions, ObjectClient, ObjectListing, ObjectMeta, ObjectStream, ObjectSummary, PutOutcome};
use crate::{Error, Result};

const SCHEME: &str = "memory";
const DEFAULT_ACL: &str = "private";

/// Client operations that faults can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Put,
    Get,
    List,
    Copy,
    Delete,
    DeleteMany,
    PutAcl,
    GetAcl,
    Head,
    Exists,
    Sign,
    CreateDir,
    Open,
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
    last_modified: DateTime<Utc>,
    etag: String,
    acl: String,
}

impl StoredObject {
    fn new(body: Vec<u8>, content_type: &str) -> Self {
        Self {
            etag: format!("\"{:x}\"", md5::compute(&body)),
            body,
            content_type: content_type.to_string(),
            last_modified: Utc::now(),
            acl: DEFAULT_ACL.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    failures: HashSet<Operation>,
    rejections: HashSet<Operation>,
    last_signed: Option<(Duration, String)>,
}

impl State {
    fn check(&self, op: Operation, key: &str) -> Result<()> {
        if self.failures.contains(&op) {
            return Err(Error::Storage(format!("injected {:?} failure at: {}", op, key)));
        }
        Ok(())
    }

    fn rejected(&self, op: Operation) -> bool {
        self.rejections.contains(&op)
    }

    fn bucket(&self, bucket: &str) -> Option<&BTreeMap<String, StoredObject>> {
        self.buckets.get(bucket)
    }

    fn bucket_mut(&mut self, bucket: &str) -> &mut BTreeMap<String, StoredObject> {
        self.buckets.entry(bucket.to_string()).or_default()
    }

    fn object(&self, bucket: &str, key: &str) -> Result<&StoredObject> {
        self.bucket(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| Error::NotFound(format!("{}/{}", bucket, key)))
    }
}

/// In-process object store.
///
/// Behaves like a single-region S3 endpoint: flat keys, delimiter grouping,
/// zero-byte directory markers. Faults can be injected per operation,
/// either as a failed call (`fail_on`) or as a negative acknowledgement
/// (`reject`) for the calls that return one.
#[derive(Debug, Default)]
pub struct MemoryClient {
    state: Mutex<State>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_on(&self, op: Operation) {
        self.state.lock().await.failures.insert(op);
    }

    pub async fn reject(&self, op: Operation) {
        self.state.lock().await.rejections.insert(op);
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.lock().await;
        state.failures.clear();
        state.rejections.clear();
    }

    /// Expiry and URL of the most recent `sign_url` call.
    pub async fn last_signed(&self) -> Option<(Duration, String)> {
        self.state.lock().await.last_signed.clone()
    }

    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .bucket(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn parse_signed_url(url: &str) -> Result<(String, String, i64)> {
    let url = Url::parse(url)?;
    if url.scheme() != SCHEME {
        return Err(Error::Validation(format!("not a memory url: {}", url)));
    }

    let bucket = url
        .host_str()
        .ok_or_else(|| Error::Validation(format!("missing bucket in: {}", url)))?
        .to_string();

    let mut segments = Vec::new();
    for segment in url.path_segments().into_iter().flatten() {
        let decoded = percent_decode_str(segment)
            .decode_utf8()
            .map_err(|e| Error::InvalidData(format!("bad key segment in {}: {}", url, e)))?;
        segments.push(decoded.into_owned());
    }

    let expires = url
        .query_pairs()
        .find(|(name, _)| name == "expires")
        .and_then(|(_, value)| value.parse::<i64>().ok())
        .ok_or_else(|| Error::Validation(format!("missing expiry in: {}", url)))?;

    Ok((bucket, segments.join("/"), expires))
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<PutOutcome> {
        let mut state = self.state.lock().await;
        state.check(Operation::Put, key)?;

        let object = StoredObject::new(body, content_type.unwrap_or("application/octet-stream"));
        let etag = object.etag.clone();
        state.bucket_mut(bucket).insert(key.to_string(), object);

        Ok(PutOutcome { etag: Some(etag) })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        state.check(Operation::Get, key)?;
        Ok(state.object(bucket, key)?.body.clone())
    }

    async fn list_objects(&self, bucket: &str, opts: ListOptions) -> Result<ObjectListing> {
        let state = self.state.lock().await;
        let prefix = opts.prefix.unwrap_or_default();
        state.check(Operation::List, &prefix)?;

        let mut listing = ObjectListing::default();
        let mut prefixes = BTreeSet::new();

        let Some(objects) = state.bucket(bucket) else {
            return Ok(listing);
        };

        for (key, object) in objects.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                break;
            };

            if let Some(delimiter) = opts.delimiter.as_deref() {
                if let Some(idx) = rest.find(delimiter) {
                    prefixes.insert(format!("{}{}", prefix, &rest[..idx + delimiter.len()]));
                    continue;
                }
            }

            listing.objects.push(ObjectSummary {
                key: key.clone(),
                size: object.body.len() as u64,
                last_modified: Some(object.last_modified),
            });
        }

        listing.prefixes = prefixes.into_iter().collect();
        Ok(listing)
    }

    async fn copy_object(
        &self,
        from_bucket: &str,
        from_key: &str,
        to_bucket: &str,
        to_key: &str,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.check(Operation::Copy, from_key)?;
        if state.rejected(Operation::Copy) {
            return Ok(false);
        }

        let mut object = state.object(from_bucket, from_key)?.clone();
        object.last_modified = Utc::now();
        state.bucket_mut(to_bucket).insert(to_key.to_string(), object);
        Ok(true)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.check(Operation::Delete, key)?;
        if state.rejected(Operation::Delete) {
            return Ok(false);
        }

        // S3 acknowledges deletes of missing keys.
        state.bucket_mut(bucket).remove(key);
        Ok(true)
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.check(Operation::DeleteMany, bucket)?;
        if state.rejected(Operation::DeleteMany) {
            return Ok(Vec::new());
        }

        let objects = state.bucket_mut(bucket);
        for key in keys {
            objects.remove(key);
        }
        Ok(keys.to_vec())
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check(Operation::PutAcl, key)?;

        let object = state
            .bucket_mut(bucket)
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", bucket, key)))?;
        object.acl = acl.to_string();
        Ok(())
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<String> {
        let state = self.state.lock().await;
        state.check(Operation::GetAcl, key)?;
        Ok(state.object(bucket, key)?.acl.clone())
    }

    async fn get_object_meta(&self, bucket: &str, key: &str) -> Result<ObjectMeta> {
        let state = self.state.lock().await;
        state.check(Operation::Head, key)?;

        let object = state.object(bucket, key)?;
        Ok(ObjectMeta {
            content_type: Some(object.content_type.clone()),
            last_modified: Some(object.last_modified),
            content_length: object.body.len() as u64,
            etag: Some(object.etag.clone()),
        })
    }

    async fn does_object_exist(&self, bucket: &str, key: &str) -> Result<bool> {
        let state = self.state.lock().await;
        state.check(Operation::Exists, key)?;
        Ok(state.bucket(bucket).is_some_and(|objects| objects.contains_key(key)))
    }

    async fn sign_url(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String> {
        let mut state = self.state.lock().await;
        state.check(Operation::Sign, key)?;

        let expires = i64::try_from(expires_in.as_secs())
            .ok()
            .and_then(|secs| Utc::now().timestamp().checked_add(secs))
            .ok_or_else(|| Error::Validation(format!("expiry out of range: {:?}", expires_in)))?;

        let mut url = Url::parse(&format!("{}://{}", SCHEME, bucket))?;
        url.path_segments_mut()
            .map_err(|_| Error::Validation(format!("cannot sign key in bucket: {}", bucket)))?
            .extend(key.split('/'));
        url.query_pairs_mut().append_pair("expires", &expires.to_string());

        let url = url.to_string();
        state.last_signed = Some((expires_in, url.clone()));
        Ok(url)
    }

    async fn create_object_dir(&self, bucket: &str, dir: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.check(Operation::CreateDir, dir)?;
        if state.rejected(Operation::CreateDir) {
            return Ok(false);
        }

        let marker = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{}/", dir)
        };
        state
            .bucket_mut(bucket)
            .insert(marker, StoredObject::new(Vec::new(), "application/x-directory"));
        Ok(true)
    }

    async fn open_url(&self, url: &str) -> Result<ObjectStream> {
        let (bucket, key, expires) = parse_signed_url(url)?;

        let state = self.state.lock().await;
        state.check(Operation::Open, &key)?;
        if Utc::now().timestamp() > expires {
            return Err(Error::Storage(format!("signed url expired: {}", url)));
        }

        Ok(ObjectStream::from_bytes(state.object(&bucket, &key)?.body.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: &str = "test";

    async fn seeded(keys: &[&str]) -> MemoryClient {
        let client = MemoryClient::new();
        for key in keys {
            client.put_object(BUCKET, key, b"x".to_vec(), None).await.unwrap();
        }
        client
    }

    #[tokio::test]
    async fn test_list_groups_by_delimiter() {
        let client = seeded(&["a/", "a/one.txt", "a/b/two.txt", "a/c/", "ab.txt"]).await;

        let listing = client
            .list_objects(
                BUCKET,
                ListOptions {
                    prefix: Some("a/".into()),
                    delimiter: Some("/".into()),
                },
            )
            .await
            .unwrap();

        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/", "a/one.txt"]);
        assert_eq!(listing.prefixes, vec!["a/b/", "a/c/"]);
    }

    #[tokio::test]
    async fn test_list_without_delimiter_is_flat() {
        let client = seeded(&["a/one.txt", "a/b/two.txt", "b.txt"]).await;

        let listing = client
            .list_objects(
                BUCKET,
                ListOptions {
                    prefix: Some("a/".into()),
                    delimiter: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(listing.objects.len(), 2);
        assert!(listing.prefixes.is_empty());
    }

    #[tokio::test]
    async fn test_signed_url_round_trip() {
        let client = seeded(&["dir/with space.txt"]).await;

        let url = client
            .sign_url(BUCKET, "dir/with space.txt", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("memory://test/dir/with%20space.txt?expires="));

        let body = client.open_url(&url).await.unwrap().read_to_end().await.unwrap();
        assert_eq!(body, b"x");
    }

    #[tokio::test]
    async fn test_sign_rejects_out_of_range_expiry() {
        let client = seeded(&["a.txt"]).await;
        let err = client
            .sign_url(BUCKET, "a.txt", Duration::from_secs(u64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(client.last_signed().await.is_none());

        let err = client
            .sign_url(BUCKET, "a.txt", Duration::from_secs(i64::MAX as u64))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_expired_url() {
        let client = seeded(&["a.txt"]).await;
        let url = format!("memory://{}/a.txt?expires=0", BUCKET);
        assert!(client.open_url(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_faults() {
        let client = seeded(&["a.txt"]).await;

        client.reject(Operation::Copy).await;
        assert!(!client.copy_object(BUCKET, "a.txt", BUCKET, "b.txt").await.unwrap());

        client.fail_on(Operation::Delete).await;
        assert!(client.delete_object(BUCKET, "a.txt").await.is_err());

        client.clear_faults().await;
        assert!(client.delete_object(BUCKET, "a.txt").await.unwrap());
        assert!(client.keys(BUCKET).await.is_empty());
    }

    #[tokio::test]
    async fn test_etag_is_md5() {
        let client = MemoryClient::new();
        let outcome = client.put_object(BUCKET, "h.txt", b"hello".to_vec(), None).await.unwrap();
        assert_eq!(outcome.etag.as_deref(), Some("\"5d41402abc4b2a76b9719d911017c592\""));
    }
}
