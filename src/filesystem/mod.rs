use async_trait::async_trait;
use serde::Serialize;
use crate::client::ObjectStream;
use crate::Result;

pub mod adapter;

pub use adapter::ObjectStorageAdapter;

/// Per-write settings.
#[derive(Debug, Default, Clone)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    /// Canned ACL the provider understands.
    pub fn acl(&self) -> &'static str {
        match self {
            Visibility::Public => "public-read",
            Visibility::Private => "private",
        }
    }
}

impl From<&str> for Visibility {
    fn from(value: &str) -> Self {
        if value == "public" {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(tag = "type", rename = "file")]
pub struct FileRecord {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip)]
    pub contents: Option<Vec<u8>>,
    #[serde(skip)]
    pub stream: Option<ObjectStream>,
}

impl FileRecord {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "dir")]
pub struct DirectoryRecord {
    pub path: String,
}

impl DirectoryRecord {
    pub fn new(prefix: &str) -> Self {
        Self {
            path: strip_trailing_slash(prefix).to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Entry {
    File(FileRecord),
    Dir(DirectoryRecord),
}

impl Entry {
    pub fn path(&self) -> &str {
        match self {
            Entry::File(file) => &file.path,
            Entry::Dir(dir) => &dir.path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Entry::File(_) => "file",
            Entry::Dir(_) => "dir",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteResult {
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

/// Provider-native ACL of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibilityRecord {
    pub path: String,
    pub visibility: String,
}

/// Directory prefix used for listing queries: `path` with exactly one
/// trailing slash guaranteed.
pub fn to_directory_prefix(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

pub fn strip_trailing_slash(path: &str) -> &str {
    path.strip_suffix('/').unwrap_or(path)
}

/// File/directory surface over a storage backend.
#[async_trait]
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    async fn write(&self, path: &str, contents: Vec<u8>, opts: WriteOptions) -> Result<WriteResult>;
    async fn write_stream(&self, path: &str, stream: ObjectStream, opts: WriteOptions) -> Result<WriteResult>;

    async fn update(&self, path: &str, contents: Vec<u8>, opts: WriteOptions) -> Result<WriteResult> {
        self.write(path, contents, opts).await
    }

    async fn update_stream(&self, path: &str, stream: ObjectStream, opts: WriteOptions) -> Result<WriteResult> {
        self.write_stream(path, stream, opts).await
    }

    async fn rename(&self, path: &str, new_path: &str) -> Result<bool>;
    async fn copy(&self, path: &str, new_path: &str) -> Result<bool>;
    async fn delete(&self, path: &str) -> Result<bool>;
    async fn delete_dir(&self, dirname: &str) -> Result<bool>;
    async fn create_dir(&self, dirname: &str) -> Result<bool>;
    async fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<bool>;
    async fn has(&self, path: &str) -> Result<bool>;
    async fn read(&self, path: &str) -> Result<FileRecord>;
    async fn read_stream(&self, path: &str) -> Result<FileRecord>;
    async fn list_contents(&self, directory: &str, recursive: bool) -> Result<Vec<Entry>>;
    async fn get_metadata(&self, path: &str) -> Result<FileRecord>;

    // The accessors below return the whole metadata record, not one field.

    async fn get_size(&self, path: &str) -> Result<FileRecord> {
        self.get_metadata(path).await
    }

    async fn get_mimetype(&self, path: &str) -> Result<FileRecord> {
        self.get_metadata(path).await
    }

    async fn get_timestamp(&self, path: &str) -> Result<FileRecord> {
        self.get_metadata(path).await
    }

    async fn get_visibility(&self, path: &str) -> Result<VisibilityRecord>;
}
