use serde::Deserialize;
use std::fs;
use std::path::Path;
use url::Url;
use crate::{Error, Result};

pub const DEFAULT_REGION: &str = "us-east-1";

const ENV_ACCESS_KEY: &str = "BUCKETFS_ACCESS_KEY";
const ENV_SECRET_KEY: &str = "BUCKETFS_SECRET_KEY";
const ENV_BUCKET: &str = "BUCKETFS_BUCKET";
const ENV_ENDPOINT: &str = "BUCKETFS_ENDPOINT";

/// Connection settings for one bucket on one endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    #[serde(rename = "accessKey")]
    pub access_key: String,
    #[serde(rename = "secretKey")]
    pub secret_key: String,
    pub bucket: String,
    pub endpoint: String,
    pub region: Option<String>,
    #[serde(rename = "forcePathStyle")]
    pub force_path_style: Option<bool>,
}

impl AdapterConfig {
    pub fn new(access_key: &str, secret_key: &str, bucket: &str, endpoint: &str) -> Result<Self> {
        let config = Self {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            bucket: bucket.to_string(),
            endpoint: endpoint.to_string(),
            region: None,
            force_path_style: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("accessKey", &self.access_key),
            ("secretKey", &self.secret_key),
            ("bucket", &self.bucket),
            ("endpoint", &self.endpoint),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{} must be non-empty", name)));
            }
        }

        let endpoint = Url::parse(&self.endpoint)?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(Error::Validation(format!(
                "endpoint must be an http or https url, got: {}",
                self.endpoint
            )));
        }

        Ok(())
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    pub fn force_path_style(&self) -> bool {
        self.force_path_style.unwrap_or(true)
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(rename = "loglevel")]
    pub loglevel: Option<String>,
    #[serde(rename = "storage")]
    pub storage: AdapterConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.storage.validate()?;
        Ok(config)
    }

    /// Replace storage settings with values found through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = &mut self.storage;
        for (name, field) in [
            (ENV_ACCESS_KEY, &mut storage.access_key),
            (ENV_SECRET_KEY, &mut storage.secret_key),
            (ENV_BUCKET, &mut storage.bucket),
            (ENV_ENDPOINT, &mut storage.endpoint),
        ] {
            if let Some(value) = lookup(name) {
                *field = value;
            }
        }
    }

    pub fn loglevel(&self) -> &str {
        self.loglevel.as_deref().unwrap_or("info")
    }
}
