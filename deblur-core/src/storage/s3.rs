//! S3-compatible storage client
//!
//! Pure-Rust async client using reqwest against path-style endpoints
//! (MinIO, GCS interoperability, public buckets).

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ObjectStore;
use crate::error::{PipelineError, Result};

/// Configuration for S3 client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// S3 endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Region, informational for path-style endpoints
    pub region: String,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            bucket: "deblur".into(),
            region: "us-east-1".into(),
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
        }
    }
}

impl S3Config {
    /// Read `S3_ENDPOINT`, `S3_BUCKET` and `S3_REGION`, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: std::env::var("S3_ENDPOINT").unwrap_or(defaults.endpoint),
            bucket: std::env::var("S3_BUCKET").unwrap_or(defaults.bucket),
            region: std::env::var("S3_REGION").unwrap_or(defaults.region),
            ..defaults
        }
    }
}

/// S3-compatible storage client using reqwest
pub struct S3Client {
    client: Client,
    config: S3Config,
}

impl S3Client {
    /// Create a new S3 client
    pub fn new(config: S3Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| PipelineError::StorageError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    /// Build URL for an object
    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.config.endpoint, self.config.bucket, key)
    }

    /// Fetch one page of a ListObjectsV2 response
    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        let mut query: Vec<(&str, &str)> = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(token) = token {
            query.push(("continuation-token", token));
        }
        let url = format!("{}/{}", self.config.endpoint, self.config.bucket);

        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| PipelineError::StorageError {
                message: format!("List objects failed for prefix {}: {}", prefix, e),
            })?;

        if !resp.status().is_success() {
            return Err(PipelineError::StorageError {
                message: format!("List objects failed for prefix {}: status {}", prefix, resp.status()),
            });
        }

        let body = resp.text().await.map_err(|e| PipelineError::StorageError {
            message: format!("Failed to read list response: {}", e),
        })?;

        Ok(ListPage::parse(&body))
    }

    /// Get bucket name
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

impl ObjectStore for S3Client {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(prefix, token.as_deref()).await?;
            keys.extend(page.keys);
            match page.next_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }
        debug!("Listed {} objects under {}", keys.len(), prefix);
        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let url = self.object_url(key);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::StorageError {
                message: format!("Get object failed for {}: {}", key, e),
            })?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(PipelineError::ObjectNotFound { key: key.into() });
        }

        if !resp.status().is_success() {
            return Err(PipelineError::StorageError {
                message: format!("Get object failed for {}: status {}", key, resp.status()),
            });
        }

        resp.bytes().await.map_err(|e| PipelineError::StorageError {
            message: format!("Failed to read body for {}: {}", key, e),
        })
    }

    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        let url = self.object_url(key);
        let len = data.len();

        let resp = self
            .client
            .put(&url)
            .body(data)
            .send()
            .await
            .map_err(|e| PipelineError::StorageError {
                message: format!("Put object failed for {}: {}", key, e),
            })?;

        if !resp.status().is_success() {
            return Err(PipelineError::StorageError {
                message: format!("Put object failed for {}: status {}", key, resp.status()),
            });
        }

        debug!("Put {} complete ({} bytes)", key, len);
        Ok(())
    }
}

/// Keys and continuation state from one ListObjectsV2 page
#[derive(Debug, Default, PartialEq)]
struct ListPage {
    keys: Vec<String>,
    truncated: bool,
    next_token: Option<String>,
}

impl ListPage {
    fn parse(body: &str) -> Self {
        let keys = body
            .split("<Key>")
            .skip(1)
            .filter_map(|part| part.find("</Key>").map(|end| unescape_xml(&part[..end])))
            .collect();
        Self {
            keys,
            truncated: element(body, "IsTruncated").is_some_and(|v| v == "true"),
            next_token: element(body, "NextContinuationToken").map(unescape_xml),
        }
    }
}

fn element<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(&body[start..end])
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_page() {
        let body = r#"<?xml version="1.0"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>reds/train-00001.rec</Key><Size>10</Size></Contents>
  <Contents><Key>reds/train-00000.rec</Key><Size>10</Size></Contents>
  <NextContinuationToken>abc&amp;1</NextContinuationToken>
</ListBucketResult>"#;
        let page = ListPage::parse(body);
        assert_eq!(page.keys, vec!["reds/train-00001.rec", "reds/train-00000.rec"]);
        assert!(page.truncated);
        assert_eq!(page.next_token.as_deref(), Some("abc&1"));
    }

    #[test]
    fn test_parse_last_page() {
        let body = "<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>";
        assert_eq!(ListPage::parse(body), ListPage::default());
    }

    #[test]
    fn test_client_creation() {
        let client = S3Client::new(S3Config::default()).unwrap();
        assert_eq!(client.bucket(), "deblur");
        assert_eq!(client.object_url("a/b"), "http://localhost:9000/deblur/a/b");
    }
}
