//! Uploads into the caller's application-data folder on the file store.
//!
//! Files land under `files/{appdata}/{name}`, the same path form the
//! extraction tool downloads from, so attachments can be read back.

use async_trait::async_trait;
use serde::Deserialize;
use tooloop_core::error::ToolError;
use tracing::debug;
use url::Url;

/// Where generated files are kept.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `data` as `name` with the caller's credential and return the
    /// path the file is reachable under.
    async fn upload(
        &self,
        api_key: Option<&str>,
        name: &str,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<String, ToolError>;
}

/// The caller's bucket, as reported by the file store.
#[derive(Debug, Deserialize)]
struct Bucket {
    bucket: String,
    #[serde(default)]
    appdata: Option<String>,
}

/// File store reached over HTTP next to the chat completions endpoint.
pub struct AppDataStore {
    client: reqwest::Client,
    base: Url,
}

impl AppDataStore {
    pub fn new(endpoint: &str) -> Result<Self, ToolError> {
        let base = Url::parse(&format!("{}/", endpoint.trim_end_matches('/')))
            .map_err(|e| ToolError::Unavailable(format!("invalid file store endpoint '{endpoint}': {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ToolError> {
        self.base
            .join(path)
            .map_err(|e| ToolError::Unavailable(format!("invalid file store path '{path}': {e}")))
    }

    fn authorized(builder: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
        match api_key {
            Some(key) => builder.bearer_auth(key).header("api-key", key),
            None => builder,
        }
    }

    /// Application-data folder of the caller.
    async fn appdata_home(&self, api_key: Option<&str>) -> Result<String, ToolError> {
        let response = Self::authorized(self.client.get(self.url("bucket")?), api_key)
            .send()
            .await
            .map_err(|e| ToolError::Unavailable(format!("file store bucket lookup failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Unavailable(format!("file store bucket lookup returned {status}")));
        }
        let bucket: Bucket = response
            .json()
            .await
            .map_err(|e| ToolError::Unavailable(format!("unexpected bucket response: {e}")))?;
        bucket
            .appdata
            .ok_or_else(|| ToolError::Unavailable(format!("bucket {} has no appdata folder", bucket.bucket)))
    }
}

#[async_trait]
impl FileStore for AppDataStore {
    async fn upload(
        &self,
        api_key: Option<&str>,
        name: &str,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<String, ToolError> {
        let home = self.appdata_home(api_key).await?;
        let path = upload_path(&home, name);
        debug!(path = %path, mime_type, bytes = data.len(), "Uploading file");

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(name.to_string())
            .mime_str(mime_type)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid mime type '{mime_type}': {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = Self::authorized(self.client.put(self.url(&path)?), api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ToolError::Unavailable(format!("upload of {path} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Unavailable(format!("upload of {path} returned {status}")));
        }
        Ok(path)
    }
}

/// Storage path of `name` inside the appdata folder `home`.
fn upload_path(home: &str, name: &str) -> String {
    let name = name.rsplit('/').next().unwrap_or(name);
    format!("files/{}/{name}", home.trim_matches('/'))
}
