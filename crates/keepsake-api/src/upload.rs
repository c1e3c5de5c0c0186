use async_trait::async_trait;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

/// The external image host. One file per call; on success the returned URL is
/// stable and durable. No retries here — failure policy belongs to the caller.
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(&self, filename: &str, content: Bytes) -> Result<String, UploadError>;
}

/// Cloudinary's signed upload API.
pub struct Cloudinary {
    http: reqwest::Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl Cloudinary {
    pub fn new(
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Credentials from CLOUDINARY_* env vars. Missing credentials surface as
    /// rejected uploads at request time, not as a startup failure.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("CLOUDINARY_CLOUD_NAME").unwrap_or_else(|_| "demo".into()),
            std::env::var("CLOUDINARY_API_KEY").unwrap_or_default(),
            std::env::var("CLOUDINARY_API_SECRET").unwrap_or_default(),
        )
    }

    /// hex(sha1("timestamp={ts}" + api_secret)) — Cloudinary's request
    /// signature over the parameters being sent (only `timestamp` here).
    fn signature(&self, timestamp: i64) -> String {
        let mut hasher = Sha1::new();
        hasher.update(format!("timestamp={}{}", timestamp, self.api_secret).as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl ImageHost for Cloudinary {
    async fn upload(&self, filename: &str, content: Bytes) -> Result<String, UploadError> {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = self.signature(timestamp);

        let part = reqwest::multipart::Part::bytes(content.to_vec()).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp.to_string())
            .text("signature", signature);

        let endpoint = format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            self.cloud_name
        );
        let resp = self.http.post(&endpoint).multipart(form).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(UploadError::Rejected(format!("{status}: {body}")));
        }

        let body: serde_json::Value = resp.json().await?;
        body.get("secure_url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| UploadError::Rejected("response missing secure_url".into()))
    }
}
