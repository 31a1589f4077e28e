use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use sha1::{Digest, Sha1};

const DEFAULT_API_BASE: &str = "https://api.cloudinary.com";

/// Remote descriptor returned by the media service after a successful upload.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedMedia {
    #[serde(rename = "secure_url")]
    pub url: String,
    pub public_id: String,
    pub resource_type: String,
    pub duration: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
enum UploadError {
    #[error("failed to read local file: {0}")]
    Io(#[from] std::io::Error),
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("media service returned {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Client for the hosted media-upload service.
///
/// `upload` never raises: it deletes the local temp file on every exit path and
/// reports failure as `None`, logging the underlying cause. Callers only ever
/// observe "no result".
#[derive(Clone)]
pub struct MediaStorage {
    http: reqwest::Client,
    base_url: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl MediaStorage {
    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Self {
        Self::with_base_url(DEFAULT_API_BASE.to_string(), cloud_name, api_key, api_secret)
    }

    pub fn with_base_url(
        base_url: String,
        cloud_name: String,
        api_key: String,
        api_secret: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            cloud_name,
            api_key,
            api_secret,
        }
    }

    /// Upload a local temp file, auto-detecting the resource type remotely.
    /// The temp file is removed whether the upload succeeds or fails.
    pub async fn upload(&self, local_path: &Path) -> Option<UploadedMedia> {
        let _cleanup = TempFileGuard::new(local_path);

        match self.try_upload(local_path).await {
            Ok(media) => {
                tracing::info!(
                    public_id = %media.public_id,
                    resource_type = %media.resource_type,
                    "uploaded media asset"
                );
                Some(media)
            }
            Err(e) => {
                tracing::error!(path = %local_path.display(), error = %e, "media upload failed");
                None
            }
        }
    }

    async fn try_upload(&self, local_path: &Path) -> Result<UploadedMedia, UploadError> {
        let data = tokio::fs::read(local_path).await?;

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let mime_type = mime_guess::from_path(local_path)
            .first_or_octet_stream()
            .to_string();

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .to_string();
        let signature = self.sign(&timestamp);

        let file_part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str(&mime_type)?;
        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature);

        // resource_type "auto" lets the service classify video vs. image.
        let url = format!("{}/v1_1/{}/auto/upload", self.base_url, self.cloud_name);
        let response = self.http.post(&url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected { status, body });
        }

        Ok(response.json::<UploadedMedia>().await?)
    }

    fn sign(&self, timestamp: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(format!("timestamp={}{}", timestamp, self.api_secret));
        hex::encode(hasher.finalize())
    }
}

/// Removes the guarded file when the scope exits, on success, error, or panic.
struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}
