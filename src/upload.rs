use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::watch;

use crate::api::RestBackend;
use crate::error::ApiError;
use crate::http::HttpRequest;

/// A local file waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub bytes: Vec<u8>,
    pub mimetype: String,
    pub filename: Option<String>,
}

impl MediaFile {
    pub fn new(bytes: Vec<u8>, mimetype: impl Into<String>) -> Self {
        Self {
            bytes,
            mimetype: mimetype.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Upload state published on a watch channel.
///
/// The [`HttpClient`](crate::http::HttpClient) seam sends the body in one
/// request, so `Uploading` is reported at `sent: 0` before the request and at
/// `sent: total` once it returns. There are no intermediate byte counts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UploadProgress {
    #[default]
    Pending,
    Uploading { sent: u64, total: u64 },
    Done { url: String },
    Failed { reason: String },
}

/// Uploads attachments and returns the URL they are served from.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(
        &self,
        file: &MediaFile,
        progress: &watch::Sender<UploadProgress>,
    ) -> Result<String, ApiError>;
}

#[derive(Deserialize)]
struct RawUploadResponse {
    url: String,
}

#[async_trait]
impl MediaUploader for RestBackend {
    async fn upload(
        &self,
        file: &MediaFile,
        progress: &watch::Sender<UploadProgress>,
    ) -> Result<String, ApiError> {
        let total = file.bytes.len() as u64;
        progress.send_replace(UploadProgress::Uploading { sent: 0, total });

        let mut request = HttpRequest::post(self.url("media/upload"))
            .with_header("Content-Type", file.mimetype.clone())
            .with_body(file.bytes.clone());
        if let Some(name) = &file.filename {
            request = request.with_header("X-Filename", urlencoding::encode(name).into_owned());
        }

        let result = async {
            let response = self.execute(request).await?;
            let raw: RawUploadResponse = serde_json::from_slice(&response.body)?;
            Ok::<_, ApiError>(raw.url)
        }
        .await;

        match result {
            Ok(url) => {
                debug!("Uploaded {total} bytes to {url}");
                progress.send_replace(UploadProgress::Uploading { sent: total, total });
                progress.send_replace(UploadProgress::Done { url: url.clone() });
                Ok(url)
            }
            Err(e) => {
                warn!("Upload of {total} bytes failed: {e}");
                progress.send_replace(UploadProgress::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingHttpClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn upload_posts_raw_bytes_and_reports_progress() {
        let http = Arc::new(RecordingHttpClient::with_response(
            200,
            r#"{"url":"https://cdn.example.com/u/abc"}"#,
        ));
        let backend = RestBackend::new(http.clone(), "https://api.example.com/api");
        let (progress, progress_rx) = watch::channel(UploadProgress::Pending);

        let file = MediaFile::new(vec![1, 2, 3], "application/pdf").with_filename("mi factura.pdf");
        let url = backend.upload(&file, &progress).await.unwrap();

        assert_eq!(url, "https://cdn.example.com/u/abc");
        assert_eq!(
            *progress_rx.borrow(),
            UploadProgress::Done {
                url: "https://cdn.example.com/u/abc".into()
            }
        );

        let requests = http.requests().await;
        assert_eq!(requests[0].url, "https://api.example.com/api/media/upload");
        assert_eq!(requests[0].body.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(
            requests[0].headers.get("Content-Type").map(String::as_str),
            Some("application/pdf")
        );
        assert_eq!(
            requests[0].headers.get("X-Filename").map(String::as_str),
            Some("mi%20factura.pdf")
        );
    }

    #[tokio::test]
    async fn failed_upload_marks_progress_failed() {
        let http = Arc::new(RecordingHttpClient::with_response(413, "too large"));
        let backend = RestBackend::new(http, "https://api.example.com/api");
        let (progress, progress_rx) = watch::channel(UploadProgress::Pending);

        let file = MediaFile::new(vec![0; 16], "video/mp4");
        assert!(backend.upload(&file, &progress).await.is_err());
        assert!(matches!(
            *progress_rx.borrow(),
            UploadProgress::Failed { .. }
        ));
    }
}
