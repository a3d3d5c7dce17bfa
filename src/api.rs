//! REST collaborators: chat list, message logs and media upload.

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::error::ApiError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::types::{Chat, ChatMessages};

/// Source of server snapshots for the chat cache.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn fetch_chats(&self) -> Result<Vec<Chat>, ApiError>;

    async fn fetch_chat_messages(&self, chat_id: &str) -> Result<ChatMessages, ApiError>;
}

/// [`ChatBackend`] over the console's REST API.
pub struct RestBackend {
    pub(crate) http_client: Arc<dyn HttpClient>,
    pub(crate) api_url: String,
    pub(crate) auth_token: Option<String>,
}

impl RestBackend {
    pub fn new(http_client: Arc<dyn HttpClient>, api_url: impl Into<String>) -> Self {
        Self {
            http_client,
            api_url: api_url.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    pub(crate) async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let request = match &self.auth_token {
            Some(token) => request.with_header("Authorization", format!("Bearer {token}")),
            None => request,
        };
        let url = request.url.clone();
        debug!("{} {}", request.method, url);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| ApiError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.is_success() {
            return Err(ApiError::Status {
                url,
                status: response.status_code,
                body: response.body_string(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let request = HttpRequest::get(self.url(path)).with_header("Accept", "application/json");
        let response = self.execute(request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }
}

#[async_trait]
impl ChatBackend for RestBackend {
    async fn fetch_chats(&self) -> Result<Vec<Chat>, ApiError> {
        self.get_json("chats").await
    }

    async fn fetch_chat_messages(&self, chat_id: &str) -> Result<ChatMessages, ApiError> {
        let path = format!("chats/{}/messages", urlencoding::encode(chat_id));
        self.get_json(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingHttpClient;

    #[tokio::test]
    async fn fetches_chat_list_with_bearer_token() {
        let http = Arc::new(RecordingHttpClient::with_response(
            200,
            r#"[{"id":"1","client":{"profileName":"Ana"},"newClientMessagesCount":2}]"#,
        ));
        let backend = RestBackend::new(http.clone(), "https://api.example.com/api")
            .with_auth_token(Some("tok".into()));

        let chats = backend.fetch_chats().await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].new_client_messages_count, 2);

        let requests = http.requests().await;
        assert_eq!(requests[0].url, "https://api.example.com/api/chats");
        assert_eq!(requests[0].method, "GET");
        assert_eq!(
            requests[0].headers.get("Authorization").map(String::as_str),
            Some("Bearer tok")
        );
    }

    #[tokio::test]
    async fn chat_id_is_path_encoded() {
        let http = Arc::new(RecordingHttpClient::with_response(
            200,
            r#"{"messages":[],"thread":{"enabled":true}}"#,
        ));
        let backend = RestBackend::new(http.clone(), "http://localhost/api");

        let log = backend.fetch_chat_messages("a/b").await.unwrap();
        assert!(log.thread.enabled);
        assert_eq!(
            http.requests().await[0].url,
            "http://localhost/api/chats/a%2Fb/messages"
        );
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let http = Arc::new(RecordingHttpClient::with_response(503, "maintenance"));
        let backend = RestBackend::new(http, "http://localhost/api");

        match backend.fetch_chats().await {
            Err(ApiError::Status { status, body, .. }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let http = Arc::new(RecordingHttpClient::with_response(200, "{not json"));
        let backend = RestBackend::new(http, "http://localhost/api");
        assert!(matches!(
            backend.fetch_chats().await,
            Err(ApiError::Decode(_))
        ));
    }
}
