//! OpenAI Images API implementation.
//!
//! Uses `images/generations` with a JSON body and `images/edits` with a
//! multipart body. Results are requested as base64 and decoded here.

use super::{ImageService, ServiceError};
use crate::command::{Flag, ImageRequest};
use crate::message::UploadItem;
use async_trait::async_trait;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_MODEL: &str = "gpt-image-1";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Images API client.
pub struct OpenAiImages {
    api_key: String,
    client: Client,
    model: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAiImages {
    /// Create a new client against the public API.
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, model, Duration::from_secs(300))
    }

    /// Create with a custom base URL (for OpenAI-compatible providers).
    pub fn with_base_url(
        api_key: String,
        base_url: &str,
        model: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_key,
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn generation_body(&self, request: &ImageRequest) -> serde_json::Value {
        serde_json::json!({
            "prompt": request.prompt,
            "model": self.model,
            "n": request.count,
            "size": request.size,
            "quality": request.quality,
            "background": request.background,
        })
    }

    fn edit_form(&self, request: &ImageRequest, images: &[UploadItem]) -> Result<Form, ServiceError> {
        let mut form = Form::new();
        for image in images {
            let part = Part::bytes(image.data().to_vec())
                .file_name(image.filename().to_string())
                .mime_str(image.mime_type())
                .map_err(|e| ServiceError::Encode(e.to_string()))?;
            form = form.part("image[]", part);
        }

        form = form
            .text("prompt", request.prompt.clone())
            .text("model", self.model.clone());

        for flag in &request.explicit {
            let value = match flag {
                Flag::Count => request.count.to_string(),
                Flag::Size => request.size.clone(),
                Flag::Quality => request.quality.clone(),
                Flag::Background => request.background.clone(),
            };
            form = form.text(flag.name(), value);
        }
        Ok(form)
    }

    async fn read_images(response: reqwest::Response) -> Result<Vec<Vec<u8>>, ServiceError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ImagesResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::Decode(e.to_string()))?;

        let images = parsed
            .data
            .into_iter()
            .filter_map(|d| d.b64_json)
            .map(|b64| {
                base64::engine::general_purpose::STANDARD
                    .decode(b64)
                    .map_err(|e| ServiceError::Decode(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if images.is_empty() {
            return Err(ServiceError::Empty);
        }
        Ok(images)
    }
}

#[async_trait]
impl ImageService for OpenAiImages {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &ImageRequest) -> Result<Vec<Vec<u8>>, ServiceError> {
        let body = serde_json::to_vec(&self.generation_body(request))
            .map_err(|e| ServiceError::Encode(e.to_string()))?;

        let response = self
            .client
            .post(self.endpoint("images/generations"))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let images = Self::read_images(response).await?;
        tracing::info!(count = images.len(), "OpenAI images generated");
        Ok(images)
    }

    async fn edit(
        &self,
        request: &ImageRequest,
        images: &[UploadItem],
    ) -> Result<Vec<Vec<u8>>, ServiceError> {
        let form = self.edit_form(request, images)?;

        let response = self
            .client
            .post(self.endpoint("images/edits"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let edited = Self::read_images(response).await?;
        tracing::info!(
            inputs = images.len(),
            count = edited.len(),
            "OpenAI images edited"
        );
        Ok(edited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAiImages {
        OpenAiImages::with_base_url(
            "sk-test".into(),
            &format!("{}/v1/", server.uri()),
            None,
            Duration::from_secs(5),
        )
    }

    fn b64(data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    #[test]
    fn creates_with_defaults() {
        let images = OpenAiImages::new("sk-test".into(), None);
        assert_eq!(images.model, "gpt-image-1");
        assert_eq!(images.base_url, "https://api.openai.com/v1");
        assert_eq!(
            images.endpoint("images/edits"),
            "https://api.openai.com/v1/images/edits"
        );
    }

    #[test]
    fn generation_body_carries_all_settings() {
        let images = OpenAiImages::new("sk-test".into(), Some("custom".into()));
        let request = ImageRequest::parse("fox -n 3 -background transparent").unwrap();
        let body = images.generation_body(&request);
        assert_eq!(body["prompt"], "fox");
        assert_eq!(body["model"], "custom");
        assert_eq!(body["n"], 3);
        assert_eq!(body["size"], "1024x1024");
        assert_eq!(body["background"], "transparent");
    }

    #[test]
    fn edit_form_accepts_sniffed_upload() {
        let images = OpenAiImages::new("sk-test".into(), None);
        let request = ImageRequest::parse("-edit fox").unwrap();
        let item = UploadItem::from_download(b"\x89PNG\r\n\x1a\n".to_vec(), Some("a.png"));
        assert!(images.edit_form(&request, &[item]).is_ok());
    }

    #[tokio::test]
    async fn generate_decodes_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"prompt": "a cat", "n": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"b64_json": b64(b"one")}, {"b64_json": b64(b"two")}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = ImageRequest::parse("a cat -n 2").unwrap();
        let images = client(&server).generate(&request).await.unwrap();
        assert_eq!(images, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn api_error_text_is_relayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "Your request was rejected by the safety system.", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let request = ImageRequest::parse("something").unwrap();
        let err = client(&server).generate(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Api { status: 400, .. }));
        assert_eq!(err.to_string(), "Your request was rejected by the safety system.");
    }

    #[tokio::test]
    async fn edit_posts_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/edits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"b64_json": b64(b"edited")}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = ImageRequest::parse("-edit add a hat -size 1024x1536").unwrap();
        let item = UploadItem::from_download(b"\xff\xd8\xffdata".to_vec(), Some("cat"));
        let images = client(&server).edit(&request, &[item]).await.unwrap();
        assert_eq!(images, vec![b"edited".to_vec()]);

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("name=\"image[]\"; filename=\"cat.jpg\""));
        assert!(body.contains("name=\"size\""));
        assert!(!body.contains("name=\"n\""));
    }

    #[tokio::test]
    async fn empty_result_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let request = ImageRequest::parse("fox").unwrap();
        let err = client(&server).generate(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Empty));
    }
}
