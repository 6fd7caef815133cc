//! Image generation service client
//!
//! Implements [`GenerationPort`] against a small HTTP service:
//!
//! - `POST {base}/generate?prompt=...` with the raw drawing, returns the artwork
//! - `POST {base}/remove-background` with an image, returns the cut-out
//!
//! Bodies are raw image bytes both ways.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client};

use crate::ports::{GeneratedImage, GenerationError, GenerationPort};

#[derive(Clone)]
pub struct HttpGenerationClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpGenerationClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    async fn post_image(
        &self,
        path: &str,
        image: &[u8],
        prompt: Option<&str>,
    ) -> Result<GeneratedImage, GenerationError> {
        let started = Instant::now();
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec());
        if let Some(prompt) = prompt {
            request = request.query(&[("prompt", prompt)]);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GenerationError::GenerationFailed(format!(
                "{status}: {error_text}"
            )));
        }

        let bytes = response.bytes().await.map_err(|e| self.map_error(e))?;
        if bytes.is_empty() {
            return Err(GenerationError::GenerationFailed(
                "service returned an empty image".to_string(),
            ));
        }

        Ok(GeneratedImage {
            bytes: bytes.to_vec(),
            elapsed: started.elapsed(),
        })
    }

    fn map_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout(self.timeout)
        } else if e.is_connect() {
            GenerationError::Unavailable
        } else {
            GenerationError::GenerationFailed(e.to_string())
        }
    }
}

#[async_trait]
impl GenerationPort for HttpGenerationClient {
    async fn generate(&self, image: &[u8], prompt: &str) -> Result<GeneratedImage, GenerationError> {
        self.post_image("generate", image, Some(prompt)).await
    }

    async fn remove_background(&self, image: &[u8]) -> Result<GeneratedImage, GenerationError> {
        self.post_image("remove-background", image, None).await
    }
}

/// Used when no generation service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGeneration;

#[async_trait]
impl GenerationPort for DisabledGeneration {
    async fn generate(&self, _image: &[u8], _prompt: &str) -> Result<GeneratedImage, GenerationError> {
        Err(GenerationError::Unavailable)
    }

    async fn remove_background(&self, _image: &[u8]) -> Result<GeneratedImage, GenerationError> {
        Err(GenerationError::Unavailable)
    }
}
