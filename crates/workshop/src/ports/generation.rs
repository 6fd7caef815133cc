use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Service unavailable")]
    Unavailable,
}

/// Image generation pipeline: stylize a drawing, then cut it out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationPort: Send + Sync {
    async fn generate(&self, image: &[u8], prompt: &str) -> Result<GeneratedImage, GenerationError>;
    async fn remove_background(&self, image: &[u8]) -> Result<GeneratedImage, GenerationError>;
}
