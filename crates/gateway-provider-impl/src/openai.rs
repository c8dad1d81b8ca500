use async_trait::async_trait;

use gateway_common::GatewayError;
use gateway_provider_core::{ChunkStream, ProviderClient, ProviderCompletion, ProviderOpts};

use crate::openai_compat::OpenAiCompatClient;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// `ProviderId::OpenAi` (§4.5): OpenAI's own `/v1/chat/completions` API.
pub struct OpenAiClient {
    inner: OpenAiCompatClient,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, GatewayError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            inner: OpenAiCompatClient::new("openai", base_url, api_key)?,
        })
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    async fn request(
        &self,
        model: &str,
        prompt: &str,
        opts: &ProviderOpts,
    ) -> Result<ProviderCompletion, GatewayError> {
        self.inner.request(model, prompt, opts).await
    }

    async fn stream(&self, model: &str, prompt: &str, opts: &ProviderOpts) -> Result<ChunkStream, GatewayError> {
        self.inner.stream(model, prompt, opts).await
    }
}
