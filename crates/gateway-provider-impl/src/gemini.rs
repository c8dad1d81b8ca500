//! `ProviderId::Gemini` (§4.5): Google's `generateContent`/`streamGenerateContent`
//! envelope, which diverges from the OpenAI wire shape enough (role names,
//! nested `parts`, `alt=sse` streaming) to warrant its own translation
//! instead of sharing `openai_compat`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Instant;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use gateway_common::GatewayError;
use gateway_protocol::{ChatTurn, ResponseResult};
use gateway_provider_core::{ChunkStream, ProviderClient, ProviderCompletion, ProviderOpts};

use crate::http_client::{build_client, classify_error_status};
use crate::sse_lines::VendorSseLines;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const PROVIDER: &str = "gemini";

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize, Default)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "systemInstruction")]
    system_instruction: Option<SystemInstruction<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

fn build_contents<'a>(history: &'a [ChatTurn], prompt: &'a str) -> Vec<Content<'a>> {
    let mut contents = Vec::with_capacity(history.len() * 2 + 1);
    for turn in history {
        contents.push(Content {
            role: "user",
            parts: vec![Part { text: &turn.prompt }],
        });
        contents.push(Content {
            role: "model",
            parts: vec![Part { text: &turn.response }],
        });
    }
    contents.push(Content {
        role: "user",
        parts: vec![Part { text: prompt }],
    });
    contents
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

fn text_of(candidate: &Candidate) -> Option<String> {
    let parts = candidate.content.as_ref()?.parts.as_slice();
    let joined: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

fn result_for(finish_reason: Option<&str>) -> ResponseResult {
    match finish_reason {
        Some("STOP") => ResponseResult::Complete,
        Some("MAX_TOKENS") => ResponseResult::IncompleteMaxTokens,
        _ => ResponseResult::IncompleteUnknown,
    }
}

pub struct GeminiClient {
    client: wreq::Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, GatewayError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, model: &str, method: &str, sse: bool) -> String {
        let query = if sse { "&alt=sse" } else { "" };
        format!(
            "{}/v1beta/models/{model}:{method}?key={}{query}",
            self.base_url, self.api_key
        )
    }

    fn request_body<'a>(&self, opts: &'a ProviderOpts, prompt: &'a str) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: build_contents(&opts.history, prompt),
            system_instruction: opts.context.as_deref().map(|text| SystemInstruction {
                parts: vec![Part { text }],
            }),
            generation_config: GenerationConfig {
                temperature: opts.temperature,
                max_output_tokens: opts.max_tokens,
            },
        }
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    async fn request(
        &self,
        model: &str,
        prompt: &str,
        opts: &ProviderOpts,
    ) -> Result<ProviderCompletion, GatewayError> {
        let body = self.request_body(opts, prompt);
        let started = Instant::now();
        info!(event = "upstream_request", provider = PROVIDER, op = "request", model = %model);

        let response = self
            .client
            .post(self.endpoint(model, "generateContent", false))
            .json(&body)
            .send()
            .await
            .map_err(|err| GatewayError::ProviderResponseError(err.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(event = "upstream_error", provider = PROVIDER, op = "request", model = %model, status = status.as_u16());
            return Err(classify_error_status(status, &headers, &text));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::ProviderResponseError(err.to_string()))?;

        let Some(candidate) = parsed.candidates.into_iter().next() else {
            return Err(GatewayError::ProviderResponseNoContent);
        };
        let finish_reason = candidate.finish_reason.clone();
        let text = text_of(&candidate).ok_or(GatewayError::ProviderResponseNoContent)?;

        info!(
            event = "upstream_response",
            provider = PROVIDER,
            op = "request",
            model = %model,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64
        );

        Ok(ProviderCompletion {
            text,
            result: result_for(finish_reason.as_deref()),
        })
    }

    async fn stream(&self, model: &str, prompt: &str, opts: &ProviderOpts) -> Result<ChunkStream, GatewayError> {
        let body = self.request_body(opts, prompt);
        let started = Instant::now();
        info!(event = "upstream_request", provider = PROVIDER, op = "stream", model = %model);

        let response = self
            .client
            .post(self.endpoint(model, "streamGenerateContent", true))
            .json(&body)
            .send()
            .await
            .map_err(|err| GatewayError::ProviderResponseError(err.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(event = "upstream_error", provider = PROVIDER, op = "stream", model = %model, status = status.as_u16());
            return Err(classify_error_status(status, &headers, &text));
        }

        info!(
            event = "upstream_response",
            provider = PROVIDER,
            op = "stream",
            model = %model,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64
        );

        Ok(Box::pin(decode_stream(response)))
    }
}

fn parse_delta(payload: &str) -> Result<Option<String>, GatewayError> {
    let value: JsonValue = serde_json::from_str(payload)
        .map_err(|err| GatewayError::ProviderResponseError(err.to_string()))?;
    let candidates = value
        .get("candidates")
        .and_then(|c| c.as_array())
        .ok_or(GatewayError::ProviderResponseNoContent)?;
    if candidates.is_empty() {
        return Err(GatewayError::ProviderResponseNoContent);
    }
    let text = candidates[0]
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        });
    Ok(text.filter(|t| !t.is_empty()))
}

fn decode_stream(response: wreq::Response) -> impl Stream<Item = Result<String, GatewayError>> + Send {
    let byte_stream: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, wreq::Error>> + Send>> =
        Box::pin(response.bytes_stream());
    let state = (byte_stream, VendorSseLines::new(), VecDeque::<String>::new(), false);
    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            let (stream, decoder, pending, ended): &mut (
                Pin<Box<dyn Stream<Item = Result<bytes::Bytes, wreq::Error>> + Send>>,
                VendorSseLines,
                VecDeque<String>,
                bool,
            ) = &mut state;

            if let Some(payload) = pending.pop_front() {
                match parse_delta(&payload) {
                    Ok(Some(text)) => return Some((Ok(text), state)),
                    Ok(None) => continue,
                    Err(err) => return Some((Err(err), state)),
                }
            }
            if *ended {
                return None;
            }
            match stream.next().await {
                Some(Ok(bytes)) => {
                    let frames = decoder.push(&bytes);
                    pending.extend(frames);
                }
                Some(Err(err)) => {
                    *ended = true;
                    return Some((Err(GatewayError::ProviderResponseError(err.to_string())), state));
                }
                None => {
                    *ended = true;
                    let frames = decoder.finish();
                    pending.extend(frames);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_finish_reasons() {
        assert_eq!(result_for(Some("STOP")), ResponseResult::Complete);
        assert_eq!(result_for(Some("MAX_TOKENS")), ResponseResult::IncompleteMaxTokens);
        assert_eq!(result_for(None), ResponseResult::IncompleteUnknown);
    }

    #[test]
    fn parse_delta_extracts_joined_part_text() {
        let payload = r#"{"candidates":[{"content":{"parts":[{"text":"He"},{"text":"llo"}]}}]}"#;
        assert_eq!(parse_delta(payload).unwrap(), Some("Hello".to_string()));
    }

    #[test]
    fn parse_delta_rejects_empty_candidates() {
        let payload = r#"{"candidates":[]}"#;
        assert!(matches!(
            parse_delta(payload),
            Err(GatewayError::ProviderResponseNoContent)
        ));
    }
}
