//! Shared OpenAI-wire-compatible chat-completions implementation. OpenAI and
//! DeepSeek both speak this shape (`/v1/chat/completions`, `choices[].message`,
//! `choices[].delta`); only the base URL and a couple of defaults differ, so
//! both adapters in this crate delegate here instead of duplicating the
//! translation logic.

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

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

fn build_messages<'a>(context: Option<&'a str>, history: &'a [ChatTurn], prompt: &'a str) -> Vec<Message<'a>> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    if let Some(context) = context {
        messages.push(Message {
            role: "system",
            content: context,
        });
    }
    for turn in history {
        messages.push(Message {
            role: "user",
            content: &turn.prompt,
        });
        messages.push(Message {
            role: "assistant",
            content: &turn.response,
        });
    }
    messages.push(Message {
        role: "user",
        content: prompt,
    });
    messages
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
    delta: Option<ChatDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

fn result_for(finish_reason: Option<&str>) -> ResponseResult {
    match finish_reason {
        Some("stop") | Some("eos") => ResponseResult::Complete,
        Some("length") => ResponseResult::IncompleteMaxTokens,
        _ => ResponseResult::IncompleteUnknown,
    }
}

/// One upstream whose wire shape is the OpenAI chat-completions API.
pub(crate) struct OpenAiCompatClient {
    client: wreq::Client,
    base_url: String,
    api_key: String,
    provider: &'static str,
}

impl OpenAiCompatClient {
    pub(crate) fn new(
        provider: &'static str,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            provider,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatClient {
    async fn request(
        &self,
        model: &str,
        prompt: &str,
        opts: &ProviderOpts,
    ) -> Result<ProviderCompletion, GatewayError> {
        let body = ChatRequest {
            model,
            messages: build_messages(opts.context.as_deref(), &opts.history, prompt),
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            stream: false,
        };

        let started = Instant::now();
        info!(event = "upstream_request", provider = %self.provider, op = "request", model = %model);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| GatewayError::ProviderResponseError(err.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(event = "upstream_error", provider = %self.provider, op = "request", model = %model, status = status.as_u16());
            return Err(classify_error_status(status, &headers, &text));
        }

        let parsed: ChatCompletion = response
            .json()
            .await
            .map_err(|err| GatewayError::ProviderResponseError(err.to_string()))?;

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(GatewayError::ProviderResponseNoContent);
        };
        let text = choice
            .message
            .and_then(|m| m.content)
            .ok_or(GatewayError::ProviderResponseNoContent)?;

        info!(
            event = "upstream_response",
            provider = %self.provider,
            op = "request",
            model = %model,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64
        );

        Ok(ProviderCompletion {
            text,
            result: result_for(choice.finish_reason.as_deref()),
        })
    }

    async fn stream(&self, model: &str, prompt: &str, opts: &ProviderOpts) -> Result<ChunkStream, GatewayError> {
        let body = ChatRequest {
            model,
            messages: build_messages(opts.context.as_deref(), &opts.history, prompt),
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            stream: true,
        };

        let started = Instant::now();
        info!(event = "upstream_request", provider = %self.provider, op = "stream", model = %model);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| GatewayError::ProviderResponseError(err.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(event = "upstream_error", provider = %self.provider, op = "stream", model = %model, status = status.as_u16());
            return Err(classify_error_status(status, &headers, &text));
        }

        info!(
            event = "upstream_response",
            provider = %self.provider,
            op = "stream",
            model = %model,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64
        );

        Ok(Box::pin(decode_stream(response)))
    }
}

/// `Ok(None)` means "skip this frame" (`[DONE]`, empty delta); `Err` carries
/// a terminal `PROVIDER_RESPONSE_NO_CONTENT` for a chunk with no choices at
/// all, per §4.5.
fn parse_delta(payload: &str) -> Result<Option<String>, GatewayError> {
    if payload.trim() == "[DONE]" {
        return Ok(None);
    }
    let value: JsonValue = serde_json::from_str(payload)
        .map_err(|err| GatewayError::ProviderResponseError(err.to_string()))?;
    let choices = value
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or(GatewayError::ProviderResponseNoContent)?;
    if choices.is_empty() {
        return Err(GatewayError::ProviderResponseNoContent);
    }
    let text = choices[0]
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string);
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
