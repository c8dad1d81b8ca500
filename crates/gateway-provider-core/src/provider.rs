use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use gateway_common::GatewayError;
use gateway_protocol::{ChatTurn, ResponseResult};

/// Options the engine passes down to a provider call, carried on every
/// request per §6's input shape (`context`, `temperature`, `history`) plus
/// the resolved per-model token cap.
#[derive(Debug, Clone, Default)]
pub struct ProviderOpts {
    pub context: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub history: Vec<ChatTurn>,
}

/// The result of a non-streaming provider call, missing only the session id
/// the engine attaches once the call returns (§3 `ContentResponse`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCompletion {
    pub text: String,
    pub result: ResponseResult,
}

/// One already-extracted content delta from a streaming provider call, or a
/// terminal error. The adapter is responsible for translating vendor wire
/// chunks down to this; it never hands the engine raw vendor JSON (§1's
/// "opaque JSON chunks" non-goal cuts the other way: the engine never parses
/// vendor wire formats, so the boundary sits in the adapter instead).
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// Uniform capability over one upstream vendor (§4.5). Implementations own
/// their HTTP connection pool and are expected to be cheap to clone/share
/// behind an `Arc`.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Non-streaming call: translate `prompt`/`opts` to the vendor's wire
    /// format, translate the response back.
    async fn request(
        &self,
        model: &str,
        prompt: &str,
        opts: &ProviderOpts,
    ) -> Result<ProviderCompletion, GatewayError>;

    /// Streaming call: returns a source of content deltas. An upstream chunk
    /// that produced no content surfaces a single
    /// `GatewayError::ProviderResponseNoContent` item and ends the stream
    /// (§4.5).
    async fn stream(
        &self,
        model: &str,
        prompt: &str,
        opts: &ProviderOpts,
    ) -> Result<ChunkStream, GatewayError>;
}
