//! `/prompt` and `/stream` (§6): the thin `axum` binding the engine needs to
//! be reachable over HTTP. Body parsing and response shaping live here;
//! everything about selection, rate limiting and retries lives in
//! `gateway_core::RequestEngine`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gateway_common::GatewayError;
use gateway_core::{EngineOutcome, PromptRequest, RequestEngine};
use gateway_protocol::{ChatTurn, SessionId};
use gateway_provider_core::ModelRef;

use crate::auth::AuthProvider;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RequestEngine>,
    pub auth: Arc<dyn AuthProvider>,
    pub session_header_name: String,
}

/// §6's request input shape, minus `auth` (lifted to the HTTP layer by the
/// middleware below instead of carried on the body).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayRequestBody {
    prompt: String,
    context: Option<String>,
    temperature: Option<f32>,
    #[serde(default)]
    history: Vec<ChatTurn>,
    session_id: Option<String>,
    resume_event_id: Option<String>,
    models: Option<Vec<ModelRef>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/prompt", post(prompt))
        .route("/stream", post(stream))
        .with_state(state)
}

fn to_prompt_request(body: GatewayRequestBody, stream: bool) -> Result<PromptRequest, GatewayError> {
    let session_id = body
        .session_id
        .as_deref()
        .map(|s| s.parse::<SessionId>())
        .transpose()
        .map_err(|e| GatewayError::OptionsError(format!("invalid sessionId: {e}")))?;
    let resume_event_id = body
        .resume_event_id
        .as_deref()
        .map(|s| s.parse::<Uuid>())
        .transpose()
        .map_err(|e| GatewayError::OptionsError(format!("invalid resumeEventId: {e}")))?;

    Ok(PromptRequest {
        prompt: body.prompt,
        context: body.context,
        temperature: body.temperature,
        inline_history: body.history,
        session_id,
        resume_event_id,
        models: body.models,
        stream,
    })
}

fn error_response(err: GatewayError) -> Response {
    let status = err.status();
    let body = ErrorBody {
        code: err.code().to_string(),
        message: err.to_string(),
    };
    (status, Json(body)).into_response()
}

async fn prompt(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<GatewayRequestBody>) -> Response {
    if let Err(err) = state.auth.authenticate(&headers) {
        return (err.status, Json(ErrorBody { code: "AUTHENTICATION_REQUIRED".to_string(), message: err.message })).into_response();
    }

    let req = match to_prompt_request(body, false) {
        Ok(req) => req,
        Err(err) => return error_response(err),
    };

    match state.engine.request(req).await {
        Ok(EngineOutcome::Content(response)) => Json(response).into_response(),
        Ok(EngineOutcome::Stream(_)) => {
            error_response(GatewayError::OptionsError("engine returned a stream for a non-streaming request".to_string()))
        }
        Err(err) => error_response(err),
    }
}

async fn stream(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<GatewayRequestBody>) -> Response {
    if let Err(err) = state.auth.authenticate(&headers) {
        return (err.status, Json(ErrorBody { code: "AUTHENTICATION_REQUIRED".to_string(), message: err.message })).into_response();
    }

    let req = match to_prompt_request(body, true) {
        Ok(req) => req,
        Err(err) => return error_response(err),
    };

    match state.engine.request(req).await {
        Ok(EngineOutcome::Stream(engine_stream)) => {
            let mut response = Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .header("cache-control", "no-cache")
                .body(Body::from_stream(engine_stream.frames.map(Ok::<_, std::io::Error>)))
                .expect("static headers are always valid");
            if let (Ok(name), Ok(value)) = (
                state.session_header_name.parse::<axum::http::HeaderName>(),
                HeaderValue::from_str(&engine_stream.session_id.to_string()),
            ) {
                response.headers_mut().insert(name, value);
            }
            response
        }
        Ok(EngineOutcome::Content(_)) => {
            error_response(GatewayError::OptionsError("engine returned content for a streaming request".to_string()))
        }
        Err(err) => error_response(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_request_body() {
        let body: GatewayRequestBody =
            serde_json::from_str(r#"{"prompt":"Hello"}"#).unwrap();
        assert_eq!(body.prompt, "Hello");
        assert!(body.history.is_empty());
    }

    #[test]
    fn converts_to_prompt_request_with_stream_flag() {
        let body: GatewayRequestBody = serde_json::from_str(r#"{"prompt":"Hi"}"#).unwrap();
        let req = to_prompt_request(body, true).unwrap();
        assert!(req.stream);
        assert_eq!(req.prompt, "Hi");
    }
}
