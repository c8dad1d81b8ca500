use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use uuid::Uuid;

use gateway_common::GatewayError;
use gateway_protocol::{ChatTurn, ContentResponse, ResponseResult, SessionId, SseEvent, SseEventKind};
use gateway_provider_core::{ChunkStream, ModelRef, ModelRestore, ProviderClient, ProviderId, ProviderOpts};
use gateway_storage::Storage;

use crate::clock::Clock;
use crate::events::{spawn_logging_sink, EventBus};
use crate::history::HistoryStore;
use crate::ids::new_event_id;
use crate::options::{GatewayOptions, OptionsPatch, ResolvedOptions};
use crate::registry::ModelRegistry;
use crate::session_bus::SessionBus;

const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// §6's request input shape, minus `auth`: per the Open Questions
/// resolution in DESIGN.md, JWT verification lives exclusively at the HTTP
/// boundary, so the engine never sees credentials at all.
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    pub prompt: String,
    pub context: Option<String>,
    pub temperature: Option<f32>,
    pub inline_history: Vec<ChatTurn>,
    pub session_id: Option<SessionId>,
    pub resume_event_id: Option<Uuid>,
    pub models: Option<Vec<ModelRef>>,
    pub stream: bool,
}

pub enum EngineOutcome {
    Content(ContentResponse),
    Stream(EngineStream),
}

/// A live SSE byte source plus the session id the caller should carry on
/// the transport header (§6).
pub struct EngineStream {
    pub session_id: SessionId,
    pub frames: Pin<Box<dyn Stream<Item = Bytes> + Send>>,
}

/// §4.9's single entry point. Owns the selection loop, rate-limit gate,
/// retry/timeout wrapper and stream tee; everything it touches (model
/// state, history, pub/sub) goes through `Storage`.
pub struct RequestEngine {
    options: GatewayOptions,
    registry: Arc<ModelRegistry>,
    history: Arc<HistoryStore>,
    bus: Arc<SessionBus>,
    providers: HashMap<ProviderId, Arc<dyn ProviderClient>>,
    default_models: Vec<ModelRef>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl RequestEngine {
    /// Builds the engine and starts its built-in logging sink on the
    /// operational event bus (`events::spawn_logging_sink`); the bus itself
    /// is reachable via [`RequestEngine::events`] for a future metrics sink
    /// to subscribe to independently.
    pub fn new(
        options: GatewayOptions,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        providers: HashMap<ProviderId, Arc<dyn ProviderClient>>,
        default_models: Vec<ModelRef>,
    ) -> Result<Self, GatewayError> {
        if default_models.is_empty() {
            return Err(GatewayError::OptionsError(
                "at least one model must be configured".to_string(),
            ));
        }
        let events = Arc::new(EventBus::new());
        spawn_logging_sink(&events);
        let registry = Arc::new(ModelRegistry::new(storage.clone(), clock.clone(), events.clone()));
        registry.spawn_unavailable_recovery();
        Ok(Self {
            registry,
            history: Arc::new(HistoryStore::new(storage.clone())),
            bus: Arc::new(SessionBus::new(storage)),
            options,
            providers,
            default_models,
            clock,
            events,
        })
    }

    /// Exposes the operational event bus so a caller can attach its own
    /// subscriber (e.g. a metrics sink) without the engine knowing about it.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    fn provider_for(&self, model: &ModelRef) -> Result<Arc<dyn ProviderClient>, GatewayError> {
        self.providers
            .get(&model.provider)
            .cloned()
            .ok_or_else(|| GatewayError::ProviderNotFound(model.provider.to_string()))
    }

    pub async fn request(&self, req: PromptRequest) -> Result<EngineOutcome, GatewayError> {
        let candidates = req.models.clone().unwrap_or_else(|| self.default_models.clone());
        if candidates.is_empty() {
            return Err(GatewayError::ProviderNoModelsAvailable);
        }
        tracing::debug!(event = "request_received", stream = req.stream, candidates = candidates.len());
        let single_candidate = candidates.len() == 1;

        let session_id = req.session_id.unwrap_or_else(SessionId::new);

        if req.stream && req.session_id.is_some() {
            if let Some(outcome) = self.try_resume(&req, session_id).await? {
                return Ok(outcome);
            }
        }

        let history = if let Some(sid) = req.session_id {
            self.history.range(sid).await?
        } else {
            req.inline_history.clone()
        };

        let mut tried: HashSet<ModelRef> = HashSet::new();
        let mut last_error: Option<GatewayError> = None;

        loop {
            let remaining: Vec<&ModelRef> = candidates.iter().filter(|m| !tried.contains(*m)).collect();
            if remaining.is_empty() {
                return Err(self.select_exhausted_error(single_candidate, last_error));
            }

            let mut resolved_by_model: Vec<(ModelRef, ResolvedOptions)> = Vec::with_capacity(remaining.len());
            for model in &remaining {
                let patch = OptionsPatch::from_model_ref(model);
                let resolved = self.options.resolve(Some(&patch), None)?;
                resolved_by_model.push(((*model).clone(), resolved));
            }

            let select_input = resolved_by_model.iter().map(|(m, r)| (m, &r.restore));
            let Some(sel) = self.registry.select(select_input).await? else {
                return Err(self.select_exhausted_error(single_candidate, last_error));
            };
            let resolved = resolved_by_model
                .iter()
                .find(|(m, _)| *m == sel)
                .map(|(_, r)| *r)
                .expect("selected candidate came from resolved_by_model");
            self.events.model_selected(&sel);

            let op_start = self.clock.now_ms();

            if let Err(err) = self.registry.check_and_increment_rate(&sel, &resolved.rate).await {
                self.registry
                    .mark_error_with_restore(&sel, &err, op_start, Some(&resolved.restore))
                    .await?;
                tried.insert(sel.clone());
                last_error = Some(err);
                continue;
            }

            let provider = self.provider_for(&sel)?;
            let opts = ProviderOpts {
                context: req.context.clone(),
                temperature: req.temperature,
                max_tokens: resolved.rate.max_tokens,
                history: history.clone(),
            };

            if req.stream {
                match self.start_stream(&provider, &sel, &req.prompt, &opts, &resolved).await {
                    Ok(chunk_stream) => {
                        let frames = self.tee_stream(
                            session_id,
                            req.prompt.clone(),
                            chunk_stream,
                            sel.clone(),
                            op_start,
                            resolved.history_expiration_ms,
                            resolved.request_timeout_ms,
                            resolved.restore,
                        );
                        return Ok(EngineOutcome::Stream(EngineStream { session_id, frames }));
                    }
                    Err(err) => {
                        if !err.retryable_fallback() {
                            return Err(err);
                        }
                        self.registry
                            .mark_error_with_restore(&sel, &err, op_start, Some(&resolved.restore))
                            .await?;
                        tried.insert(sel.clone());
                        last_error = Some(err);
                        continue;
                    }
                }
            } else {
                match self.call_with_retry(&provider, &sel, &req.prompt, &opts, &resolved).await {
                    Ok(completion) => {
                        let response = ContentResponse {
                            text: completion.text,
                            result: completion.result,
                            session_id,
                        };
                        let turn = ChatTurn {
                            prompt: req.prompt.clone(),
                            response: response.text.clone(),
                        };
                        if let Err(err) = self.history.push(session_id, &turn, resolved.history_expiration_ms).await {
                            warn!(error = %err, "history append failed on the cold path");
                        }
                        return Ok(EngineOutcome::Content(response));
                    }
                    Err(err) => {
                        if !err.retryable_fallback() {
                            return Err(err);
                        }
                        self.registry
                            .mark_error_with_restore(&sel, &err, op_start, Some(&resolved.restore))
                            .await?;
                        tried.insert(sel.clone());
                        last_error = Some(err);
                        continue;
                    }
                }
            }
        }
    }

    /// §7: with a single-model chain there is nothing to fall back to, so
    /// the caller sees the underlying error directly rather than a wrapping
    /// `PROVIDER_NO_MODELS_AVAILABLE`. With more than one candidate, once
    /// the chain is exhausted the selection error is terminal and the last
    /// provider error (if any) is attached as its cause.
    fn select_exhausted_error(&self, single_candidate: bool, last_error: Option<GatewayError>) -> GatewayError {
        match (single_candidate, last_error) {
            (true, Some(err)) => err,
            (_, last) => {
                if let Some(err) = &last {
                    warn!(error = %err, "all candidate models exhausted");
                }
                GatewayError::ProviderNoModelsAvailable
            }
        }
    }

    async fn call_with_retry(
        &self,
        provider: &Arc<dyn ProviderClient>,
        model: &ModelRef,
        prompt: &str,
        opts: &ProviderOpts,
        resolved: &ResolvedOptions,
    ) -> Result<gateway_provider_core::ProviderCompletion, GatewayError> {
        let timeout = Duration::from_millis(resolved.request_timeout_ms);
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(timeout, provider.request(&model.name, prompt, opts)).await;
            match outcome {
                Err(_) => return Err(GatewayError::ProviderRequestTimeout),
                Ok(Ok(completion)) => return Ok(completion),
                Ok(Err(err)) => {
                    if !err.is_retryable_attempt() || attempt >= resolved.retry_max {
                        return Err(err);
                    }
                    attempt += 1;
                    tracing::info!(event = "request_retry", model = %model, attempt, code = err.code());
                    tokio::time::sleep(Duration::from_millis(resolved.retry_interval_ms)).await;
                }
            }
        }
    }

    async fn start_stream(
        &self,
        provider: &Arc<dyn ProviderClient>,
        model: &ModelRef,
        prompt: &str,
        opts: &ProviderOpts,
        resolved: &ResolvedOptions,
    ) -> Result<ChunkStream, GatewayError> {
        let timeout = Duration::from_millis(resolved.request_timeout_ms);
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(timeout, provider.stream(&model.name, prompt, opts)).await;
            match outcome {
                Err(_) => return Err(GatewayError::ProviderRequestTimeout),
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(err)) => {
                    if !err.is_retryable_attempt() || attempt >= resolved.retry_max {
                        return Err(err);
                    }
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(resolved.retry_interval_ms)).await;
                }
            }
        }
    }

    /// Tees one provider chunk stream into the caller's byte source, the
    /// history store and the session bus (§4.9, §9's "fan-out" design
    /// note). Implemented as a single forwarding task rather than separate
    /// accumulator/publisher tasks: history and pub/sub writes are
    /// best-effort (logged, never propagated) so the simplification
    /// preserves cancellation and failure-isolation guarantees without the
    /// extra channel plumbing.
    fn tee_stream(
        &self,
        session_id: SessionId,
        prompt: String,
        mut chunks: ChunkStream,
        model: ModelRef,
        op_start_ms: u64,
        history_ttl_ms: u64,
        request_timeout_ms: u64,
        restore: ModelRestore,
    ) -> Pin<Box<dyn Stream<Item = Bytes> + Send>> {
        use futures_util::StreamExt;

        let history = self.history.clone();
        let bus = self.bus.clone();
        let registry = self.registry.clone();
        let inactivity = Duration::from_millis(request_timeout_ms);
        let (tx, rx) = mpsc::channel::<Bytes>(OUTPUT_CHANNEL_CAPACITY);

        tracing::debug!(event = "stream_started", session_id = %session_id, model = %model);

        tokio::spawn(async move {
            let mut accumulated = String::new();

            loop {
                match tokio::time::timeout(inactivity, chunks.next()).await {
                    Err(_) => {
                        let err = GatewayError::ProviderRequestStreamTimeout;
                        let frame = SseEvent::error(new_event_id(), err.code(), err.to_string());
                        let _ = tx.send(frame.encode()).await;
                        if let Err(e) = bus.publish_frame(session_id, &frame, history_ttl_ms).await {
                            warn!(error = %e, "publish failed on the cold path");
                        }
                        if let Err(e) = registry
                            .mark_error_with_restore(&model, &err, op_start_ms, Some(&restore))
                            .await
                        {
                            warn!(error = %e, "model-state write failed on the cold path");
                        }
                        return;
                    }
                    Ok(None) => break,
                    Ok(Some(Ok(text))) => {
                        accumulated.push_str(&text);
                        let frame = SseEvent::content(new_event_id(), text);
                        if tx.send(frame.encode()).await.is_err() {
                            return; // caller cancelled: stop reading upstream, no history write.
                        }
                        if let Err(e) = bus.publish_frame(session_id, &frame, history_ttl_ms).await {
                            warn!(error = %e, "publish failed on the cold path");
                        }
                        continue;
                    }
                    Ok(Some(Err(err))) => {
                        let frame = SseEvent::error(new_event_id(), err.code(), err.to_string());
                        let _ = tx.send(frame.encode()).await;
                        if let Err(e) = bus.publish_frame(session_id, &frame, history_ttl_ms).await {
                            warn!(error = %e, "publish failed on the cold path");
                        }
                        if let Err(e) = registry
                            .mark_error_with_restore(&model, &err, op_start_ms, Some(&restore))
                            .await
                        {
                            warn!(error = %e, "model-state write failed on the cold path");
                        }
                        return;
                    }
                }
            }

            let response = ContentResponse {
                text: accumulated.clone(),
                result: ResponseResult::Complete,
                session_id,
            };
            let frame = SseEvent::end(new_event_id(), response);
            if tx.send(frame.encode()).await.is_err() {
                return;
            }
            if let Err(e) = bus.publish_frame(session_id, &frame, history_ttl_ms).await {
                warn!(error = %e, "publish failed on the cold path");
            }
            let turn = ChatTurn {
                prompt,
                response: accumulated,
            };
            if let Err(e) = history.push(session_id, &turn, history_ttl_ms).await {
                warn!(error = %e, "history append failed on the cold path");
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// §4.8's resume algorithm. Returns `None` to tell the caller to fall
    /// through to a normal new request (no events exist for this session).
    async fn try_resume(&self, req: &PromptRequest, session_id: SessionId) -> Result<Option<EngineOutcome>, GatewayError> {
        let all = self.bus.replay(session_id).await?;
        if all.is_empty() {
            return Ok(None);
        }

        let suffix: Vec<SseEvent> = match req.resume_event_id {
            None => all.clone(),
            Some(after) => all.iter().filter(|e| e.id > after).cloned().collect(),
        };
        let terminated = matches!(
            all.last().map(|e| &e.kind),
            Some(SseEventKind::End { .. }) | Some(SseEventKind::Error { .. })
        );

        let bus = self.bus.clone();
        let (tx, rx) = mpsc::channel::<Bytes>(OUTPUT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            for frame in &suffix {
                if tx.send(frame.encode()).await.is_err() {
                    return;
                }
            }
            if terminated {
                return;
            }
            let Ok(mut live) = bus.subscribe(session_id).await else {
                return;
            };
            loop {
                match live.recv().await {
                    Ok(note) => {
                        let Some(frame) = SseEvent::from_stored_json(&note.value) else {
                            continue;
                        };
                        let is_terminal =
                            matches!(frame.kind, SseEventKind::End { .. } | SseEventKind::Error { .. });
                        if tx.send(frame.encode()).await.is_err() {
                            bus.unsubscribe(session_id).await;
                            return;
                        }
                        if is_terminal {
                            bus.unsubscribe(session_id).await;
                            return;
                        }
                    }
                    Err(_) => {
                        bus.unsubscribe(session_id).await;
                        return;
                    }
                }
            }
        });

        Ok(Some(EngineOutcome::Stream(EngineStream {
            session_id,
            frames: Box::pin(ReceiverStream::new(rx)),
        })))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use futures_util::StreamExt;
    use gateway_protocol::SseDecoder;
    use gateway_provider_core::{ProviderCompletion, ProviderId};
    use gateway_storage::MemoryStorage;

    use super::*;
    use crate::clock::test_support::FixedClock;

    /// A provider double whose `request` calls are scripted one-at-a-time
    /// from a queue, and whose `stream` calls replay a fixed chunk list.
    struct ScriptedProvider {
        request_results: StdMutex<VecDeque<Result<ProviderCompletion, GatewayError>>>,
        stream_chunks: Vec<String>,
    }

    impl ScriptedProvider {
        fn requests(results: Vec<Result<ProviderCompletion, GatewayError>>) -> Self {
            Self {
                request_results: StdMutex::new(results.into_iter().collect()),
                stream_chunks: Vec::new(),
            }
        }

        fn streaming(chunks: Vec<&str>) -> Self {
            Self {
                request_results: StdMutex::new(VecDeque::new()),
                stream_chunks: chunks.into_iter().map(str::to_string).collect(),
            }
        }
    }

    #[async_trait::async_trait]
    impl ProviderClient for ScriptedProvider {
        async fn request(
            &self,
            _model: &str,
            _prompt: &str,
            _opts: &ProviderOpts,
        ) -> Result<ProviderCompletion, GatewayError> {
            self.request_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::ProviderResponseError("exhausted".to_string())))
        }

        async fn stream(
            &self,
            _model: &str,
            _prompt: &str,
            _opts: &ProviderOpts,
        ) -> Result<ChunkStream, GatewayError> {
            let chunks = self.stream_chunks.clone();
            Ok(Box::pin(tokio_stream::iter(chunks.into_iter().map(Ok))))
        }
    }

    fn completion(text: &str) -> ProviderCompletion {
        ProviderCompletion {
            text: text.to_string(),
            result: ResponseResult::Complete,
        }
    }

    fn engine_with(
        providers: HashMap<ProviderId, Arc<dyn ProviderClient>>,
        models: Vec<ModelRef>,
        clock: Arc<FixedClock>,
    ) -> RequestEngine {
        RequestEngine::new(
            GatewayOptions::new(OptionsPatch {
                retry_interval_ms: Some(0),
                ..Default::default()
            }),
            Arc::new(MemoryStorage::new()),
            clock,
            providers,
            models,
        )
        .unwrap()
    }

    fn one_provider(id: ProviderId, client: ScriptedProvider) -> HashMap<ProviderId, Arc<dyn ProviderClient>> {
        let mut providers: HashMap<ProviderId, Arc<dyn ProviderClient>> = HashMap::new();
        providers.insert(id, Arc::new(client));
        providers
    }

    fn prompt(text: &str, stream: bool) -> PromptRequest {
        PromptRequest {
            prompt: text.to_string(),
            stream,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn request_succeeds_on_first_try() {
        let model = ModelRef::new(ProviderId::OpenAi, "gpt-4o-mini");
        let providers = one_provider(ProviderId::OpenAi, ScriptedProvider::requests(vec![Ok(completion("hi"))]));
        let engine = engine_with(providers, vec![model], Arc::new(FixedClock::new(0)));

        let outcome = engine.request(prompt("hello", false)).await.unwrap();
        match outcome {
            EngineOutcome::Content(resp) => assert_eq!(resp.text, "hi"),
            _ => panic!("expected a content outcome"),
        }
    }

    #[tokio::test]
    async fn retries_once_then_succeeds() {
        let model = ModelRef::new(ProviderId::OpenAi, "gpt-4o-mini");
        let providers = one_provider(
            ProviderId::OpenAi,
            ScriptedProvider::requests(vec![
                Err(GatewayError::ProviderResponseError("glitch".to_string())),
                Ok(completion("recovered")),
            ]),
        );
        let engine = engine_with(providers, vec![model], Arc::new(FixedClock::new(0)));

        let outcome = engine.request(prompt("hello", false)).await.unwrap();
        match outcome {
            EngineOutcome::Content(resp) => assert_eq!(resp.text, "recovered"),
            _ => panic!("expected a content outcome"),
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_model_after_exhausting_retries() {
        let primary = ModelRef::new(ProviderId::OpenAi, "gpt-4o-mini");
        let backup = ModelRef::new(ProviderId::Gemini, "gemini-2.5-flash");

        let mut providers: HashMap<ProviderId, Arc<dyn ProviderClient>> = HashMap::new();
        providers.insert(
            ProviderId::OpenAi,
            Arc::new(ScriptedProvider::requests(vec![
                Err(GatewayError::ProviderExceededQuota),
                Err(GatewayError::ProviderExceededQuota),
            ])),
        );
        providers.insert(
            ProviderId::Gemini,
            Arc::new(ScriptedProvider::requests(vec![Ok(completion("from backup"))])),
        );

        let engine = engine_with(providers, vec![primary, backup], Arc::new(FixedClock::new(0)));

        let outcome = engine.request(prompt("hello", false)).await.unwrap();
        match outcome {
            EngineOutcome::Content(resp) => assert_eq!(resp.text, "from backup"),
            _ => panic!("expected a content outcome"),
        }
    }

    #[tokio::test]
    async fn single_candidate_surfaces_the_underlying_error() {
        let model = ModelRef::new(ProviderId::OpenAi, "gpt-4o-mini");
        let providers = one_provider(
            ProviderId::OpenAi,
            ScriptedProvider::requests(vec![
                Err(GatewayError::ProviderExceededQuota),
                Err(GatewayError::ProviderExceededQuota),
            ]),
        );
        let engine = engine_with(providers, vec![model], Arc::new(FixedClock::new(0)));

        let err = engine.request(prompt("hello", false)).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderExceededQuota));
    }

    #[tokio::test]
    async fn multi_candidate_exhaustion_wraps_as_no_models_available() {
        let a = ModelRef::new(ProviderId::OpenAi, "gpt-4o-mini");
        let b = ModelRef::new(ProviderId::Gemini, "gemini-2.5-flash");

        let mut providers: HashMap<ProviderId, Arc<dyn ProviderClient>> = HashMap::new();
        providers.insert(
            ProviderId::OpenAi,
            Arc::new(ScriptedProvider::requests(vec![
                Err(GatewayError::ProviderExceededQuota),
                Err(GatewayError::ProviderExceededQuota),
            ])),
        );
        providers.insert(
            ProviderId::Gemini,
            Arc::new(ScriptedProvider::requests(vec![
                Err(GatewayError::ProviderExceededQuota),
                Err(GatewayError::ProviderExceededQuota),
            ])),
        );

        let engine = engine_with(providers, vec![a, b], Arc::new(FixedClock::new(0)));

        let err = engine.request(prompt("hello", false)).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderNoModelsAvailable));
    }

    #[tokio::test]
    async fn streaming_tees_content_and_records_history() {
        let model = ModelRef::new(ProviderId::OpenAi, "gpt-4o-mini");
        let providers = one_provider(ProviderId::OpenAi, ScriptedProvider::streaming(vec!["hel", "lo"]));
        let engine = engine_with(providers, vec![model], Arc::new(FixedClock::new(0)));

        let outcome = engine.request(prompt("hello", true)).await.unwrap();
        let EngineOutcome::Stream(mut stream) = outcome else {
            panic!("expected a stream outcome");
        };

        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        while let Some(bytes) = stream.frames.next().await {
            events.extend(decoder.push_bytes(&bytes));
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0].kind, SseEventKind::Content { .. }));
        assert!(matches!(events[1].kind, SseEventKind::Content { .. }));
        assert!(matches!(events[2].kind, SseEventKind::End { .. }));

        // The tee task's history/bus writes race the stream's own
        // completion signal; give the spawned task a beat to finish them.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let history = engine.history.range(stream.session_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].prompt, "hello");
        assert_eq!(history[0].response, "hello");
    }

    #[tokio::test]
    async fn dropping_the_stream_after_one_chunk_skips_history_and_end_frame() {
        let model = ModelRef::new(ProviderId::OpenAi, "gpt-4o-mini");
        let providers = one_provider(ProviderId::OpenAi, ScriptedProvider::streaming(vec!["hel", "lo", "!"]));
        let engine = engine_with(providers, vec![model], Arc::new(FixedClock::new(0)));

        let outcome = engine.request(prompt("hello", true)).await.unwrap();
        let EngineOutcome::Stream(mut stream) = outcome else {
            panic!("expected a stream outcome");
        };
        let session_id = stream.session_id;

        // Take exactly one frame, then drop the stream: the caller hung up
        // mid-response, same as a client closing its HTTP connection early.
        let first = stream.frames.next().await;
        assert!(first.is_some());
        drop(stream);

        // Give the tee task a beat to observe the closed channel and return.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let history = engine.history.range(session_id).await.unwrap();
        assert!(history.is_empty(), "no turn should be recorded for a cancelled stream");

        let replayed = engine.bus.replay(session_id).await.unwrap();
        assert!(
            replayed.iter().all(|e| !matches!(e.kind, SseEventKind::End { .. })),
            "no end frame should have been published for a cancelled stream"
        );

        // An unrelated session is unaffected by the cancellation above.
        let other_providers = one_provider(ProviderId::OpenAi, ScriptedProvider::streaming(vec!["ok"]));
        let other_engine = engine_with(
            other_providers,
            vec![ModelRef::new(ProviderId::OpenAi, "gpt-4o-mini")],
            Arc::new(FixedClock::new(0)),
        );
        let other_outcome = other_engine.request(prompt("again", true)).await.unwrap();
        let EngineOutcome::Stream(mut other_stream) = other_outcome else {
            panic!("expected a stream outcome");
        };
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        while let Some(bytes) = other_stream.frames.next().await {
            events.extend(decoder.push_bytes(&bytes));
        }
        assert!(events.iter().any(|e| matches!(e.kind, SseEventKind::End { .. })));
    }

    #[tokio::test]
    async fn resume_replays_terminated_session_without_calling_the_provider_again() {
        let model = ModelRef::new(ProviderId::OpenAi, "gpt-4o-mini");
        let providers = one_provider(ProviderId::OpenAi, ScriptedProvider::streaming(vec!["hi"]));
        let engine = engine_with(providers, vec![model], Arc::new(FixedClock::new(0)));

        let first = engine.request(prompt("hello", true)).await.unwrap();
        let EngineOutcome::Stream(mut stream) = first else {
            panic!("expected a stream outcome");
        };
        let mut decoder = SseDecoder::new();
        while let Some(bytes) = stream.frames.next().await {
            decoder.push_bytes(&bytes);
        }
        let session_id = stream.session_id;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let resumed = engine
            .request(PromptRequest {
                prompt: String::new(),
                stream: true,
                session_id: Some(session_id),
                ..Default::default()
            })
            .await
            .unwrap();
        let EngineOutcome::Stream(mut resumed_stream) = resumed else {
            panic!("expected a stream outcome");
        };
        assert_eq!(resumed_stream.session_id, session_id);

        let mut resumed_decoder = SseDecoder::new();
        let mut resumed_events = Vec::new();
        while let Some(bytes) = resumed_stream.frames.next().await {
            resumed_events.extend(resumed_decoder.push_bytes(&bytes));
        }
        assert_eq!(resumed_events.len(), 2);
        assert!(matches!(resumed_events.last().unwrap().kind, SseEventKind::End { .. }));
    }
}
