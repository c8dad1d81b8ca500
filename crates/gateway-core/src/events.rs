use tokio::sync::broadcast;

use gateway_provider_core::ModelRef;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Structured operational events the engine emits alongside its `tracing`
/// spans: one broadcast channel, many sinks. Consumed only by the built-in
/// logging sink today; the channel is there for a future metrics sink to
/// subscribe to without engine changes.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    ModelSelected { model: String },
    RateLimited { model: String, wait_seconds: u64 },
    ModelMarkedError { model: String, code: &'static str },
    ModelRestored { model: String },
}

/// Thin wrapper over a `broadcast::Sender`; no async sink registry since no
/// sink needs to await anything here (logging is synchronous).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    /// Best-effort: a channel with no subscribers is not an error, matching
    /// `broadcast::Sender::send`'s own semantics for this use case.
    pub fn emit(&self, event: GatewayEvent) {
        let _ = self.tx.send(event);
    }

    pub fn model_selected(&self, model: &ModelRef) {
        self.emit(GatewayEvent::ModelSelected { model: model.key() });
    }

    pub fn rate_limited(&self, model: &ModelRef, wait_seconds: u64) {
        self.emit(GatewayEvent::RateLimited {
            model: model.key(),
            wait_seconds,
        });
    }

    pub fn model_marked_error(&self, model: &ModelRef, code: &'static str) {
        self.emit(GatewayEvent::ModelMarkedError {
            model: model.key(),
            code,
        });
    }

    pub fn model_restored(&self, model: &ModelRef) {
        self.emit(GatewayEvent::ModelRestored { model: model.key() });
    }
}

/// Spawns the built-in logging sink: every event becomes one `tracing`
/// line at request-selection granularity, using the `event = "..."` field
/// convention applied throughout this crate.
pub fn spawn_logging_sink(bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(GatewayEvent::ModelSelected { model }) => {
                    tracing::info!(event = "model_selected", model = %model);
                }
                Ok(GatewayEvent::RateLimited { model, wait_seconds }) => {
                    tracing::info!(event = "rate_limited", model = %model, wait_seconds);
                }
                Ok(GatewayEvent::ModelMarkedError { model, code }) => {
                    tracing::warn!(event = "model_marked_error", model = %model, code);
                }
                Ok(GatewayEvent::ModelRestored { model }) => {
                    tracing::info!(event = "model_restored", model = %model);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_provider_core::ProviderId;

    #[tokio::test]
    async fn subscriber_observes_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let model = ModelRef::new(ProviderId::OpenAi, "gpt-4o-mini");
        bus.model_selected(&model);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, GatewayEvent::ModelSelected { model } if model == "openai:gpt-4o-mini"));
    }

    #[tokio::test]
    async fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        let model = ModelRef::new(ProviderId::Gemini, "gemini-2.5-flash");
        bus.model_restored(&model);
    }
}
