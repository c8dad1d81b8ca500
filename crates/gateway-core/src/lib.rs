//! The request engine (§4.9): model selection with fallback, per-model rate
//! limiting and restore, retry/timeout control, session history and
//! resumable SSE streaming, all layered on the `Storage` capability from
//! `gateway-storage` and the `ProviderClient` capability from
//! `gateway-provider-core`.

pub mod clock;
pub mod engine;
pub mod events;
pub mod history;
pub mod ids;
pub mod options;
pub mod registry;
pub mod session_bus;
pub mod unavailable_queue;

pub use clock::{Clock, SystemClock};
pub use engine::{EngineOutcome, EngineStream, PromptRequest, RequestEngine};
pub use events::{EventBus, GatewayEvent};
pub use history::HistoryStore;
pub use ids::new_event_id;
pub use options::{GatewayOptions, OptionsPatch, ResolvedOptions};
pub use registry::ModelRegistry;
pub use session_bus::SessionBus;
pub use unavailable_queue::ModelUnavailableQueue;

#[cfg(test)]
pub use clock::test_support::FixedClock;
