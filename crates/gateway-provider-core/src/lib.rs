//! Capability types shared by the request engine and concrete provider
//! adapters: model identity (§3 `ModelRef`), the `ProviderClient` capability
//! (§4.5) and the per-model state record the registry persists (§4.6).
//!
//! This crate does not perform network IO and does not depend on any
//! concrete HTTP client; adapters in `gateway-provider-impl` do that.

pub mod model_ref;
pub mod provider;
pub mod state;

pub use model_ref::{ModelLimits, ModelRef, ModelRestore, ProviderId};
pub use provider::{ChunkStream, ProviderClient, ProviderCompletion, ProviderOpts};
pub use state::{ErrorReason, ModelState, ModelStatus, RateLimitCounter};
