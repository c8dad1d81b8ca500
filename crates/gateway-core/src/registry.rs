use std::sync::Arc;
use std::time::Duration;

use gateway_common::GatewayError;
use gateway_provider_core::{ErrorReason, ModelLimits, ModelRef, ModelRestore, ModelState, ModelStatus, RateLimitCounter};
use gateway_storage::Storage;

use crate::clock::Clock;
use crate::events::EventBus;
use crate::unavailable_queue::ModelUnavailableQueue;

fn state_key(model: &ModelRef) -> String {
    format!("model:{}:{}", model.provider, model.name)
}

fn reason_code(reason: ErrorReason) -> &'static str {
    match reason {
        ErrorReason::None => "NONE",
        ErrorReason::ProviderRateLimitError => "PROVIDER_RATE_LIMIT_ERROR",
        ErrorReason::ProviderRequestTimeoutError => "PROVIDER_REQUEST_TIMEOUT_ERROR",
        ErrorReason::ProviderRequestStreamTimeoutError => "PROVIDER_REQUEST_STREAM_TIMEOUT_ERROR",
        ErrorReason::ProviderResponseError => "PROVIDER_RESPONSE_ERROR",
        ErrorReason::ProviderResponseNoContent => "PROVIDER_RESPONSE_NO_CONTENT",
        ErrorReason::ProviderExceededQuotaError => "PROVIDER_EXCEEDED_QUOTA_ERROR",
    }
}

/// Owns the single shared mutable resource described in §5: per-model rate
/// counters and ready/error status, persisted through `Storage` so every
/// process in a deployment observes the same state (§4.6).
pub struct ModelRegistry {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    unavailable: Arc<ModelUnavailableQueue>,
}

impl ModelRegistry {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, events: Arc<EventBus>) -> Self {
        Self {
            storage,
            clock,
            events,
            unavailable: Arc::new(ModelUnavailableQueue::new()),
        }
    }

    /// Starts the background sweep that proactively flips errored models
    /// back to ready once their restore deadline passes, independent of
    /// whether anything has tried to select them since (§4.6's
    /// supplemented introspection feature). Call once, after wrapping the
    /// registry in an `Arc`.
    pub fn spawn_unavailable_recovery(self: &Arc<Self>) {
        self.unavailable.clone().spawn_recover_task(self.clone(), self.events.clone());
    }

    async fn load(&self, model: &ModelRef) -> Result<Option<ModelState>, GatewayError> {
        let raw = self
            .storage
            .value_get(&state_key(model))
            .await
            .map_err(|e| GatewayError::StorageGetError(e.to_string()))?;
        match raw {
            None => Ok(None),
            Some(value) => Ok(Some(
                serde_json::from_value(value).map_err(|e| GatewayError::StorageGetError(e.to_string()))?,
            )),
        }
    }

    async fn store(&self, model: &ModelRef, state: &ModelState) -> Result<(), GatewayError> {
        let value = serde_json::to_value(state)?;
        self.storage
            .value_set(&state_key(model), value)
            .await
            .map_err(|e| GatewayError::StorageSetError(e.to_string()))
    }

    /// Whether `model` is presently eligible for selection: either no state
    /// exists yet, the state is `ready`, or it is `error` but the restore
    /// deadline for its reason has elapsed (§6's restore policy). When the
    /// deadline has elapsed this also performs the `error -> ready`
    /// transition write described in §4.6/§6.
    async fn is_ready(&self, model: &ModelRef, restore: &ModelRestore) -> Result<bool, GatewayError> {
        let now = self.clock.now_ms();
        let Some(state) = self.load(model).await? else {
            return Ok(true);
        };
        match state.status {
            ModelStatus::Ready => Ok(true),
            ModelStatus::Error => {
                if state.restore_elapsed(restore, now) {
                    let restored = ModelState {
                        rate_limit: state.rate_limit,
                        status: ModelStatus::Ready,
                        reason: ErrorReason::None,
                        timestamp_ms: now,
                    };
                    self.store(model, &restored).await?;
                    self.events.model_restored(model);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Selection tie-break per §4.9: candidates are tried in caller order;
    /// the first ready one wins. `restore` is the resolved restore policy
    /// for the candidate currently under consideration — callers resolve
    /// per-model options before calling this for each candidate in turn, so
    /// here we take a uniform restore policy resolved by the caller for
    /// simplicity when candidates share engine-level restore settings.
    pub async fn select<'a>(
        &self,
        candidates: impl IntoIterator<Item = (&'a ModelRef, &'a ModelRestore)>,
    ) -> Result<Option<ModelRef>, GatewayError> {
        for (candidate, restore) in candidates {
            if self.is_ready(candidate, restore).await? {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }

    /// Fixed-window rate check and increment (§4.6). On success the updated
    /// counter is persisted; on failure `PROVIDER_RATE_LIMIT` is returned
    /// with `waitSeconds` computed from the current window.
    pub async fn check_and_increment_rate(
        &self,
        model: &ModelRef,
        limits: &ModelLimits,
    ) -> Result<(), GatewayError> {
        let now = self.clock.now_ms();
        let mut state = self.load(model).await?.unwrap_or_else(|| ModelState::initial(now));

        if now.saturating_sub(state.rate_limit.window_start_ms) >= limits.rate_window_ms {
            state.rate_limit = RateLimitCounter {
                count: 1,
                window_start_ms: now,
            };
            self.store(model, &state).await?;
            return Ok(());
        }

        if state.rate_limit.count >= limits.rate_max {
            let window_end = state.rate_limit.window_start_ms + limits.rate_window_ms;
            let wait_ms = window_end.saturating_sub(now);
            let wait_seconds = wait_ms.div_ceil(1_000);
            self.events.rate_limited(model, wait_seconds);
            return Err(GatewayError::ProviderRateLimit { wait_seconds });
        }

        state.rate_limit.count += 1;
        self.store(model, &state).await?;
        Ok(())
    }

    /// Marks `model` errored with the reason derived from `err`, stamped at
    /// `op_start_ms`. No-op (and `Ok`) if `err` is not in the retryable/
    /// fallback category (§4.2) — callers should not call this for those,
    /// but this keeps the operation total instead of panicking.
    ///
    /// Applies the state-write rule of §4.6: writes only if there is no
    /// existing state or its timestamp predates `op_start_ms`; a restore
    /// transition (handled separately in `is_ready`) is the sole exception.
    pub async fn mark_error(
        &self,
        model: &ModelRef,
        err: &GatewayError,
        op_start_ms: u64,
    ) -> Result<(), GatewayError> {
        self.mark_error_with_restore(model, err, op_start_ms, None).await
    }

    /// Same as [`Self::mark_error`], but when `restore` is given also
    /// schedules a proactive recovery check on the unavailable queue
    /// (§4.6's supplemented introspection feature). Callers that have a
    /// resolved restore policy in scope (the engine's selection loop)
    /// should prefer this; `mark_error` alone still leaves the model
    /// correct, just dependent on a future `select` call to notice the
    /// restore.
    pub async fn mark_error_with_restore(
        &self,
        model: &ModelRef,
        err: &GatewayError,
        op_start_ms: u64,
        restore: Option<&ModelRestore>,
    ) -> Result<(), GatewayError> {
        let Some(reason) = ErrorReason::from_error(err) else {
            return Ok(());
        };
        let existing = self.load(model).await?;
        let rate_limit = existing
            .map(|s| s.rate_limit)
            .unwrap_or_else(|| RateLimitCounter {
                count: 0,
                window_start_ms: op_start_ms,
            });
        if let Some(current) = existing {
            if current.timestamp_ms >= op_start_ms {
                return Ok(());
            }
        }
        let errored = ModelState {
            rate_limit,
            status: ModelStatus::Error,
            reason,
            timestamp_ms: op_start_ms,
        };
        self.store(model, &errored).await?;
        self.events.model_marked_error(model, reason_code(reason));

        if let Some(restore) = restore {
            if let Some(restore_ms) = reason.restore_ms(restore) {
                let deadline = tokio::time::Instant::now() + Duration::from_millis(restore_ms);
                self.unavailable.push(deadline, model.clone(), op_start_ms).await;
            }
        }
        Ok(())
    }

    /// Re-checks `model`'s state for the unavailable queue's recovery
    /// sweep: flips it back to ready only if it is still `Error` and still
    /// stamped with `expected_timestamp_ms` — a later `mark_error` or an
    /// earlier lazy restore (via `is_ready`) means this entry is stale and
    /// must be a no-op.
    pub(crate) async fn recover_if_due(
        &self,
        model: &ModelRef,
        expected_timestamp_ms: u64,
    ) -> Result<bool, GatewayError> {
        let Some(state) = self.load(model).await? else {
            return Ok(false);
        };
        if state.status != ModelStatus::Error || state.timestamp_ms != expected_timestamp_ms {
            return Ok(false);
        }
        let restored = ModelState {
            rate_limit: state.rate_limit,
            status: ModelStatus::Ready,
            reason: ErrorReason::None,
            timestamp_ms: self.clock.now_ms(),
        };
        self.store(model, &restored).await?;
        Ok(true)
    }

    pub async fn state_of(&self, model: &ModelRef) -> Result<Option<ModelState>, GatewayError> {
        self.load(model).await
    }
}
