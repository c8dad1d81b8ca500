use serde::{Deserialize, Serialize};

use gateway_common::GatewayError;

use crate::model_ref::ModelRestore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelStatus {
    Ready,
    Error,
}

/// §3's `reason` enum. `None` is the only reason paired with `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReason {
    None,
    ProviderRateLimitError,
    ProviderRequestTimeoutError,
    ProviderRequestStreamTimeoutError,
    ProviderResponseError,
    ProviderResponseNoContent,
    ProviderExceededQuotaError,
}

impl ErrorReason {
    /// Maps a retryable/fallback `GatewayError` to the reason it stamps on
    /// the model state (§4.6's restore table). Returns `None` for any error
    /// outside that category — callers should not be marking model state
    /// for those in the first place.
    pub fn from_error(err: &GatewayError) -> Option<Self> {
        Some(match err {
            GatewayError::ProviderRateLimit { .. } => ErrorReason::ProviderRateLimitError,
            GatewayError::ProviderRequestTimeout => ErrorReason::ProviderRequestTimeoutError,
            GatewayError::ProviderRequestStreamTimeout => {
                ErrorReason::ProviderRequestStreamTimeoutError
            }
            GatewayError::ProviderResponseError(_) => ErrorReason::ProviderResponseError,
            GatewayError::ProviderResponseNoContent => ErrorReason::ProviderResponseNoContent,
            GatewayError::ProviderExceededQuota => ErrorReason::ProviderExceededQuotaError,
            _ => return None,
        })
    }

    /// The restore duration (ms) configured for this reason, per the
    /// `R -> restore[...]` mapping in §4.6.
    pub fn restore_ms(&self, restore: &ModelRestore) -> Option<u64> {
        match self {
            ErrorReason::None => None,
            ErrorReason::ProviderRateLimitError => Some(restore.rate_limit_ms),
            ErrorReason::ProviderRequestTimeoutError
            | ErrorReason::ProviderRequestStreamTimeoutError => Some(restore.timeout_ms),
            ErrorReason::ProviderResponseError | ErrorReason::ProviderResponseNoContent => {
                Some(restore.provider_communication_error_ms)
            }
            ErrorReason::ProviderExceededQuotaError => Some(restore.provider_exceeded_error_ms),
        }
    }
}

/// Fixed-window rate counter, §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitCounter {
    pub count: u64,
    pub window_start_ms: u64,
}

/// Per-`(provider,name)` record, persisted by the registry under
/// `model:<provider>:<name>` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelState {
    pub rate_limit: RateLimitCounter,
    pub status: ModelStatus,
    pub reason: ErrorReason,
    pub timestamp_ms: u64,
}

impl ModelState {
    pub fn initial(now_ms: u64) -> Self {
        Self {
            rate_limit: RateLimitCounter {
                count: 0,
                window_start_ms: now_ms,
            },
            status: ModelStatus::Ready,
            reason: ErrorReason::None,
            timestamp_ms: now_ms,
        }
    }

    /// Whether this state, if currently `Error`, has passed its restore
    /// deadline and should be treated as ready again (§4.6, §6's
    /// "error -> ready restore" exception to last-writer-wins).
    pub fn restore_elapsed(&self, restore: &ModelRestore, now_ms: u64) -> bool {
        if self.status != ModelStatus::Error {
            return false;
        }
        match self.reason.restore_ms(restore) {
            Some(deadline_ms) => now_ms >= self.timestamp_ms.saturating_add(deadline_ms),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restore() -> ModelRestore {
        ModelRestore {
            rate_limit_ms: 60_000,
            retry_ms: 60_000,
            timeout_ms: 60_000,
            provider_communication_error_ms: 60_000,
            provider_exceeded_error_ms: 600_000,
        }
    }

    #[test]
    fn error_reason_maps_only_retryable_fallback_errors() {
        assert_eq!(
            ErrorReason::from_error(&GatewayError::ProviderExceededQuota),
            Some(ErrorReason::ProviderExceededQuotaError)
        );
        assert_eq!(
            ErrorReason::from_error(&GatewayError::AuthenticationRequired),
            None
        );
    }

    #[test]
    fn restore_elapsed_respects_deadline() {
        let state = ModelState {
            rate_limit: RateLimitCounter {
                count: 0,
                window_start_ms: 0,
            },
            status: ModelStatus::Error,
            reason: ErrorReason::ProviderRateLimitError,
            timestamp_ms: 1_000,
        };
        let restore = restore();
        assert!(!state.restore_elapsed(&restore, 1_000 + 59_999));
        assert!(state.restore_elapsed(&restore, 1_000 + 60_000));
    }

    #[test]
    fn ready_state_never_reports_restore_elapsed() {
        let state = ModelState::initial(0);
        assert!(!state.restore_elapsed(&restore(), 1_000_000));
    }
}
