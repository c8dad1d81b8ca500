use http::StatusCode;

/// The closed error taxonomy shared by every crate in the workspace. Engine
/// code uses `?` freely; component crates convert their local errors into
/// this type at the boundary so the request engine can make retry/fallback
/// decisions purely by matching on `code()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid options: {0}")]
    OptionsError(String),
    #[error("invalid time window: {0}")]
    InvalidTimeWindow(String),

    #[error("authentication required")]
    AuthenticationRequired,
    #[error("invalid authentication token")]
    AuthenticationInvalidToken,
    #[error("authentication token expired")]
    AuthenticationTokenExpired,

    #[error("provider not found: {0}")]
    ProviderNotFound(String),
    #[error("no models available")]
    ProviderNoModelsAvailable,
    #[error("model state error: {0}")]
    ModelStateError(String),

    #[error("rate limited, retry after {wait_seconds}s")]
    ProviderRateLimit { wait_seconds: u64 },
    #[error("request timed out")]
    ProviderRequestTimeout,
    #[error("stream timed out")]
    ProviderRequestStreamTimeout,
    #[error("provider response error: {0}")]
    ProviderResponseError(String),
    #[error("provider returned no content")]
    ProviderResponseNoContent,
    #[error("provider quota exceeded")]
    ProviderExceededQuota,

    #[error("storage get failed: {0}")]
    StorageGetError(String),
    #[error("storage set failed: {0}")]
    StorageSetError(String),
    #[error("storage list push failed: {0}")]
    StorageListPushError(String),
    #[error("storage list range failed: {0}")]
    StorageListRangeError(String),
    #[error("history get failed: {0}")]
    HistoryGetError(String),
}

impl GatewayError {
    /// Stable code string, as used by storage keys, SSE error frames and
    /// the model-restore mapping in the registry.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::OptionsError(_) => "AI_OPTIONS_ERROR",
            GatewayError::InvalidTimeWindow(_) => "INVALID_TIME_WINDOW",
            GatewayError::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            GatewayError::AuthenticationInvalidToken => "AUTHENTICATION_INVALID_TOKEN",
            GatewayError::AuthenticationTokenExpired => "AUTHENTICATION_TOKEN_EXPIRED",
            GatewayError::ProviderNotFound(_) => "PROVIDER_NOT_FOUND",
            GatewayError::ProviderNoModelsAvailable => "PROVIDER_NO_MODELS_AVAILABLE",
            GatewayError::ModelStateError(_) => "MODEL_STATE_ERROR",
            GatewayError::ProviderRateLimit { .. } => "PROVIDER_RATE_LIMIT",
            GatewayError::ProviderRequestTimeout => "PROVIDER_REQUEST_TIMEOUT",
            GatewayError::ProviderRequestStreamTimeout => "PROVIDER_REQUEST_STREAM_TIMEOUT",
            GatewayError::ProviderResponseError(_) => "PROVIDER_RESPONSE_ERROR",
            GatewayError::ProviderResponseNoContent => "PROVIDER_RESPONSE_NO_CONTENT",
            GatewayError::ProviderExceededQuota => "PROVIDER_EXCEEDED_QUOTA",
            GatewayError::StorageGetError(_) => "STORAGE_GET_ERROR",
            GatewayError::StorageSetError(_) => "STORAGE_SET_ERROR",
            GatewayError::StorageListPushError(_) => "STORAGE_LIST_PUSH_ERROR",
            GatewayError::StorageListRangeError(_) => "STORAGE_LIST_RANGE_ERROR",
            GatewayError::HistoryGetError(_) => "HISTORY_GET_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::OptionsError(_) | GatewayError::InvalidTimeWindow(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::AuthenticationRequired
            | GatewayError::AuthenticationInvalidToken
            | GatewayError::AuthenticationTokenExpired => StatusCode::UNAUTHORIZED,
            GatewayError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ProviderNoModelsAvailable | GatewayError::ModelStateError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::ProviderRateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ProviderRequestTimeout | GatewayError::ProviderRequestStreamTimeout => {
                StatusCode::GATEWAY_TIMEOUT
            }
            GatewayError::ProviderResponseError(_)
            | GatewayError::ProviderResponseNoContent
            | GatewayError::ProviderExceededQuota => StatusCode::BAD_GATEWAY,
            GatewayError::StorageGetError(_)
            | GatewayError::StorageSetError(_)
            | GatewayError::StorageListPushError(_)
            | GatewayError::StorageListRangeError(_)
            | GatewayError::HistoryGetError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for the "provider, retryable/fallback" category (§4.2): only
    /// these trigger model-state updates and fallback selection in the
    /// request engine. Everything else surfaces immediately.
    pub fn retryable_fallback(&self) -> bool {
        matches!(
            self,
            GatewayError::ProviderRateLimit { .. }
                | GatewayError::ProviderRequestTimeout
                | GatewayError::ProviderRequestStreamTimeout
                | GatewayError::ProviderResponseError(_)
                | GatewayError::ProviderResponseNoContent
                | GatewayError::ProviderExceededQuota
        )
    }

    /// Whether a failed attempt against this error should be retried within
    /// the current model's attempt budget, as opposed to skipping straight
    /// to fallback. Per §7: timeouts are never retried.
    pub fn is_retryable_attempt(&self) -> bool {
        self.retryable_fallback()
            && !matches!(
                self,
                GatewayError::ProviderRequestTimeout | GatewayError::ProviderRequestStreamTimeout
            )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(value: serde_json::Error) -> Self {
        GatewayError::OptionsError(value.to_string())
    }
}

impl From<std::num::ParseIntError> for GatewayError {
    fn from(value: std::num::ParseIntError) -> Self {
        GatewayError::OptionsError(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_provider_errors_are_retryable_fallback() {
        assert!(GatewayError::ProviderExceededQuota.retryable_fallback());
        assert!(!GatewayError::AuthenticationRequired.retryable_fallback());
        assert!(!GatewayError::ProviderNoModelsAvailable.retryable_fallback());
    }

    #[test]
    fn timeouts_skip_the_retry_loop_but_still_fall_back() {
        assert!(GatewayError::ProviderRequestTimeout.retryable_fallback());
        assert!(!GatewayError::ProviderRequestTimeout.is_retryable_attempt());
        assert!(GatewayError::ProviderResponseError(String::new()).is_retryable_attempt());
    }

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(
            GatewayError::ProviderRateLimit { wait_seconds: 5 }.code(),
            "PROVIDER_RATE_LIMIT"
        );
        assert_eq!(GatewayError::InvalidTimeWindow(String::new()).code(), "INVALID_TIME_WINDOW");
    }
}
