use std::time::SystemTime;

use http::{HeaderMap, StatusCode};

use gateway_common::GatewayError;

/// One shared client per adapter instance. No proxy-keyed cache: each
/// `ProviderClient` here owns exactly one upstream, so there is nothing to
/// key by.
pub(crate) fn build_client() -> Result<wreq::Client, GatewayError> {
    wreq::Client::builder()
        .build()
        .map_err(|err| GatewayError::ProviderResponseError(err.to_string()))
}

/// Maps a non-2xx upstream status into the closed taxonomy (§4.5): quota and
/// rate-limit errors get their own codes so the registry can apply the right
/// restore policy; everything else is a plain response error.
pub(crate) fn classify_error_status(status: StatusCode, headers: &HeaderMap, body: &str) -> GatewayError {
    let lower = body.to_ascii_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS {
        if lower.contains("quota") {
            return GatewayError::ProviderExceededQuota;
        }
        return GatewayError::ProviderRateLimit {
            wait_seconds: retry_after_seconds(headers).unwrap_or(60),
        };
    }
    if status == StatusCode::PAYMENT_REQUIRED || lower.contains("quota") || lower.contains("insufficient") {
        return GatewayError::ProviderExceededQuota;
    }
    GatewayError::ProviderResponseError(format!("upstream returned {status}: {body}"))
}

fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(SystemTime::now()).ok().map(|d| d.as_secs())
}
