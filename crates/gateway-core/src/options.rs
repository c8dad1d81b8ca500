use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use gateway_common::{parse_time_window_str, GatewayError};
use gateway_provider_core::{ModelLimits, ModelRef, ModelRestore};

/// Lets the duration fields of `OptionsPatch` accept either a millisecond
/// count or a `"30s"`/`"1m"`-style string (§4.1's time-window parser, C1),
/// matching the `timeWindow`/`requestTimeout`/`retry.interval`/
/// `historyExpiration`/`restore.*` table in §4.10. `rate.max`, `retry.max`
/// and `maxTokens` are plain counts, not time windows, so they stay on
/// serde's default `Option<u64>`/`Option<u32>` handling.
fn deserialize_time_window_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Millis(u64),
        Text(String),
    }

    match Option::<Repr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Repr::Millis(ms)) => Ok(Some(ms)),
        Some(Repr::Text(text)) => parse_time_window_str(&text).map(Some).map_err(D::Error::custom),
    }
}

const DEFAULT_RATE_MAX: u64 = 200;
const DEFAULT_RATE_WINDOW_MS: u64 = 30_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRY_MAX: u32 = 1;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1_000;
const DEFAULT_HISTORY_EXPIRATION_MS: u64 = 86_400_000;
const DEFAULT_RESTORE_RATE_LIMIT_MS: u64 = 60_000;
const DEFAULT_RESTORE_RETRY_MS: u64 = 60_000;
const DEFAULT_RESTORE_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_RESTORE_COMM_ERROR_MS: u64 = 60_000;
const DEFAULT_RESTORE_EXCEEDED_MS: u64 = 600_000;

/// A layer in the deep-merge chain described by §4.10: hard-coded defaults,
/// engine-level options, per-model overrides, per-request overrides. Every
/// field is optional; `overlay` applies the later layer's `Some`s on top.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionsPatch {
    pub rate_max: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_time_window_opt")]
    pub rate_window_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_time_window_opt")]
    pub request_timeout_ms: Option<u64>,
    pub retry_max: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_time_window_opt")]
    pub retry_interval_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_time_window_opt")]
    pub history_expiration_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_time_window_opt")]
    pub restore_rate_limit_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_time_window_opt")]
    pub restore_retry_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_time_window_opt")]
    pub restore_timeout_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_time_window_opt")]
    pub restore_provider_communication_error_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_time_window_opt")]
    pub restore_provider_exceeded_error_ms: Option<u64>,
    pub max_tokens: Option<u32>,
}

impl OptionsPatch {
    /// Lifts a `ModelRef`'s embedded `limits`/`restore` (§3) into the patch
    /// shape so it can take part in the same merge chain as the engine and
    /// request layers.
    pub fn from_model_ref(model: &ModelRef) -> OptionsPatch {
        let mut patch = OptionsPatch::default();
        if let Some(limits) = &model.limits {
            patch.rate_max = Some(limits.rate_max);
            patch.rate_window_ms = Some(limits.rate_window_ms);
            patch.max_tokens = limits.max_tokens;
        }
        if let Some(restore) = &model.restore {
            patch.restore_rate_limit_ms = Some(restore.rate_limit_ms);
            patch.restore_retry_ms = Some(restore.retry_ms);
            patch.restore_timeout_ms = Some(restore.timeout_ms);
            patch.restore_provider_communication_error_ms = Some(restore.provider_communication_error_ms);
            patch.restore_provider_exceeded_error_ms = Some(restore.provider_exceeded_error_ms);
        }
        patch
    }

    pub fn overlay(&mut self, other: &OptionsPatch) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(rate_max);
        take!(rate_window_ms);
        take!(request_timeout_ms);
        take!(retry_max);
        take!(retry_interval_ms);
        take!(history_expiration_ms);
        take!(restore_rate_limit_ms);
        take!(restore_retry_ms);
        take!(restore_timeout_ms);
        take!(restore_provider_communication_error_ms);
        take!(restore_provider_exceeded_error_ms);
        take!(max_tokens);
    }
}

/// Fully resolved options for one model selection: the merged result of
/// defaults -> engine -> per-model -> per-request, ready for the registry
/// and request engine to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub rate: ModelLimits,
    pub request_timeout_ms: u64,
    pub retry_max: u32,
    pub retry_interval_ms: u64,
    pub history_expiration_ms: u64,
    pub restore: ModelRestore,
}

fn defaults_patch() -> OptionsPatch {
    OptionsPatch {
        rate_max: Some(DEFAULT_RATE_MAX),
        rate_window_ms: Some(DEFAULT_RATE_WINDOW_MS),
        request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
        retry_max: Some(DEFAULT_RETRY_MAX),
        retry_interval_ms: Some(DEFAULT_RETRY_INTERVAL_MS),
        history_expiration_ms: Some(DEFAULT_HISTORY_EXPIRATION_MS),
        restore_rate_limit_ms: Some(DEFAULT_RESTORE_RATE_LIMIT_MS),
        restore_retry_ms: Some(DEFAULT_RESTORE_RETRY_MS),
        restore_timeout_ms: Some(DEFAULT_RESTORE_TIMEOUT_MS),
        restore_provider_communication_error_ms: Some(DEFAULT_RESTORE_COMM_ERROR_MS),
        restore_provider_exceeded_error_ms: Some(DEFAULT_RESTORE_EXCEEDED_MS),
        max_tokens: None,
    }
}

/// Engine-level configuration: the defaults layer plus an engine-wide
/// override, held for the lifetime of the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayOptions {
    pub engine: OptionsPatch,
}

impl GatewayOptions {
    pub fn new(engine: OptionsPatch) -> Self {
        Self { engine }
    }

    /// Resolves the full merge chain for one model selection, folding in an
    /// optional per-model override and an optional per-request override.
    pub fn resolve(
        &self,
        model: Option<&OptionsPatch>,
        request: Option<&OptionsPatch>,
    ) -> Result<ResolvedOptions, GatewayError> {
        let mut merged = defaults_patch();
        merged.overlay(&self.engine);
        if let Some(model) = model {
            merged.overlay(model);
        }
        if let Some(request) = request {
            merged.overlay(request);
        }

        let rate_max = merged.rate_max.expect("default sets rate_max");
        let rate_window_ms = merged.rate_window_ms.expect("default sets rate_window_ms");
        if rate_window_ms == 0 {
            return Err(GatewayError::OptionsError(
                "rate.timeWindow must be > 0".to_string(),
            ));
        }

        Ok(ResolvedOptions {
            rate: ModelLimits {
                max_tokens: merged.max_tokens,
                rate_max,
                rate_window_ms,
            },
            request_timeout_ms: merged
                .request_timeout_ms
                .expect("default sets request_timeout_ms"),
            retry_max: merged.retry_max.expect("default sets retry_max"),
            retry_interval_ms: merged
                .retry_interval_ms
                .expect("default sets retry_interval_ms"),
            history_expiration_ms: merged
                .history_expiration_ms
                .expect("default sets history_expiration_ms"),
            restore: ModelRestore {
                rate_limit_ms: merged
                    .restore_rate_limit_ms
                    .expect("default sets restore_rate_limit_ms"),
                retry_ms: merged.restore_retry_ms.expect("default sets restore_retry_ms"),
                timeout_ms: merged
                    .restore_timeout_ms
                    .expect("default sets restore_timeout_ms"),
                provider_communication_error_ms: merged
                    .restore_provider_communication_error_ms
                    .expect("default sets restore_provider_communication_error_ms"),
                provider_exceeded_error_ms: merged
                    .restore_provider_exceeded_error_ms
                    .expect("default sets restore_provider_exceeded_error_ms"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let options = GatewayOptions::default();
        let resolved = options.resolve(None, None).unwrap();
        assert_eq!(resolved.rate.rate_max, 200);
        assert_eq!(resolved.rate.rate_window_ms, 30_000);
        assert_eq!(resolved.request_timeout_ms, 30_000);
        assert_eq!(resolved.retry_max, 1);
        assert_eq!(resolved.retry_interval_ms, 1_000);
        assert_eq!(resolved.history_expiration_ms, 86_400_000);
        assert_eq!(resolved.restore.provider_exceeded_error_ms, 600_000);
    }

    #[test]
    fn per_model_overrides_win_over_engine_defaults() {
        let options = GatewayOptions::new(OptionsPatch {
            rate_max: Some(50),
            ..Default::default()
        });
        let model_patch = OptionsPatch {
            rate_max: Some(5),
            ..Default::default()
        };
        let resolved = options.resolve(Some(&model_patch), None).unwrap();
        assert_eq!(resolved.rate.rate_max, 5);
    }

    #[test]
    fn per_request_overrides_win_over_per_model() {
        let options = GatewayOptions::default();
        let model_patch = OptionsPatch {
            rate_max: Some(5),
            ..Default::default()
        };
        let request_patch = OptionsPatch {
            rate_max: Some(1),
            ..Default::default()
        };
        let resolved = options
            .resolve(Some(&model_patch), Some(&request_patch))
            .unwrap();
        assert_eq!(resolved.rate.rate_max, 1);
    }

    #[test]
    fn zero_window_is_rejected() {
        let options = GatewayOptions::new(OptionsPatch {
            rate_window_ms: Some(0),
            ..Default::default()
        });
        assert!(options.resolve(None, None).is_err());
    }

    #[test]
    fn time_window_fields_accept_the_c1_string_form() {
        let patch: OptionsPatch = serde_json::from_str(
            r#"{"rate_window_ms":"30s","request_timeout_ms":60000,"restore_rate_limit_ms":"1m"}"#,
        )
        .unwrap();
        assert_eq!(patch.rate_window_ms, Some(30_000));
        assert_eq!(patch.request_timeout_ms, Some(60_000));
        assert_eq!(patch.restore_rate_limit_ms, Some(60_000));
    }

    #[test]
    fn malformed_time_window_string_is_rejected() {
        let result: Result<OptionsPatch, _> = serde_json::from_str(r#"{"rate_window_ms":"thirty"}"#);
        assert!(result.is_err());
    }
}
