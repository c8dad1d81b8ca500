use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use gateway_common::{parse_time_window_str, GatewayError};

/// Lets `ModelLimits.rate_window_ms` and every `ModelRestore` field accept
/// either a millisecond count or a `"30s"`/`"1m"`-style string (§4.1's
/// time-window parser, C1), matching `gateway_core::options`'s identical
/// treatment of the engine-level option patch.
fn deserialize_time_window<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Millis(u64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Millis(ms) => Ok(ms),
        Repr::Text(text) => parse_time_window_str(&text).map_err(de::Error::custom),
    }
}

/// Closed set of upstream vendors the registry can select from. Extensible
/// in principle; any `ModelRef` built from configuration must name a
/// provider the engine has an adapter registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    DeepSeek,
    Gemini,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::DeepSeek => "deepseek",
            ProviderId::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderId::OpenAi),
            "deepseek" => Ok(ProviderId::DeepSeek),
            "gemini" => Ok(ProviderId::Gemini),
            other => Err(GatewayError::ProviderNotFound(other.to_string())),
        }
    }
}

/// `{maxTokens?, rate:{max, windowMs}}`. A per-model value overrides the
/// engine-level default from `GatewayOptions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    pub max_tokens: Option<u32>,
    pub rate_max: u64,
    #[serde(deserialize_with = "deserialize_time_window")]
    pub rate_window_ms: u64,
}

/// Per-error-class restore durations, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRestore {
    #[serde(deserialize_with = "deserialize_time_window")]
    pub rate_limit_ms: u64,
    #[serde(deserialize_with = "deserialize_time_window")]
    pub retry_ms: u64,
    #[serde(deserialize_with = "deserialize_time_window")]
    pub timeout_ms: u64,
    #[serde(deserialize_with = "deserialize_time_window")]
    pub provider_communication_error_ms: u64,
    #[serde(deserialize_with = "deserialize_time_window")]
    pub provider_exceeded_error_ms: u64,
}

/// `"<provider>:<name>"` or the structured form. Equality is `(provider, name)`
/// only: two refs with different `limits`/`restore` still collide as the same
/// model for registry bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRef {
    pub provider: ProviderId,
    pub name: String,
    pub limits: Option<ModelLimits>,
    pub restore: Option<ModelRestore>,
}

impl ModelRef {
    pub fn new(provider: ProviderId, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
            limits: None,
            restore: None,
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.provider, self.name)
    }
}

impl PartialEq for ModelRef {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider && self.name == other.name
    }
}
impl Eq for ModelRef {}

/// Consistent with the `(provider, name)`-only `PartialEq` above.
impl Hash for ModelRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.provider.hash(state);
        self.name.hash(state);
    }
}

/// Consistent with the `(provider, name)`-only `PartialEq`/`Hash` above;
/// needed to put a `ModelRef` in the tie-break position of a `BinaryHeap`
/// key (see `gateway_core::unavailable_queue`).
impl PartialOrd for ModelRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModelRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.provider, &self.name).cmp(&(other.provider, &other.name))
    }
}

impl FromStr for ModelRef {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, name) = s
            .split_once(':')
            .ok_or_else(|| GatewayError::OptionsError(format!("malformed model ref: {s}")))?;
        if name.is_empty() {
            return Err(GatewayError::OptionsError(format!("malformed model ref: {s}")));
        }
        Ok(ModelRef::new(provider.parse()?, name))
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Accepts either the plain string form or the structured record, per §3:
/// "The two forms are interchangeable inputs; internally they are
/// normalized to the structured form."
impl<'de> Deserialize<'de> for ModelRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Struct {
                provider: ProviderId,
                name: String,
                #[serde(default)]
                limits: Option<ModelLimits>,
                #[serde(default)]
                restore: Option<ModelRestore>,
            },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(de::Error::custom),
            Repr::Struct {
                provider,
                name,
                limits,
                restore,
            } => Ok(ModelRef {
                provider,
                name,
                limits,
                restore,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_form() {
        let m: ModelRef = "openai:gpt-4o-mini".parse().unwrap();
        assert_eq!(m.provider, ProviderId::OpenAi);
        assert_eq!(m.name, "gpt-4o-mini");
    }

    #[test]
    fn rejects_missing_colon() {
        assert!("gpt-4o-mini".parse::<ModelRef>().is_err());
    }

    #[test]
    fn equality_ignores_limits_and_restore() {
        let mut a = ModelRef::new(ProviderId::Gemini, "gemini-2.5-flash");
        let b = a.clone();
        a.limits = Some(ModelLimits {
            max_tokens: Some(100),
            rate_max: 10,
            rate_window_ms: 1_000,
        });
        assert_eq!(a, b);
    }

    #[test]
    fn hash_ignores_limits_and_restore_like_eq() {
        use std::collections::HashSet;
        let mut a = ModelRef::new(ProviderId::Gemini, "gemini-2.5-flash");
        let b = a.clone();
        a.limits = Some(ModelLimits {
            max_tokens: Some(100),
            rate_max: 10,
            rate_window_ms: 1_000,
        });
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn deserializes_both_string_and_struct_forms() {
        let from_text: ModelRef = serde_json::from_str("\"deepseek:deepseek-chat\"").unwrap();
        assert_eq!(from_text.key(), "deepseek:deepseek-chat");

        let from_struct: ModelRef =
            serde_json::from_str(r#"{"provider":"deepseek","name":"deepseek-chat"}"#).unwrap();
        assert_eq!(from_struct.key(), "deepseek:deepseek-chat");
    }

    #[test]
    fn embedded_limits_and_restore_accept_the_c1_string_form() {
        let m: ModelRef = serde_json::from_str(
            r#"{
                "provider": "openai",
                "name": "gpt-4o-mini",
                "limits": {"rate_max": 10, "rate_window_ms": "30s"},
                "restore": {
                    "rate_limit_ms": "1m",
                    "retry_ms": "1m",
                    "timeout_ms": "1m",
                    "provider_communication_error_ms": "1m",
                    "provider_exceeded_error_ms": "10m"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(m.limits.unwrap().rate_window_ms, 30_000);
        let restore = m.restore.unwrap();
        assert_eq!(restore.rate_limit_ms, 60_000);
        assert_eq!(restore.provider_exceeded_error_ms, 600_000);
    }
}
