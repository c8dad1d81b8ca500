use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Selects which `Storage` backend the engine is built against (§4.10's
/// `storage.type` option).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    Valkey { url: String },
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::Memory
    }
}

/// Process-level configuration: the ambient settings needed to stand the
/// binary up, as opposed to [`GatewayOptions`](../gateway_core/struct.GatewayOptions.html)
/// which governs engine request behavior. Loaded from a TOML file plus
/// environment overrides and merged in the order CLI > ENV > file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub storage: StorageType,
    /// Name of the response header carrying the session id on `/stream`.
    pub session_header_name: String,
    /// `"<provider>:<name>"` fallback chain, in priority order. Parsed into
    /// `ModelRef`s by the binary, which owns the provider-core dependency
    /// this crate can't take without creating a cycle.
    pub models: Vec<String>,
    pub openai_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            storage: StorageType::Memory,
            session_header_name: "x-session-id".to_string(),
            models: Vec::new(),
            openai_api_key: None,
            deepseek_api_key: None,
            gemini_api_key: None,
        }
    }
}

/// Optional overlay used while merging config layers (file, env, CLI).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub storage: Option<StorageType>,
    pub session_header_name: Option<String>,
    pub models: Option<Vec<String>>,
    pub openai_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl GatewayConfigPatch {
    /// Applies `other` on top of `self`, field by field, last writer wins.
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.session_header_name.is_some() {
            self.session_header_name = other.session_header_name;
        }
        if other.models.is_some() {
            self.models = other.models;
        }
        if other.openai_api_key.is_some() {
            self.openai_api_key = other.openai_api_key;
        }
        if other.deepseek_api_key.is_some() {
            self.deepseek_api_key = other.deepseek_api_key;
        }
        if other.gemini_api_key.is_some() {
            self.gemini_api_key = other.gemini_api_key;
        }
    }

    pub fn into_config(self) -> Result<GatewayConfig, GatewayError> {
        let defaults = GatewayConfig::default();
        Ok(GatewayConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            storage: self.storage.unwrap_or(defaults.storage),
            session_header_name: self
                .session_header_name
                .unwrap_or(defaults.session_header_name),
            models: self.models.unwrap_or(defaults.models),
            openai_api_key: self.openai_api_key.or(defaults.openai_api_key),
            deepseek_api_key: self.deepseek_api_key.or(defaults.deepseek_api_key),
            gemini_api_key: self.gemini_api_key.or(defaults.gemini_api_key),
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            storage: Some(value.storage),
            session_header_name: Some(value.session_header_name),
            models: Some(value.models),
            openai_api_key: value.openai_api_key,
            deepseek_api_key: value.deepseek_api_key,
            gemini_api_key: value.gemini_api_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_the_later_layer() {
        let mut base = GatewayConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(8080),
            ..Default::default()
        };
        let env = GatewayConfigPatch {
            port: Some(9090),
            ..Default::default()
        };
        base.overlay(env);
        assert_eq!(base.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(base.port, Some(9090));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = GatewayConfigPatch::default().into_config().unwrap();
        assert_eq!(config, GatewayConfig::default());
    }
}
