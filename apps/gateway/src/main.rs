use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use gateway_common::config::{GatewayConfig, GatewayConfigPatch, StorageType};
use gateway_core::{GatewayOptions, RequestEngine, SystemClock};
use gateway_provider_core::{ModelRef, ProviderClient, ProviderId};
use gateway_provider_impl::{DeepSeekClient, GeminiClient, OpenAiClient};
use gateway_storage::{MemoryStorage, Storage, ValkeyStorage};

mod auth;
mod cli;
mod routes;

use auth::NoopAuth;
use cli::CliArgs;

fn load_file_patch(path: &str) -> Result<GatewayConfigPatch> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read config file {path}"))?;
    toml::from_str(&raw).with_context(|| format!("parse config file {path}"))
}

fn cli_patch(args: &CliArgs) -> GatewayConfigPatch {
    let storage = args.storage_url.as_ref().map(|url| StorageType::Valkey { url: url.clone() });
    GatewayConfigPatch {
        host: args.host.clone(),
        port: args.port,
        storage,
        session_header_name: None,
        models: if args.models.is_empty() { None } else { Some(args.models.clone()) },
        openai_api_key: args.openai_api_key.clone(),
        deepseek_api_key: args.deepseek_api_key.clone(),
        gemini_api_key: args.gemini_api_key.clone(),
    }
}

/// Merge order per SPEC_FULL §2: built-in defaults (`into_config`'s
/// fallback) -> config file -> CLI/env (clap already resolves CLI-over-env
/// per flag via `#[arg(env = ...)]`).
fn load_config(args: &CliArgs) -> Result<GatewayConfig> {
    let mut merged = GatewayConfigPatch::default();
    if let Some(path) = &args.config {
        merged.overlay(load_file_patch(path)?);
    }
    merged.overlay(cli_patch(args));
    merged.into_config().context("finalize merged config")
}

async fn build_storage(config: &GatewayConfig) -> Result<Arc<dyn Storage>> {
    match &config.storage {
        StorageType::Memory => Ok(Arc::new(MemoryStorage::new())),
        StorageType::Valkey { url } => Ok(Arc::new(
            ValkeyStorage::connect(url).await.context("connect to valkey storage")?,
        )),
    }
}

fn build_providers(config: &GatewayConfig) -> Result<HashMap<ProviderId, Arc<dyn ProviderClient>>> {
    let mut providers: HashMap<ProviderId, Arc<dyn ProviderClient>> = HashMap::new();
    if let Some(key) = &config.openai_api_key {
        providers.insert(ProviderId::OpenAi, Arc::new(OpenAiClient::new(key.clone())?));
    }
    if let Some(key) = &config.deepseek_api_key {
        providers.insert(ProviderId::DeepSeek, Arc::new(DeepSeekClient::new(key.clone())?));
    }
    if let Some(key) = &config.gemini_api_key {
        providers.insert(ProviderId::Gemini, Arc::new(GeminiClient::new(key.clone())?));
    }
    Ok(providers)
}

fn build_models(config: &GatewayConfig) -> Result<Vec<ModelRef>> {
    config
        .models
        .iter()
        .map(|raw| raw.parse::<ModelRef>().map_err(|e| anyhow::anyhow!("invalid model {raw}: {e}")))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    let storage = build_storage(&config).await?;
    let providers = build_providers(&config)?;
    let default_models = build_models(&config)?;

    let engine = Arc::new(
        RequestEngine::new(GatewayOptions::default(), storage, Arc::new(SystemClock), providers, default_models)
            .context("construct request engine")?,
    );

    let state = routes::AppState {
        engine,
        auth: Arc::new(NoopAuth),
        session_header_name: config.session_header_name.clone(),
    };
    let app = routes::router(state);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("bind {bind}"))?;
    tracing::info!(event = "gateway_listening", addr = %bind);
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}
