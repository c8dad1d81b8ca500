use clap::Parser;

/// Flags the binary actually needs to stand itself up; no project
/// scaffolding or admin-key management.
#[derive(Debug, Clone, Parser)]
#[command(name = "gateway", version, about = "AI gateway: model fallback, rate limiting, resumable SSE streaming")]
pub struct CliArgs {
    /// Path to a TOML config file, merged under CLI/env overrides.
    #[arg(long, env = "GATEWAY_CONFIG")]
    pub config: Option<String>,

    #[arg(long, env = "GATEWAY_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "GATEWAY_PORT")]
    pub port: Option<u16>,

    /// A `redis://`/`valkey://` URL. Presence selects the Valkey storage
    /// backend; absence selects the in-memory one.
    #[arg(long, env = "GATEWAY_STORAGE_URL")]
    pub storage_url: Option<String>,

    /// `"<provider>:<name>"` fallback chain, in priority order.
    #[arg(long = "model", env = "GATEWAY_MODELS", value_delimiter = ',')]
    pub models: Vec<String>,

    #[arg(long, env = "GATEWAY_OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "GATEWAY_DEEPSEEK_API_KEY")]
    pub deepseek_api_key: Option<String>,

    #[arg(long, env = "GATEWAY_GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,
}
