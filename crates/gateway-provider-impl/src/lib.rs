//! Concrete `ProviderClient` adapters (§4.5): one per upstream vendor, all
//! built on `wreq`. Each adapter is a thin translation layer — vendor wire
//! format in, `ProviderCompletion`/`ChunkStream` out — and never leaks a
//! vendor error type past its own module.

mod http_client;
mod openai_compat;
mod sse_lines;

pub mod deepseek;
pub mod gemini;
pub mod openai;

pub use deepseek::DeepSeekClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
