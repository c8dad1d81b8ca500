pub mod config;
pub mod error;
pub mod time_window;

pub use config::{GatewayConfig, GatewayConfigPatch, StorageType};
pub use error::GatewayError;
pub use time_window::{parse_time_window, parse_time_window_str, TimeWindowInput};
