pub mod model;
pub mod sse;

pub use model::{ChatTurn, ContentResponse, ResponseResult, SessionId};
pub use sse::{SseDecoder, SseEvent, SseEventKind};
