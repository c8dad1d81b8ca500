use uuid::Uuid;

/// Event ids used for history/session-hash fields and SSE frame ids.
///
/// UUID v7 embeds a millisecond timestamp in its high bits, so raw
/// byte/string order already equals generation order, which lets
/// `range`/resume sort by plain `Uuid` comparison without a separate
/// sequence counter.
pub fn new_event_id() -> Uuid {
    Uuid::now_v7()
}
