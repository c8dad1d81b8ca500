use crate::error::GatewayError;

/// Accepts either a bare millisecond count or a string of the form
/// `^(\d+)(ms|s|m|h|d)$` and returns the duration in milliseconds.
pub fn parse_time_window_str(input: &str) -> Result<u64, GatewayError> {
    let split_at = input
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| GatewayError::InvalidTimeWindow(input.to_string()))?;
    let (digits, unit) = input.split_at(split_at);
    if digits.is_empty() {
        return Err(GatewayError::InvalidTimeWindow(input.to_string()));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| GatewayError::InvalidTimeWindow(input.to_string()))?;
    let multiplier = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(GatewayError::InvalidTimeWindow(input.to_string())),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| GatewayError::InvalidTimeWindow(input.to_string()))
}

/// A time window as given by the caller: either an already-resolved
/// millisecond count or a string to parse with [`parse_time_window_str`].
#[derive(Debug, Clone)]
pub enum TimeWindowInput {
    Millis(u64),
    Text(String),
}

impl From<u64> for TimeWindowInput {
    fn from(value: u64) -> Self {
        Self::Millis(value)
    }
}

impl From<&str> for TimeWindowInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TimeWindowInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

pub fn parse_time_window(input: impl Into<TimeWindowInput>) -> Result<u64, GatewayError> {
    match input.into() {
        TimeWindowInput::Millis(ms) => Ok(ms),
        TimeWindowInput::Text(text) => parse_time_window_str(&text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_time_window_str("30s").unwrap(), 30_000);
        assert_eq!(parse_time_window_str("1m").unwrap(), 60_000);
        assert_eq!(parse_time_window_str("2h").unwrap(), 7_200_000);
        assert_eq!(parse_time_window_str("1d").unwrap(), 86_400_000);
        assert_eq!(parse_time_window_str("500ms").unwrap(), 500);
    }

    #[test]
    fn symmetry_between_string_and_millis() {
        assert_eq!(
            parse_time_window("1m").unwrap(),
            parse_time_window(60_000u64).unwrap()
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_time_window_str("").is_err());
        assert!(parse_time_window_str("5").is_err());
        assert!(parse_time_window_str("5x").is_err());
        assert!(parse_time_window_str("m5").is_err());
        assert!(parse_time_window_str("-5s").is_err());
    }

    #[test]
    fn millis_form_passes_through_unchanged() {
        assert_eq!(parse_time_window(12_345u64).unwrap(), 12_345);
    }
}
