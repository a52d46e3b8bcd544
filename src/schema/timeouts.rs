//! Per-operation timeouts and duration strings.

use std::time::Duration;

use serde_json::Value;

use super::TIMEOUTS_BLOCK;
use crate::error::ProviderError;

/// Timeout applied when a resource declares none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Timeouts for each lifecycle operation of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceTimeouts {
    /// Create timeout.
    pub create: Duration,
    /// Read timeout.
    pub read: Duration,
    /// Update timeout.
    pub update: Duration,
    /// Delete timeout.
    pub delete: Duration,
}

impl Default for ResourceTimeouts {
    fn default() -> Self {
        Self {
            create: DEFAULT_TIMEOUT,
            read: DEFAULT_TIMEOUT,
            update: DEFAULT_TIMEOUT,
            delete: DEFAULT_TIMEOUT,
        }
    }
}

impl ResourceTimeouts {
    /// Set the create timeout.
    pub fn with_create(mut self, timeout: Duration) -> Self {
        self.create = timeout;
        self
    }

    /// Set the read timeout.
    pub fn with_read(mut self, timeout: Duration) -> Self {
        self.read = timeout;
        self
    }

    /// Set the update timeout.
    pub fn with_update(mut self, timeout: Duration) -> Self {
        self.update = timeout;
        self
    }

    /// Set the delete timeout.
    pub fn with_delete(mut self, timeout: Duration) -> Self {
        self.delete = timeout;
        self
    }

    /// Apply the `timeouts { ... }` block of a configuration on top of these
    /// defaults.
    pub fn with_overrides(mut self, config: &Value) -> Result<Self, ProviderError> {
        let block = match config.get(TIMEOUTS_BLOCK) {
            Some(Value::Object(block)) => block,
            _ => return Ok(self),
        };
        for (op, slot) in [
            ("create", &mut self.create),
            ("read", &mut self.read),
            ("update", &mut self.update),
            ("delete", &mut self.delete),
        ] {
            if let Some(raw) = block.get(op).and_then(Value::as_str) {
                *slot = parse_duration(raw)
                    .map_err(|e| e.context(format!("parsing timeouts.{}", op)))?;
            }
        }
        Ok(self)
    }
}

/// Parse a duration such as `"10m"`, `"1h30m"`, `"45s"` or `"500ms"`.
pub fn parse_duration(input: &str) -> Result<Duration, ProviderError> {
    let invalid = || ProviderError::Validation(format!("invalid duration \"{}\"", input));
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let seconds = match unit {
            "h" => amount * 3600.0,
            "m" => amount * 60.0,
            "s" => amount,
            "ms" => amount / 1000.0,
            "us" | "µs" => amount / 1_000_000.0,
            "ns" => amount / 1_000_000_000.0,
            _ => return Err(invalid()),
        };
        total += Duration::from_secs_f64(seconds);
    }
    Ok(total)
}

/// Format a duration the way `parse_duration` reads it, e.g. `10m0s`.
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms < 1000 {
        return format!("{}ms", total_ms);
    }
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let millis = duration.subsec_millis();
    let seconds = if millis > 0 {
        let fraction = format!("{:03}", millis);
        format!("{}.{}s", s, fraction.trim_end_matches('0'))
    } else {
        format!("{}s", s)
    };
    if h > 0 {
        format!("{}h{}m{}", h, m, seconds)
    } else if m > 0 {
        format!("{}m{}", m, seconds)
    } else {
        seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("ten minutes").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(600)), "10m0s");
        assert_eq!(format_duration(Duration::from_secs(2)), "2s");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m0s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
    }

    #[test]
    fn test_overrides_from_config() {
        let defaults = ResourceTimeouts::default().with_update(Duration::from_secs(1200));
        let config = json!({"name": "x", "timeouts": {"create": "20m", "delete": "1h"}});
        let timeouts = defaults.with_overrides(&config).unwrap();
        assert_eq!(timeouts.create, Duration::from_secs(1200));
        assert_eq!(timeouts.update, Duration::from_secs(1200));
        assert_eq!(timeouts.read, DEFAULT_TIMEOUT);
        assert_eq!(timeouts.delete, Duration::from_secs(3600));

        let config = json!({"timeouts": {"create": "soon"}});
        let err = defaults.with_overrides(&config).unwrap_err();
        assert!(err.to_string().contains("timeouts.create"));
    }
}
