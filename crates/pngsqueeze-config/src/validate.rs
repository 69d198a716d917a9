//! Parsing helpers for individual environment variables.

use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};

/// Parse an optional numeric value, applying `default` when unset and enforcing
/// `min..=max`.
pub(crate) fn parse_bounded<T>(
    field: &'static str,
    raw: Option<&str>,
    default: T,
    min: T,
    max: T,
) -> ConfigResult<T>
where
    T: FromStr + PartialOrd + Copy + Display,
{
    let Some(raw) = non_empty(raw) else {
        return Ok(default);
    };
    let value = raw
        .parse::<T>()
        .map_err(|_| ConfigError::invalid(field, raw, "must be an integer"))?;
    if value < min || value > max {
        return Err(ConfigError::invalid(field, raw, "out of range"));
    }
    Ok(value)
}

/// Parse a boolean flag (`1/0`, `true/false`, `yes/no`, `on/off`).
pub(crate) fn parse_flag(field: &'static str, raw: Option<&str>, default: bool) -> ConfigResult<bool> {
    let Some(raw) = non_empty(raw) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(field, raw, "must be a boolean")),
    }
}

/// Parse an IP address, falling back to `default` when unset.
pub(crate) fn parse_ip(field: &'static str, raw: Option<&str>, default: &str) -> ConfigResult<IpAddr> {
    let raw = non_empty(raw).unwrap_or(default);
    raw.parse()
        .map_err(|_| ConfigError::invalid(field, raw, "must be an IP address"))
}

/// Treat blank values as unset.
pub(crate) fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}
