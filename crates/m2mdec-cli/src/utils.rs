// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Parse a V4L2 control assignment in the form `ID=VALUE`
///
/// The id may be decimal or `0x`-prefixed hexadecimal, the value is a
/// signed decimal.
///
/// # Examples
/// ```
/// use m2mdec_cli::utils::parse_control;
/// assert_eq!(parse_control("0x00990a01=1").unwrap(), (0x00990a01, 1));
/// ```
pub fn parse_control(s: &str) -> Result<(u32, i32), CliError> {
    let (id_str, value_str) = s.split_once('=').ok_or_else(|| {
        CliError::InvalidArgs(format!("Invalid control (expected ID=VALUE): {}", s))
    })?;

    let id_str = id_str.trim();
    let id = match id_str
        .strip_prefix("0x")
        .or_else(|| id_str.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => id_str.parse::<u32>(),
    }
    .map_err(|_| CliError::InvalidArgs(format!("Invalid control id: {}", s)))?;

    let value = value_str
        .trim()
        .parse::<i32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid control value: {}", s)))?;

    Ok((id, value))
}

/// Parse a duration in milliseconds, accepting an optional `ms` or `s` suffix
///
/// # Examples
/// ```
/// use m2mdec_cli::utils::parse_duration;
/// use std::time::Duration;
/// assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, CliError> {
    let s_lower = s.trim().to_lowercase();
    let invalid = || CliError::InvalidArgs(format!("Invalid duration: {}", s));

    if let Some(value) = s_lower.strip_suffix("ms") {
        let ms = value.trim().parse::<u64>().map_err(|_| invalid())?;
        return Ok(Duration::from_millis(ms));
    }

    if let Some(value) = s_lower.strip_suffix('s') {
        let secs = value.trim().parse::<u64>().map_err(|_| invalid())?;
        return Ok(Duration::from_secs(secs));
    }

    // Plain number is milliseconds
    let ms = s_lower.parse::<u64>().map_err(|_| invalid())?;
    Ok(Duration::from_millis(ms))
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// The returned flag is set to true when SIGINT is received. Passing the
/// decode session's stop handle makes the decode loop observe it directly.
///
/// # Example
/// ```no_run
/// use m2mdec_cli::utils::install_signal_handler;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let term = install_signal_handler(Arc::new(AtomicBool::new(false)))
///     .expect("Failed to install signal handler");
///
/// while !term.load(Ordering::Relaxed) {
///     // Do work...
/// }
/// ```
pub fn install_signal_handler(term: Arc<AtomicBool>) -> Result<Arc<AtomicBool>, CliError> {
    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_valid() {
        assert_eq!(parse_control("10=1").unwrap(), (10, 1));
        assert_eq!(parse_control("0x00990a01=-5").unwrap(), (0x00990a01, -5));
        assert_eq!(parse_control("0X10 = 3").unwrap(), (0x10, 3));
    }

    #[test]
    fn test_parse_control_invalid() {
        assert!(parse_control("10").is_err());
        assert!(parse_control("=1").is_err());
        assert!(parse_control("0xzz=1").is_err());
        assert!(parse_control("10=one").is_err());
        assert!(parse_control("-1=1").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("100").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("3S").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-5").is_err());
        assert!(parse_duration("1.5s").is_err());
    }
}
