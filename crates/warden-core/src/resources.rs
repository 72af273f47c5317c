//! Memory and CPU limit parsing.

use crate::error::{CoreError, Result};

/// CFS scheduling period handed to the runtime, in microseconds (100ms).
pub const CPU_PERIOD_US: i64 = 100_000;

/// Resource ceilings applied to one sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes.
    pub memory_bytes: u64,
    /// CPU time allowed per period, in microseconds.
    pub cpu_quota: i64,
    /// Scheduling period, always [`CPU_PERIOD_US`].
    pub cpu_period: i64,
}

impl ResourceLimits {
    /// Build limits from human-readable input, e.g. `("2g", 1.0)`.
    pub fn parse(memory: &str, cpus: f64) -> Result<Self> {
        Ok(Self {
            memory_bytes: parse_memory(memory)?,
            cpu_quota: cpu_quota(cpus)?,
            cpu_period: CPU_PERIOD_US,
        })
    }
}

/// Parse `<integer><b|k|m|g>` (case-insensitive, binary multiples) into bytes.
pub fn parse_memory(text: &str) -> Result<u64> {
    let invalid = || {
        CoreError::Configuration(format!(
            "invalid memory limit {text:?}: expected <integer><b|k|m|g>"
        ))
    };

    let Some((unit_at, unit)) = text.char_indices().next_back() else {
        return Err(invalid());
    };
    let digits = &text[..unit_at];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let multiplier: u64 = match unit.to_ascii_lowercase() {
        'b' => 1,
        'k' => 1 << 10,
        'm' => 1 << 20,
        'g' => 1 << 30,
        _ => return Err(invalid()),
    };

    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let bytes = amount
        .checked_mul(multiplier)
        .ok_or_else(|| CoreError::Configuration(format!("memory limit {text:?} overflows")))?;
    if bytes == 0 {
        return Err(CoreError::Configuration(
            "memory limit must be positive".into(),
        ));
    }
    Ok(bytes)
}

/// CPU time ceiling per [`CPU_PERIOD_US`] for the given CPU count.
///
/// Fractional counts are allowed (`0.5` → half a CPU's time per period).
pub fn cpu_quota(cpus: f64) -> Result<i64> {
    if !cpus.is_finite() || cpus <= 0.0 {
        return Err(CoreError::Configuration(format!(
            "cpu count must be a positive number, got {cpus}"
        )));
    }
    let quota = (cpus * CPU_PERIOD_US as f64).round();
    // The kernel rejects quotas below 1ms
    if quota < 1_000.0 || quota > i64::MAX as f64 {
        return Err(CoreError::Configuration(format!(
            "cpu count {cpus} is out of range"
        )));
    }
    Ok(quota as i64)
}

/// Parse a CPU count from text such as `"2"` or `"0.5"`.
pub fn parse_cpus(text: &str) -> Result<f64> {
    let cpus: f64 = text
        .trim()
        .parse()
        .map_err(|_| CoreError::Configuration(format!("invalid cpu count {text:?}")))?;
    cpu_quota(cpus)?;
    Ok(cpus)
}
