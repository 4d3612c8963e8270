//! Byte conversions and rounding helpers
//!
//! Binary units (MiB, GiB) divide by powers of 1024, decimal units (GB, TB)
//! by powers of 1000. Conversions never round; callers pick the rounding
//! that matches what the dashboard should show.

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const GB: f64 = 1_000_000_000.0;
const TB: f64 = 1_000_000_000_000.0;

pub fn bytes_to_mib(bytes: u64) -> f64 {
    bytes as f64 / MIB
}

pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / GB
}

pub fn bytes_to_tb(bytes: u64) -> f64 {
    bytes as f64 / TB
}

/// Rounds half away from zero to `places` decimals
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// `used / total` as a percentage with two decimals, `0` when `total` is 0.
/// Over-allocation is reported as is (values above 100 are not clamped).
pub fn guarded_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(used as f64 / total as f64 * 100.0, 2)
}

/// Allocated GiB rounded up, so a 32 GiB disk never shows as 31
pub fn ceil_gib(bytes: u64) -> u64 {
    bytes_to_gib(bytes).ceil() as u64
}

/// Allocated MiB rounded down
pub fn floor_mib(bytes: u64) -> u64 {
    bytes_to_mib(bytes).floor() as u64
}
