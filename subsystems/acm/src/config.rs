//! # Engine Configuration
//!
//! Host-wide tunables. Per-module settings live in
//! [`ModuleDescriptor`](crate::ModuleDescriptor).

use alloc::string::String;
use core::time::Duration;

/// How long suspend waits for a module to go idle before dumping state
pub const DEFAULT_SUSPEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Settle time between asserting and releasing a module reset
pub const DEFAULT_RESET_SETTLE_US: u32 = 10;

/// Prefix prepended to a module name to form its clock device id
pub const DEFAULT_CLOCK_DEVICE_PREFIX: &str = "tegra_";

/// Number of counted hardware locks reported by diagnostics
pub const DEFAULT_RESOURCE_LOCKS: usize = 16;

/// Host configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmConfig {
    /// Bound on the wait-for-idle in suspend
    pub suspend_timeout: Duration,
    /// Reset settle delay in microseconds
    pub reset_settle_us: u32,
    /// Clock device id prefix
    pub clock_device_prefix: String,
    /// Counted hardware locks
    pub resource_locks: usize,
}

impl Default for AcmConfig {
    fn default() -> Self {
        Self {
            suspend_timeout: DEFAULT_SUSPEND_TIMEOUT,
            reset_settle_us: DEFAULT_RESET_SETTLE_US,
            clock_device_prefix: String::from(DEFAULT_CLOCK_DEVICE_PREFIX),
            resource_locks: DEFAULT_RESOURCE_LOCKS,
        }
    }
}

impl AcmConfig {
    /// Override the suspend wait bound
    pub fn with_suspend_timeout(mut self, timeout: Duration) -> Self {
        self.suspend_timeout = timeout;
        self
    }

    /// Override the clock device prefix
    pub fn with_clock_device_prefix(mut self, prefix: &str) -> Self {
        self.clock_device_prefix = String::from(prefix);
        self
    }
}
