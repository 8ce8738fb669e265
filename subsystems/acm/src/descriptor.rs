//! # Module Descriptors
//!
//! The static description of a host module: which clocks it runs from, which
//! power partitions feed it, how long to linger before powering down, and
//! which driver hooks to call at each transition.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::time::Duration;

use bitflags::bitflags;
use helix_hal::{Hertz, PartitionId};

use crate::module::ModuleInfo;

// =============================================================================
// CLOCK SPECS
// =============================================================================

/// One clock a module runs from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSpec {
    /// Clock name within the module's clock device
    pub name: &'static str,
    /// Rate used while no client votes
    pub default_rate: Hertz,
}

// =============================================================================
// FLAGS
// =============================================================================

bitflags! {
    /// Descriptor capability flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModuleFlags: u32 {
        /// The module's partitions may be power-gated when idle. Without
        /// this flag they are ungated once at registration and stay on.
        const CAN_POWERGATE = 1 << 0;
    }
}

// =============================================================================
// HOOKS
// =============================================================================

/// Driver callbacks invoked around power transitions
///
/// Every method defaults to a no-op. `busy`, `finalize_poweron` and
/// `prepare_poweroff` run with the module's power lock held and must neither
/// block nor call back into the host for the same module.
pub trait ModuleHooks: Send + Sync {
    /// After registration
    fn init(&self, _module: &ModuleInfo) {}

    /// Before teardown
    fn deinit(&self, _module: &ModuleInfo) {}

    /// On every busy, before the refcount moves
    fn busy(&self, _module: &ModuleInfo) {}

    /// When the refcount drops to zero, without the lock
    fn idle(&self, _module: &ModuleInfo) {}

    /// After clocks and partitions come up
    fn finalize_poweron(&self, _module: &ModuleInfo) {}

    /// Before clocks and partitions go down. Returning `true` reports the
    /// hardware still busy and reschedules the power-down.
    fn prepare_poweroff(&self, _module: &ModuleInfo) -> bool {
        false
    }

    /// At the end of suspend
    fn suspend(&self, _module: &ModuleInfo) {}
}

/// Hook set that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ModuleHooks for NoHooks {}

// =============================================================================
// DESCRIPTOR
// =============================================================================

/// Immutable module description shared by every instance built from it
#[derive(Clone)]
pub struct ModuleDescriptor {
    clocks: Vec<ClockSpec>,
    partitions: [Option<PartitionId>; 2],
    flags: ModuleFlags,
    powerdown_delay: Duration,
    hooks: Arc<dyn ModuleHooks>,
}

impl ModuleDescriptor {
    /// Descriptor with no clocks, no partitions and no hooks
    pub fn new(powerdown_delay: Duration) -> Self {
        Self {
            clocks: Vec::new(),
            partitions: [None, None],
            flags: ModuleFlags::empty(),
            powerdown_delay,
            hooks: Arc::new(NoHooks),
        }
    }

    /// Append a clock
    pub fn clock(mut self, name: &'static str, default_rate: Hertz) -> Self {
        self.clocks.push(ClockSpec { name, default_rate });
        self
    }

    /// Set the two partition slots; `None` leaves a slot unused
    pub fn partitions(mut self, first: Option<PartitionId>, second: Option<PartitionId>) -> Self {
        self.partitions = [first, second];
        self
    }

    /// Set capability flags
    pub fn flags(mut self, flags: ModuleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Install a hook set
    pub fn hooks(mut self, hooks: Arc<dyn ModuleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Clock specs in index order
    pub fn clock_specs(&self) -> &[ClockSpec] {
        &self.clocks
    }

    /// Partition slots in order
    pub fn partition_slots(&self) -> [Option<PartitionId>; 2] {
        self.partitions
    }

    /// Configured partitions, skipping empty slots
    pub fn configured_partitions(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.partitions.iter().flatten().copied()
    }

    /// Can the partitions be gated?
    pub fn can_powergate(&self) -> bool {
        self.flags.contains(ModuleFlags::CAN_POWERGATE)
    }

    /// Idle time before a power-down attempt
    pub fn powerdown_delay(&self) -> Duration {
        self.powerdown_delay
    }

    /// Installed hooks
    pub fn hook_set(&self) -> &dyn ModuleHooks {
        self.hooks.as_ref()
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("clocks", &self.clocks)
            .field("partitions", &self.partitions)
            .field("flags", &self.flags)
            .field("powerdown_delay", &self.powerdown_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let desc = ModuleDescriptor::new(Duration::from_millis(50))
            .clock("gr2d", Hertz(100))
            .clock("epp", Hertz(200))
            .partitions(Some(PartitionId(3)), None)
            .flags(ModuleFlags::CAN_POWERGATE);

        assert_eq!(desc.clock_specs().len(), 2);
        assert_eq!(desc.clock_specs()[1].default_rate, Hertz(200));
        assert!(desc.can_powergate());
        assert_eq!(desc.configured_partitions().collect::<Vec<_>>(), vec![PartitionId(3)]);
        assert_eq!(desc.powerdown_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_default_hooks_never_refuse() {
        let desc = ModuleDescriptor::new(Duration::ZERO);
        assert!(!desc.can_powergate());
        assert_eq!(desc.configured_partitions().count(), 0);
        let info = ModuleInfo::detached("mpe");
        assert!(!desc.hook_set().prepare_poweroff(&info));
    }
}
