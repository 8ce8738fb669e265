//! # Power Coordinator
//!
//! Reference-counted busy/idle with hysteresis. The first busy powers the
//! module up (parent first), the last idle arms a delayed power-down, and any
//! busy in between cancels it. Power-down that the driver refuses is retried
//! after the same delay until it succeeds.
//!
//! ## Locking
//!
//! Each module's power lock covers its refcount, powered flag and pending
//! power-down. Power-up propagates to the parent while the child's lock is
//! held, so locks are only ever nested child before parent. Power-down
//! releases the child's lock before idling the parent.
//!
//! Holding the child's lock across the parent's busy is the host driver's own
//! ordering: during power-up a child and its parent are both locked at once.

use helix_hal::Hertz;
use log::debug;

use crate::error::{AcmError, AcmResult};
use crate::host::Host;
use crate::module::{ModuleId, ModuleInfo, ModuleInstance};

impl Host {
    // =========================================================================
    // BUSY / IDLE
    // =========================================================================

    /// Take a reference on the module, powering it up if it was off
    pub fn busy(&self, id: ModuleId) -> AcmResult<()> {
        let module = self.module(id)?;
        self.busy_module(&module);
        Ok(())
    }

    /// Drop one reference
    pub fn idle(&self, id: ModuleId) -> AcmResult<()> {
        self.idle_mult(id, 1)
    }

    /// Drop `refs` references at once
    pub fn idle_mult(&self, id: ModuleId, refs: usize) -> AcmResult<()> {
        let module = self.module(id)?;
        self.idle_module(&module, refs);
        Ok(())
    }

    pub(crate) fn busy_module(&self, module: &ModuleInstance) {
        let info = module.info();
        let mut state = module.lock();

        self.work.cancel(module.work());
        info.hooks().busy(info);

        state.refcount += 1;
        if state.refcount == 1 && !state.powered {
            if let Some(parent) = self.parent_of(module) {
                self.busy_module(&parent);
            }
            self.unpowergate(info);
            self.clock_enable(info);
            info.hooks().finalize_poweron(info);
            state.powered = true;
            debug!("acm: {}: powered on", info.name());
        }
    }

    pub(crate) fn idle_module(&self, module: &ModuleInstance, refs: usize) {
        let info = module.info();
        let kick = {
            let mut state = module.lock();
            let Some(remaining) = state.refcount.checked_sub(refs) else {
                fatal!(
                    "acm: {}: refcount underflow ({} - {})",
                    info.name(),
                    state.refcount,
                    refs
                );
            };
            state.refcount = remaining;

            if remaining == 0 {
                if !state.powered {
                    fatal!("acm: {}: idle while not powered", info.name());
                }
                self.work
                    .schedule(module.work(), info.descriptor().powerdown_delay());
                true
            } else {
                false
            }
        };

        if kick {
            module.signal_idle();
            info.hooks().idle(info);
        }
    }

    /// Deferred power-down, run from the work queue
    pub(crate) fn powerdown(&self, id: ModuleId) {
        // Torn down since the run was armed
        let Ok(module) = self.module(id) else {
            return;
        };
        let info = module.info();

        {
            let mut state = module.lock();
            if state.refcount != 0 || !state.powered {
                return;
            }

            if info.hooks().prepare_poweroff(info) {
                debug!("acm: {}: still busy, retrying power-down", info.name());
                self.work
                    .schedule(module.work(), info.descriptor().powerdown_delay());
                return;
            }

            self.clock_disable(info);
            self.powergate(info);
            state.powered = false;
            debug!("acm: {}: powered off", info.name());
        }

        if let Some(parent) = self.parent_of(&module) {
            self.idle_module(&parent, 1);
        }
    }

    // =========================================================================
    // RATE QUERY
    // =========================================================================

    /// Live rate of clock `index`, sampled with the module powered
    pub fn get_rate(&self, id: ModuleId, index: usize) -> AcmResult<Hertz> {
        let module = self.module(id)?;
        let clock = module
            .info()
            .clock(index)
            .ok_or(AcmError::InvalidArgument)?;

        self.busy_module(&module);
        let rate = self.platform.rate(clock);
        self.idle_module(&module, 1);
        Ok(rate)
    }

    // =========================================================================
    // RESET
    // =========================================================================

    /// Pulse the module reset with its memory clients fenced off
    ///
    /// Partition slot `i` pairs with clock `i`. Does not take a reference:
    /// callers that can race with power-down must hold the module busy.
    pub fn reset(&self, id: ModuleId) -> AcmResult<()> {
        let module = self.module(id)?;
        let info = module.info();
        let slots = info.descriptor().partition_slots();

        debug!("acm: {}: asserting reset ({:?})", info.name(), slots);

        for (index, partition) in slots.iter().enumerate() {
            let Some(partition) = *partition else {
                continue;
            };
            self.platform.mc_disable(partition);
            if let Some(clock) = info.clock(index) {
                self.platform.assert_reset(clock);
            }
            self.platform.mc_flush(partition);
        }

        self.platform.udelay(self.config.reset_settle_us);

        for (index, partition) in slots.iter().enumerate() {
            let Some(partition) = *partition else {
                continue;
            };
            self.platform.mc_flush_done(partition);
            if let Some(clock) = info.clock(index) {
                self.platform.deassert_reset(clock);
            }
            self.platform.mc_enable(partition);
        }

        debug!("acm: {}: out of reset", info.name());
        Ok(())
    }

    // =========================================================================
    // HARDWARE SEQUENCES
    // =========================================================================

    fn clock_enable(&self, info: &ModuleInfo) {
        for clock in info.clocks() {
            self.platform.enable(*clock);
        }
    }

    fn clock_disable(&self, info: &ModuleInfo) {
        for clock in info.clocks() {
            self.platform.disable(*clock);
        }
    }

    fn unpowergate(&self, info: &ModuleInfo) {
        let desc = info.descriptor();
        if desc.can_powergate() {
            for partition in desc.configured_partitions() {
                self.platform.unpowergate(partition);
            }
        }
    }

    fn powergate(&self, info: &ModuleInfo) {
        let desc = info.descriptor();
        if desc.can_powergate() {
            for partition in desc.configured_partitions() {
                self.platform.powergate(partition);
            }
        }
    }
}
