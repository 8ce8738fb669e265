//! # Test Support
//!
//! An in-memory platform that records every hardware call, hooks that count
//! their invocations, a diagnostics sink that keeps its reports, and a rig
//! wiring them to a host driven by virtual time.
//!
//! Available to this crate's tests and, with the `testing` feature, to
//! downstream crates.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;

use helix_hal::{
    ClockControl, ClockId, HalError, HalResult, Hertz, PartitionId, Platform, PowerGateControl,
    ResetControl,
};
use spin::Mutex;

use crate::config::AcmConfig;
use crate::descriptor::{ModuleDescriptor, ModuleFlags, ModuleHooks};
use crate::diagnostics::{DiagnosticsSink, IdleReport};
use crate::host::Host;
use crate::module::{ModuleId, ModuleInfo};
use crate::workqueue::{ManualWorkQueue, WorkId};

// =============================================================================
// SIMULATED PLATFORM
// =============================================================================

/// One recorded hardware call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Enable(ClockId),
    Disable(ClockId),
    SetRate(ClockId, Hertz),
    ReadRate { clock: ClockId, running: bool },
    Put(ClockId),
    Powergate(PartitionId),
    Unpowergate(PartitionId),
    McDisable(PartitionId),
    McEnable(PartitionId),
    McFlush(PartitionId),
    McFlushDone(PartitionId),
    AssertReset(ClockId),
    DeassertReset(ClockId),
    Delay(u32),
}

#[derive(Debug)]
struct SimClock {
    device: String,
    depth: u32,
    rate: Hertz,
    reject_rates: bool,
}

#[derive(Debug, Default)]
struct SimState {
    clocks: Vec<SimClock>,
    gated: BTreeMap<PartitionId, bool>,
    events: Vec<SimEvent>,
    denied: Vec<String>,
    granularity: Hertz,
}

impl SimState {
    fn clock(&mut self, clock: ClockId) -> &mut SimClock {
        match self.clocks.get_mut(clock.0 as usize) {
            Some(c) => c,
            None => panic!("sim: unknown {:?}", clock),
        }
    }

    fn gate(&mut self, id: PartitionId, gated: bool, event: SimEvent) {
        self.gated.insert(id, gated);
        self.events.push(event);
    }
}

/// Platform simulated in memory
///
/// Every clock lookup succeeds unless denied, partitions start gated, and
/// rates round down to a multiple of the configured granularity.
#[derive(Debug, Default)]
pub struct SimPlatform {
    state: Mutex<SimState>,
}

impl SimPlatform {
    /// Platform with exact rate rounding
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform rounding rates down to a multiple of `step`
    pub fn with_granularity(step: Hertz) -> Self {
        let sim = Self::new();
        sim.state.lock().granularity = step;
        sim
    }

    /// Fail lookups of clocks called `name`
    pub fn deny_clock(&self, name: &str) {
        self.state.lock().denied.push(String::from(name));
    }

    /// Fail every rate change on `clock`
    pub fn reject_rate(&self, clock: ClockId) {
        self.state.lock().clock(clock).reject_rates = true;
    }

    /// Device a clock was looked up on
    pub fn device_of(&self, clock: ClockId) -> Option<String> {
        let state = self.state.lock();
        state.clocks.get(clock.0 as usize).map(|c| c.device.clone())
    }

    /// Programmed rate of a clock
    pub fn rate_of(&self, clock: ClockId) -> Hertz {
        self.state.lock().clock(clock).rate
    }

    /// Outstanding enables of a clock
    pub fn enable_depth(&self, clock: ClockId) -> u32 {
        self.state.lock().clock(clock).depth
    }

    /// Is the partition powered off?
    pub fn is_gated(&self, id: PartitionId) -> bool {
        self.state.lock().gated.get(&id).copied().unwrap_or(true)
    }

    /// Every call since creation or the last [`clear_events`](Self::clear_events)
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    /// Number of recorded calls matching `pred`
    pub fn count(&self, pred: impl Fn(&SimEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }
}

impl ClockControl for SimPlatform {
    fn get(&self, device: &str, name: &str) -> HalResult<ClockId> {
        let mut state = self.state.lock();
        if state.denied.iter().any(|denied| denied == name) {
            return Err(HalError::NoSuchClock);
        }
        let id = ClockId(state.clocks.len() as u32);
        state.clocks.push(SimClock {
            device: String::from(device),
            depth: 0,
            rate: Hertz::ZERO,
            reject_rates: false,
        });
        Ok(id)
    }

    fn put(&self, clock: ClockId) {
        self.state.lock().events.push(SimEvent::Put(clock));
    }

    fn enable(&self, clock: ClockId) {
        let mut state = self.state.lock();
        state.clock(clock).depth += 1;
        state.events.push(SimEvent::Enable(clock));
    }

    fn disable(&self, clock: ClockId) {
        let mut state = self.state.lock();
        let sim = state.clock(clock);
        sim.depth = match sim.depth.checked_sub(1) {
            Some(depth) => depth,
            None => panic!("sim: unbalanced disable of {:?}", clock),
        };
        state.events.push(SimEvent::Disable(clock));
    }

    fn rate(&self, clock: ClockId) -> Hertz {
        let mut state = self.state.lock();
        let sim = state.clock(clock);
        let (rate, running) = (sim.rate, sim.depth > 0);
        state.events.push(SimEvent::ReadRate { clock, running });
        rate
    }

    fn round_rate(&self, _clock: ClockId, rate: Hertz) -> Hertz {
        let step = self.state.lock().granularity;
        if step.is_zero() {
            rate
        } else {
            Hertz(rate.0 - rate.0 % step.0)
        }
    }

    fn set_rate(&self, clock: ClockId, rate: Hertz) -> HalResult<()> {
        let mut state = self.state.lock();
        let sim = state.clock(clock);
        if sim.reject_rates {
            return Err(HalError::RateUnsupported);
        }
        sim.rate = rate;
        state.events.push(SimEvent::SetRate(clock, rate));
        Ok(())
    }
}

impl PowerGateControl for SimPlatform {
    fn powergate(&self, id: PartitionId) {
        self.state.lock().gate(id, true, SimEvent::Powergate(id));
    }

    fn unpowergate(&self, id: PartitionId) {
        self.state.lock().gate(id, false, SimEvent::Unpowergate(id));
    }

    fn mc_disable(&self, id: PartitionId) {
        self.state.lock().events.push(SimEvent::McDisable(id));
    }

    fn mc_enable(&self, id: PartitionId) {
        self.state.lock().events.push(SimEvent::McEnable(id));
    }

    fn mc_flush(&self, id: PartitionId) {
        self.state.lock().events.push(SimEvent::McFlush(id));
    }

    fn mc_flush_done(&self, id: PartitionId) {
        self.state.lock().events.push(SimEvent::McFlushDone(id));
    }
}

impl ResetControl for SimPlatform {
    fn assert_reset(&self, clock: ClockId) {
        self.state.lock().events.push(SimEvent::AssertReset(clock));
    }

    fn deassert_reset(&self, clock: ClockId) {
        self.state.lock().events.push(SimEvent::DeassertReset(clock));
    }
}

impl Platform for SimPlatform {
    fn udelay(&self, us: u32) {
        self.state.lock().events.push(SimEvent::Delay(us));
    }
}

// =============================================================================
// HOOKS
// =============================================================================

/// Hooks counting every invocation
///
/// `prepare_poweroff` can be told to report the hardware busy a number of
/// times before letting power-down proceed.
#[derive(Debug, Default)]
pub struct CountingHooks {
    init: AtomicUsize,
    deinit: AtomicUsize,
    busy: AtomicUsize,
    idle: AtomicUsize,
    finalize_poweron: AtomicUsize,
    prepare_poweroff: AtomicUsize,
    suspend: AtomicUsize,
    refusals: AtomicUsize,
}

impl CountingHooks {
    /// Refuse the next `times` power-downs
    pub fn refuse_poweroff(&self, times: usize) {
        self.refusals.store(times, Ordering::SeqCst);
    }

    /// Invocations of the hook called `hook`
    pub fn count(&self, hook: &str) -> usize {
        let counter = match hook {
            "init" => &self.init,
            "deinit" => &self.deinit,
            "busy" => &self.busy,
            "idle" => &self.idle,
            "finalize_poweron" => &self.finalize_poweron,
            "prepare_poweroff" => &self.prepare_poweroff,
            "suspend" => &self.suspend,
            _ => panic!("no hook called {}", hook),
        };
        counter.load(Ordering::SeqCst)
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

impl ModuleHooks for CountingHooks {
    fn init(&self, _module: &ModuleInfo) {
        bump(&self.init);
    }

    fn deinit(&self, _module: &ModuleInfo) {
        bump(&self.deinit);
    }

    fn busy(&self, _module: &ModuleInfo) {
        bump(&self.busy);
    }

    fn idle(&self, _module: &ModuleInfo) {
        bump(&self.idle);
    }

    fn finalize_poweron(&self, _module: &ModuleInfo) {
        bump(&self.finalize_poweron);
    }

    fn prepare_poweroff(&self, _module: &ModuleInfo) -> bool {
        bump(&self.prepare_poweroff);
        self.refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn suspend(&self, _module: &ModuleInfo) {
        bump(&self.suspend);
    }
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Sink keeping every report it receives
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    reports: Mutex<Vec<IdleReport>>,
}

impl RecordingDiagnostics {
    pub fn reports(&self) -> Vec<IdleReport> {
        self.reports.lock().clone()
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn not_idle(&self, report: &IdleReport) {
        self.reports.lock().push(report.clone());
    }
}

// =============================================================================
// RIG
// =============================================================================

/// Host on a simulated platform, driven by virtual time
#[derive(Debug)]
pub struct TestRig {
    pub sim: Arc<SimPlatform>,
    pub queue: Arc<ManualWorkQueue>,
    pub diagnostics: Arc<RecordingDiagnostics>,
    pub host: Arc<Host>,
}

impl TestRig {
    pub fn new() -> Self {
        Self::build(SimPlatform::new(), AcmConfig::default())
    }

    pub fn with_config(config: AcmConfig) -> Self {
        Self::build(SimPlatform::new(), config)
    }

    pub fn with_granularity(step: Hertz) -> Self {
        Self::build(SimPlatform::with_granularity(step), AcmConfig::default())
    }

    fn build(sim: SimPlatform, config: AcmConfig) -> Self {
        let sim = Arc::new(sim);
        let queue = Arc::new(ManualWorkQueue::new());
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let host = Host::with_diagnostics(
            sim.clone(),
            queue.clone(),
            config,
            diagnostics.clone(),
        );
        Self {
            sim,
            queue,
            diagnostics,
            host,
        }
    }

    /// Register a module, panicking on failure
    pub fn register(
        &self,
        name: &str,
        descriptor: ModuleDescriptor,
        parent: Option<ModuleId>,
    ) -> ModuleId {
        match self.host.register(name, Arc::new(descriptor), parent) {
            Ok(id) => id,
            Err(e) => panic!("register {}: {}", name, e),
        }
    }

    /// Power-down work item of a module
    pub fn work_of(&self, id: ModuleId) -> WorkId {
        match self.host.module(id) {
            Ok(module) => module.work(),
            Err(e) => panic!("{}: {}", id, e),
        }
    }
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}

/// Power-gateable module on one partition with clocks `core` (100 Hz) and
/// `emc` (200 Hz)
pub fn gateable_descriptor(
    partition: u32,
    powerdown_delay: Duration,
    hooks: &Arc<CountingHooks>,
) -> ModuleDescriptor {
    ModuleDescriptor::new(powerdown_delay)
        .clock("core", Hertz(100))
        .clock("emc", Hertz(200))
        .partitions(Some(PartitionId(partition)), None)
        .flags(ModuleFlags::CAN_POWERGATE)
        .hooks(hooks.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_rounds_down() {
        let sim = SimPlatform::with_granularity(Hertz(25));
        let clock = sim.get("tegra_gr2d", "gr2d").unwrap();
        assert_eq!(sim.round_rate(clock, Hertz(99)), Hertz(75));
        assert_eq!(SimPlatform::new().round_rate(clock, Hertz(99)), Hertz(99));
    }

    #[test]
    fn test_sim_tracks_gates_and_depth() {
        let sim = SimPlatform::new();
        let clock = sim.get("tegra_vi", "vi").unwrap();
        assert!(sim.is_gated(PartitionId(3)));

        sim.unpowergate(PartitionId(3));
        sim.enable(clock);
        sim.enable(clock);
        sim.disable(clock);
        assert!(!sim.is_gated(PartitionId(3)));
        assert_eq!(sim.enable_depth(clock), 1);
        assert_eq!(sim.count(|e| matches!(e, SimEvent::Enable(_))), 2);
    }

    #[test]
    fn test_counting_hooks_refusals() {
        let hooks = CountingHooks::default();
        let info = ModuleInfo::detached("gr3d");
        hooks.refuse_poweroff(2);

        assert!(hooks.prepare_poweroff(&info));
        assert!(hooks.prepare_poweroff(&info));
        assert!(!hooks.prepare_poweroff(&info));
        assert_eq!(hooks.count("prepare_poweroff"), 3);
    }
}
