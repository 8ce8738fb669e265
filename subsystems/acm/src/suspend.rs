//! # Suspend Coordination
//!
//! Suspend waits, within a bound, for a module's users to drain, forces any
//! pending power-down to run now, and then insists the module is off. A wait
//! that times out only produces a diagnostic report: suspend carries on and
//! the final power check decides.

use log::{debug, info, warn};

use crate::error::{AcmError, AcmResult};
use crate::host::Host;
use crate::module::{ModuleId, ModuleInstance};

impl Host {
    /// Bring the module to rest ahead of a suspend
    ///
    /// `system_suspend` marks a system-wide suspend, which adds progress
    /// logging and reports every busy module up front.
    ///
    /// # Panics
    ///
    /// If the module is still powered once its pending power-down has run.
    pub fn suspend(&self, id: ModuleId, system_suspend: bool) -> AcmResult<()> {
        let module = self.module(id)?;
        self.suspend_module(&module, system_suspend);
        Ok(())
    }

    fn suspend_module(&self, module: &ModuleInstance, system_suspend: bool) {
        let info = module.info();

        if system_suspend && !module.is_idle() {
            warn!("acm: {}: not idle at system suspend", info.name());
            self.idle_report().log();
        }

        if !module.wait_idle(self.config.suspend_timeout) {
            warn!(
                "acm: {}: not idle after {:?}",
                info.name(),
                self.config.suspend_timeout
            );
            self.diagnostics.not_idle(&self.idle_report());
        }

        if system_suspend {
            debug!("acm: {}: entered idle", info.name());
        }

        self.work.flush(module.work());

        if system_suspend {
            debug!("acm: {}: flushed delayed work", info.name());
        }

        info.hooks().suspend(info);

        if module.is_powered() {
            fatal!("acm: {}: still powered after suspend", info.name());
        }
    }

    /// Tear a module down
    ///
    /// Runs the `deinit` hook, suspends the module, returns its clocks and
    /// drops its client votes. The id is dead afterwards. Children must be
    /// torn down first.
    pub fn deinit(&self, id: ModuleId) -> AcmResult<()> {
        let module = self.module(id)?;
        if self.has_children(id) {
            return Err(AcmError::HasChildren);
        }
        let info = module.info();

        info.hooks().deinit(info);
        self.suspend_module(&module, false);

        self.release_clocks(info.clocks());
        self.work.unbind(module.work());
        self.clients.forget(id);
        self.remove(id);

        info!("acm: {}: torn down", info.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use core::time::Duration;
    use std::panic::{self, AssertUnwindSafe};
    use std::thread;

    use helix_hal::PartitionId;

    use super::*;
    use core::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    use crate::clients::ClientToken;
    use crate::config::AcmConfig;
    use crate::descriptor::{ModuleDescriptor, ModuleHooks};
    use crate::module::{ModuleInfo, PowerPhase};
    use crate::testing::{gateable_descriptor, CountingHooks, SimEvent, SimPlatform, TestRig};
    use crate::workqueue::ThreadWorkQueue;

    const DELAY: Duration = Duration::from_millis(50);

    fn short_timeout() -> AcmConfig {
        AcmConfig::default().with_suspend_timeout(Duration::from_millis(20))
    }

    #[test]
    fn test_suspend_off_module_is_quiet() {
        let rig = TestRig::new();
        let hooks = Arc::new(CountingHooks::default());
        let id = rig.register("gr2d", gateable_descriptor(1, DELAY, &hooks), None);
        rig.sim.clear_events();

        rig.host.suspend(id, true).unwrap();
        assert!(rig.sim.events().is_empty());
        assert_eq!(hooks.count("suspend"), 1);
        assert!(rig.diagnostics.reports().is_empty());
    }

    #[test]
    fn test_suspend_flushes_pending_powerdown() {
        let rig = TestRig::new();
        let hooks = Arc::new(CountingHooks::default());
        let id = rig.register("gr3d", gateable_descriptor(1, DELAY, &hooks), None);

        rig.host.busy(id).unwrap();
        rig.host.idle(id).unwrap();
        assert_eq!(rig.host.phase(id), Ok(PowerPhase::IdlePending));

        // No virtual time passes: the flush runs the power-down
        rig.host.suspend(id, false).unwrap();
        assert_eq!(rig.host.phase(id), Ok(PowerPhase::Off));
        assert!(rig.sim.is_gated(PartitionId(1)));
        assert_eq!(rig.queue.runs(rig.work_of(id)), 1);
    }

    #[test]
    fn test_suspend_waits_for_last_user() {
        let rig = TestRig::new();
        let hooks = Arc::new(CountingHooks::default());
        let id = rig.register("mpe", gateable_descriptor(2, DELAY, &hooks), None);
        rig.host.busy(id).unwrap();

        let user = {
            let host = Arc::clone(&rig.host);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                host.idle(id).unwrap();
            })
        };

        rig.host.suspend(id, true).unwrap();
        user.join().unwrap();

        assert_eq!(rig.host.phase(id), Ok(PowerPhase::Off));
        assert!(rig.diagnostics.reports().is_empty());
    }

    #[test]
    fn test_suspend_timeout_reports_then_fails_power_check() {
        let rig = TestRig::with_config(short_timeout());
        let hooks = Arc::new(CountingHooks::default());
        let id = rig.register("vi", gateable_descriptor(1, DELAY, &hooks), None);
        rig.host.busy(id).unwrap();
        rig.host.locks().acquire(2).unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| rig.host.suspend(id, true)));
        assert!(result.is_err());

        let reports = rig.diagnostics.reports();
        assert_eq!(reports.len(), 1);
        let busy: Vec<_> = reports[0].busy_modules().map(|m| m.name.as_str()).collect();
        assert_eq!(busy, vec!["vi"]);
        assert_eq!(reports[0].locks, vec![(2, 1)]);
        // Suspend carried on past the timeout
        assert_eq!(hooks.count("suspend"), 1);
    }

    #[test]
    fn test_suspend_refused_powerdown_is_fatal() {
        let rig = TestRig::with_config(short_timeout());
        let hooks = Arc::new(CountingHooks::default());
        hooks.refuse_poweroff(1);
        let id = rig.register("isp", gateable_descriptor(1, DELAY, &hooks), None);
        rig.host.busy(id).unwrap();
        rig.host.idle(id).unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| rig.host.suspend(id, false)));
        assert!(result.is_err());
        assert!(rig.diagnostics.reports().is_empty());
        assert_eq!(hooks.count("prepare_poweroff"), 1);
    }

    #[test]
    fn test_deinit_releases_everything() {
        let rig = TestRig::new();
        let hooks = Arc::new(CountingHooks::default());
        let id = rig.register("epp", gateable_descriptor(1, DELAY, &hooks), None);
        let work = rig.work_of(id);
        rig.host.add_client(id, ClientToken(1)).unwrap();
        rig.host.busy(id).unwrap();
        rig.host.idle(id).unwrap();

        rig.host.deinit(id).unwrap();

        assert_eq!(hooks.count("deinit"), 1);
        assert_eq!(hooks.count("suspend"), 1);
        assert!(rig.sim.is_gated(PartitionId(1)));
        assert_eq!(rig.sim.count(|e| matches!(e, SimEvent::Put(_))), 2);
        assert!(rig.host.clients.clients(id).is_empty());
        assert_eq!(rig.queue.arms(work), 0);

        assert_eq!(rig.host.busy(id), Err(AcmError::NoSuchModule));
        assert_eq!(rig.host.deinit(id), Err(AcmError::NoSuchModule));
        assert!(rig.host.modules().is_empty());
    }

    #[test]
    fn test_deinit_children_first() {
        let rig = TestRig::new();
        let hooks = Arc::new(CountingHooks::default());
        let parent = rig.register("host1x", gateable_descriptor(1, DELAY, &hooks), None);
        let child = rig.register("gr2d", gateable_descriptor(2, DELAY, &hooks), Some(parent));

        assert_eq!(rig.host.deinit(parent), Err(AcmError::HasChildren));
        rig.host.deinit(child).unwrap();
        rig.host.deinit(parent).unwrap();
        assert!(rig.host.modules().is_empty());
    }

    /// Holds the scheduler thread inside `prepare_poweroff` for a while
    #[derive(Default)]
    struct StallingHooks {
        entered: AtomicBool,
    }

    impl ModuleHooks for StallingHooks {
        fn prepare_poweroff(&self, _module: &ModuleInfo) -> bool {
            self.entered.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            false
        }
    }

    #[test]
    fn test_suspend_racing_busy_fails_power_check() {
        let sim = Arc::new(SimPlatform::new());
        let queue = Arc::new(ThreadWorkQueue::new().unwrap());
        let config = AcmConfig::default().with_suspend_timeout(Duration::from_millis(50));
        let host = Host::new(sim, queue, config);

        let stalling = Arc::new(StallingHooks::default());
        let slow = host
            .register(
                "slow",
                Arc::new(ModuleDescriptor::new(Duration::ZERO).hooks(stalling.clone())),
                None,
            )
            .unwrap();
        let hooks = Arc::new(CountingHooks::default());
        let gr3d = host
            .register("gr3d", Arc::new(gateable_descriptor(1, Duration::from_secs(30), &hooks)), None)
            .unwrap();

        host.busy(gr3d).unwrap();
        host.idle(gr3d).unwrap();
        assert_eq!(host.phase(gr3d), Ok(PowerPhase::IdlePending));

        // Park the scheduler thread in the slow module's power-down
        host.busy(slow).unwrap();
        host.idle(slow).unwrap();
        let start = std::time::Instant::now();
        while !stalling.entered.load(Ordering::SeqCst) && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(stalling.entered.load(Ordering::SeqCst));

        let (tx, rx) = mpsc::channel();
        let suspender = {
            let host = Arc::clone(&host);
            thread::spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| host.suspend(gr3d, false)));
                let _ = tx.send(result.is_err());
            })
        };

        thread::sleep(Duration::from_millis(50));
        host.busy(gr3d).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        suspender.join().unwrap();
        assert_eq!(host.phase(gr3d), Ok(PowerPhase::Active));
        assert_eq!(hooks.count("suspend"), 1);
    }
}
