//! # Host Module Table
//!
//! The host owns every module instance in an arena indexed by [`ModuleId`].
//! Children name their parent by id; the parent must be registered first and
//! cannot be torn down while a child is still live.
//!
//! All engine operations are `Host` methods taking a `ModuleId`:
//!
//! | Operation | Module |
//! |-----------|--------|
//! | `busy`, `idle`, `idle_mult`, `get_rate`, `reset` | [`power`](crate::power) |
//! | `add_client`, `set_rate`, `remove_client` | [`clients`](crate::clients) |
//! | `suspend`, `deinit` | [`suspend`](crate::suspend) |

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use arrayvec::ArrayVec;
use helix_hal::{ClockId, Platform};
use log::{info, warn};
use spin::RwLock;

use crate::clients::ClientRegistry;
use crate::config::AcmConfig;
use crate::descriptor::ModuleDescriptor;
use crate::diagnostics::{DiagnosticsSink, IdleReport, LogDiagnostics, ModuleReport, ResourceLocks};
use crate::error::{AcmError, AcmResult};
use crate::module::{ModuleId, ModuleInfo, ModuleInstance, PowerPhase};
use crate::workqueue::WorkQueue;
use crate::{MAX_CLOCKS, MAX_DEVID_LENGTH};

/// Automatic clock management host
pub struct Host {
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) work: Arc<dyn WorkQueue>,
    pub(crate) config: AcmConfig,
    pub(crate) diagnostics: Arc<dyn DiagnosticsSink>,
    pub(crate) clients: ClientRegistry,
    locks: ResourceLocks,
    modules: RwLock<Vec<Option<Arc<ModuleInstance>>>>,
}

impl Host {
    /// Host reporting suspend timeouts to the log
    pub fn new(
        platform: Arc<dyn Platform>,
        work: Arc<dyn WorkQueue>,
        config: AcmConfig,
    ) -> Arc<Self> {
        Self::with_diagnostics(platform, work, config, Arc::new(LogDiagnostics))
    }

    /// Host with a custom diagnostics sink
    pub fn with_diagnostics(
        platform: Arc<dyn Platform>,
        work: Arc<dyn WorkQueue>,
        config: AcmConfig,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Arc<Self> {
        let locks = ResourceLocks::new(config.resource_locks);
        Arc::new(Self {
            platform,
            work,
            config,
            diagnostics,
            clients: ClientRegistry::new(),
            locks,
            modules: RwLock::new(Vec::new()),
        })
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Bring a module under management
    ///
    /// Acquires the module's clocks and parks each at its rounded default
    /// rate, ungates the partitions for good if the descriptor cannot
    /// power-gate, binds the deferred power-down and runs the `init` hook.
    /// The module starts `Off`.
    pub fn register(
        self: &Arc<Self>,
        name: &str,
        descriptor: Arc<ModuleDescriptor>,
        parent: Option<ModuleId>,
    ) -> AcmResult<ModuleId> {
        if descriptor.clock_specs().len() > MAX_CLOCKS {
            return Err(AcmError::TooManyClocks);
        }
        if let Some(parent) = parent {
            self.module(parent).map_err(|_| AcmError::InvalidParent)?;
        }

        let device = self.clock_device(name);
        let clocks = self.acquire_clocks(&device, &descriptor)?;

        if !descriptor.can_powergate() {
            for partition in descriptor.configured_partitions() {
                self.platform.unpowergate(partition);
            }
        }

        let module = {
            let mut modules = self.modules.write();
            let id = ModuleId(modules.len());
            let host = Arc::downgrade(self);
            let work = self.work.bind(Arc::new(move || {
                if let Some(host) = host.upgrade() {
                    host.powerdown(id);
                }
            }));
            let info = ModuleInfo::new(id, String::from(name), parent, descriptor, clocks);
            let module = Arc::new(ModuleInstance::new(info, work));
            modules.push(Some(Arc::clone(&module)));
            module
        };

        let info = module.info();
        info!(
            "acm: registered {} as {} ({} clocks, parent {:?})",
            info.name(),
            info.id(),
            info.clocks().len(),
            info.parent()
        );
        info.hooks().init(info);
        Ok(info.id())
    }

    /// Clock device id for a module: prefix + name, cut to fit a device-id
    /// buffer
    fn clock_device(&self, name: &str) -> String {
        let mut device = String::with_capacity(MAX_DEVID_LENGTH);
        for ch in self.config.clock_device_prefix.chars().chain(name.chars()) {
            if device.len() + ch.len_utf8() >= MAX_DEVID_LENGTH {
                break;
            }
            device.push(ch);
        }
        device
    }

    fn acquire_clocks(
        &self,
        device: &str,
        descriptor: &ModuleDescriptor,
    ) -> AcmResult<ArrayVec<ClockId, MAX_CLOCKS>> {
        let mut clocks = ArrayVec::new();
        for spec in descriptor.clock_specs() {
            let clock = match self.platform.get(device, spec.name) {
                Ok(clock) => clock,
                Err(e) => {
                    warn!("acm: {}: no clock {}: {}", device, spec.name, e);
                    self.release_clocks(&clocks);
                    return Err(e.into());
                }
            };

            let rate = self.platform.round_rate(clock, spec.default_rate);
            self.platform.enable(clock);
            if let Err(e) = self.platform.set_rate(clock, rate) {
                warn!("acm: {}: {} rejected default {}: {}", device, spec.name, rate, e);
            }
            self.platform.disable(clock);
            clocks.push(clock);
        }
        Ok(clocks)
    }

    pub(crate) fn release_clocks(&self, clocks: &[ClockId]) {
        for clock in clocks {
            self.platform.put(*clock);
        }
    }

    // =========================================================================
    // TABLE ACCESS
    // =========================================================================

    /// Look up a live module
    pub fn module(&self, id: ModuleId) -> AcmResult<Arc<ModuleInstance>> {
        self.modules
            .read()
            .get(id.0)
            .and_then(Option::clone)
            .ok_or(AcmError::NoSuchModule)
    }

    /// Parent of a live module. A missing parent means the hierarchy was
    /// torn down out of order.
    pub(crate) fn parent_of(&self, module: &ModuleInstance) -> Option<Arc<ModuleInstance>> {
        let parent = module.info().parent()?;
        match self.module(parent) {
            Ok(parent) => Some(parent),
            Err(_) => fatal!("acm: {}: parent {} is gone", module.info().name(), parent),
        }
    }

    /// Every live module, in table order
    pub fn modules(&self) -> Vec<Arc<ModuleInstance>> {
        self.modules.read().iter().flatten().cloned().collect()
    }

    pub(crate) fn has_children(&self, id: ModuleId) -> bool {
        self.modules
            .read()
            .iter()
            .flatten()
            .any(|m| m.info().parent() == Some(id))
    }

    pub(crate) fn remove(&self, id: ModuleId) {
        if let Some(slot) = self.modules.write().get_mut(id.0) {
            *slot = None;
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Current reference count
    pub fn refcount(&self, id: ModuleId) -> AcmResult<usize> {
        Ok(self.module(id)?.refcount())
    }

    /// Is the module powered?
    pub fn is_powered(&self, id: ModuleId) -> AcmResult<bool> {
        Ok(self.module(id)?.is_powered())
    }

    /// Has the module's refcount reached zero?
    pub fn is_idle(&self, id: ModuleId) -> AcmResult<bool> {
        Ok(self.module(id)?.is_idle())
    }

    /// Current power phase
    pub fn phase(&self, id: ModuleId) -> AcmResult<PowerPhase> {
        Ok(self.module(id)?.phase())
    }

    /// Host configuration
    pub fn config(&self) -> &AcmConfig {
        &self.config
    }

    /// Counted hardware locks
    pub fn locks(&self) -> &ResourceLocks {
        &self.locks
    }

    /// Snapshot of every module and held lock
    pub fn idle_report(&self) -> IdleReport {
        let modules = self
            .modules()
            .iter()
            .map(|module| {
                let state = module.lock();
                ModuleReport {
                    name: String::from(module.info().name()),
                    refcount: state.refcount,
                    powered: state.powered,
                }
            })
            .collect();
        IdleReport {
            modules,
            locks: self.locks.held(),
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("modules", &self.modules())
            .finish_non_exhaustive()
    }
}
