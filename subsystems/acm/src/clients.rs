//! # Client Rate Registry
//!
//! Consumers of a module vote a desired rate per clock. The effective rate of
//! each clock is the highest vote, or the clock's rounded default while
//! nobody votes. A vote of zero counts as no vote.
//!
//! One registry lock covers every module's client list. It is held across
//! the reduction and the hardware rate-set so that racing writers apply their
//! results in the order they computed them. The registry lock never nests
//! with a module's power lock.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use arrayvec::ArrayVec;
use helix_hal::{ClockId, Hertz};
use log::debug;

use crate::error::{AcmError, AcmResult};
use crate::host::Host;
use crate::module::{ModuleId, ModuleInstance};
use crate::MAX_CLOCKS;

/// Opaque identity of a rate consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientToken(pub u64);

impl fmt::Display for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// One consumer's votes, indexed like the module's clocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub token: ClientToken,
    pub rates: ArrayVec<Hertz, MAX_CLOCKS>,
}

type ClientLists = BTreeMap<ModuleId, Vec<ClientRecord>>;

/// Client lists for every module, behind one lock
#[derive(Default)]
pub struct ClientRegistry {
    lists: Mutex<ClientLists>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClientLists> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of a module's clients, in registration order
    pub fn clients(&self, id: ModuleId) -> Vec<ClientRecord> {
        self.lock().get(&id).cloned().unwrap_or_default()
    }

    /// Does the registry hold a list for `id`?
    #[cfg(test)]
    fn tracks(&self, id: ModuleId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Drop every record of a torn-down module
    pub(crate) fn forget(&self, id: ModuleId) {
        self.lock().remove(&id);
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.lock().iter()).finish()
    }
}

/// Highest vote for clock `index`; zero when nobody votes
fn max_vote(records: &[ClientRecord], index: usize) -> Hertz {
    records
        .iter()
        .filter_map(|record| record.rates.get(index).copied())
        .max()
        .unwrap_or(Hertz::ZERO)
}

impl Host {
    /// Register a consumer voting the default rate on every clock
    pub fn add_client(&self, id: ModuleId, token: ClientToken) -> AcmResult<()> {
        let module = self.module(id)?;
        let info = module.info();

        let rates = info
            .clocks()
            .iter()
            .zip(info.descriptor().clock_specs())
            .map(|(clock, spec)| self.platform.round_rate(*clock, spec.default_rate))
            .collect();

        let mut lists = self.clients.lock();
        let list = lists.entry(id).or_default();
        list.try_reserve(1).map_err(|_| AcmError::OutOfMemory)?;
        list.push(ClientRecord { token, rates });
        Ok(())
    }

    /// Record `token`'s vote for clock `index` and apply the new effective
    /// rate
    ///
    /// An unknown token is not an error: the effective rate is still
    /// recomputed from the votes already present.
    pub fn set_rate(
        &self,
        id: ModuleId,
        token: ClientToken,
        index: usize,
        rate: Hertz,
    ) -> AcmResult<()> {
        let module = self.module(id)?;
        let clock = module
            .info()
            .clock(index)
            .ok_or(AcmError::InvalidArgument)?;

        let mut lists = self.clients.lock();
        let record = lists
            .get_mut(&id)
            .and_then(|list| list.iter_mut().find(|record| record.token == token));
        if let Some(vote) = record.and_then(|record| record.rates.get_mut(index)) {
            *vote = self.platform.round_rate(clock, rate);
        }
        let records = lists.get(&id).map_or(&[][..], Vec::as_slice);
        self.apply_rate(&module, records, index)
    }

    /// Withdraw `token`'s votes, reapplying every clock if it had any
    pub fn remove_client(&self, id: ModuleId, token: ClientToken) -> AcmResult<()> {
        let module = self.module(id)?;

        let mut lists = self.clients.lock();
        let Some(list) = lists.get_mut(&id) else {
            return Ok(());
        };
        let Some(position) = list.iter().position(|record| record.token == token) else {
            return Ok(());
        };
        list.remove(position);

        for index in 0..module.info().clocks().len() {
            // Best effort: a clock refusing its new rate keeps the others
            // moving
            let _ = self.apply_rate(&module, list, index);
        }
        Ok(())
    }

    /// Current effective rate of clock `index` as the registry sees it
    pub fn effective_rate(&self, id: ModuleId, index: usize) -> AcmResult<Hertz> {
        let module = self.module(id)?;
        let info = module.info();
        let clock = info.clock(index).ok_or(AcmError::InvalidArgument)?;

        let lists = self.clients.lock();
        let votes = lists.get(&id).map_or(Hertz::ZERO, |list| max_vote(list, index));
        Ok(self.rate_or_default(&module, clock, index, votes))
    }

    /// Push the reduction of `records` for clock `index` to the hardware.
    /// Called with the registry lock held.
    fn apply_rate(
        &self,
        module: &ModuleInstance,
        records: &[ClientRecord],
        index: usize,
    ) -> AcmResult<()> {
        let info = module.info();
        let clock = info.clock(index).ok_or(AcmError::InvalidArgument)?;
        let rate = self.rate_or_default(module, clock, index, max_vote(records, index));

        debug!("acm: {}: clock {} -> {}", info.name(), index, rate);
        self.platform.set_rate(clock, rate)?;
        Ok(())
    }

    fn rate_or_default(
        &self,
        module: &ModuleInstance,
        clock: ClockId,
        index: usize,
        votes: Hertz,
    ) -> Hertz {
        if !votes.is_zero() {
            return votes;
        }
        let default = module
            .info()
            .descriptor()
            .clock_specs()
            .get(index)
            .map_or(Hertz::ZERO, |spec| spec.default_rate);
        self.platform.round_rate(clock, default)
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use core::time::Duration;

    use helix_hal::HalError;

    use super::*;
    use crate::descriptor::ModuleDescriptor;
    use crate::testing::{SimEvent, TestRig};

    fn two_clock_module(rig: &TestRig) -> (ModuleId, Vec<ClockId>) {
        let desc = ModuleDescriptor::new(Duration::from_millis(50))
            .clock("gr3d", Hertz(100))
            .clock("emc", Hertz(200));
        let id = rig.register("gr3d", desc, None);
        let clocks = rig.host.module(id).unwrap().info().clocks().to_vec();
        (id, clocks)
    }

    #[test]
    fn test_add_client_votes_defaults() {
        let rig = TestRig::new();
        let (id, _) = two_clock_module(&rig);

        rig.host.add_client(id, ClientToken(1)).unwrap();
        let clients = rig.host.clients.clients(id);
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].rates.as_slice(), &[Hertz(100), Hertz(200)]);
    }

    #[test]
    fn test_add_client_votes_rounded_defaults() {
        let rig = TestRig::with_granularity(Hertz(30));
        let (id, _) = two_clock_module(&rig);

        rig.host.add_client(id, ClientToken(1)).unwrap();
        let clients = rig.host.clients.clients(id);
        assert_eq!(clients[0].rates.as_slice(), &[Hertz(90), Hertz(180)]);
    }

    #[test]
    fn test_effective_rate_is_max_vote() {
        let rig = TestRig::new();
        let (id, clocks) = two_clock_module(&rig);
        let (a, b) = (ClientToken(1), ClientToken(2));
        rig.host.add_client(id, a).unwrap();
        rig.host.add_client(id, b).unwrap();

        rig.host.set_rate(id, a, 0, Hertz(150)).unwrap();
        rig.host.set_rate(id, b, 0, Hertz(120)).unwrap();
        assert_eq!(rig.sim.rate_of(clocks[0]), Hertz(150));
        assert_eq!(rig.host.effective_rate(id, 0), Ok(Hertz(150)));

        rig.host.set_rate(id, b, 0, Hertz(400)).unwrap();
        assert_eq!(rig.sim.rate_of(clocks[0]), Hertz(400));

        // Untouched clock keeps the highest default vote
        assert_eq!(rig.host.effective_rate(id, 1), Ok(Hertz(200)));
    }

    #[test]
    fn test_remove_client_reapplies_every_clock() {
        let rig = TestRig::new();
        let (id, clocks) = two_clock_module(&rig);
        let (a, b) = (ClientToken(1), ClientToken(2));
        rig.host.add_client(id, a).unwrap();
        rig.host.add_client(id, b).unwrap();
        rig.host.set_rate(id, a, 0, Hertz(300)).unwrap();
        rig.host.set_rate(id, a, 1, Hertz(500)).unwrap();

        rig.sim.clear_events();
        rig.host.remove_client(id, a).unwrap();
        assert_eq!(rig.sim.count(|e| matches!(e, SimEvent::SetRate(..))), 2);
        assert_eq!(rig.sim.rate_of(clocks[0]), Hertz(100));
        assert_eq!(rig.sim.rate_of(clocks[1]), Hertz(200));
    }

    #[test]
    fn test_removing_last_client_restores_default() {
        let rig = TestRig::new();
        let (id, clocks) = two_clock_module(&rig);
        let a = ClientToken(7);
        rig.host.add_client(id, a).unwrap();
        rig.host.set_rate(id, a, 0, Hertz(50)).unwrap();
        assert_eq!(rig.sim.rate_of(clocks[0]), Hertz(50));

        rig.host.remove_client(id, a).unwrap();
        assert!(rig.host.clients.clients(id).is_empty());
        assert_eq!(rig.sim.rate_of(clocks[0]), Hertz(100));
    }

    #[test]
    fn test_remove_unknown_client_is_silent() {
        let rig = TestRig::new();
        let (id, _) = two_clock_module(&rig);
        rig.sim.clear_events();

        assert_eq!(rig.host.remove_client(id, ClientToken(9)), Ok(()));
        assert!(rig.sim.events().is_empty());
    }

    #[test]
    fn test_unknown_token_still_recomputes() {
        let rig = TestRig::new();
        let (id, clocks) = two_clock_module(&rig);
        let a = ClientToken(1);
        rig.host.add_client(id, a).unwrap();
        rig.host.set_rate(id, a, 0, Hertz(180)).unwrap();

        rig.sim.clear_events();
        rig.host.set_rate(id, ClientToken(99), 0, Hertz(999)).unwrap();
        assert_eq!(rig.sim.events(), vec![SimEvent::SetRate(clocks[0], Hertz(180))]);
    }

    #[test]
    fn test_zero_vote_falls_back_to_default() {
        let rig = TestRig::new();
        let (id, clocks) = two_clock_module(&rig);
        let a = ClientToken(1);
        rig.host.add_client(id, a).unwrap();

        rig.host.set_rate(id, a, 1, Hertz::ZERO).unwrap();
        assert_eq!(rig.sim.rate_of(clocks[1]), Hertz(200));
    }

    #[test]
    fn test_set_rate_errors() {
        let rig = TestRig::new();
        let (id, clocks) = two_clock_module(&rig);
        let a = ClientToken(1);
        rig.host.add_client(id, a).unwrap();

        assert_eq!(
            rig.host.set_rate(id, a, 2, Hertz(10)),
            Err(AcmError::InvalidArgument)
        );
        assert_eq!(
            rig.host.set_rate(ModuleId(9), a, 0, Hertz(10)),
            Err(AcmError::NoSuchModule)
        );

        rig.sim.reject_rate(clocks[0]);
        assert_eq!(
            rig.host.set_rate(id, a, 0, Hertz(10)),
            Err(AcmError::Hal(HalError::RateUnsupported))
        );
    }

    #[test]
    fn test_registries_are_per_module() {
        let rig = TestRig::new();
        let (first, _) = two_clock_module(&rig);
        let (second, clocks) = two_clock_module(&rig);
        rig.host.add_client(first, ClientToken(1)).unwrap();
        rig.host.add_client(second, ClientToken(1)).unwrap();

        rig.host.set_rate(first, ClientToken(1), 0, Hertz(700)).unwrap();
        assert_eq!(rig.sim.rate_of(clocks[0]), Hertz(100));
        assert_eq!(rig.host.effective_rate(second, 0), Ok(Hertz(100)));
    }

    #[test]
    fn test_concurrent_votes_converge() {
        let rig = TestRig::new();
        let (id, clocks) = two_clock_module(&rig);
        let host = Arc::clone(&rig.host);

        let workers: Vec<_> = (1..=4u64)
            .map(|n| {
                let host = Arc::clone(&host);
                std::thread::spawn(move || {
                    let token = ClientToken(n);
                    host.add_client(id, token).unwrap();
                    for step in 1..=50u64 {
                        host.set_rate(id, token, 0, Hertz(n * 1000 + step)).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(rig.sim.rate_of(clocks[0]), Hertz(4050));
    }

    #[test]
    fn test_votes_without_clients_leave_no_list() {
        let rig = TestRig::new();
        let (id, clocks) = two_clock_module(&rig);

        rig.host.set_rate(id, ClientToken(3), 0, Hertz(900)).unwrap();
        rig.host.remove_client(id, ClientToken(3)).unwrap();

        assert!(!rig.host.clients.tracks(id));
        assert_eq!(rig.sim.rate_of(clocks[0]), Hertz(100));
    }
}
