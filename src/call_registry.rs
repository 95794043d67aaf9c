//! Call bookkeeping for one device.
//!
//! The AG's view of the calls arrives as a burst of +CLCC lines closed by a
//! final result. Reports are staged while the cycle is open and only
//! reconciled against the known calls once the burst is complete, so a call
//! missing from a partial burst is never mistaken for a terminated one.

use crate::address::RawAddress;
use crate::call::{CallState, HfpClientCall};
use crate::events::{CallDirection, ClccCallState};

use log::{debug, warn};
use std::collections::BTreeMap;

/// Calls whose state or number changed while closing a refresh cycle.
#[derive(Debug, Default, PartialEq)]
pub struct RefreshOutcome {
    pub changed: Vec<HfpClientCall>,
    /// The locally dialed call was matched to an AG reported call.
    pub outgoing_confirmed: bool,
}

pub struct CallRegistry {
    device: RawAddress,
    calls: BTreeMap<u32, HfpClientCall>,
    /// Locally dialed call not confirmed by the AG yet.
    outgoing: Option<HfpClientCall>,
    /// Reports of the open refresh cycle, if any.
    pending: Option<BTreeMap<u32, HfpClientCall>>,
}

impl CallRegistry {
    pub fn new(device: RawAddress) -> CallRegistry {
        CallRegistry { device, calls: BTreeMap::new(), outgoing: None, pending: None }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.outgoing.is_none()
    }

    pub fn len(&self) -> usize {
        self.calls.len() + usize::from(self.outgoing.is_some())
    }

    pub fn get(&self, index: u32) -> Option<&HfpClientCall> {
        self.calls.get(&index)
    }

    /// First call in the given state, in index order. The unconfirmed
    /// outgoing call is considered last.
    pub fn get_by_state(&self, state: CallState) -> Option<&HfpClientCall> {
        self.calls
            .values()
            .chain(self.outgoing.iter())
            .find(|call| call.state == state)
    }

    pub fn has_state(&self, state: CallState) -> bool {
        self.get_by_state(state).is_some()
    }

    /// All known calls, in index order followed by the unconfirmed outgoing call.
    pub fn snapshot(&self) -> Vec<HfpClientCall> {
        self.calls.values().chain(self.outgoing.iter()).cloned().collect()
    }

    pub fn is_refreshing(&self) -> bool {
        self.pending.is_some()
    }

    /// Opens a refresh cycle. Returns false if one is already open.
    pub fn begin_refresh(&mut self) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(BTreeMap::new());
        true
    }

    /// Drops the open cycle without touching the known calls.
    pub fn abort_refresh(&mut self) {
        self.pending = None;
    }

    /// Stages one +CLCC report. A call created from it carries `in_band_ring`.
    pub fn report(
        &mut self,
        index: u32,
        direction: CallDirection,
        state: ClccCallState,
        multiparty: bool,
        number: String,
        in_band_ring: bool,
    ) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            warn!("[{}] Ignoring call {} reported outside of a refresh", self.device, index);
            return false;
        };

        let call = HfpClientCall::new(
            self.device,
            Some(index),
            CallState::from(state),
            number,
            multiparty,
            direction == CallDirection::Outgoing,
            in_band_ring,
        );
        pending.insert(index, call);
        true
    }

    /// Closes the open cycle and reconciles it with the known calls.
    pub fn commit(&mut self) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();
        let Some(mut reported) = self.pending.take() else {
            return outcome;
        };

        let removed: Vec<u32> =
            self.calls.keys().filter(|index| !reported.contains_key(index)).copied().collect();
        for index in removed {
            if let Some(mut call) = self.calls.remove(&index) {
                debug!("[{}] Call {} is gone", self.device, index);
                call.state = CallState::Terminated;
                outcome.changed.push(call);
            }
        }

        for (index, report) in reported.iter_mut() {
            if let Some(existing) = self.calls.get_mut(index) {
                if existing.update_from(report) {
                    outcome.changed.push(existing.clone());
                }
                continue;
            }

            let call = match self.outgoing.take() {
                Some(mut placeholder) if report.outgoing => {
                    debug!("[{}] Outgoing call confirmed as {}", self.device, index);
                    placeholder.index = Some(*index);
                    placeholder.update_from(report);
                    outcome.outgoing_confirmed = true;
                    placeholder
                }
                other => {
                    self.outgoing = other;
                    report.clone()
                }
            };
            outcome.changed.push(call.clone());
            self.calls.insert(*index, call);
        }

        outcome
    }

    /// Creates the placeholder for a locally dialed call.
    pub fn add_outgoing(&mut self, number: String, in_band_ring: bool) -> HfpClientCall {
        let call = HfpClientCall::new(
            self.device,
            None,
            CallState::Dialing,
            number,
            false,
            true,
            in_band_ring,
        );
        self.outgoing = Some(call.clone());
        call
    }

    pub fn has_outgoing(&self) -> bool {
        self.outgoing.is_some()
    }

    /// Removes the unconfirmed outgoing call, returning it as terminated.
    pub fn terminate_outgoing(&mut self) -> Option<HfpClientCall> {
        self.outgoing.take().map(|mut call| {
            call.state = CallState::Terminated;
            call
        })
    }

    /// Applies a successful private consultation with `index`: it leaves the
    /// conference as the only active call and the remaining members are held.
    pub fn apply_private_mode(&mut self, index: u32) -> Vec<HfpClientCall> {
        let mut changed = Vec::new();
        if !self.calls.contains_key(&index) {
            warn!("[{}] Private mode for unknown call {}", self.device, index);
            return changed;
        }

        for (id, call) in self.calls.iter_mut() {
            if *id == index {
                call.state = CallState::Active;
                call.multiparty = false;
                changed.push(call.clone());
            } else if call.multiparty {
                call.state = CallState::Held;
                changed.push(call.clone());
            }
        }
        changed
    }

    /// Drops every call, returning each one as terminated.
    pub fn terminate_all(&mut self) -> Vec<HfpClientCall> {
        self.pending = None;
        let mut terminated: Vec<HfpClientCall> = std::mem::take(&mut self.calls)
            .into_values()
            .chain(self.outgoing.take())
            .collect();
        for call in terminated.iter_mut() {
            call.state = CallState::Terminated;
        }
        terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: RawAddress = RawAddress::new([1, 2, 3, 4, 5, 6]);

    fn refresh(
        registry: &mut CallRegistry,
        reports: &[(u32, ClccCallState, bool)],
    ) -> RefreshOutcome {
        assert!(registry.begin_refresh());
        for (index, state, multiparty) in reports {
            registry.report(
                *index,
                CallDirection::Incoming,
                *state,
                *multiparty,
                format!("555{}", index),
                false,
            );
        }
        registry.commit()
    }

    #[test]
    fn test_added_calls() {
        let mut registry = CallRegistry::new(ADDR);
        let outcome = refresh(&mut registry, &[(1, ClccCallState::Incoming, false)]);

        assert_eq!(outcome.changed.len(), 1);
        assert_eq!(outcome.changed[0].index, Some(1));
        assert_eq!(outcome.changed[0].state, CallState::Incoming);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_identical_refresh_has_no_changes() {
        let mut registry = CallRegistry::new(ADDR);
        let reports = [(1, ClccCallState::Active, false), (2, ClccCallState::Held, false)];
        refresh(&mut registry, &reports);
        let before = registry.snapshot();

        let outcome = refresh(&mut registry, &reports);
        assert!(outcome.changed.is_empty());
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn test_removal_only_at_commit() {
        let mut registry = CallRegistry::new(ADDR);
        refresh(
            &mut registry,
            &[(1, ClccCallState::Active, false), (2, ClccCallState::Held, false)],
        );

        assert!(registry.begin_refresh());
        registry.report(
            1,
            CallDirection::Incoming,
            ClccCallState::Active,
            false,
            "5551".into(),
            false,
        );
        // Still known while the cycle is open.
        assert!(registry.get(2).is_some());

        let outcome = registry.commit();
        assert_eq!(outcome.changed.len(), 1);
        assert_eq!(outcome.changed[0].index, Some(2));
        assert_eq!(outcome.changed[0].state, CallState::Terminated);
        assert!(registry.get(2).is_none());
    }

    #[test]
    fn test_report_outside_cycle_ignored() {
        let mut registry = CallRegistry::new(ADDR);
        assert!(!registry.report(
            1,
            CallDirection::Incoming,
            ClccCallState::Incoming,
            false,
            "1".into(),
            false
        ));
        assert_eq!(registry.commit(), RefreshOutcome::default());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_single_cycle_in_flight() {
        let mut registry = CallRegistry::new(ADDR);
        assert!(registry.begin_refresh());
        assert!(!registry.begin_refresh());
        registry.abort_refresh();
        assert!(!registry.is_refreshing());
    }

    #[test]
    fn test_outgoing_adopted_by_report() {
        let mut registry = CallRegistry::new(ADDR);
        registry.add_outgoing("5550000".into(), true);
        assert_eq!(registry.get_by_state(CallState::Dialing).unwrap().index, None);

        assert!(registry.begin_refresh());
        registry.report(
            3,
            CallDirection::Outgoing,
            ClccCallState::Alerting,
            false,
            "5550000".into(),
            false,
        );
        let outcome = registry.commit();

        assert!(outcome.outgoing_confirmed);
        assert!(!registry.has_outgoing());
        let call = registry.get(3).unwrap();
        assert_eq!(call.state, CallState::Alerting);
        assert!(call.outgoing);
        // Flag latched when the placeholder was created.
        assert!(call.is_in_band_ring());
    }

    #[test]
    fn test_incoming_report_does_not_adopt_outgoing() {
        let mut registry = CallRegistry::new(ADDR);
        registry.add_outgoing("5550000".into(), false);
        let outcome = refresh(&mut registry, &[(1, ClccCallState::Waiting, false)]);

        assert!(!outcome.outgoing_confirmed);
        assert!(registry.has_outgoing());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_terminate_outgoing() {
        let mut registry = CallRegistry::new(ADDR);
        registry.add_outgoing("5550000".into(), false);
        let call = registry.terminate_outgoing().unwrap();
        assert_eq!(call.state, CallState::Terminated);
        assert!(registry.is_empty());
        assert!(registry.terminate_outgoing().is_none());
    }

    #[test]
    fn test_private_mode() {
        let mut registry = CallRegistry::new(ADDR);
        refresh(
            &mut registry,
            &[
                (1, ClccCallState::Active, true),
                (2, ClccCallState::Active, true),
                (3, ClccCallState::Held, false),
            ],
        );

        let changed = registry.apply_private_mode(2);
        assert_eq!(changed.len(), 2);
        assert_eq!(registry.get(1).unwrap().state, CallState::Held);
        let private = registry.get(2).unwrap();
        assert_eq!(private.state, CallState::Active);
        assert!(!private.multiparty);
        assert_eq!(registry.get(3).unwrap().state, CallState::Held);
    }

    #[test]
    fn test_terminate_all() {
        let mut registry = CallRegistry::new(ADDR);
        refresh(&mut registry, &[(1, ClccCallState::Active, false)]);
        registry.add_outgoing("1".into(), false);

        let terminated = registry.terminate_all();
        assert_eq!(terminated.len(), 2);
        assert!(terminated.iter().all(HfpClientCall::is_terminated));
        assert!(registry.is_empty());
    }
}
