//! One call leg as seen by the HF client.

use crate::address::RawAddress;
use crate::events::ClccCallState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CallState {
    Active,
    Held,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    HeldByResponseAndHold,
    Terminated,
}

impl From<ClccCallState> for CallState {
    fn from(state: ClccCallState) -> Self {
        match state {
            ClccCallState::Active => CallState::Active,
            ClccCallState::Held => CallState::Held,
            ClccCallState::Dialing => CallState::Dialing,
            ClccCallState::Alerting => CallState::Alerting,
            ClccCallState::Incoming => CallState::Incoming,
            ClccCallState::Waiting => CallState::Waiting,
            ClccCallState::HeldByResponseAndHold => CallState::HeldByResponseAndHold,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HfpClientCall {
    pub device: RawAddress,
    /// Index assigned by the AG. `None` for a locally dialed call the AG has
    /// not reported yet.
    pub index: Option<u32>,
    pub state: CallState,
    pub number: String,
    pub multiparty: bool,
    pub outgoing: bool,
    in_band_ring: bool,
}

impl HfpClientCall {
    pub fn new(
        device: RawAddress,
        index: Option<u32>,
        state: CallState,
        number: String,
        multiparty: bool,
        outgoing: bool,
        in_band_ring: bool,
    ) -> HfpClientCall {
        HfpClientCall { device, index, state, number, multiparty, outgoing, in_band_ring }
    }

    /// Whether the AG streamed in-band ringing when this call was created.
    /// Fixed for the lifetime of the call.
    pub fn is_in_band_ring(&self) -> bool {
        self.in_band_ring
    }

    pub fn is_terminated(&self) -> bool {
        self.state == CallState::Terminated
    }

    /// Applies the mutable fields of a fresh report. Returns whether anything changed.
    pub(crate) fn update_from(&mut self, report: &HfpClientCall) -> bool {
        if self.number == report.number
            && self.state == report.state
            && self.multiparty == report.multiparty
        {
            return false;
        }

        self.number = report.number.clone();
        self.state = report.state;
        self.multiparty = report.multiparty;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(state: CallState, number: &str) -> HfpClientCall {
        HfpClientCall::new(RawAddress::default(), Some(1), state, number.into(), false, false, true)
    }

    #[test]
    fn test_update_from_unchanged() {
        let mut existing = call(CallState::Active, "123");
        assert!(!existing.update_from(&call(CallState::Active, "123")));
    }

    #[test]
    fn test_update_from_keeps_in_band_ring() {
        let mut existing = call(CallState::Incoming, "123");
        let report = HfpClientCall::new(
            RawAddress::default(),
            Some(1),
            CallState::Active,
            "123".into(),
            false,
            false,
            false,
        );

        assert!(existing.update_from(&report));
        assert_eq!(existing.state, CallState::Active);
        assert!(existing.is_in_band_ring());
    }

    #[test]
    fn test_from_clcc_state() {
        assert_eq!(CallState::from(ClccCallState::Waiting), CallState::Waiting);
        assert_eq!(
            CallState::from(ClccCallState::HeldByResponseAndHold),
            CallState::HeldByResponseAndHold
        );
    }
}
