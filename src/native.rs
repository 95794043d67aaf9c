//! Outbound interface to the native HF client profile.
//!
//! Every call is fire-and-forget: the returned status only says whether the
//! request was handed to the controller. Replies come back later as
//! [`crate::events::BthfClientCallbacks`].

use crate::address::RawAddress;
use crate::events::VolumeType;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum BtStatus {
    Success = 0,
    Fail,
    NotReady,
    NoMemory,
    Busy,
    Done,
    Unsupported,
    InvalidParam,
    Unhandled,
    AuthFailure,
    RemoteDeviceDown,
    AuthRejected,

    // Any statuses that couldn't be cleanly converted
    Unknown = 0xff,
}

impl From<u32> for BtStatus {
    fn from(item: u32) -> Self {
        BtStatus::from_u32(item).unwrap_or(BtStatus::Unknown)
    }
}

impl BtStatus {
    pub fn is_success(&self) -> bool {
        *self == BtStatus::Success
    }
}

/// Call control actions understood by `handle_call_action`.
#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum CallAction {
    /// Release all held calls or reject a waiting call.
    Chld0 = 0,
    /// Release active calls and accept the other call.
    Chld1,
    /// Hold active calls and accept the other call.
    Chld2,
    /// Merge held calls into the conversation.
    Chld3,
    /// Explicit call transfer.
    Chld4,
    /// Release a specific call.
    Chld1x,
    /// Private consultation with a specific call.
    Chld2x,
    Ata,
    Chup,
    /// Put the incoming call on hold (response and hold).
    Btrh0,
    /// Accept the held incoming call.
    Btrh1,
    /// Reject the held incoming call.
    Btrh2,
}

/// AT command ids accepted by `send_at_cmd`.
#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum AtCommandId {
    Vts = 0,
    Btrh = 1,
    Chup = 2,
    Chld = 3,
    Bcc = 4,
    Cnum = 5,
    Ata = 6,
    Cops = 7,
    Atd = 8,
    Vgm = 9,
    Vgs = 10,
    Bvra = 11,
    Clcc = 12,
    Binp = 13,
    Bldn = 14,
    Nrec = 15,
    VendorSpecific = 16,
    Biev = 19,
}

/// Requests the HF client state machine makes of the native profile.
pub trait NativeInterface: Send + Sync {
    fn connect(&self, addr: RawAddress) -> BtStatus;
    fn disconnect(&self, addr: RawAddress) -> BtStatus;
    fn connect_audio(&self, addr: RawAddress) -> BtStatus;
    fn disconnect_audio(&self, addr: RawAddress) -> BtStatus;
    fn start_voice_recognition(&self, addr: RawAddress) -> BtStatus;
    fn stop_voice_recognition(&self, addr: RawAddress) -> BtStatus;
    fn set_volume(&self, addr: RawAddress, volume_type: VolumeType, volume: u32) -> BtStatus;
    fn dial(&self, addr: RawAddress, number: &str) -> BtStatus;
    fn handle_call_action(&self, addr: RawAddress, action: CallAction, index: u32) -> BtStatus;
    fn query_current_calls(&self, addr: RawAddress) -> BtStatus;
    fn query_current_operator_name(&self, addr: RawAddress) -> BtStatus;
    fn retrieve_subscriber_info(&self, addr: RawAddress) -> BtStatus;
    fn send_dtmf(&self, addr: RawAddress, code: char) -> BtStatus;
    fn send_at_cmd(
        &self,
        addr: RawAddress,
        cmd: AtCommandId,
        val1: u32,
        val2: u32,
        arg: &str,
    ) -> BtStatus;
    fn send_android_at(&self, addr: RawAddress, arg: &str) -> BtStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bt_status_from_u32() {
        assert_eq!(BtStatus::from(0), BtStatus::Success);
        assert_eq!(BtStatus::from(4), BtStatus::Busy);
        assert_eq!(BtStatus::from(0x42), BtStatus::Unknown);
        assert!(!BtStatus::from(1).is_success());
    }
}
