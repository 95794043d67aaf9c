//! Collaborators the HF client reports to or consults, and the notifications
//! it emits.

use crate::address::RawAddress;
use crate::call::HfpClientCall;
use crate::command_queue::ActionTag;
use crate::events::{CmdResultCode, VolumeType};
use crate::features::AgCallFeatures;
use crate::state_machine::{HfpAudioState, HfpConnectionState};

/// AG status changes that are forwarded without affecting the connection state.
#[derive(Clone, Debug, PartialEq)]
pub enum AgEvent {
    NetworkState(u32),
    NetworkRoaming(u32),
    NetworkSignal(u32),
    BatteryLevel(u32),
    OperatorName(String),
    SubscriberInfo(String),
    VoiceRecognition(bool),
    Volume(VolumeType, u32),
    LastVoiceTagNumber(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum HfpClientEvent {
    ConnectionStateChanged {
        device: RawAddress,
        prev: HfpConnectionState,
        new: HfpConnectionState,
        ag_features: AgCallFeatures,
    },
    AudioStateChanged {
        device: RawAddress,
        prev: HfpAudioState,
        new: HfpAudioState,
    },
    /// A single call was added, changed or terminated.
    CallChanged(HfpClientCall),
    /// The full call list after a change.
    CallListChanged {
        device: RawAddress,
        calls: Vec<HfpClientCall>,
    },
    VendorEvent {
        device: RawAddress,
        vendor_id: u16,
        event_code: String,
        full_args: String,
    },
    InBandRingChanged {
        device: RawAddress,
        enabled: bool,
    },
    AgEvent {
        device: RawAddress,
        event: AgEvent,
    },
    /// Final result of a queued local action.
    ActionResult {
        device: RawAddress,
        action: ActionTag,
        result: CmdResultCode,
        cme_error: u32,
    },
    Ring {
        device: RawAddress,
    },
}

impl HfpClientEvent {
    pub fn device(&self) -> RawAddress {
        match self {
            HfpClientEvent::ConnectionStateChanged { device, .. }
            | HfpClientEvent::AudioStateChanged { device, .. }
            | HfpClientEvent::CallListChanged { device, .. }
            | HfpClientEvent::VendorEvent { device, .. }
            | HfpClientEvent::InBandRingChanged { device, .. }
            | HfpClientEvent::AgEvent { device, .. }
            | HfpClientEvent::ActionResult { device, .. }
            | HfpClientEvent::Ring { device } => *device,
            HfpClientEvent::CallChanged(call) => call.device,
        }
    }
}

/// Where state changes are broadcast to the rest of the system.
pub trait NotificationSink: Send + Sync {
    fn send_broadcast(&self, event: HfpClientEvent);
}

/// System audio management consulted by the HF client.
pub trait AudioManager: Send + Sync {
    fn update_inband_ringing(&self, device: RawAddress, enabled: bool);
    fn set_hfp_audio_active(&self, device: RawAddress, active: bool);
    fn on_volume_changed(&self, device: RawAddress, volume_type: VolumeType, level: u32);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPolicy {
    Allowed,
    Forbidden,
    Unknown,
}

/// Per device connection policy, as stored by the profile service.
pub trait ConnectionPolicyStore: Send + Sync {
    fn connection_policy(&self, device: RawAddress) -> ConnectionPolicy;
}
