//! Mocked implementations of the HF client collaborators for use in test

use crate::address::RawAddress;
use crate::callbacks::{
    AudioManager, ConnectionPolicy, ConnectionPolicyStore, HfpClientEvent, NotificationSink,
};
use crate::events::VolumeType;

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, unbounded_channel, UnboundedReceiver};

/// Routes broadcasts into a channel of HfpClientEvent
pub struct MockNotificationSink(mpsc::UnboundedSender<HfpClientEvent>);

impl MockNotificationSink {
    /// Constructor. Returns self and the RX side of the associated channel.
    pub fn new() -> (Self, UnboundedReceiver<HfpClientEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self(tx), rx)
    }
}

impl NotificationSink for MockNotificationSink {
    fn send_broadcast(&self, event: HfpClientEvent) {
        self.0.send(event).ok();
    }
}

/// Events representing calls to AudioManager
#[derive(Clone, Debug, PartialEq)]
pub enum MockAudioEvents {
    UpdateInbandRinging(RawAddress, bool),
    SetHfpAudioActive(RawAddress, bool),
    OnVolumeChanged(RawAddress, VolumeType, u32),
}

/// Routes calls to AudioManager into a channel of MockAudioEvents
pub struct MockAudioManager(mpsc::UnboundedSender<MockAudioEvents>);

impl MockAudioManager {
    /// Constructor. Returns self and the RX side of the associated channel.
    pub fn new() -> (Self, UnboundedReceiver<MockAudioEvents>) {
        let (tx, rx) = unbounded_channel();
        (Self(tx), rx)
    }
}

impl AudioManager for MockAudioManager {
    fn update_inband_ringing(&self, device: RawAddress, enabled: bool) {
        self.0.send(MockAudioEvents::UpdateInbandRinging(device, enabled)).ok();
    }

    fn set_hfp_audio_active(&self, device: RawAddress, active: bool) {
        self.0.send(MockAudioEvents::SetHfpAudioActive(device, active)).ok();
    }

    fn on_volume_changed(&self, device: RawAddress, volume_type: VolumeType, level: u32) {
        self.0.send(MockAudioEvents::OnVolumeChanged(device, volume_type, level)).ok();
    }
}

/// Connection policies set up front by the test. Unlisted devices are Unknown.
#[derive(Default)]
pub struct MockConnectionPolicyStore {
    policies: Mutex<HashMap<RawAddress, ConnectionPolicy>>,
}

impl MockConnectionPolicyStore {
    pub fn new() -> Self {
        MockConnectionPolicyStore::default()
    }

    pub fn set_policy(&self, device: RawAddress, policy: ConnectionPolicy) {
        self.policies.lock().unwrap().insert(device, policy);
    }
}

impl ConnectionPolicyStore for MockConnectionPolicyStore {
    fn connection_policy(&self, device: RawAddress) -> ConnectionPolicy {
        self.policies.lock().unwrap().get(&device).copied().unwrap_or(ConnectionPolicy::Unknown)
    }
}
