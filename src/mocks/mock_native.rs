//! Mocked implementation of NativeInterface for use in test

use crate::address::RawAddress;
use crate::events::VolumeType;
use crate::native::{AtCommandId, BtStatus, CallAction, NativeInterface};

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{self, unbounded_channel, UnboundedReceiver};

/// Routes calls to NativeInterface into a channel of MockNativeEvents
pub struct MockNativeInterface {
    tx: mpsc::UnboundedSender<MockNativeEvents>,
    fail: AtomicBool,
}

impl MockNativeInterface {
    /// Constructor. Returns self and the RX side of the associated channel.
    pub fn new() -> (Self, UnboundedReceiver<MockNativeEvents>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx, fail: AtomicBool::new(false) }, rx)
    }

    /// Subsequent calls are still recorded but return `BtStatus::Fail`.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn record(&self, event: MockNativeEvents) -> BtStatus {
        self.tx.send(event).ok();
        match self.fail.load(Ordering::SeqCst) {
            true => BtStatus::Fail,
            false => BtStatus::Success,
        }
    }
}

/// Events representing calls to NativeInterface
#[derive(Clone, Debug, PartialEq)]
pub enum MockNativeEvents {
    Connect(RawAddress),
    Disconnect(RawAddress),
    ConnectAudio(RawAddress),
    DisconnectAudio(RawAddress),
    StartVoiceRecognition(RawAddress),
    StopVoiceRecognition(RawAddress),
    SetVolume(RawAddress, VolumeType, u32),
    Dial(RawAddress, String),
    HandleCallAction(RawAddress, CallAction, u32),
    QueryCurrentCalls(RawAddress),
    QueryCurrentOperatorName(RawAddress),
    RetrieveSubscriberInfo(RawAddress),
    SendDtmf(RawAddress, char),
    SendAtCmd(RawAddress, AtCommandId, u32, u32, String),
    SendAndroidAt(RawAddress, String),
}

impl NativeInterface for MockNativeInterface {
    fn connect(&self, addr: RawAddress) -> BtStatus {
        self.record(MockNativeEvents::Connect(addr))
    }

    fn disconnect(&self, addr: RawAddress) -> BtStatus {
        self.record(MockNativeEvents::Disconnect(addr))
    }

    fn connect_audio(&self, addr: RawAddress) -> BtStatus {
        self.record(MockNativeEvents::ConnectAudio(addr))
    }

    fn disconnect_audio(&self, addr: RawAddress) -> BtStatus {
        self.record(MockNativeEvents::DisconnectAudio(addr))
    }

    fn start_voice_recognition(&self, addr: RawAddress) -> BtStatus {
        self.record(MockNativeEvents::StartVoiceRecognition(addr))
    }

    fn stop_voice_recognition(&self, addr: RawAddress) -> BtStatus {
        self.record(MockNativeEvents::StopVoiceRecognition(addr))
    }

    fn set_volume(&self, addr: RawAddress, volume_type: VolumeType, volume: u32) -> BtStatus {
        self.record(MockNativeEvents::SetVolume(addr, volume_type, volume))
    }

    fn dial(&self, addr: RawAddress, number: &str) -> BtStatus {
        self.record(MockNativeEvents::Dial(addr, number.to_string()))
    }

    fn handle_call_action(&self, addr: RawAddress, action: CallAction, index: u32) -> BtStatus {
        self.record(MockNativeEvents::HandleCallAction(addr, action, index))
    }

    fn query_current_calls(&self, addr: RawAddress) -> BtStatus {
        self.record(MockNativeEvents::QueryCurrentCalls(addr))
    }

    fn query_current_operator_name(&self, addr: RawAddress) -> BtStatus {
        self.record(MockNativeEvents::QueryCurrentOperatorName(addr))
    }

    fn retrieve_subscriber_info(&self, addr: RawAddress) -> BtStatus {
        self.record(MockNativeEvents::RetrieveSubscriberInfo(addr))
    }

    fn send_dtmf(&self, addr: RawAddress, code: char) -> BtStatus {
        self.record(MockNativeEvents::SendDtmf(addr, code))
    }

    fn send_at_cmd(
        &self,
        addr: RawAddress,
        cmd: AtCommandId,
        val1: u32,
        val2: u32,
        arg: &str,
    ) -> BtStatus {
        self.record(MockNativeEvents::SendAtCmd(addr, cmd, val1, val2, arg.to_string()))
    }

    fn send_android_at(&self, addr: RawAddress, arg: &str) -> BtStatus {
        self.record(MockNativeEvents::SendAndroidAt(addr, arg.to_string()))
    }
}
