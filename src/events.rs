//! Inbound events from the native HF client profile.
//!
//! The native layer reports everything through [`BthfClientCallbacks`] with raw
//! numeric codes. [`decode`] turns those into the closed set of typed
//! [`StackEvent`]s the state machine consumes.

use crate::address::RawAddress;
use crate::features::{ChldFeatures, PeerFeatures};

use log::warn;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::FromPrimitive;
use std::fmt::Debug;

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
/// Represents the various connection states a Hands-Free client would go through.
pub enum BthfClientConnectionState {
    Disconnected = 0,
    Connecting,
    Connected,
    SlcConnected,
    Disconnecting,
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, PartialOrd)]
#[repr(u32)]
/// Represents the various connection states the audio channel for a
/// Hands-Free client would go through.
pub enum BthfClientAudioState {
    Disconnected = 0,
    Connecting,
    Connected,
    ConnectedMsbc,
    ConnectedLc3,
}

impl BthfClientAudioState {
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            BthfClientAudioState::Connected
                | BthfClientAudioState::ConnectedMsbc
                | BthfClientAudioState::ConnectedLc3
        )
    }
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum VrState {
    Stopped = 0,
    Started,
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum CallSetupState {
    None = 0,
    Incoming,
    Outgoing,
    Alerting,
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum CallHeldState {
    None = 0,
    HoldAndActive,
    Hold,
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum RespAndHoldState {
    Held = 0,
    Accept,
    Reject,
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum CallDirection {
    Outgoing = 0,
    Incoming,
}

/// Call state as reported in a +CLCC line.
#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum ClccCallState {
    Active = 0,
    Held,
    Dialing,
    Alerting,
    Incoming,
    Waiting,
    HeldByResponseAndHold,
}

#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum VolumeType {
    Speaker = 0,
    Microphone,
}

/// Final result code of an AT command.
#[derive(Clone, Copy, Debug, FromPrimitive, ToPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum CmdResultCode {
    Ok = 0,
    Error,
    NoCarrier,
    Busy,
    NoAnswer,
    Delayed,
    Blacklisted,
    CmeError,
}

impl CmdResultCode {
    pub fn is_ok(&self) -> bool {
        *self == CmdResultCode::Ok
    }
}

#[derive(Debug)]
pub enum BthfClientCallbacks {
    /// Callback invoked when the connection state of the client changes.
    /// Params (Address, Connection state, peer features, chld features)
    ConnectionState(RawAddress, u32, u32, u32),
    /// Callback invoked when the audio connection state of the client changes.
    AudioState(RawAddress, u32),
    VrCmd(RawAddress, u32),
    NetworkState(RawAddress, u32),
    NetworkRoaming(RawAddress, u32),
    NetworkSignal(RawAddress, u32),
    BatteryLevel(RawAddress, u32),
    CurrentOperator(RawAddress, String),
    Call(RawAddress, u32),
    Callsetup(RawAddress, u32),
    Callheld(RawAddress, u32),
    RespAndHold(RawAddress, u32),
    Clip(RawAddress, String),
    CallWaiting(RawAddress, String),
    /// Params (Address, index, direction, state, multiparty, number)
    CurrentCalls(RawAddress, u32, u32, u32, u32, String),
    /// Params (Address, volume type, volume)
    VolumeChange(RawAddress, u32, u32),
    /// Params (Address, result code, cme error)
    CmdComplete(RawAddress, u32, u32),
    /// Params (Address, number, service type)
    SubscriberInfo(RawAddress, String, u32),
    InBandRingTone(RawAddress, u32),
    LastVoiceTagNumber(RawAddress, String),
    RingIndication(RawAddress),
    UnknownEvent(RawAddress, String),
}

pub struct BthfClientCallbacksDispatcher {
    pub dispatch: Box<dyn Fn(BthfClientCallbacks) + Send>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StackEventKind {
    ConnectionStateChanged {
        state: BthfClientConnectionState,
        peer_features: PeerFeatures,
        chld_features: ChldFeatures,
    },
    AudioStateChanged {
        state: BthfClientAudioState,
    },
    VrStateChanged {
        state: VrState,
    },
    NetworkState {
        value: u32,
    },
    NetworkRoaming {
        value: u32,
    },
    NetworkSignal {
        value: u32,
    },
    BatteryLevel {
        value: u32,
    },
    OperatorName {
        text: String,
    },
    Call {
        value: u32,
    },
    CallSetup {
        value: CallSetupState,
    },
    CallHeld {
        value: CallHeldState,
    },
    RespAndHold {
        value: RespAndHoldState,
    },
    Clip {
        number: String,
    },
    CallWaiting {
        number: String,
    },
    CurrentCalls {
        index: u32,
        direction: CallDirection,
        state: ClccCallState,
        multiparty: bool,
        number: String,
    },
    VolumeChanged {
        volume_type: VolumeType,
        level: u32,
    },
    CmdResult {
        result: CmdResultCode,
        cme_error: u32,
    },
    SubscriberInfo {
        number: String,
        service_type: u32,
    },
    InBandRingtone {
        enabled: bool,
    },
    LastVoiceTagNumber {
        number: String,
    },
    RingIndication,
    UnknownEvent {
        text: String,
    },
}

/// One decoded native occurrence, tagged with the device it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct StackEvent {
    pub device: RawAddress,
    pub kind: StackEventKind,
}

impl StackEvent {
    pub fn new(device: RawAddress, kind: StackEventKind) -> StackEvent {
        StackEvent { device, kind }
    }

    pub fn connection_state(
        device: RawAddress,
        state: BthfClientConnectionState,
        peer_features: PeerFeatures,
        chld_features: ChldFeatures,
    ) -> StackEvent {
        StackEvent::new(
            device,
            StackEventKind::ConnectionStateChanged { state, peer_features, chld_features },
        )
    }

    pub fn cmd_result(device: RawAddress, result: CmdResultCode, cme_error: u32) -> StackEvent {
        StackEvent::new(device, StackEventKind::CmdResult { result, cme_error })
    }
}

fn decode_code<T: FromPrimitive + Debug>(what: &str, value: u32, fallback: T) -> T {
    match T::from_u32(value) {
        Some(v) => v,
        None => {
            warn!("Unknown {} code {}, treating as {:?}", what, value, fallback);
            fallback
        }
    }
}

/// Converts a raw native callback into a typed event.
pub fn decode(callback: BthfClientCallbacks) -> StackEvent {
    match callback {
        BthfClientCallbacks::ConnectionState(addr, state, peer, chld) => StackEvent::new(
            addr,
            StackEventKind::ConnectionStateChanged {
                state: decode_code(
                    "connection state",
                    state,
                    BthfClientConnectionState::Disconnected,
                ),
                peer_features: PeerFeatures::from_raw(peer),
                chld_features: ChldFeatures::from_raw(chld),
            },
        ),
        BthfClientCallbacks::AudioState(addr, state) => StackEvent::new(
            addr,
            StackEventKind::AudioStateChanged {
                state: decode_code("audio state", state, BthfClientAudioState::Disconnected),
            },
        ),
        BthfClientCallbacks::VrCmd(addr, state) => StackEvent::new(
            addr,
            StackEventKind::VrStateChanged {
                state: decode_code("vr state", state, VrState::Stopped),
            },
        ),
        BthfClientCallbacks::NetworkState(addr, value) => {
            StackEvent::new(addr, StackEventKind::NetworkState { value })
        }
        BthfClientCallbacks::NetworkRoaming(addr, value) => {
            StackEvent::new(addr, StackEventKind::NetworkRoaming { value })
        }
        BthfClientCallbacks::NetworkSignal(addr, value) => {
            StackEvent::new(addr, StackEventKind::NetworkSignal { value })
        }
        BthfClientCallbacks::BatteryLevel(addr, value) => {
            StackEvent::new(addr, StackEventKind::BatteryLevel { value })
        }
        BthfClientCallbacks::CurrentOperator(addr, text) => {
            StackEvent::new(addr, StackEventKind::OperatorName { text })
        }
        BthfClientCallbacks::Call(addr, value) => {
            StackEvent::new(addr, StackEventKind::Call { value })
        }
        BthfClientCallbacks::Callsetup(addr, value) => StackEvent::new(
            addr,
            StackEventKind::CallSetup {
                value: decode_code("callsetup", value, CallSetupState::None),
            },
        ),
        BthfClientCallbacks::Callheld(addr, value) => StackEvent::new(
            addr,
            StackEventKind::CallHeld { value: decode_code("callheld", value, CallHeldState::None) },
        ),
        BthfClientCallbacks::RespAndHold(addr, value) => StackEvent::new(
            addr,
            StackEventKind::RespAndHold {
                value: decode_code("response and hold", value, RespAndHoldState::Held),
            },
        ),
        BthfClientCallbacks::Clip(addr, number) => {
            StackEvent::new(addr, StackEventKind::Clip { number })
        }
        BthfClientCallbacks::CallWaiting(addr, number) => {
            StackEvent::new(addr, StackEventKind::CallWaiting { number })
        }
        BthfClientCallbacks::CurrentCalls(addr, index, direction, state, multiparty, number) => {
            StackEvent::new(
                addr,
                StackEventKind::CurrentCalls {
                    index,
                    direction: decode_code("call direction", direction, CallDirection::Outgoing),
                    state: decode_code("call state", state, ClccCallState::Active),
                    multiparty: multiparty != 0,
                    number,
                },
            )
        }
        BthfClientCallbacks::VolumeChange(addr, volume_type, level) => StackEvent::new(
            addr,
            StackEventKind::VolumeChanged {
                volume_type: decode_code("volume type", volume_type, VolumeType::Speaker),
                level,
            },
        ),
        // An unrecognized final result is still a failure of the command.
        BthfClientCallbacks::CmdComplete(addr, result, cme_error) => StackEvent::cmd_result(
            addr,
            decode_code("command result", result, CmdResultCode::Error),
            cme_error,
        ),
        BthfClientCallbacks::SubscriberInfo(addr, number, service_type) => {
            StackEvent::new(addr, StackEventKind::SubscriberInfo { number, service_type })
        }
        BthfClientCallbacks::InBandRingTone(addr, state) => {
            StackEvent::new(addr, StackEventKind::InBandRingtone { enabled: state != 0 })
        }
        BthfClientCallbacks::LastVoiceTagNumber(addr, number) => {
            StackEvent::new(addr, StackEventKind::LastVoiceTagNumber { number })
        }
        BthfClientCallbacks::RingIndication(addr) => {
            StackEvent::new(addr, StackEventKind::RingIndication)
        }
        BthfClientCallbacks::UnknownEvent(addr, text) => {
            StackEvent::new(addr, StackEventKind::UnknownEvent { text })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: RawAddress = RawAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    #[test]
    fn test_decode_connection_state() {
        let event = decode(BthfClientCallbacks::ConnectionState(ADDR, 3, 0x48, 0x28));
        assert_eq!(
            event,
            StackEvent::connection_state(
                ADDR,
                BthfClientConnectionState::SlcConnected,
                PeerFeatures::ECS | PeerFeatures::INBAND,
                ChldFeatures::MERGE | ChldFeatures::HOLD_ACC,
            )
        );
    }

    #[test]
    fn test_decode_unknown_codes_fall_back() {
        let event = decode(BthfClientCallbacks::AudioState(ADDR, 42));
        assert_eq!(
            event.kind,
            StackEventKind::AudioStateChanged { state: BthfClientAudioState::Disconnected }
        );

        let event = decode(BthfClientCallbacks::CmdComplete(ADDR, 99, 0));
        assert_eq!(
            event.kind,
            StackEventKind::CmdResult { result: CmdResultCode::Error, cme_error: 0 }
        );
    }

    #[test]
    fn test_decode_current_calls() {
        let event =
            decode(BthfClientCallbacks::CurrentCalls(ADDR, 2, 1, 5, 1, "5551234".to_string()));
        assert_eq!(event.device, ADDR);
        assert_eq!(
            event.kind,
            StackEventKind::CurrentCalls {
                index: 2,
                direction: CallDirection::Incoming,
                state: ClccCallState::Waiting,
                multiparty: true,
                number: "5551234".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_cme_error() {
        let event = decode(BthfClientCallbacks::CmdComplete(ADDR, 7, 4));
        assert_eq!(
            event.kind,
            StackEventKind::CmdResult { result: CmdResultCode::CmeError, cme_error: 4 }
        );
    }

    #[test]
    fn test_decode_in_band_ringtone() {
        let event = decode(BthfClientCallbacks::InBandRingTone(ADDR, 1));
        assert_eq!(event.kind, StackEventKind::InBandRingtone { enabled: true });
        let event = decode(BthfClientCallbacks::InBandRingTone(ADDR, 0));
        assert_eq!(event.kind, StackEventKind::InBandRingtone { enabled: false });
    }

    #[test]
    fn test_audio_state_connected_variants() {
        assert!(BthfClientAudioState::ConnectedMsbc.is_connected());
        assert!(BthfClientAudioState::ConnectedLc3.is_connected());
        assert!(!BthfClientAudioState::Connecting.is_connected());
    }
}
