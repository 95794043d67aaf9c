//! Per device HF client connection and call state machine.
//!
//! The machine is sans-IO: it is driven only through [`HfpClientStateMachine::dispatch`],
//! talks to the radio through [`NativeInterface`] and reports through the injected
//! collaborators. Timers are deadlines in a [`TimerSchedule`] which the event loop turns
//! back into [`Message::TimerExpired`].
//!
//! AT final results carry no transaction id, so the AT channel is shared by three kinds of
//! requests that are kept mutually exclusive:
//!
//! * queued local actions, resolved in order through the [`CommandQueue`],
//! * the +ANDROID capability probe sent on connection,
//! * a current calls refresh (AT+CLCC followed by its report burst).
//!
//! A final result therefore belongs to the queue head if there is one, else to the probe or
//! refresh in flight. Local actions arriving while the probe or a refresh is outstanding are
//! parked and sent once the channel is free; refresh triggers arriving while actions are
//! queued are coalesced into one refresh sent afterwards.

use crate::address::RawAddress;
use crate::android_at::{self, AudioPolicy, ANDROID_AT_PROBE};
use crate::call::{CallState, HfpClientCall};
use crate::call_registry::CallRegistry;
use crate::callbacks::{
    AgEvent, AudioManager, ConnectionPolicy, ConnectionPolicyStore, HfpClientEvent,
    NotificationSink,
};
use crate::command_queue::{ActionPayload, ActionTag, CommandQueue, QueuedAction};
use crate::config::HfpClientConfig;
use crate::events::{
    BthfClientAudioState, BthfClientConnectionState, CmdResultCode, StackEvent, StackEventKind,
    VolumeType, VrState,
};
use crate::features::{AgCallFeatures, ChldFeatures, PeerFeatures};
use crate::native::{AtCommandId, CallAction, NativeInterface};
use crate::timer::{TimerKind, TimerSchedule};
use crate::vendor::VendorCommandResponseProcessor;

use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;

/// Connection state as exposed to callers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HfpConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Audio state as exposed to callers. Always Disconnected unless connected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HfpAudioState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    Connected,
    AudioOn,
}

impl State {
    fn connection_state(&self) -> HfpConnectionState {
        match self {
            State::Disconnected => HfpConnectionState::Disconnected,
            State::Connecting => HfpConnectionState::Connecting,
            State::Connected | State::AudioOn => HfpConnectionState::Connected,
        }
    }

    fn is_connected(&self) -> bool {
        matches!(self, State::Connected | State::AudioOn)
    }
}

/// What to do with the other call when accepting one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallAcceptFlag {
    None,
    Hold,
    Terminate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LocalAction {
    AcceptCall(CallAcceptFlag),
    RejectCall,
    HoldCall,
    TerminateCall,
    Dial(String),
    SendDtmf(char),
    /// Private consultation with the call at this index.
    EnterPrivateMode(u32),
    ExplicitCallTransfer,
    SendVendorCommand { vendor_id: u16, command: String },
    SendBiev { indicator_id: u32, value: u32 },
    StartVoiceRecognition,
    StopVoiceRecognition,
    SetAudioPolicy(AudioPolicy),
    ConnectAudio,
    DisconnectAudio,
    SetSpeakerVolume(u32),
    SetMicVolume(u32),
    QueryOperatorName,
    RetrieveSubscriberInfo,
    DisableNrec,
}

impl LocalAction {
    /// Queue tag of actions whose AT result must be correlated. Fire-and-forget
    /// actions have none.
    fn tag(&self) -> Option<ActionTag> {
        match self {
            LocalAction::AcceptCall(_) => Some(ActionTag::AcceptCall),
            LocalAction::RejectCall => Some(ActionTag::RejectCall),
            LocalAction::HoldCall => Some(ActionTag::HoldCall),
            LocalAction::TerminateCall => Some(ActionTag::TerminateCall),
            LocalAction::Dial(_) => Some(ActionTag::DialNumber),
            LocalAction::SendDtmf(_) => Some(ActionTag::SendDtmf),
            LocalAction::EnterPrivateMode(_) => Some(ActionTag::EnterPrivateMode),
            LocalAction::ExplicitCallTransfer => Some(ActionTag::ExplicitCallTransfer),
            LocalAction::SendVendorCommand { .. } => Some(ActionTag::SendVendorCommand),
            LocalAction::SendBiev { .. } => Some(ActionTag::SendBiev),
            LocalAction::StartVoiceRecognition => Some(ActionTag::VoiceRecognitionStart),
            LocalAction::StopVoiceRecognition => Some(ActionTag::VoiceRecognitionStop),
            LocalAction::SetAudioPolicy(_) => Some(ActionTag::SendAndroidAt),
            LocalAction::QueryOperatorName => Some(ActionTag::QueryOperatorName),
            LocalAction::RetrieveSubscriberInfo => Some(ActionTag::RetrieveSubscriberInfo),
            LocalAction::DisableNrec => Some(ActionTag::DisableNrec),
            LocalAction::ConnectAudio
            | LocalAction::DisconnectAudio
            | LocalAction::SetSpeakerVolume(_)
            | LocalAction::SetMicVolume(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Connect,
    Disconnect,
    Stack(StackEvent),
    Action(LocalAction),
    SetAudioRouteAllowed(bool),
    TimerExpired(TimerKind),
}

/// Last known AG indicator values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgIndicators {
    pub network_state: u32,
    pub roaming: u32,
    pub signal_strength: u32,
    pub battery_level: u32,
    pub operator_name: Option<String>,
    pub subscriber_number: Option<String>,
    pub voice_recognition_active: bool,
    pub speaker_volume: u32,
    pub mic_volume: u32,
}

/// Read-only view of the machine, published after every dispatch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HfpClientSnapshot {
    pub connection_state: HfpConnectionState,
    pub audio_state: HfpAudioState,
    pub calls: Vec<HfpClientCall>,
    pub ag_features: AgCallFeatures,
    pub android_at_supported: bool,
    pub in_band_ring: bool,
    pub indicators: AgIndicators,
    pub audio_route_allowed: bool,
}

/// Shared handles the machine reports to and consults.
#[derive(Clone)]
pub struct Collaborators {
    pub native: Arc<dyn NativeInterface>,
    pub sink: Arc<dyn NotificationSink>,
    pub audio: Arc<dyn AudioManager>,
    pub policy: Arc<dyn ConnectionPolicyStore>,
    pub vendor: Arc<VendorCommandResponseProcessor>,
}

pub struct HfpClientStateMachine {
    device: RawAddress,
    config: HfpClientConfig,
    native: Arc<dyn NativeInterface>,
    sink: Arc<dyn NotificationSink>,
    audio: Arc<dyn AudioManager>,
    policy: Arc<dyn ConnectionPolicyStore>,
    vendor: Arc<VendorCommandResponseProcessor>,

    state: State,
    audio_state: HfpAudioState,
    audio_route_allowed: bool,
    peer_features: PeerFeatures,
    chld_features: ChldFeatures,
    in_band_ring: bool,
    indicators: AgIndicators,

    calls: CallRegistry,
    queue: CommandQueue,
    timers: TimerSchedule,
    /// Messages held back while Connecting.
    deferred: VecDeque<Message>,
    /// Queueable actions waiting for the AT channel.
    parked: VecDeque<LocalAction>,
    refresh_requested: bool,

    probe_pending: bool,
    android_at_supported: bool,
    audio_policy: Option<AudioPolicy>,
}

impl HfpClientStateMachine {
    pub fn new(
        device: RawAddress,
        config: HfpClientConfig,
        collaborators: Collaborators,
    ) -> HfpClientStateMachine {
        HfpClientStateMachine {
            device,
            config,
            native: collaborators.native,
            sink: collaborators.sink,
            audio: collaborators.audio,
            policy: collaborators.policy,
            vendor: collaborators.vendor,
            state: State::Disconnected,
            audio_state: HfpAudioState::Disconnected,
            audio_route_allowed: true,
            peer_features: PeerFeatures::empty(),
            chld_features: ChldFeatures::empty(),
            in_band_ring: false,
            indicators: AgIndicators::default(),
            calls: CallRegistry::new(device),
            queue: CommandQueue::new(),
            timers: TimerSchedule::new(),
            deferred: VecDeque::new(),
            parked: VecDeque::new(),
            refresh_requested: false,
            probe_pending: false,
            android_at_supported: false,
            audio_policy: None,
        }
    }

    pub fn device(&self) -> RawAddress {
        self.device
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn get_connection_state(&self) -> HfpConnectionState {
        self.state.connection_state()
    }

    pub fn get_audio_state(&self) -> HfpAudioState {
        match self.state.is_connected() {
            true => self.audio_state,
            false => HfpAudioState::Disconnected,
        }
    }

    pub fn get_current_calls(&self) -> Vec<HfpClientCall> {
        self.calls.snapshot()
    }

    pub fn get_current_ag_features(&self) -> AgCallFeatures {
        match self.state.is_connected() {
            true => AgCallFeatures::from_negotiated(self.peer_features, self.chld_features),
            false => AgCallFeatures::empty(),
        }
    }

    pub fn is_android_at_supported(&self) -> bool {
        self.android_at_supported
    }

    pub fn is_in_band_ring(&self) -> bool {
        self.in_band_ring
    }

    pub fn snapshot(&self) -> HfpClientSnapshot {
        HfpClientSnapshot {
            connection_state: self.get_connection_state(),
            audio_state: self.get_audio_state(),
            calls: self.get_current_calls(),
            ag_features: self.get_current_ag_features(),
            android_at_supported: self.android_at_supported,
            in_band_ring: self.in_band_ring,
            indicators: self.indicators.clone(),
            audio_route_allowed: self.audio_route_allowed,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Timers due by now, to be dispatched as [`Message::TimerExpired`].
    pub fn expire_timers(&mut self) -> Vec<TimerKind> {
        self.timers.expire()
    }

    pub fn dispatch(&mut self, message: Message) {
        if let Message::Stack(event) = &message {
            if event.device != self.device {
                warn!("[{}] Dropping event for {}: {:?}", self.device, event.device, event.kind);
                return;
            }
        }

        debug!("[{}] {:?} handling {:?}", self.device, self.state, message);
        match self.state {
            State::Disconnected => self.process_disconnected(message),
            State::Connecting => self.process_connecting(message),
            State::Connected | State::AudioOn => self.process_connected(message),
        }
    }

    fn process_disconnected(&mut self, message: Message) {
        match message {
            Message::Connect => {
                if !self.native.connect(self.device).is_success() {
                    error!("[{}] Native connect failed", self.device);
                    self.broadcast_connection_state(
                        HfpConnectionState::Disconnected,
                        HfpConnectionState::Disconnected,
                    );
                    return;
                }
                self.enter_connecting();
            }
            Message::Disconnect => info!("[{}] Already disconnected", self.device),
            Message::Stack(event) => match event.kind {
                StackEventKind::ConnectionStateChanged {
                    state:
                        BthfClientConnectionState::Connected
                        | BthfClientConnectionState::Connecting,
                    ..
                } => {
                    if self.policy.connection_policy(self.device) == ConnectionPolicy::Forbidden {
                        warn!("[{}] Incoming connection rejected by policy", self.device);
                        self.native.disconnect(self.device);
                        self.broadcast_connection_state(
                            HfpConnectionState::Disconnected,
                            HfpConnectionState::Disconnected,
                        );
                        return;
                    }
                    self.enter_connecting();
                }
                kind => debug!("[{}] Ignoring {:?} while disconnected", self.device, kind),
            },
            Message::Action(action) => {
                warn!("[{}] Not connected, dropping {:?}", self.device, action)
            }
            Message::SetAudioRouteAllowed(allowed) => self.audio_route_allowed = allowed,
            Message::TimerExpired(kind) => debug!("[{}] Stale timer {:?}", self.device, kind),
        }
    }

    fn process_connecting(&mut self, message: Message) {
        match message {
            Message::Connect | Message::Action(_) => self.deferred.push_back(message),
            Message::Disconnect => {
                self.native.disconnect(self.device);
                self.enter_disconnected();
            }
            Message::Stack(event) => match event.kind {
                StackEventKind::ConnectionStateChanged {
                    state,
                    peer_features,
                    chld_features,
                } => match state {
                    BthfClientConnectionState::SlcConnected => {
                        self.enter_connected(peer_features, chld_features)
                    }
                    BthfClientConnectionState::Disconnected => self.enter_disconnected(),
                    other => debug!("[{}] Already connecting, ignoring {:?}", self.device, other),
                },
                StackEventKind::AudioStateChanged { state } => {
                    warn!("[{}] Audio {:?} rejected while connecting", self.device, state)
                }
                StackEventKind::CmdResult { .. } | StackEventKind::UnknownEvent { .. } => {
                    debug!("[{}] Dropping {:?} while connecting", self.device, event.kind)
                }
                _ => self.deferred.push_back(Message::Stack(event)),
            },
            Message::SetAudioRouteAllowed(allowed) => self.audio_route_allowed = allowed,
            Message::TimerExpired(TimerKind::Connecting) => {
                warn!("[{}] Connection timed out", self.device);
                self.native.disconnect(self.device);
                self.enter_disconnected();
            }
            Message::TimerExpired(kind) => debug!("[{}] Stale timer {:?}", self.device, kind),
        }
    }

    fn process_connected(&mut self, message: Message) {
        match message {
            Message::Connect => info!("[{}] Already connected", self.device),
            Message::Disconnect => {
                if self.state == State::AudioOn {
                    self.native.disconnect_audio(self.device);
                }
                self.native.disconnect(self.device);
                self.enter_disconnected();
            }
            Message::Stack(event) => self.process_stack_event(event.kind),
            Message::Action(action) => self.handle_action(action),
            Message::SetAudioRouteAllowed(allowed) => self.audio_route_allowed = allowed,
            Message::TimerExpired(TimerKind::QueryCurrentCalls) => self.request_refresh(),
            Message::TimerExpired(TimerKind::OutgoingCall) => {
                if let Some(call) = self.calls.terminate_outgoing() {
                    warn!("[{}] Outgoing call was never reported", self.device);
                    self.notify_calls(vec![call]);
                }
            }
            Message::TimerExpired(kind) => debug!("[{}] Stale timer {:?}", self.device, kind),
        }
    }

    fn process_stack_event(&mut self, kind: StackEventKind) {
        match kind {
            StackEventKind::ConnectionStateChanged { state, .. } => match state {
                BthfClientConnectionState::Disconnected => self.enter_disconnected(),
                other => debug!("[{}] Already connected, ignoring {:?}", self.device, other),
            },
            StackEventKind::AudioStateChanged { state } => self.process_audio_state(state),
            StackEventKind::VrStateChanged { state } => {
                self.set_voice_recognition(state == VrState::Started)
            }
            StackEventKind::NetworkState { value } => {
                self.indicators.network_state = value;
                self.broadcast_ag_event(AgEvent::NetworkState(value));
            }
            StackEventKind::NetworkRoaming { value } => {
                self.indicators.roaming = value;
                self.broadcast_ag_event(AgEvent::NetworkRoaming(value));
            }
            StackEventKind::NetworkSignal { value } => {
                self.indicators.signal_strength = value;
                self.broadcast_ag_event(AgEvent::NetworkSignal(value));
            }
            StackEventKind::BatteryLevel { value } => {
                self.indicators.battery_level = value;
                self.broadcast_ag_event(AgEvent::BatteryLevel(value));
            }
            StackEventKind::OperatorName { text } => {
                self.indicators.operator_name = Some(text.clone());
                self.broadcast_ag_event(AgEvent::OperatorName(text));
            }
            StackEventKind::SubscriberInfo { number, .. } => {
                self.indicators.subscriber_number = Some(number.clone());
                self.broadcast_ag_event(AgEvent::SubscriberInfo(number));
            }
            StackEventKind::LastVoiceTagNumber { number } => {
                self.broadcast_ag_event(AgEvent::LastVoiceTagNumber(number))
            }
            StackEventKind::Call { .. }
            | StackEventKind::CallSetup { .. }
            | StackEventKind::CallHeld { .. }
            | StackEventKind::RespAndHold { .. }
            | StackEventKind::Clip { .. }
            | StackEventKind::CallWaiting { .. } => self.request_refresh(),
            StackEventKind::CurrentCalls { index, direction, state, multiparty, number } => {
                self.calls.report(index, direction, state, multiparty, number, self.in_band_ring);
            }
            StackEventKind::VolumeChanged { volume_type, level } => {
                match volume_type {
                    VolumeType::Speaker => self.indicators.speaker_volume = level,
                    VolumeType::Microphone => self.indicators.mic_volume = level,
                }
                self.audio.on_volume_changed(self.device, volume_type, level);
                self.broadcast_ag_event(AgEvent::Volume(volume_type, level));
            }
            StackEventKind::CmdResult { result, cme_error } => {
                self.process_cmd_result(result, cme_error)
            }
            StackEventKind::InBandRingtone { enabled } => {
                if self.in_band_ring != enabled {
                    self.in_band_ring = enabled;
                    self.sink.send_broadcast(HfpClientEvent::InBandRingChanged {
                        device: self.device,
                        enabled,
                    });
                }
            }
            StackEventKind::RingIndication => {
                self.sink.send_broadcast(HfpClientEvent::Ring { device: self.device })
            }
            StackEventKind::UnknownEvent { text } => self.process_unknown_event(text),
        }
    }

    fn process_audio_state(&mut self, state: BthfClientAudioState) {
        let prev = self.audio_state;
        match state {
            s if s.is_connected() => {
                if !self.audio_route_allowed {
                    warn!("[{}] Audio route not allowed, disconnecting audio", self.device);
                    self.native.disconnect_audio(self.device);
                    return;
                }
                if self.state == State::AudioOn {
                    return;
                }
                self.state = State::AudioOn;
                self.audio_state = HfpAudioState::Connected;
                info!("[{}] Audio connected ({:?})", self.device, s);
                self.audio.set_hfp_audio_active(self.device, true);
            }
            BthfClientAudioState::Connecting => {
                if self.state == State::AudioOn || prev == HfpAudioState::Connecting {
                    return;
                }
                self.audio_state = HfpAudioState::Connecting;
            }
            _ => {
                if prev == HfpAudioState::Disconnected {
                    return;
                }
                if self.state == State::AudioOn {
                    self.state = State::Connected;
                    self.audio.set_hfp_audio_active(self.device, false);
                }
                self.audio_state = HfpAudioState::Disconnected;
                info!("[{}] Audio disconnected", self.device);
            }
        }
        self.broadcast_audio_state(prev, self.audio_state);
    }

    fn process_unknown_event(&mut self, text: String) {
        if self.probe_pending && android_at::is_probe_ack(&text) {
            info!("[{}] Android AT extension supported", self.device);
            self.probe_pending = false;
            self.android_at_supported = true;
            if let Some(policy) = self.audio_policy {
                self.handle_action(LocalAction::SetAudioPolicy(policy));
            }
            self.service_channel();
            return;
        }

        match self.vendor.process_event(&text, Some(self.device)) {
            Some(event) => self.sink.send_broadcast(HfpClientEvent::VendorEvent {
                device: self.device,
                vendor_id: event.vendor_id,
                event_code: event.event_code,
                full_args: event.args,
            }),
            None => debug!("[{}] Unhandled AT event {}", self.device, text),
        }
    }

    fn process_cmd_result(&mut self, result: CmdResultCode, cme_error: u32) {
        if let Some(action) = self.queue.resolve_next() {
            self.complete_action(action, result, cme_error);
        } else if self.probe_pending {
            info!(
                "[{}] Android AT extension not supported ({:?}, cme {})",
                self.device, result, cme_error
            );
            self.probe_pending = false;
            self.android_at_supported = false;
        } else if self.calls.is_refreshing() {
            self.close_refresh(result);
        } else {
            warn!("[{}] Unmatched AT result {:?} (cme {})", self.device, result, cme_error);
        }
        self.service_channel();
    }

    fn complete_action(&mut self, action: QueuedAction, result: CmdResultCode, cme_error: u32) {
        debug!("[{}] {:?} finished with {:?}", self.device, action.tag, result);
        self.sink.send_broadcast(HfpClientEvent::ActionResult {
            device: self.device,
            action: action.tag,
            result,
            cme_error,
        });

        match (action.tag, action.payload) {
            (ActionTag::EnterPrivateMode, ActionPayload::Index(index)) if result.is_ok() => {
                let changed = self.calls.apply_private_mode(index);
                self.notify_calls(changed);
                self.request_refresh();
            }
            (ActionTag::DialNumber, _) if !result.is_ok() => {
                self.timers.cancel(TimerKind::OutgoingCall);
                if let Some(call) = self.calls.terminate_outgoing() {
                    self.notify_calls(vec![call]);
                }
            }
            (ActionTag::VoiceRecognitionStart, _) if result.is_ok() => {
                self.set_voice_recognition(true)
            }
            (ActionTag::VoiceRecognitionStop, _) if result.is_ok() => {
                self.set_voice_recognition(false)
            }
            (
                ActionTag::AcceptCall
                | ActionTag::RejectCall
                | ActionTag::HoldCall
                | ActionTag::TerminateCall
                | ActionTag::DialNumber
                | ActionTag::ExplicitCallTransfer,
                _,
            ) if result.is_ok() => self.request_refresh(),
            _ => (),
        }
    }

    fn handle_action(&mut self, action: LocalAction) {
        if let LocalAction::SetAudioPolicy(policy) = &action {
            self.audio_policy = Some(*policy);
            if !self.android_at_supported {
                debug!("[{}] Audio policy stored, Android AT not supported", self.device);
                return;
            }
        }

        let tag = match action.tag() {
            Some(tag) => tag,
            None => return self.execute_action(action),
        };

        if self.implicit_channel_busy() || self.queue.is_pending(tag) || !self.parked.is_empty() {
            debug!("[{}] AT channel busy, parking {:?}", self.device, action);
            self.parked.push_back(action);
            return;
        }
        self.execute_action(action);
    }

    fn execute_action(&mut self, action: LocalAction) {
        match action {
            LocalAction::AcceptCall(flag) => self.accept_call(flag),
            LocalAction::RejectCall => self.reject_call(),
            LocalAction::HoldCall => self.hold_call(),
            LocalAction::TerminateCall => self.terminate_call(),
            LocalAction::Dial(number) => self.dial(number),
            LocalAction::SendDtmf(code) => {
                if self.native.send_dtmf(self.device, code).is_success() {
                    self.enqueue(ActionTag::SendDtmf, ActionPayload::Dtmf(code));
                } else {
                    error!("[{}] Failed to send DTMF {}", self.device, code);
                }
            }
            LocalAction::EnterPrivateMode(index) => self.enter_private_mode(index),
            LocalAction::ExplicitCallTransfer => self.explicit_call_transfer(),
            LocalAction::SendVendorCommand { vendor_id, command } => {
                match self.vendor.send_command(vendor_id, &command, Some(self.device)) {
                    Ok(()) => self.enqueue(
                        ActionTag::SendVendorCommand,
                        ActionPayload::VendorCommand { vendor_id, command },
                    ),
                    Err(e) => warn!("[{}] Vendor command not sent: {}", self.device, e),
                }
            }
            LocalAction::SendBiev { indicator_id, value } => {
                let status = self.native.send_at_cmd(
                    self.device,
                    AtCommandId::Biev,
                    indicator_id,
                    value,
                    "",
                );
                if status.is_success() {
                    self.enqueue(ActionTag::SendBiev, ActionPayload::Biev { indicator_id, value });
                } else {
                    error!("[{}] Failed to send BIEV {}={}", self.device, indicator_id, value);
                }
            }
            LocalAction::StartVoiceRecognition => self.voice_recognition(true),
            LocalAction::StopVoiceRecognition => self.voice_recognition(false),
            LocalAction::SetAudioPolicy(policy) => {
                let command = policy.to_at_command();
                if self.native.send_android_at(self.device, &command).is_success() {
                    self.enqueue(ActionTag::SendAndroidAt, ActionPayload::Text(command));
                } else {
                    error!("[{}] Failed to send audio policy", self.device);
                }
            }
            LocalAction::ConnectAudio => {
                if self.state == State::AudioOn {
                    debug!("[{}] Audio already connected", self.device);
                    return;
                }
                if !self.native.connect_audio(self.device).is_success() {
                    error!("[{}] Failed to connect audio", self.device);
                }
            }
            LocalAction::DisconnectAudio => {
                if !self.native.disconnect_audio(self.device).is_success() {
                    error!("[{}] Failed to disconnect audio", self.device);
                }
            }
            LocalAction::SetSpeakerVolume(level) => self.set_volume(VolumeType::Speaker, level),
            LocalAction::SetMicVolume(level) => self.set_volume(VolumeType::Microphone, level),
            LocalAction::QueryOperatorName => {
                if self.native.query_current_operator_name(self.device).is_success() {
                    self.enqueue(ActionTag::QueryOperatorName, ActionPayload::None);
                }
            }
            LocalAction::RetrieveSubscriberInfo => {
                if self.native.retrieve_subscriber_info(self.device).is_success() {
                    self.enqueue(ActionTag::RetrieveSubscriberInfo, ActionPayload::None);
                }
            }
            LocalAction::DisableNrec => {
                if !self.peer_features.contains(PeerFeatures::ECNR) {
                    warn!("[{}] AG does not support NREC", self.device);
                    return;
                }
                if self.native.send_at_cmd(self.device, AtCommandId::Nrec, 0, 0, "").is_success() {
                    self.enqueue(ActionTag::DisableNrec, ActionPayload::None);
                }
            }
        }
    }

    fn accept_call(&mut self, flag: CallAcceptFlag) {
        let action = if self.calls.has_state(CallState::Incoming) {
            if flag != CallAcceptFlag::None {
                warn!("[{}] Incoming call can only be answered", self.device);
                return;
            }
            CallAction::Ata
        } else if self.calls.has_state(CallState::Waiting) {
            match (self.calls.has_state(CallState::Active), flag) {
                (false, CallAcceptFlag::None) => CallAction::Chld2,
                (false, _) => {
                    warn!("[{}] No active call to put aside", self.device);
                    return;
                }
                (true, CallAcceptFlag::Terminate) => CallAction::Chld1,
                (true, _) => CallAction::Chld2,
            }
        } else if self.calls.has_state(CallState::Held) {
            match flag {
                CallAcceptFlag::Hold => CallAction::Chld2,
                CallAcceptFlag::Terminate => CallAction::Chld1,
                CallAcceptFlag::None if self.calls.has_state(CallState::Active) => {
                    CallAction::Chld3
                }
                CallAcceptFlag::None => CallAction::Chld2,
            }
        } else if self.calls.has_state(CallState::HeldByResponseAndHold) {
            if flag != CallAcceptFlag::None {
                warn!("[{}] Held incoming call can only be answered", self.device);
                return;
            }
            CallAction::Btrh1
        } else {
            warn!("[{}] No call to accept", self.device);
            return;
        };
        self.send_call_action(ActionTag::AcceptCall, action, 0);
    }

    fn reject_call(&mut self) {
        let action = if self.calls.has_state(CallState::Incoming) {
            CallAction::Chup
        } else if self.calls.has_state(CallState::Waiting) || self.calls.has_state(CallState::Held)
        {
            CallAction::Chld0
        } else if self.calls.has_state(CallState::HeldByResponseAndHold) {
            CallAction::Btrh2
        } else {
            warn!("[{}] No call to reject", self.device);
            return;
        };
        self.send_call_action(ActionTag::RejectCall, action, 0);
    }

    fn hold_call(&mut self) {
        let action = if self.calls.has_state(CallState::Incoming) {
            CallAction::Btrh0
        } else if self.calls.has_state(CallState::Active) {
            CallAction::Chld2
        } else {
            warn!("[{}] No call to hold", self.device);
            return;
        };
        self.send_call_action(ActionTag::HoldCall, action, 0);
    }

    fn terminate_call(&mut self) {
        let action = if [CallState::Dialing, CallState::Alerting, CallState::Active]
            .iter()
            .any(|state| self.calls.has_state(*state))
        {
            CallAction::Chup
        } else if self.calls.has_state(CallState::Held) {
            CallAction::Chld0
        } else {
            warn!("[{}] No call to terminate", self.device);
            return;
        };
        self.send_call_action(ActionTag::TerminateCall, action, 0);
    }

    fn dial(&mut self, number: String) {
        if self.calls.has_outgoing() {
            warn!("[{}] Already dialing", self.device);
            return;
        }

        let call = self.calls.add_outgoing(number.clone(), self.in_band_ring);
        if !self.native.dial(self.device, &number).is_success() {
            error!("[{}] Failed to dial", self.device);
            if let Some(call) = self.calls.terminate_outgoing() {
                self.sink.send_broadcast(HfpClientEvent::CallChanged(call));
            }
            return;
        }

        self.notify_calls(vec![call]);
        self.enqueue(ActionTag::DialNumber, ActionPayload::Number(number));
        self.timers.set(TimerKind::OutgoingCall, self.config.outgoing_call_timeout);
    }

    fn enter_private_mode(&mut self, index: u32) {
        if !self.chld_features.contains(ChldFeatures::PRIV_X) {
            warn!("[{}] AG does not support private mode", self.device);
            return;
        }
        match self.calls.get(index) {
            Some(call) if call.state == CallState::Active && call.multiparty => (),
            _ => {
                warn!("[{}] Call {} is not an active conference member", self.device, index);
                return;
            }
        }
        if self.native.handle_call_action(self.device, CallAction::Chld2x, index).is_success() {
            self.enqueue(ActionTag::EnterPrivateMode, ActionPayload::Index(index));
        } else {
            error!("[{}] Failed to enter private mode with {}", self.device, index);
        }
    }

    fn explicit_call_transfer(&mut self) {
        if !self.chld_features.contains(ChldFeatures::MERGE_DETACH) {
            warn!("[{}] AG does not support call transfer", self.device);
            return;
        }
        if self.calls.len() < 2 {
            warn!("[{}] Call transfer needs two calls", self.device);
            return;
        }
        self.send_call_action(ActionTag::ExplicitCallTransfer, CallAction::Chld4, 0);
    }

    fn voice_recognition(&mut self, start: bool) {
        if !self.peer_features.contains(PeerFeatures::VREC) {
            warn!("[{}] AG does not support voice recognition", self.device);
            return;
        }
        if self.indicators.voice_recognition_active == start {
            debug!("[{}] Voice recognition already {}", self.device, start);
            return;
        }
        let (status, tag) = if start {
            (self.native.start_voice_recognition(self.device), ActionTag::VoiceRecognitionStart)
        } else {
            (self.native.stop_voice_recognition(self.device), ActionTag::VoiceRecognitionStop)
        };
        if status.is_success() {
            self.enqueue(tag, ActionPayload::None);
        } else {
            error!("[{}] Failed to change voice recognition", self.device);
        }
    }

    fn set_voice_recognition(&mut self, active: bool) {
        if self.indicators.voice_recognition_active != active {
            self.indicators.voice_recognition_active = active;
            self.broadcast_ag_event(AgEvent::VoiceRecognition(active));
        }
    }

    fn set_volume(&mut self, volume_type: VolumeType, level: u32) {
        if !self.native.set_volume(self.device, volume_type, level).is_success() {
            error!("[{}] Failed to set {:?} volume", self.device, volume_type);
            return;
        }
        match volume_type {
            VolumeType::Speaker => self.indicators.speaker_volume = level,
            VolumeType::Microphone => self.indicators.mic_volume = level,
        }
    }

    fn send_call_action(&mut self, tag: ActionTag, action: CallAction, index: u32) {
        if self.native.handle_call_action(self.device, action, index).is_success() {
            self.enqueue(tag, ActionPayload::CallAction(action));
        } else {
            error!("[{}] Failed to send {:?}", self.device, action);
        }
    }

    fn enqueue(&mut self, tag: ActionTag, payload: ActionPayload) {
        if let Err(e) = self.queue.enqueue(tag, payload) {
            warn!("[{}] {}", self.device, e);
        }
    }

    fn implicit_channel_busy(&self) -> bool {
        self.probe_pending || self.calls.is_refreshing()
    }

    fn query_calls_supported(&self) -> bool {
        self.peer_features.contains(PeerFeatures::ECS)
    }

    fn request_refresh(&mut self) {
        if !self.query_calls_supported() {
            debug!("[{}] AG cannot list current calls", self.device);
            return;
        }
        if self.implicit_channel_busy() || !self.queue.is_empty() {
            self.refresh_requested = true;
            return;
        }
        self.start_refresh();
    }

    fn start_refresh(&mut self) {
        self.refresh_requested = false;
        self.timers.cancel(TimerKind::QueryCurrentCalls);
        if !self.calls.begin_refresh() {
            return;
        }
        if !self.native.query_current_calls(self.device).is_success() {
            error!("[{}] Failed to query current calls", self.device);
            self.calls.abort_refresh();
            self.arm_poll();
        }
    }

    fn close_refresh(&mut self, result: CmdResultCode) {
        if !result.is_ok() {
            warn!("[{}] Current calls query failed with {:?}", self.device, result);
            self.calls.abort_refresh();
            if !self.refresh_requested {
                self.arm_poll();
            }
            return;
        }

        let outcome = self.calls.commit();
        if outcome.outgoing_confirmed {
            self.timers.cancel(TimerKind::OutgoingCall);
        }
        self.notify_calls(outcome.changed);
        if !self.refresh_requested {
            self.arm_poll();
        }
    }

    fn arm_poll(&mut self) {
        if self.config.clcc_poll_during_call && !self.calls.is_empty() {
            self.timers.set(TimerKind::QueryCurrentCalls, self.config.query_current_calls_interval);
        }
    }

    /// Sends parked actions and pending refreshes once nothing else holds the AT channel.
    fn service_channel(&mut self) {
        while let Some(tag) = self.parked.front().and_then(LocalAction::tag) {
            if self.implicit_channel_busy() || self.queue.is_pending(tag) {
                return;
            }
            if let Some(action) = self.parked.pop_front() {
                self.execute_action(action);
            }
        }
        if self.refresh_requested && self.queue.is_empty() && !self.implicit_channel_busy() {
            self.start_refresh();
        }
    }

    fn enter_connecting(&mut self) {
        info!("[{}] Disconnected -> Connecting", self.device);
        self.state = State::Connecting;
        self.timers.set(TimerKind::Connecting, self.config.connecting_timeout);
        self.broadcast_connection_state(
            HfpConnectionState::Disconnected,
            HfpConnectionState::Connecting,
        );
    }

    fn enter_connected(&mut self, peer_features: PeerFeatures, chld_features: ChldFeatures) {
        info!(
            "[{}] Connecting -> Connected (peer {:?}, chld {:?})",
            self.device, peer_features, chld_features
        );
        self.timers.cancel(TimerKind::Connecting);
        self.peer_features = peer_features;
        self.chld_features = chld_features;
        self.in_band_ring = peer_features.contains(PeerFeatures::INBAND);
        self.audio_state = HfpAudioState::Disconnected;
        self.state = State::Connected;
        self.broadcast_connection_state(
            HfpConnectionState::Connecting,
            HfpConnectionState::Connected,
        );
        self.audio.update_inband_ringing(self.device, true);

        self.android_at_supported = false;
        self.probe_pending =
            self.native.send_android_at(self.device, ANDROID_AT_PROBE).is_success();
        if !self.probe_pending {
            warn!("[{}] Failed to probe Android AT extension", self.device);
        }

        while let Some(message) = self.deferred.pop_front() {
            self.dispatch(message);
        }
    }

    fn enter_disconnected(&mut self) {
        let prev = self.state;
        info!("[{}] {:?} -> Disconnected", self.device, prev);

        if self.audio_state != HfpAudioState::Disconnected {
            if prev == State::AudioOn {
                self.audio.set_hfp_audio_active(self.device, false);
            }
            let prev_audio = self.audio_state;
            self.audio_state = HfpAudioState::Disconnected;
            self.broadcast_audio_state(prev_audio, HfpAudioState::Disconnected);
        }

        self.timers.cancel_all();
        self.queue.clear();
        self.parked.clear();
        if !self.deferred.is_empty() {
            debug!("[{}] Discarding {} deferred messages", self.device, self.deferred.len());
            self.deferred.clear();
        }
        self.refresh_requested = false;
        self.probe_pending = false;
        self.android_at_supported = false;

        let terminated = self.calls.terminate_all();
        self.notify_calls(terminated);

        self.state = State::Disconnected;
        self.broadcast_connection_state(prev.connection_state(), HfpConnectionState::Disconnected);

        self.peer_features = PeerFeatures::empty();
        self.chld_features = ChldFeatures::empty();
        self.in_band_ring = false;
        self.indicators = AgIndicators::default();
        if prev != State::Disconnected {
            self.audio.update_inband_ringing(self.device, false);
        }
    }

    fn notify_calls(&self, changed: Vec<HfpClientCall>) {
        if changed.is_empty() {
            return;
        }
        for call in changed {
            self.sink.send_broadcast(HfpClientEvent::CallChanged(call));
        }
        self.sink.send_broadcast(HfpClientEvent::CallListChanged {
            device: self.device,
            calls: self.calls.snapshot(),
        });
    }

    fn broadcast_connection_state(&self, prev: HfpConnectionState, new: HfpConnectionState) {
        self.sink.send_broadcast(HfpClientEvent::ConnectionStateChanged {
            device: self.device,
            prev,
            new,
            ag_features: self.get_current_ag_features(),
        });
    }

    fn broadcast_audio_state(&self, prev: HfpAudioState, new: HfpAudioState) {
        if prev == new {
            return;
        }
        self.sink.send_broadcast(HfpClientEvent::AudioStateChanged {
            device: self.device,
            prev,
            new,
        });
    }

    fn broadcast_ag_event(&self, event: AgEvent) {
        self.sink.send_broadcast(HfpClientEvent::AgEvent { device: self.device, event });
    }
}
