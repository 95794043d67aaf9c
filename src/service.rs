//! Runs one [`HfpClientStateMachine`] per remote AG on its own task and routes
//! native callbacks to it.

use crate::address::RawAddress;
use crate::android_at::AudioPolicy;
use crate::call::HfpClientCall;
use crate::callbacks::{AudioManager, ConnectionPolicy, ConnectionPolicyStore, NotificationSink};
use crate::config::HfpClientConfig;
use crate::events::{
    decode, BthfClientCallbacks, BthfClientCallbacksDispatcher, BthfClientConnectionState,
    StackEventKind,
};
use crate::features::AgCallFeatures;
use crate::native::NativeInterface;
use crate::state_machine::{
    CallAcceptFlag, Collaborators, HfpAudioState, HfpClientSnapshot, HfpClientStateMachine,
    HfpConnectionState, LocalAction, Message,
};
use crate::vendor::{VendorCommandError, VendorCommandResponseProcessor};

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::select;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::sleep_until;

/// Owns a state machine and the receiving end of its message channel.
pub struct HfpClientContext {
    tx: UnboundedSender<Message>,
    rx: UnboundedReceiver<Message>,
    state_machine: HfpClientStateMachine,
    state: Arc<Mutex<HfpClientSnapshot>>,
}

impl HfpClientContext {
    pub fn new(state_machine: HfpClientStateMachine) -> HfpClientContext {
        // Unbounded so native callbacks can post synchronously and keep their order.
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        let state = Arc::new(Mutex::new(state_machine.snapshot()));
        HfpClientContext { tx, rx, state_machine, state }
    }

    pub fn get_proxy(&self) -> HfpClientProxy {
        HfpClientProxy {
            device: self.state_machine.device(),
            tx: self.tx.clone(),
            state: self.state.clone(),
            vendor: None,
        }
    }
}

/// Cloneable handle posting requests to one state machine and reading its last snapshot.
#[derive(Clone)]
pub struct HfpClientProxy {
    device: RawAddress,
    tx: UnboundedSender<Message>,
    state: Arc<Mutex<HfpClientSnapshot>>,
    vendor: Option<Arc<VendorCommandResponseProcessor>>,
}

impl HfpClientProxy {
    fn with_vendor(mut self, vendor: Arc<VendorCommandResponseProcessor>) -> HfpClientProxy {
        self.vendor = Some(vendor);
        self
    }

    pub fn device(&self) -> RawAddress {
        self.device
    }

    /// Posts a message. Returns false once the machine's mainloop has exited.
    pub fn post(&self, message: Message) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("[{}] State machine gone, dropping {:?}", self.device, e.0);
                false
            }
        }
    }

    fn action(&self, action: LocalAction) -> bool {
        self.post(Message::Action(action))
    }

    pub fn connect(&self) -> bool {
        self.post(Message::Connect)
    }

    pub fn disconnect(&self) -> bool {
        self.post(Message::Disconnect)
    }

    pub fn accept_call(&self, flag: CallAcceptFlag) -> bool {
        self.action(LocalAction::AcceptCall(flag))
    }

    pub fn reject_call(&self) -> bool {
        self.action(LocalAction::RejectCall)
    }

    pub fn hold_call(&self) -> bool {
        self.action(LocalAction::HoldCall)
    }

    pub fn terminate_call(&self) -> bool {
        self.action(LocalAction::TerminateCall)
    }

    pub fn dial(&self, number: &str) -> bool {
        self.action(LocalAction::Dial(number.to_string()))
    }

    pub fn send_dtmf(&self, code: char) -> bool {
        self.action(LocalAction::SendDtmf(code))
    }

    pub fn enter_private_mode(&self, index: u32) -> bool {
        self.action(LocalAction::EnterPrivateMode(index))
    }

    pub fn explicit_call_transfer(&self) -> bool {
        self.action(LocalAction::ExplicitCallTransfer)
    }

    /// Malformed or unregistered commands are rejected here and never posted.
    pub fn send_vendor_at_command(
        &self,
        vendor_id: u16,
        command: &str,
    ) -> Result<(), VendorCommandError> {
        if let Some(vendor) = &self.vendor {
            vendor.validate_command(vendor_id, command, Some(self.device))?;
        }
        match self.action(LocalAction::SendVendorCommand {
            vendor_id,
            command: command.to_string(),
        }) {
            true => Ok(()),
            false => Err(VendorCommandError::NoDevice),
        }
    }

    pub fn send_biev(&self, indicator_id: u32, value: u32) -> bool {
        self.action(LocalAction::SendBiev { indicator_id, value })
    }

    pub fn start_voice_recognition(&self) -> bool {
        self.action(LocalAction::StartVoiceRecognition)
    }

    pub fn stop_voice_recognition(&self) -> bool {
        self.action(LocalAction::StopVoiceRecognition)
    }

    pub fn set_audio_policy(&self, policy: AudioPolicy) -> bool {
        self.action(LocalAction::SetAudioPolicy(policy))
    }

    pub fn connect_audio(&self) -> bool {
        self.action(LocalAction::ConnectAudio)
    }

    pub fn disconnect_audio(&self) -> bool {
        self.action(LocalAction::DisconnectAudio)
    }

    pub fn set_speaker_volume(&self, level: u32) -> bool {
        self.action(LocalAction::SetSpeakerVolume(level))
    }

    pub fn set_mic_volume(&self, level: u32) -> bool {
        self.action(LocalAction::SetMicVolume(level))
    }

    pub fn query_current_operator_name(&self) -> bool {
        self.action(LocalAction::QueryOperatorName)
    }

    pub fn retrieve_subscriber_info(&self) -> bool {
        self.action(LocalAction::RetrieveSubscriberInfo)
    }

    pub fn disable_nrec(&self) -> bool {
        self.action(LocalAction::DisableNrec)
    }

    pub fn set_audio_route_allowed(&self, allowed: bool) -> bool {
        self.post(Message::SetAudioRouteAllowed(allowed))
    }

    /// The state as of the last handled message.
    pub fn snapshot(&self) -> HfpClientSnapshot {
        // The lock is only held to copy the snapshot in or out.
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(_) => HfpClientSnapshot::default(),
        }
    }

    pub fn get_connection_state(&self) -> HfpConnectionState {
        self.snapshot().connection_state
    }

    pub fn get_audio_state(&self) -> HfpAudioState {
        self.snapshot().audio_state
    }

    pub fn get_current_calls(&self) -> Vec<HfpClientCall> {
        self.snapshot().calls
    }

    pub fn get_current_ag_features(&self) -> AgCallFeatures {
        self.snapshot().ag_features
    }

    pub fn is_android_at_supported(&self) -> bool {
        self.snapshot().android_at_supported
    }
}

/// Handles messages and timer expiries for one device until every proxy is dropped.
pub async fn mainloop(context: HfpClientContext) {
    let HfpClientContext { tx, mut rx, mut state_machine, state } = context;
    // Only proxies keep the channel open.
    drop(tx);

    let device = state_machine.device();
    loop {
        let m = match state_machine.next_deadline() {
            Some(deadline) => select! {
                m = rx.recv() => m,
                _ = sleep_until(deadline) => {
                    for kind in state_machine.expire_timers() {
                        dispatch(&mut state_machine, &state, Message::TimerExpired(kind));
                    }
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match m {
            Some(m) => dispatch(&mut state_machine, &state, m),
            None => {
                info!("[{}] Exiting HF client mainloop", device);
                break;
            }
        }
    }
}

fn dispatch(
    state_machine: &mut HfpClientStateMachine,
    state: &Mutex<HfpClientSnapshot>,
    message: Message,
) {
    state_machine.dispatch(message);
    match state.lock() {
        Ok(mut state) => *state = state_machine.snapshot(),
        Err(_) => error!("[{}] Snapshot lock poisoned", state_machine.device()),
    }
}

/// Builds the callback table handed to the native layer. Callbacks are forwarded
/// in order to `tx`, to be fed to [`HfpClientService::handle_callback`].
pub fn get_dispatcher(tx: UnboundedSender<BthfClientCallbacks>) -> BthfClientCallbacksDispatcher {
    BthfClientCallbacksDispatcher {
        dispatch: Box::new(move |cb| {
            if tx.send(cb).is_err() {
                warn!("HF client callback dropped, service is gone");
            }
        }),
    }
}

/// Drains native callbacks into `service` until the dispatcher is dropped.
pub async fn run_callback_loop(
    service: Arc<Mutex<HfpClientService>>,
    mut rx: UnboundedReceiver<BthfClientCallbacks>,
) {
    while let Some(cb) = rx.recv().await {
        match service.lock() {
            Ok(mut service) => service.handle_callback(cb),
            Err(_) => {
                error!("HF client service lock poisoned");
                break;
            }
        }
    }
    info!("Exiting HF client callback loop");
}

/// Per device registry of HF client state machines.
pub struct HfpClientService {
    config: HfpClientConfig,
    collaborators: Collaborators,
    /// One entry per device seen since startup. Entries outlive disconnection so
    /// callbacks already queued for a machine never race a second one for the
    /// same device. An idle machine costs a parked task; [`HfpClientService::cleanup`]
    /// releases them all.
    devices: HashMap<RawAddress, HfpClientProxy>,
    audio_route_allowed: bool,
}

impl HfpClientService {
    pub fn new(
        config: HfpClientConfig,
        native: Arc<dyn NativeInterface>,
        sink: Arc<dyn NotificationSink>,
        audio: Arc<dyn AudioManager>,
        policy: Arc<dyn ConnectionPolicyStore>,
    ) -> HfpClientService {
        let vendor = Arc::new(VendorCommandResponseProcessor::new(native.clone()));
        HfpClientService {
            config,
            collaborators: Collaborators { native, sink, audio, policy, vendor },
            devices: HashMap::new(),
            audio_route_allowed: true,
        }
    }

    /// Returns the proxy for `device`, starting its state machine if needed.
    /// Must be called within a tokio runtime.
    fn get_or_start(&mut self, device: RawAddress) -> HfpClientProxy {
        if let Some(proxy) = self.devices.get(&device) {
            return proxy.clone();
        }

        debug!("[{}] Starting HF client state machine", device);
        let state_machine =
            HfpClientStateMachine::new(device, self.config.clone(), self.collaborators.clone());
        let context = HfpClientContext::new(state_machine);
        let proxy = context.get_proxy().with_vendor(self.collaborators.vendor.clone());
        if !self.audio_route_allowed {
            proxy.set_audio_route_allowed(false);
        }
        tokio::spawn(mainloop(context));
        self.devices.insert(device, proxy.clone());
        proxy
    }

    /// Starts an outgoing connection. Refused for devices whose policy forbids it.
    pub fn connect(&mut self, device: RawAddress) -> bool {
        if self.collaborators.policy.connection_policy(device) == ConnectionPolicy::Forbidden {
            warn!("[{}] Connection forbidden by policy", device);
            return false;
        }
        self.get_or_start(device).connect()
    }

    pub fn disconnect(&mut self, device: RawAddress) -> bool {
        match self.devices.get(&device) {
            Some(proxy) => proxy.disconnect(),
            None => {
                warn!("[{}] Not connected", device);
                false
            }
        }
    }

    pub fn get_proxy(&self, device: RawAddress) -> Option<HfpClientProxy> {
        self.devices.get(&device).cloned()
    }

    /// Decodes a native callback and posts it to the owning state machine. An
    /// incoming connection for an unknown device starts a new machine.
    pub fn handle_callback(&mut self, cb: BthfClientCallbacks) {
        let event = decode(cb);
        let proxy = match self.devices.get(&event.device) {
            Some(proxy) => proxy.clone(),
            None => match event.kind {
                StackEventKind::ConnectionStateChanged {
                    state:
                        BthfClientConnectionState::Connected
                        | BthfClientConnectionState::Connecting,
                    ..
                } => self.get_or_start(event.device),
                _ => {
                    warn!("[{}] No state machine for {:?}", event.device, event.kind);
                    return;
                }
            },
        };
        proxy.post(Message::Stack(event));
    }

    pub fn get_connection_state(&self, device: RawAddress) -> HfpConnectionState {
        self.devices
            .get(&device)
            .map(HfpClientProxy::get_connection_state)
            .unwrap_or(HfpConnectionState::Disconnected)
    }

    pub fn get_audio_state(&self, device: RawAddress) -> HfpAudioState {
        self.devices
            .get(&device)
            .map(HfpClientProxy::get_audio_state)
            .unwrap_or(HfpAudioState::Disconnected)
    }

    pub fn get_connected_devices(&self) -> Vec<RawAddress> {
        self.devices
            .values()
            .filter(|proxy| proxy.get_connection_state() == HfpConnectionState::Connected)
            .map(HfpClientProxy::device)
            .collect()
    }

    pub fn set_audio_route_allowed(&mut self, allowed: bool) {
        self.audio_route_allowed = allowed;
        for proxy in self.devices.values() {
            proxy.set_audio_route_allowed(allowed);
        }
    }

    pub fn get_audio_route_allowed(&self) -> bool {
        self.audio_route_allowed
    }

    /// Drops every proxy, letting each mainloop exit.
    pub fn cleanup(&mut self) {
        info!("Stopping {} HF client state machines", self.devices.len());
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::mock_callbacks::{
        MockAudioManager, MockConnectionPolicyStore, MockNotificationSink,
    };
    use crate::mocks::mock_native::{MockNativeEvents, MockNativeInterface};
    use crate::utils::task::block_on_locally;

    use std::time::Duration;

    const ADDR: RawAddress = RawAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);

    fn service(
    ) -> (HfpClientService, UnboundedReceiver<MockNativeEvents>, Arc<MockConnectionPolicyStore>) {
        let (native, native_rx) = MockNativeInterface::new();
        let (sink, _sink_rx) = MockNotificationSink::new();
        let (audio, _audio_rx) = MockAudioManager::new();
        let policy = Arc::new(MockConnectionPolicyStore::new());
        let service = HfpClientService::new(
            HfpClientConfig::default(),
            Arc::new(native),
            Arc::new(sink),
            Arc::new(audio),
            policy.clone(),
        );
        (service, native_rx, policy)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_connect_and_timeout() {
        block_on_locally(async {
            let (mut service, mut native_rx, _policy) = service();
            assert!(service.connect(ADDR));
            settle().await;

            assert_eq!(native_rx.recv().await, Some(MockNativeEvents::Connect(ADDR)));
            assert_eq!(service.get_connection_state(ADDR), HfpConnectionState::Connecting);

            tokio::time::sleep(Duration::from_secs(11)).await;
            assert_eq!(native_rx.recv().await, Some(MockNativeEvents::Disconnect(ADDR)));
            assert_eq!(service.get_connection_state(ADDR), HfpConnectionState::Disconnected);
        });
    }

    #[test]
    fn test_connect_forbidden() {
        block_on_locally(async {
            let (mut service, mut native_rx, policy) = service();
            policy.set_policy(ADDR, ConnectionPolicy::Forbidden);
            assert!(!service.connect(ADDR));
            settle().await;
            assert!(native_rx.try_recv().is_err());
            assert!(service.get_proxy(ADDR).is_none());
        });
    }

    #[test]
    fn test_inbound_connection_starts_machine() {
        block_on_locally(async {
            let (mut service, mut native_rx, _policy) = service();
            service.handle_callback(BthfClientCallbacks::ConnectionState(ADDR, 2, 0, 0));
            service.handle_callback(BthfClientCallbacks::ConnectionState(ADDR, 3, 0x40, 0));
            settle().await;

            assert_eq!(service.get_connection_state(ADDR), HfpConnectionState::Connected);
            assert_eq!(service.get_connected_devices(), vec![ADDR]);
            assert!(matches!(
                native_rx.recv().await,
                Some(MockNativeEvents::SendAndroidAt(ADDR, _))
            ));
        });
    }

    #[test]
    fn test_callback_for_unknown_device_dropped() {
        block_on_locally(async {
            let (mut service, _native_rx, _policy) = service();
            service.handle_callback(BthfClientCallbacks::BatteryLevel(ADDR, 3));
            assert!(service.get_proxy(ADDR).is_none());
        });
    }

    #[test]
    fn test_vendor_command_rejected_synchronously() {
        block_on_locally(async {
            let (mut service, _native_rx, _policy) = service();
            service.connect(ADDR);
            let proxy = service.get_proxy(ADDR).unwrap();
            assert_eq!(
                proxy.send_vendor_at_command(0x004C, "+XAPL=1;+XAPL=2"),
                Err(VendorCommandError::MultipleCommands)
            );
            assert!(proxy.send_vendor_at_command(0x004C, "+XAPL=1").is_ok());
        });
    }

    #[test]
    fn test_audio_route_allowed_applies_to_new_machines() {
        block_on_locally(async {
            let (mut service, _native_rx, _policy) = service();
            service.set_audio_route_allowed(false);
            service.connect(ADDR);
            settle().await;
            assert!(!service.get_audio_route_allowed());
            assert!(!service.get_proxy(ADDR).unwrap().snapshot().audio_route_allowed);
        });
    }

    #[test]
    fn test_reconnect_reuses_machine() {
        block_on_locally(async {
            let (mut service, _native_rx, _policy) = service();
            service.handle_callback(BthfClientCallbacks::ConnectionState(ADDR, 2, 0, 0));
            settle().await;
            let first = service.get_proxy(ADDR).unwrap();

            service.handle_callback(BthfClientCallbacks::ConnectionState(ADDR, 0, 0, 0));
            settle().await;
            assert_eq!(service.get_connection_state(ADDR), HfpConnectionState::Disconnected);

            service.handle_callback(BthfClientCallbacks::ConnectionState(ADDR, 2, 0, 0));
            settle().await;
            let second = service.get_proxy(ADDR).unwrap();
            assert!(Arc::ptr_eq(&first.state, &second.state));
            assert_eq!(service.get_connection_state(ADDR), HfpConnectionState::Connecting);
        });
    }

    #[test]
    fn test_cleanup_forgets_machines() {
        block_on_locally(async {
            let (mut service, _native_rx, _policy) = service();
            service.connect(ADDR);
            settle().await;
            assert_eq!(service.get_connection_state(ADDR), HfpConnectionState::Connecting);

            service.cleanup();
            assert!(service.get_proxy(ADDR).is_none());
            assert_eq!(service.get_connection_state(ADDR), HfpConnectionState::Disconnected);
            assert!(!service.disconnect(ADDR));
        });
    }
}
