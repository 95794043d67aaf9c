//! The +ANDROID AT extension: capability probe and sink audio policy.

use crate::at_command_parser::parse_at_response;

/// Sent once the service level connection is up to learn whether the AG
/// understands the extension.
pub const ANDROID_AT_PROBE: &str = "+ANDROID=?";

const ANDROID_AT_CODE: &str = "ANDROID";
const ANDROID_AT_SUPPORTED: &str = "1";
const SINK_AUDIO_POLICY_FEATURE: &str = "SINKAUDIOPOLICY";

/// Sub-command id of the sink audio policy within +ANDROID.
const SINK_AUDIO_POLICY_ID: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum PolicyValue {
    #[default]
    Unconfigured = 0,
    Allowed = 1,
    NotAllowed = 2,
}

/// Audio routing preferences the HF asks the AG to honour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AudioPolicy {
    pub call_establish: PolicyValue,
    pub active_device_after_connection: PolicyValue,
    pub in_band_ring: PolicyValue,
}

impl AudioPolicy {
    pub fn new(
        call_establish: PolicyValue,
        active_device_after_connection: PolicyValue,
        in_band_ring: PolicyValue,
    ) -> AudioPolicy {
        AudioPolicy { call_establish, active_device_after_connection, in_band_ring }
    }

    /// `+ANDROID=1,<call establish>,<active device after connection>,<in-band ring>`
    pub fn to_at_command(&self) -> String {
        format!(
            "+{}={},{},{},{}",
            ANDROID_AT_CODE,
            SINK_AUDIO_POLICY_ID,
            self.call_establish as u32,
            self.active_device_after_connection as u32,
            self.in_band_ring as u32
        )
    }
}

/// Whether an unsolicited result acknowledges the capability probe.
pub fn is_probe_ack(text: &str) -> bool {
    let response = match parse_at_response(text) {
        Ok(response) => response,
        Err(_) => return false,
    };
    if response.code != ANDROID_AT_CODE || response.delimiter != ':' {
        return false;
    }
    match response.raw_args {
        Some(args) => args.iter().enumerate().any(|(i, arg)| {
            (i == 0 && arg == ANDROID_AT_SUPPORTED) || arg.contains(SINK_AUDIO_POLICY_FEATURE)
        }),
        None => false,
    }
}
