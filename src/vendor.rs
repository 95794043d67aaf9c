//! Validation of vendor-specific AT commands and recognition of the vendor
//! results the AG sends back.

use crate::address::RawAddress;
use crate::at_command_parser::{
    parse_at_command, parse_at_response, VENDOR_ID_APPLE, VENDOR_ID_PLANTRONICS,
};
use crate::native::{AtCommandId, NativeInterface};

use log::{debug, error, warn};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

// Command words the HF may send, keyed to the vendor owning them.
const SUPPORTED_VENDOR_COMMANDS: &[(&str, u16)] = &[
    ("+XAPL=", VENDOR_ID_APPLE),
    ("+IPHONEACCEV=", VENDOR_ID_APPLE),
    ("+APLSIRI?", VENDOR_ID_APPLE),
    ("+APLEFM", VENDOR_ID_APPLE),
    ("+XEVENT=", VENDOR_ID_PLANTRONICS),
];

// Result codes the AG may send, keyed to the vendor owning them.
const SUPPORTED_VENDOR_EVENTS: &[(&str, u16)] =
    &[("+XAPL=", VENDOR_ID_APPLE), ("+APLSIRI:", VENDOR_ID_APPLE)];

const AT_COMMAND_SEPARATOR: char = ';';

#[derive(Debug, PartialEq)]
pub enum VendorCommandError {
    NoDevice,
    /// Back to back commands are not allowed on the vendor channel.
    MultipleCommands,
    /// The command word is not registered for the requested vendor.
    UnsupportedCommand(String),
    SendFailed,
}

impl Display for VendorCommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VendorCommandError::NoDevice => write!(f, "no device"),
            VendorCommandError::MultipleCommands => write!(f, "multiple commands in one request"),
            VendorCommandError::UnsupportedCommand(word) => {
                write!(f, "unsupported vendor command {}", word)
            }
            VendorCommandError::SendFailed => write!(f, "native send failed"),
        }
    }
}

impl std::error::Error for VendorCommandError {}

/// A recognized vendor result from the AG.
#[derive(Clone, Debug, PartialEq)]
pub struct VendorEvent {
    pub vendor_id: u16,
    pub event_code: String,
    /// The full result text.
    pub args: String,
}

pub struct VendorCommandResponseProcessor {
    native: Arc<dyn NativeInterface>,
    commands: HashMap<&'static str, u16>,
    events: HashMap<&'static str, u16>,
}

impl VendorCommandResponseProcessor {
    pub fn new(native: Arc<dyn NativeInterface>) -> Self {
        VendorCommandResponseProcessor {
            native,
            commands: SUPPORTED_VENDOR_COMMANDS.iter().copied().collect(),
            events: SUPPORTED_VENDOR_EVENTS.iter().copied().collect(),
        }
    }

    /// Checks that `at_command` is a single command registered for `vendor_id`.
    /// Returns its command word.
    pub fn validate_command(
        &self,
        vendor_id: u16,
        at_command: &str,
        device: Option<RawAddress>,
    ) -> Result<String, VendorCommandError> {
        let device = device.ok_or(VendorCommandError::NoDevice)?;

        if at_command.contains(AT_COMMAND_SEPARATOR) {
            error!("[{}] Vendor command with multiple commands rejected: {}", device, at_command);
            return Err(VendorCommandError::MultipleCommands);
        }

        if !at_command.trim_start().starts_with('+') {
            warn!("[{}] Vendor command without prefix rejected: {}", device, at_command);
            return Err(VendorCommandError::UnsupportedCommand(at_command.to_string()));
        }

        let word = parse_at_command(at_command)
            .map(|command| command.command_word())
            .map_err(|_| VendorCommandError::UnsupportedCommand(at_command.to_string()))?;

        match self.commands.get(word.as_str()) {
            Some(owner) if *owner == vendor_id => Ok(word),
            _ => {
                warn!("[{}] Unsupported command {} for vendor {:#06x}", device, word, vendor_id);
                Err(VendorCommandError::UnsupportedCommand(word))
            }
        }
    }

    /// Validates `at_command` for `vendor_id` and hands it to the native layer.
    pub fn send_command(
        &self,
        vendor_id: u16,
        at_command: &str,
        device: Option<RawAddress>,
    ) -> Result<(), VendorCommandError> {
        let word = self.validate_command(vendor_id, at_command, device)?;
        let device = device.ok_or(VendorCommandError::NoDevice)?;

        let status = self.native.send_at_cmd(device, AtCommandId::VendorSpecific, 0, 0, at_command);
        if !status.is_success() {
            error!("[{}] Failed to send vendor command {}", device, word);
            return Err(VendorCommandError::SendFailed);
        }

        debug!("[{}] Sent vendor command {}", device, word);
        Ok(())
    }

    /// Recognizes a vendor result in an unsolicited AG line.
    pub fn process_event(&self, text: &str, device: Option<RawAddress>) -> Option<VendorEvent> {
        let device = device?;
        let event_code = parse_at_response(text).ok()?.event_code();
        let vendor_id = match self.events.get(event_code.as_str()) {
            Some(vendor_id) => *vendor_id,
            None => {
                debug!("[{}] Not a vendor event: {}", device, text);
                return None;
            }
        };

        Some(VendorEvent { vendor_id, event_code, args: text.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::mock_native::{MockNativeEvents, MockNativeInterface};
    use tokio::sync::mpsc::UnboundedReceiver;

    const ADDR: RawAddress = RawAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    fn processor() -> (
        VendorCommandResponseProcessor,
        Arc<MockNativeInterface>,
        UnboundedReceiver<MockNativeEvents>,
    ) {
        let (native, rx) = MockNativeInterface::new();
        let native = Arc::new(native);
        (VendorCommandResponseProcessor::new(native.clone()), native, rx)
    }

    #[test]
    fn test_semicolon_rejected() {
        let (processor, _native, mut rx) = processor();
        assert_eq!(
            processor.send_command(
                VENDOR_ID_APPLE,
                "+XAPL=ABCD-1234-0100,100; +XAPL=ab",
                Some(ADDR)
            ),
            Err(VendorCommandError::MultipleCommands)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_device_rejected() {
        let (processor, _native, mut rx) = processor();
        assert_eq!(
            processor.send_command(VENDOR_ID_APPLE, "+XAPL=ABCD-1234-0100,100", None),
            Err(VendorCommandError::NoDevice)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_supported_command_sent() {
        let (processor, _native, mut rx) = processor();
        assert_eq!(
            processor.send_command(VENDOR_ID_APPLE, "+XAPL=ABCD-1234-0100,100", Some(ADDR)),
            Ok(())
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            MockNativeEvents::SendAtCmd(
                ADDR,
                AtCommandId::VendorSpecific,
                0,
                0,
                "+XAPL=ABCD-1234-0100,100".to_string()
            )
        );

        assert_eq!(processor.send_command(VENDOR_ID_APPLE, "+APLSIRI?", Some(ADDR)), Ok(()));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_wrong_vendor_rejected() {
        let (processor, _native, mut rx) = processor();
        assert_eq!(
            processor.send_command(VENDOR_ID_PLANTRONICS, "+XAPL=1", Some(ADDR)),
            Err(VendorCommandError::UnsupportedCommand("+XAPL=".to_string()))
        );
        assert!(processor.send_command(VENDOR_ID_APPLE, "+XEVENT=DON", Some(ADDR)).is_err());
        assert!(processor.send_command(VENDOR_ID_APPLE, "+FOO=1", Some(ADDR)).is_err());
        assert!(processor.send_command(VENDOR_ID_APPLE, "XAPL=1", Some(ADDR)).is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_failure_reported() {
        let (processor, native, _rx) = processor();
        native.set_fail(true);
        assert_eq!(
            processor.send_command(VENDOR_ID_PLANTRONICS, "+XEVENT=DON", Some(ADDR)),
            Err(VendorCommandError::SendFailed)
        );
    }

    #[test]
    fn test_process_event() {
        let (processor, _native, _rx) = processor();
        assert_eq!(
            processor.process_event("+XAPL=iPhone,6", Some(ADDR)),
            Some(VendorEvent {
                vendor_id: VENDOR_ID_APPLE,
                event_code: "+XAPL=".to_string(),
                args: "+XAPL=iPhone,6".to_string(),
            })
        );
        assert_eq!(
            processor.process_event("+APLSIRI: 1", Some(ADDR)).map(|e| e.event_code),
            Some("+APLSIRI:".to_string())
        );
    }

    #[test]
    fn test_process_event_unknown() {
        let (processor, _native, _rx) = processor();
        assert_eq!(processor.process_event("+XAPL=iPhone,6", None), None);
        assert_eq!(processor.process_event("+ANDROID: 1", Some(ADDR)), None);
        assert_eq!(processor.process_event("garbage", Some(ADDR)), None);
    }
}
