// Helper methods for splitting HFP AT text into its parts. The full AT grammar is handled by the
// native layer; what reaches this crate is vendor and extension traffic that needs to be matched
// against known command words.

/// Bluetooth SIG company identifiers of the vendors with known AT extensions.
pub const VENDOR_ID_APPLE: u16 = 0x004C;
pub const VENDOR_ID_PLANTRONICS: u16 = 0x0055;

/// The AT command type indicated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AtCommandType {
    Set,
    Query,
    Test,
    Execute,
}

// Delimiters for AT commands. Execute has no delimiter.
const AT_COMMAND_DELIMITER_SET: &str = "=";
const AT_COMMAND_DELIMITER_QUERY: &str = "?";
const AT_COMMAND_DELIMITER_TEST: &str = "=?";

// Delimiters for AG responses and unsolicited results.
const AT_RESPONSE_DELIMITER_SET: char = '=';
const AT_RESPONSE_DELIMITER_READ: char = ':';

// Vendor-specific commands. XAPL/IPHONEACCEV/APLSIRI/APLEFM are Apple's,
// XEVENT is Plantronics/Poly.
const AT_COMMAND_VENDOR_XAPL: &str = "XAPL";
const AT_COMMAND_VENDOR_IPHONEACCEV: &str = "IPHONEACCEV";
const AT_COMMAND_VENDOR_APLSIRI: &str = "APLSIRI";
const AT_COMMAND_VENDOR_APLEFM: &str = "APLEFM";
const AT_COMMAND_VENDOR_XEVENT: &str = "XEVENT";

const AT_COMMAND_ARG_DELIMITER: &str = ",";

/// Details of an AtCommand broken into parts.
#[derive(Clone, Debug, PartialEq)]
pub struct AtCommand {
    // The original, unparsed, AT command
    pub raw: String,
    // The nature of the command according to AT command specifications
    pub at_type: AtCommandType,
    // The actual command being sent (AT+<command>=?)
    pub command: String,
    // Unparsed arguments from the raw command string, in order
    pub raw_args: Option<Vec<String>>,
    // Company id for vendor-specific AT commands
    pub vendor: Option<u16>,
}

impl AtCommand {
    /// The command with its leading `+` and type delimiter, e.g. `+XAPL=`.
    /// Test commands share the set delimiter.
    pub fn command_word(&self) -> String {
        let delimiter = match self.at_type {
            AtCommandType::Set | AtCommandType::Test => AT_COMMAND_DELIMITER_SET,
            AtCommandType::Query => AT_COMMAND_DELIMITER_QUERY,
            AtCommandType::Execute => "",
        };
        format!("+{}{}", self.command, delimiter)
    }
}

/// An AG response or unsolicited result, `+<code>:<args>` or `+<code>=<args>`.
#[derive(Clone, Debug, PartialEq)]
pub struct AtResponse {
    pub raw: String,
    pub code: String,
    pub delimiter: char,
    pub raw_args: Option<Vec<String>>,
}

impl AtResponse {
    /// The response code with its leading `+` and delimiter, e.g. `+APLSIRI:`.
    pub fn event_code(&self) -> String {
        format!("+{}{}", self.code, self.delimiter)
    }
}

fn vendor_of(command: &str) -> Option<u16> {
    match command {
        AT_COMMAND_VENDOR_XAPL
        | AT_COMMAND_VENDOR_IPHONEACCEV
        | AT_COMMAND_VENDOR_APLSIRI
        | AT_COMMAND_VENDOR_APLEFM => Some(VENDOR_ID_APPLE),
        AT_COMMAND_VENDOR_XEVENT => Some(VENDOR_ID_PLANTRONICS),
        _ => None,
    }
}

fn split_args(arg_string: &str) -> Option<Vec<String>> {
    if arg_string.trim().is_empty() {
        return None;
    }
    Some(
        arg_string
            .split(AT_COMMAND_ARG_DELIMITER)
            .map(|arg| arg.trim().to_string())
            .collect::<Vec<String>>(),
    )
}

/// Splits an HF command into its type, command and arguments.
pub fn parse_at_command(at_string: &str) -> Result<AtCommand, String> {
    // All AT commands should be of the form AT+<command> but may be passed around as +<command> or
    // <command>. We remove those here for convenience.
    let clean_at_string = at_string.trim();
    let clean_at_string = clean_at_string.strip_prefix("AT").unwrap_or(clean_at_string);
    let clean_at_string = clean_at_string.strip_prefix('+').unwrap_or(clean_at_string);
    if clean_at_string.is_empty() {
        return Err("Cannot parse empty AT command".to_string());
    }
    let at_type = parse_at_command_type(clean_at_string);
    let (command, arg_string) = match at_type {
        AtCommandType::Execute => (clean_at_string, None),
        AtCommandType::Test => {
            (clean_at_string.split(AT_COMMAND_DELIMITER_TEST).next().unwrap_or_default(), None)
        }
        AtCommandType::Query => {
            (clean_at_string.split(AT_COMMAND_DELIMITER_QUERY).next().unwrap_or_default(), None)
        }
        AtCommandType::Set => {
            let mut parts = clean_at_string.splitn(2, AT_COMMAND_DELIMITER_SET);
            (parts.next().unwrap_or_default(), parts.next())
        }
    };
    let command = command.trim();
    if command.is_empty() {
        return Err("No command supplied".to_string());
    }
    Ok(AtCommand {
        raw: at_string.to_string(),
        at_type,
        command: command.to_string(),
        raw_args: arg_string.and_then(split_args),
        vendor: vendor_of(command),
    })
}

/// Splits an AG result line into its code and arguments. `=` takes priority
/// over `:` as the delimiter.
pub fn parse_at_response(text: &str) -> Result<AtResponse, String> {
    let index = [AT_RESPONSE_DELIMITER_SET, AT_RESPONSE_DELIMITER_READ]
        .iter()
        .find_map(|delimiter| text.find(*delimiter).filter(|i| *i > 0))
        .ok_or(format!("No delimiter found in {}", text))?;

    let code: String = text[..index].chars().filter(|c| !c.is_whitespace()).collect();
    let code = code.strip_prefix('+').unwrap_or(&code).to_string();
    if code.is_empty() {
        return Err(format!("No result code found in {}", text));
    }
    Ok(AtResponse {
        raw: text.to_string(),
        code,
        delimiter: text[index..].chars().next().unwrap_or(AT_RESPONSE_DELIMITER_SET),
        raw_args: split_args(&text[index + 1..]),
    })
}

fn parse_at_command_type(command: &str) -> AtCommandType {
    if command.contains(AT_COMMAND_DELIMITER_TEST) {
        return AtCommandType::Test;
    }
    if command.contains(AT_COMMAND_DELIMITER_QUERY) {
        return AtCommandType::Query;
    }
    if command.contains(AT_COMMAND_DELIMITER_SET) {
        return AtCommandType::Set;
    }
    AtCommandType::Execute
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_fails() {
        assert!(parse_at_command("").is_err());
        assert!(parse_at_command("+").is_err());
        assert!(parse_at_command("AT+").is_err());
        assert!(parse_at_command("+=1").is_err());
    }

    #[test]
    fn test_at_string_copied() {
        let at_command = parse_at_command("+CMD").unwrap();
        assert_eq!(at_command.raw, "+CMD");
    }

    #[test]
    fn test_parse_command_type() {
        let at_command = parse_at_command("CMD=").unwrap();
        assert_eq!(at_command.at_type, AtCommandType::Set);

        let at_command = parse_at_command("CMD?").unwrap();
        assert_eq!(at_command.at_type, AtCommandType::Query);

        let at_command = parse_at_command("CMD=?").unwrap();
        assert_eq!(at_command.at_type, AtCommandType::Test);

        let at_command = parse_at_command("CMD").unwrap();
        assert_eq!(at_command.at_type, AtCommandType::Execute);
    }

    #[test]
    fn test_parse_command() {
        let at_command = parse_at_command("AT+CMD").unwrap();
        assert_eq!(at_command.command, "CMD");

        let at_command = parse_at_command("+CMD=a,b,c").unwrap();
        assert_eq!(at_command.command, "CMD");
        assert_eq!(
            at_command.raw_args,
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );

        let at_command = parse_at_command("AT+CMD=").unwrap();
        assert_eq!(at_command.raw_args, None);
    }

    #[test]
    fn test_command_word() {
        assert_eq!(parse_at_command("+XAPL=ABCD-1234-0100,100").unwrap().command_word(), "+XAPL=");
        assert_eq!(parse_at_command("+APLSIRI?").unwrap().command_word(), "+APLSIRI?");
        assert_eq!(parse_at_command("+XAPL=?").unwrap().command_word(), "+XAPL=");
        assert_eq!(parse_at_command("+APLEFM").unwrap().command_word(), "+APLEFM");
        assert_eq!(parse_at_command(" +XAPL =1").unwrap().command_word(), "+XAPL=");
    }

    #[test]
    fn test_parse_vendor() {
        assert_eq!(parse_at_command("AT+CMD").unwrap().vendor, None);
        assert_eq!(parse_at_command("AT+XAPL=1").unwrap().vendor, Some(VENDOR_ID_APPLE));
        assert_eq!(parse_at_command("+IPHONEACCEV=1,1,2").unwrap().vendor, Some(VENDOR_ID_APPLE));
        assert_eq!(parse_at_command("+APLSIRI?").unwrap().vendor, Some(VENDOR_ID_APPLE));
        assert_eq!(parse_at_command("+XEVENT=DON").unwrap().vendor, Some(VENDOR_ID_PLANTRONICS));
    }

    #[test]
    fn test_parse_response() {
        let response = parse_at_response("+ANDROID: 1").unwrap();
        assert_eq!(response.code, "ANDROID");
        assert_eq!(response.delimiter, ':');
        assert_eq!(response.raw_args, Some(vec!["1".to_string()]));
        assert_eq!(response.event_code(), "+ANDROID:");

        let response = parse_at_response("+XAPL=iPhone,6").unwrap();
        assert_eq!(response.event_code(), "+XAPL=");
        assert_eq!(response.raw_args, Some(vec!["iPhone".to_string(), "6".to_string()]));
    }

    #[test]
    fn test_parse_response_prefers_equals() {
        let response = parse_at_response("+FOO:BAR=1").unwrap();
        assert_eq!(response.event_code(), "+FOO:BAR=");
    }

    #[test]
    fn test_parse_response_invalid() {
        assert!(parse_at_response("+NODELIMITER").is_err());
        assert!(parse_at_response(": 1").is_err());
        assert!(parse_at_response("+: 1").is_err());
    }
}
