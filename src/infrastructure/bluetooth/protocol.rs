//! Lovense wire protocol.
//!
//! Commands are ASCII strings terminated by a single `;`; responses are ASCII
//! terminated by one or more `;`. This module holds the command keywords, the
//! framing/parsing helpers and the vendor rule for locating the TX/RX
//! characteristics among the advertised GATT services.

use crate::infrastructure::transport::ServiceInfo;

pub const BATTERY_COMMAND: &str = "Battery";
pub const DEVICE_TYPE_COMMAND: &str = "DeviceType";
/// Response is an integer status code; 2 means normal operation.
pub const STATUS_COMMAND: &str = "Status:1";
pub const STATUS_NORMAL: i32 = 2;
/// Response is the production batch, a YYMMDD-ish string.
pub const BATCH_COMMAND: &str = "GetBatch";
pub const POWER_OFF_COMMAND: &str = "PowerOff";
pub const ROTATE_CHANGE_COMMAND: &str = "RotateChange";

/// Acknowledgement sent for accepted commands.
pub const ACK_RESPONSE: &str = "OK";

/// Unsolicited notification sent when the physical power button is pressed.
/// Compared case-insensitively after trimming.
pub const POWER_OFF_NOTIFICATION: &str = "POWEROFF";

pub const TERMINATOR: char = ';';

/// Lovense toys advertise with this name prefix.
pub const NAME_PREFIX: &str = "LVS-";

/// Vendor service UUIDs start with "4", end with this suffix and carry a
/// "0001" marker; the TX/RX characteristic UUIDs substitute the marker.
pub const SERVICE_UUID_SUFFIX: &str = "-4bd4-bbd5-a6920e4c5653";
const SERVICE_UUID_MARKER: &str = "0001";

/// Which of the two protocol characteristics to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicRole {
    /// Write characteristic, commands go out here.
    Tx,
    /// Notify characteristic, responses come back here.
    Rx,
}

impl CharacteristicRole {
    fn marker(self) -> &'static str {
        match self {
            Self::Tx => "0002",
            Self::Rx => "0003",
        }
    }
}

/// Frame a command for transmission, appending exactly one terminator if the
/// caller's string does not already end with one.
pub fn frame_command(command: &str) -> Vec<u8> {
    if command.ends_with(TERMINATOR) {
        command.as_bytes().to_vec()
    } else {
        format!("{command}{TERMINATOR}").into_bytes()
    }
}

/// Strip all trailing terminators; the hardware sometimes sends several.
pub fn strip_terminators(message: &str) -> &str {
    message.trim_end_matches(TERMINATOR)
}

/// Parse a battery response. Recently reconnected toys prefix the value with
/// a stray character ("s72"); one leading non-digit is tolerated and removed.
pub fn parse_battery(response: &str) -> Option<u8> {
    let digits = response
        .strip_prefix(|c: char| !c.is_ascii_digit())
        .unwrap_or(response);
    digits.parse().ok()
}

pub fn parse_status(response: &str) -> Option<i32> {
    response.parse().ok()
}

/// Find the TX or RX characteristic UUID by the vendor substitution rule and
/// confirm the resolved characteristic actually exists in that service.
pub fn resolve_characteristic(
    services: &[ServiceInfo],
    role: CharacteristicRole,
) -> Option<String> {
    for service in services {
        let uuid = service.uuid.to_lowercase();
        if uuid.starts_with('4')
            && uuid.ends_with(SERVICE_UUID_SUFFIX)
            && uuid.contains(SERVICE_UUID_MARKER)
        {
            let target = uuid
                .replace(SERVICE_UUID_MARKER, role.marker())
                .to_uppercase();
            if service
                .characteristics
                .iter()
                .any(|characteristic| characteristic.to_uppercase() == target)
            {
                return Some(target);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lovense_service() -> ServiceInfo {
        ServiceInfo {
            uuid: "42300001-0023-4bd4-bbd5-a6920e4c5653".into(),
            characteristics: vec![
                "42300002-0023-4bd4-bbd5-a6920e4c5653".into(),
                "42300003-0023-4bd4-bbd5-a6920e4c5653".into(),
            ],
        }
    }

    #[test]
    fn framing_appends_exactly_one_terminator() {
        assert_eq!(frame_command("Vibrate:10"), b"Vibrate:10;");
        assert_eq!(frame_command("Vibrate:10;"), b"Vibrate:10;");
    }

    #[test]
    fn stripping_removes_all_trailing_terminators() {
        assert_eq!(strip_terminators("OK;"), "OK");
        assert_eq!(strip_terminators("OK;;;"), "OK");
        assert_eq!(strip_terminators("A:1;B:2"), "A:1;B:2");
    }

    #[test]
    fn battery_parsing_tolerates_the_reconnect_quirk() {
        assert_eq!(parse_battery("72"), Some(72));
        assert_eq!(parse_battery("s72"), Some(72));
        assert_eq!(parse_battery("s"), None);
        assert_eq!(parse_battery(""), None);
        assert_eq!(parse_battery("low"), None);
    }

    #[test]
    fn characteristic_resolution_substitutes_the_marker() {
        let services = vec![
            ServiceInfo {
                uuid: "00001800-0000-1000-8000-00805f9b34fb".into(),
                characteristics: vec!["00002a00-0000-1000-8000-00805f9b34fb".into()],
            },
            lovense_service(),
        ];
        assert_eq!(
            resolve_characteristic(&services, CharacteristicRole::Tx).as_deref(),
            Some("42300002-0023-4BD4-BBD5-A6920E4C5653")
        );
        assert_eq!(
            resolve_characteristic(&services, CharacteristicRole::Rx).as_deref(),
            Some("42300003-0023-4BD4-BBD5-A6920E4C5653")
        );
    }

    #[test]
    fn resolution_requires_the_characteristic_to_exist() {
        let mut service = lovense_service();
        service.characteristics.retain(|c| !c.contains("0003"));
        assert_eq!(
            resolve_characteristic(&[service], CharacteristicRole::Rx),
            None
        );
    }

    #[test]
    fn resolution_ignores_foreign_services() {
        let services = vec![ServiceInfo {
            uuid: "12300001-0023-4bd4-bbd5-ffffffffffff".into(),
            characteristics: vec!["12300002-0023-4bd4-bbd5-ffffffffffff".into()],
        }];
        assert_eq!(
            resolve_characteristic(&services, CharacteristicRole::Tx),
            None
        );
    }
}
