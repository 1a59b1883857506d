//! OttoPi Protocol
//!
//! Wire identifiers and payload codecs for talking to the OttoPi robot.
//!
//! Commands travel as UTF-8 text, base64-encoded for the transport.
//! Responses come back base64-encoded and carry a JSON envelope.

use crate::domain::models::ResponseEnvelope;
use crate::domain::settings::Settings;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

/// OttoPi BLE Service UUID
pub const SERVICE_UUID: &str = "4e769f72-391f-4cd3-bbea-25a2e945066b";

/// Command Characteristic UUID - where commands are written
pub const COMMAND_CHAR_UUID: &str = "70e45870-79ec-44c6-859d-0897aa7134b6";

/// Response Characteristic UUID - read or notified after each command
pub const RESPONSE_CHAR_UUID: &str = "79394316-6874-4506-9c20-1245751c6c20";

/// Distance Characteristic UUID - unsolicited telemetry notifications
pub const DISTANCE_CHAR_UUID: &str = "49000250-d968-48bb-80b3-fdd99dfe75a6";

/// Service and characteristic identifiers used by one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattProfile {
    pub service: Uuid,
    pub command: Uuid,
    pub response: Uuid,
    pub telemetry: Option<Uuid>,
}

impl GattProfile {
    /// Robot firmware with a dedicated distance characteristic
    pub fn ottopi() -> Self {
        Self {
            service: Uuid::from_u128(0x4e769f72_391f_4cd3_bbea_25a2e945066b),
            command: Uuid::from_u128(0x70e45870_79ec_44c6_859d_0897aa7134b6),
            response: Uuid::from_u128(0x79394316_6874_4506_9c20_1245751c6c20),
            telemetry: Some(Uuid::from_u128(0x49000250_d968_48bb_80b3_fdd99dfe75a6)),
        }
    }

    /// Older firmware: command and response characteristics only
    pub fn command_response_only() -> Self {
        Self {
            telemetry: None,
            ..Self::ottopi()
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, uuid::Error> {
        Ok(Self {
            service: parse_uuid(&settings.ble_service_uuid)?,
            command: parse_uuid(&settings.ble_command_char_uuid)?,
            response: parse_uuid(&settings.ble_response_char_uuid)?,
            telemetry: settings
                .ble_telemetry_char_uuid
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
        })
    }
}

impl Default for GattProfile {
    fn default() -> Self {
        Self::ottopi()
    }
}

/// Why an inbound frame could not be decoded
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid response JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode command text for the command characteristic
pub fn encode_command(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// Decode a base64 payload back to text
pub fn decode_text(payload: &str) -> Result<String, ResponseError> {
    let bytes = STANDARD.decode(payload.trim())?;
    Ok(String::from_utf8(bytes)?)
}

/// Decode a response frame.
///
/// An empty frame means "no content" and yields `Ok(None)`.
pub fn decode_response(payload: &str) -> Result<Option<ResponseEnvelope>, ResponseError> {
    let text = decode_text(payload)?;
    trace!("resp='{}'", text);

    if text.trim().is_empty() {
        return Ok(None);
    }

    Ok(Some(serde_json::from_str(&text)?))
}

/// Parse a UUID string (hyphenated or simple form)
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(uuid_str.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_matches_string_constants() {
        let profile = GattProfile::ottopi();
        assert_eq!(profile.service, parse_uuid(SERVICE_UUID).unwrap());
        assert_eq!(profile.command, parse_uuid(COMMAND_CHAR_UUID).unwrap());
        assert_eq!(profile.response, parse_uuid(RESPONSE_CHAR_UUID).unwrap());
        assert_eq!(profile.telemetry, Some(parse_uuid(DISTANCE_CHAR_UUID).unwrap()));
        assert_eq!(GattProfile::command_response_only().telemetry, None);
    }

    #[test]
    fn test_profile_from_default_settings() {
        let profile = GattProfile::from_settings(&Settings::default()).unwrap();
        assert_eq!(profile, GattProfile::ottopi());

        let mut settings = Settings::default();
        settings.ble_command_char_uuid = "not-a-uuid".to_string();
        assert!(GattProfile::from_settings(&settings).is_err());
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(encode_command(":.forward 1"), "Oi5mb3J3YXJkIDE=");
        for text in [":.forward 3", ":auto_off", "", "前進 2"] {
            assert_eq!(decode_text(&encode_command(text)).unwrap(), text);
        }
    }

    #[test]
    fn test_decode_response() {
        let frame = encode_command(r#"{"CMD":"forward","MSG":{"d":123}}"#);
        let env = decode_response(&frame).unwrap().unwrap();
        assert_eq!(env.distance(), Some(123.0));

        assert!(decode_response("").unwrap().is_none());
        assert!(decode_response(&encode_command("  ")).unwrap().is_none());
    }

    #[test]
    fn test_decode_response_errors() {
        assert!(matches!(
            decode_response("%%%"),
            Err(ResponseError::Base64(_))
        ));
        assert!(matches!(
            decode_response(&STANDARD.encode([0xff, 0xfe])),
            Err(ResponseError::Utf8(_))
        ));
        assert!(matches!(
            decode_response(&encode_command("{not json")),
            Err(ResponseError::Json(_))
        ));
    }
}
