//! Text codec for DrinViewer protocol messages.
//!
//! Wire format (all fields separated by `:`):
//! ```text
//! UDP  DISCOVER:<deviceId>
//! UDP  DISCOVER_RESPONSE:<ISPAIRED|ISUNPAIRED>[:<hostName>]:DISCOVER_RESPONSE_END
//! TCP  PAIRME:<deviceId>\n            -> PAIRED:<OK|ERROR>\n
//! TCP  UNPAIRME:<deviceId>\n          -> UNPAIRED:<OK|ERROR>\n
//! TCP  INCOMING_DRIN\n[len:4][bincode DrinEvent:len]
//! ```
//! Lines are terminated by `\n` on TCP; datagrams carry no terminator.
//! Event payload lengths are big-endian `u32`.
//!
//! Keywords are matched as whole fields, so `DISCOVER_RESPONSE` is never
//! mistaken for a `DISCOVER` request.

use thiserror::Error;

use crate::protocol::messages::{
    DiscoveryRequest, DiscoveryResponse, DrinEvent, PairingAction, PairingRequest,
    PairingResponse, PairingStatus, RequestLine, DEVICE_IS_PAIRED, DEVICE_IS_UNPAIRED,
    DISCOVER_REQUEST, DISCOVER_RESPONSE, DISCOVER_RESPONSE_END, EVENT_LENGTH_PREFIX,
    FIELD_SEPARATOR, INCOMING_DRIN, MAX_DEVICE_ID_LEN, MAX_EVENT_PAYLOAD, PAIRED, PAIRME, STATUS_ERROR, STATUS_OK,
    UNPAIRED, UNPAIRME,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The message contained nothing but whitespace.
    #[error("empty message")]
    Empty,

    /// The bytes are not valid UTF-8 text.
    #[error("message is not valid UTF-8")]
    InvalidUtf8,

    /// The leading keyword is not one this decoder accepts.
    #[error("unexpected message keyword: {0:?}")]
    UnknownKeyword(String),

    /// A field value cannot be placed on the wire or was missing.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The declared event payload length is over [`MAX_EVENT_PAYLOAD`].
    #[error("event payload of {declared} bytes exceeds the {limit}-byte limit")]
    PayloadTooLarge { declared: usize, limit: usize },

    /// The event payload could not be (de)serialized.
    #[error("malformed event payload: {0}")]
    MalformedPayload(String),
}

// ── Framing helpers ───────────────────────────────────────────────────────────

/// Converts raw datagram or line bytes to trimmed text.
///
/// Trailing NULs are stripped as well as whitespace, since some stacks hand
/// back the whole receive buffer.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] or [`ProtocolError::Empty`].
pub fn decode_text(bytes: &[u8]) -> Result<&str, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if text.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(text)
}

/// Checks that `value` can travel as a single field.
fn validate_field(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.is_empty() {
        return Err(ProtocolError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if value.contains(FIELD_SEPARATOR) || value.contains(['\n', '\r', '\0']) {
        return Err(ProtocolError::InvalidField {
            field,
            reason: format!("must not contain '{FIELD_SEPARATOR}' or control characters"),
        });
    }
    Ok(())
}

fn validate_device_id(device_id: &str) -> Result<(), ProtocolError> {
    validate_field("device id", device_id)?;
    check_device_id_len(device_id)
}

fn check_device_id_len(device_id: &str) -> Result<(), ProtocolError> {
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(ProtocolError::InvalidField {
            field: "device id",
            reason: format!(
                "{} bytes exceeds the {MAX_DEVICE_ID_LEN}-byte limit",
                device_id.len()
            ),
        });
    }
    Ok(())
}

/// Returns the non-empty field at `index`, if present.
fn field_at<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields
        .get(index)
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Encodes `DISCOVER:<deviceId>`.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidField`] if the device id contains the
/// field separator or a control character, or is longer than
/// [`MAX_DEVICE_ID_LEN`].
pub fn encode_discovery_request(device_id: &str) -> Result<String, ProtocolError> {
    validate_device_id(device_id)?;
    Ok(format!("{DISCOVER_REQUEST}{FIELD_SEPARATOR}{device_id}"))
}

/// Parses a discovery request datagram.
///
/// A bare `DISCOVER` (no identifier) is accepted and yields `device_id: None`.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownKeyword`] for anything that is not a
/// `DISCOVER` request, including discovery responses.
pub fn parse_discovery_request(text: &str) -> Result<DiscoveryRequest, ProtocolError> {
    let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    if fields[0] != DISCOVER_REQUEST {
        return Err(ProtocolError::UnknownKeyword(fields[0].to_string()));
    }
    Ok(DiscoveryRequest {
        device_id: field_at(&fields, 1).map(str::to_string),
    })
}

/// Encodes a discovery response.  The host name field is omitted when absent.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidField`] if the host name cannot be sent as
/// a single field.
pub fn encode_discovery_response(response: &DiscoveryResponse) -> Result<String, ProtocolError> {
    let state = if response.paired {
        DEVICE_IS_PAIRED
    } else {
        DEVICE_IS_UNPAIRED
    };
    let mut out = format!("{DISCOVER_RESPONSE}{FIELD_SEPARATOR}{state}");
    if let Some(name) = &response.host_name {
        validate_field("host name", name)?;
        out.push(FIELD_SEPARATOR);
        out.push_str(name);
    }
    out.push(FIELD_SEPARATOR);
    out.push_str(DISCOVER_RESPONSE_END);
    Ok(out)
}

/// Parses a discovery response datagram.
///
/// A missing pairing field reads as "unpaired" and a missing host name reads
/// as `None`; the caller falls back to the source address for display.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownKeyword`] if the datagram is not a
/// `DISCOVER_RESPONSE`.
pub fn parse_discovery_response(text: &str) -> Result<DiscoveryResponse, ProtocolError> {
    let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    if fields[0] != DISCOVER_RESPONSE {
        return Err(ProtocolError::UnknownKeyword(fields[0].to_string()));
    }
    let paired = field_at(&fields, 1) == Some(DEVICE_IS_PAIRED);
    let host_name = field_at(&fields, 2)
        .filter(|name| *name != DISCOVER_RESPONSE_END)
        .map(str::to_string);
    Ok(DiscoveryResponse { paired, host_name })
}

// ── Pairing ───────────────────────────────────────────────────────────────────

/// Encodes `PAIRME:<id>\n` or `UNPAIRME:<id>\n`.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidField`] for an unusable device id.
pub fn encode_pairing_request(
    action: PairingAction,
    device_id: &str,
) -> Result<String, ProtocolError> {
    validate_device_id(device_id)?;
    Ok(format!(
        "{}{FIELD_SEPARATOR}{device_id}\n",
        action.request_keyword()
    ))
}

/// Encodes the `INCOMING_DRIN\n` marker line.
pub fn encode_incoming_drin_marker() -> String {
    format!("{INCOMING_DRIN}\n")
}

/// Parses the first line of a TCP session on the server side.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownKeyword`] for any keyword other than
/// `PAIRME`, `UNPAIRME`, or `INCOMING_DRIN`, and
/// [`ProtocolError::InvalidField`] for a device id over [`MAX_DEVICE_ID_LEN`].
pub fn parse_request_line(text: &str) -> Result<RequestLine, ProtocolError> {
    let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    let action = match fields[0] {
        PAIRME => PairingAction::Pair,
        UNPAIRME => PairingAction::Unpair,
        INCOMING_DRIN => return Ok(RequestLine::IncomingDrin),
        other => return Err(ProtocolError::UnknownKeyword(other.to_string())),
    };
    let device_id = field_at(&fields, 1);
    if let Some(id) = device_id {
        check_device_id_len(id)?;
    }
    Ok(RequestLine::Pairing(PairingRequest {
        action,
        device_id: device_id.map(str::to_string),
    }))
}

/// Encodes `<PAIRED|UNPAIRED>:<OK|ERROR>\n`.
pub fn encode_pairing_response(response: &PairingResponse) -> String {
    format!(
        "{}{FIELD_SEPARATOR}{}\n",
        response.action.response_keyword(),
        response.status.as_str()
    )
}

/// Encodes the reply sent for an unrecognised request line.
pub fn encode_error_reply() -> String {
    format!("{STATUS_ERROR}\n")
}

/// Parses a pairing response line on the client side.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownKeyword`] when the keyword is neither
/// `PAIRED` nor `UNPAIRED` (e.g. a bare `ERROR`), and
/// [`ProtocolError::InvalidField`] when the status field is missing or
/// unrecognised.
pub fn parse_pairing_response(text: &str) -> Result<PairingResponse, ProtocolError> {
    let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
    let action = match fields[0] {
        PAIRED => PairingAction::Pair,
        UNPAIRED => PairingAction::Unpair,
        other => return Err(ProtocolError::UnknownKeyword(other.to_string())),
    };
    let status = match field_at(&fields, 1) {
        Some(STATUS_OK) => PairingStatus::Ok,
        Some(STATUS_ERROR) => PairingStatus::Error,
        other => {
            return Err(ProtocolError::InvalidField {
                field: "pairing status",
                reason: format!("unexpected value {other:?}"),
            })
        }
    };
    Ok(PairingResponse { action, status })
}

// ── Event payload ─────────────────────────────────────────────────────────────

/// Serializes `event` as `[len:4 BE][bincode bytes]`.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the encoded event exceeds
/// [`MAX_EVENT_PAYLOAD`], or [`ProtocolError::MalformedPayload`] if bincode
/// fails.
pub fn encode_event_payload(event: &DrinEvent) -> Result<Vec<u8>, ProtocolError> {
    let body =
        bincode::serialize(event).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
    if body.len() > MAX_EVENT_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            declared: body.len(),
            limit: MAX_EVENT_PAYLOAD,
        });
    }
    let mut buf = Vec::with_capacity(EVENT_LENGTH_PREFIX + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Reads the payload length out of the 4-byte prefix.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] when the declared length is
/// over [`MAX_EVENT_PAYLOAD`]; the caller must not allocate in that case.
pub fn event_payload_len(prefix: [u8; EVENT_LENGTH_PREFIX]) -> Result<usize, ProtocolError> {
    let declared = u32::from_be_bytes(prefix) as usize;
    if declared > MAX_EVENT_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            declared,
            limit: MAX_EVENT_PAYLOAD,
        });
    }
    Ok(declared)
}

/// Deserializes the body that follows the length prefix.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the bytes are not a valid
/// bincode-encoded [`DrinEvent`].
pub fn decode_event_body(body: &[u8]) -> Result<DrinEvent, ProtocolError> {
    bincode::deserialize(body).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
