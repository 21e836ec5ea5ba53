//! All DrinViewer protocol message types and shared constants.
//!
//! Every control message is a single line of ASCII text whose fields are
//! separated by [`FIELD_SEPARATOR`].  The only binary data on the wire is the
//! event payload that follows an [`INCOMING_DRIN`] line.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Application name, used as the title of pairing notifications.
pub const APP_NAME: &str = "DrinViewer";

/// Default UDP (discovery) and TCP (pairing/event) port.
pub const DEFAULT_PORT: u16 = 50001;

/// Separator between message fields.
pub const FIELD_SEPARATOR: char = ':';

/// First field of a discovery request datagram.
pub const DISCOVER_REQUEST: &str = "DISCOVER";
/// First field of a discovery response datagram.
pub const DISCOVER_RESPONSE: &str = "DISCOVER_RESPONSE";
/// Last field of a discovery response datagram.
pub const DISCOVER_RESPONSE_END: &str = "DISCOVER_RESPONSE_END";
/// Pairing-state field value: the requesting device is paired with this host.
pub const DEVICE_IS_PAIRED: &str = "ISPAIRED";
/// Pairing-state field value: the requesting device is unknown to this host.
pub const DEVICE_IS_UNPAIRED: &str = "ISUNPAIRED";

pub const PAIRME: &str = "PAIRME";
pub const UNPAIRME: &str = "UNPAIRME";
pub const PAIRED: &str = "PAIRED";
pub const UNPAIRED: &str = "UNPAIRED";
/// Marker line that precedes a length-prefixed [`DrinEvent`] payload.
pub const INCOMING_DRIN: &str = "INCOMING_DRIN";
pub const STATUS_OK: &str = "OK";
pub const STATUS_ERROR: &str = "ERROR";

/// Number of discovery broadcasts sent without a new host before giving up.
pub const DISCOVERY_BROADCAST_COUNT: u32 = 3;

/// Total receive budget spread across [`DISCOVERY_BROADCAST_COUNT`] attempts.
pub const DISCOVERY_BUDGET: Duration = Duration::from_millis(12_000);

/// Per-attempt discovery receive timeout (budget / attempt count).
pub const DISCOVER_TIMEOUT: Duration =
    Duration::from_millis(12_000 / DISCOVERY_BROADCAST_COUNT as u64);

/// Read timeout for a pairing exchange.
pub const PAIRING_TIMEOUT: Duration = DISCOVER_TIMEOUT;

/// Absolute wall-clock ceiling for one discovery run.
pub const DISCOVERY_MAX_TIMEOUT: Duration = Duration::from_secs(30);

/// Receive buffer size for discovery datagrams.
pub const DATAGRAM_BUFFER_LEN: usize = 512;

/// Longest request or response line accepted on a TCP session, in bytes.
pub const MAX_LINE_LEN: usize = 512;

/// Longest device id accepted on the wire, in bytes.  Keeps every request
/// line well inside [`MAX_LINE_LEN`].
pub const MAX_DEVICE_ID_LEN: usize = 128;

/// Largest accepted event payload (title, message, and image), in bytes.
pub const MAX_EVENT_PAYLOAD: usize = 4 * 1024 * 1024;

/// Size of the big-endian length prefix in front of an event payload.
pub const EVENT_LENGTH_PREFIX: usize = 4;

// ── Discovery messages (UDP) ─────────────────────────────────────────────────

/// `DISCOVER[:<deviceId>]`, broadcast by the mobile device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    /// Installation identifier of the requesting device, if it sent one.
    pub device_id: Option<String>,
}

/// `DISCOVER_RESPONSE:<ISPAIRED|ISUNPAIRED>[:<hostName>]:DISCOVER_RESPONSE_END`,
/// unicast back to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    /// Whether the responder has the requesting device id on record.
    pub paired: bool,
    /// Human-readable host name; absent when the responder has none.
    pub host_name: Option<String>,
}

// ── Pairing messages (TCP) ───────────────────────────────────────────────────

/// Which way a pairing exchange moves the trust relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairingAction {
    Pair,
    Unpair,
}

impl PairingAction {
    /// The action that moves a host out of its current pairing state.
    pub fn toggling(currently_paired: bool) -> Self {
        if currently_paired {
            PairingAction::Unpair
        } else {
            PairingAction::Pair
        }
    }

    /// Keyword sent by the client (`PAIRME` / `UNPAIRME`).
    pub fn request_keyword(self) -> &'static str {
        match self {
            PairingAction::Pair => PAIRME,
            PairingAction::Unpair => UNPAIRME,
        }
    }

    /// Keyword the server answers with (`PAIRED` / `UNPAIRED`).
    pub fn response_keyword(self) -> &'static str {
        match self {
            PairingAction::Pair => PAIRED,
            PairingAction::Unpair => UNPAIRED,
        }
    }

    /// Pairing state the host ends up in when the exchange succeeds.
    pub fn resulting_state(self) -> bool {
        matches!(self, PairingAction::Pair)
    }
}

/// `PAIRME:<deviceId>` or `UNPAIRME:<deviceId>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequest {
    pub action: PairingAction,
    /// `None` when a peer sent the keyword without an identifier.
    pub device_id: Option<String>,
}

/// Outcome field of a pairing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStatus {
    Ok,
    Error,
}

impl PairingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PairingStatus::Ok => STATUS_OK,
            PairingStatus::Error => STATUS_ERROR,
        }
    }
}

/// `<PAIRED|UNPAIRED>:<OK|ERROR>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingResponse {
    pub action: PairingAction,
    pub status: PairingStatus,
}

/// First line of every TCP session, as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestLine {
    Pairing(PairingRequest),
    /// An event payload follows on the same connection.
    IncomingDrin,
}

// ── Event payload ─────────────────────────────────────────────────────────────

/// What the desktop should do with a delivered event.
///
/// The numeric codes are stable and match the values older peers used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventAction {
    None = 0,
    ShowPopup = 1,
    RemovePopup = 2,
    ShowPaired = 3,
}

impl TryFrom<u8> for EventAction {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EventAction::None),
            1 => Ok(EventAction::ShowPopup),
            2 => Ok(EventAction::RemovePopup),
            3 => Ok(EventAction::ShowPaired),
            _ => Err(()),
        }
    }
}

/// A notification forwarded from the mobile device to a paired desktop.
///
/// Title, message, and image arrive already resolved (e.g. the caller's
/// contact name and photo); this crate treats them as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrinEvent {
    pub title: String,
    pub message: String,
    /// Encoded image bytes (PNG in practice), if any.
    pub image: Option<Vec<u8>>,
    pub action: EventAction,
}

impl DrinEvent {
    /// Creates an event without an image.
    pub fn new(title: impl Into<String>, message: impl Into<String>, action: EventAction) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            image: None,
            action,
        }
    }

    /// Attaches image bytes to the event.
    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
