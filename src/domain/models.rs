//! Domain Models
//!
//! Shared value types for the proximity payment protocol: the payment
//! identity carried in advertisements, the decoded beacon frame, the order
//! request delivered over the GATT channel, and the event enums each
//! component emits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// How numeric strings are rendered into advertisement payload bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigitEncoding {
    /// One ASCII byte per digit character.
    #[default]
    Ascii,
    /// Two digits packed per byte, high nibble first.
    Bcd,
}

/// Which advertisement layout carries the payment identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvertiseLayout {
    /// Identity folded into a dynamic 128-bit service UUID, no payload.
    Minimal,
    /// Fixed service UUID with the encoded digits as service data.
    #[default]
    Data,
}

/// Validation failures for [`PaymentIdentity`] input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("card number must be exactly 16 digits")]
    InvalidCardNumber,
    #[error("phone suffix must be exactly 4 digits")]
    InvalidPhoneLast4,
}

/// A tokenized payment identity as supplied by the application layer.
///
/// Construction validates the card number and phone suffix; the fields are
/// immutable afterwards, so every identity reaching the codec is well
/// formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIdentity {
    card_number: String,
    phone_last4: String,
    device_name: String,
    encoding: DigitEncoding,
    layout: AdvertiseLayout,
}

impl PaymentIdentity {
    pub fn new(
        card_number: impl Into<String>,
        phone_last4: impl Into<String>,
        device_name: impl Into<String>,
        encoding: DigitEncoding,
        layout: AdvertiseLayout,
    ) -> Result<Self, IdentityError> {
        let card_number = card_number.into();
        let phone_last4 = phone_last4.into();

        if card_number.len() != 16 || !card_number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentityError::InvalidCardNumber);
        }
        if phone_last4.len() != 4 || !phone_last4.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentityError::InvalidPhoneLast4);
        }

        Ok(Self {
            card_number,
            phone_last4,
            device_name: device_name.into(),
            encoding,
            layout,
        })
    }

    pub fn card_number(&self) -> &str {
        &self.card_number
    }

    pub fn phone_last4(&self) -> &str {
        &self.phone_last4
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn encoding(&self) -> DigitEncoding {
        self.encoding
    }

    pub fn layout(&self) -> AdvertiseLayout {
        self.layout
    }
}

/// A fully encoded advertisement, ready to hand to the radio driver.
///
/// Derived from a [`PaymentIdentity`], recomputed per publish, never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAdvertisement {
    pub layout: AdvertiseLayout,
    pub service_uuids: Vec<Uuid>,
    pub service_data: Vec<(Uuid, Vec<u8>)>,
    pub include_tx_power: bool,
}

/// The companion scan-response payload, carrying only the readable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResponsePayload {
    pub include_device_name: bool,
    pub device_name: String,
}

/// A decoded iBeacon-style manufacturer frame.
///
/// The 16-byte identity block splits into a 12-character order field
/// (right-padded with spaces on the wire, trimmed here) and a 4-character
/// phone suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IBeaconFrame {
    pub company_id: u16,
    pub uuid_raw: [u8; 16],
    pub order_number: String,
    pub phone_last4: String,
    pub major: u16,
    pub minor: u16,
    pub tx_power: i8,
}

impl IBeaconFrame {
    /// The identity block as contiguous uppercase hex.
    pub fn uuid_hex(&self) -> String {
        self.uuid_raw.iter().map(|b| format!("{b:02X}")).collect()
    }
}

/// A raw advertisement observation handed in by the radio driver.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub local_name: Option<String>,
    pub address: u64,
    pub rssi: i16,
    /// Manufacturer-specific data entries keyed by company identifier.
    pub manufacturer_data: Vec<(u16, Vec<u8>)>,
}

/// Which advertisements the radio should let through to the matcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanFilter {
    /// No filtering; every observation is inspected.
    #[default]
    AcceptAll,
    /// Only advertisements carrying data for this company identifier.
    Manufacturer(u16),
    /// Company identifier plus the iBeacon type/length prefix.
    ManufacturerIBeacon(u16),
}

/// An order delivered over the GATT write channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub order_id: String,
    pub additional_fields: Option<BTreeMap<String, String>>,
}

/// A device surfaced while scanning, mirrored to the application for
/// display and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenDevice {
    pub name: String,
    pub address: u64,
    pub rssi: i16,
}

/// Events emitted by the scan matcher.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// First frame matching the target; at most one per session.
    Matched(IBeaconFrame),
    /// An observation passed the filter (informational).
    DeviceSeen(SeenDevice),
    /// Human-readable status text.
    Info(String),
    /// No matching signal within the configured window.
    TimedOut(Duration),
    /// The radio layer reported a scan failure.
    Failed(String),
}

/// Phases of the order channel that carry a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPhase {
    Connect,
    Order,
}

impl fmt::Display for OrderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderPhase::Connect => f.write_str("connect"),
            OrderPhase::Order => f.write_str("order"),
        }
    }
}

/// Events emitted by the order channel.
#[derive(Debug, Clone)]
pub enum OrderEvent {
    /// The AT+CONNECT handshake completed.
    Connected,
    /// An order write parsed successfully; the session is complete.
    OrderReceived(OrderRequest),
    /// The counterpart disconnected, by command or physically.
    Disconnected,
    /// A phase deadline elapsed with no qualifying write.
    TimedOut(OrderPhase),
    /// Human-readable status text.
    Info(String),
}

/// Identifies the single outstanding timer of a session.
///
/// Every re-arm bumps the generation, so a deadline that fires after a
/// legitimate transition carries a stale token and is ignored on delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineToken(pub(crate) u64);

/// A timer the driving layer must schedule: after `after`, feed `token`
/// back into the owning state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub token: DeadlineToken,
    pub after: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(card: &str, phone: &str) -> Result<PaymentIdentity, IdentityError> {
        PaymentIdentity::new(
            card,
            phone,
            "mcandle",
            DigitEncoding::Ascii,
            AdvertiseLayout::Data,
        )
    }

    #[test]
    fn accepts_valid_identity() {
        let id = identity("1234567812345678", "1234").unwrap();
        assert_eq!(id.card_number(), "1234567812345678");
        assert_eq!(id.phone_last4(), "1234");
        assert_eq!(id.device_name(), "mcandle");
    }

    #[test]
    fn rejects_bad_card_number() {
        assert_eq!(
            identity("123456781234567", "1234"),
            Err(IdentityError::InvalidCardNumber)
        );
        assert_eq!(
            identity("12345678123456 8", "1234"),
            Err(IdentityError::InvalidCardNumber)
        );
    }

    #[test]
    fn rejects_bad_phone_suffix() {
        assert_eq!(
            identity("1234567812345678", "123"),
            Err(IdentityError::InvalidPhoneLast4)
        );
        assert_eq!(
            identity("1234567812345678", "12a4"),
            Err(IdentityError::InvalidPhoneLast4)
        );
    }

    #[test]
    fn frame_uuid_hex_is_uppercase() {
        let frame = IBeaconFrame {
            company_id: 0x5246,
            uuid_raw: *b"ORD-1       5678",
            order_number: "ORD-1".to_string(),
            phone_last4: "5678".to_string(),
            major: 1,
            minor: 2,
            tx_power: -59,
        };
        assert_eq!(&frame.uuid_hex()[..8], "4F52442D");
    }
}
