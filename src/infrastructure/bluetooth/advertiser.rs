//! Advertisement Packet Builder
//!
//! Builds the two advertisement layouts that carry a payment identity, the
//! companion scan-response payload, and a human-auditable hex rendering of
//! the result.
//!
//! MINIMAL folds the card number and phone suffix into a dynamic 128-bit
//! service UUID and carries no payload at all; DATA pairs the well-known
//! payment service UUID with the encoded digit string as service data.

use crate::domain::models::{
    AdvertiseLayout, DigitEncoding, EncodedAdvertisement, PaymentIdentity, ScanResponsePayload,
};
use crate::infrastructure::bluetooth::codec::{self, CodecError};
use uuid::Uuid;

/// Well-known service UUID for DATA-layout advertisements.
pub const PAYMENT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FE10_0000_1000_8000_00805F9B34FB);

/// Reserved organizational suffix filling the last 12 hex digits of a
/// MINIMAL-layout UUID.
const MINIMAL_UUID_TAIL: u128 = 0x00805F9B34FB;

/// Build the advertisement for an identity under its selected layout.
pub fn build_advertisement(identity: &PaymentIdentity) -> Result<EncodedAdvertisement, CodecError> {
    match identity.layout() {
        AdvertiseLayout::Minimal => Ok(EncodedAdvertisement {
            layout: AdvertiseLayout::Minimal,
            service_uuids: vec![minimal_uuid(identity)],
            service_data: Vec::new(),
            include_tx_power: false,
        }),
        AdvertiseLayout::Data => {
            let digits = format!("{}{}", identity.card_number(), identity.phone_last4());
            let payload = match identity.encoding() {
                DigitEncoding::Ascii => codec::encode_ascii(&digits),
                DigitEncoding::Bcd => codec::encode_bcd(&digits)?,
            };
            Ok(EncodedAdvertisement {
                layout: AdvertiseLayout::Data,
                service_uuids: Vec::new(),
                service_data: vec![(PAYMENT_SERVICE_UUID, payload)],
                include_tx_power: true,
            })
        }
    }
}

/// The scan response carries only the readable device name.
pub fn build_scan_response(identity: &PaymentIdentity) -> ScanResponsePayload {
    ScanResponsePayload {
        include_device_name: true,
        device_name: identity.device_name().to_string(),
    }
}

/// Render every advertisement field into the fixed multi-line audit
/// format used for debugging and verification:
///
/// ```text
/// ServiceData(<uuid>): <space-separated uppercase hex>
/// ServiceUuid: <uuid>
/// DeviceName: <name>
/// ```
pub fn advertise_raw_hex(identity: &PaymentIdentity) -> Result<String, CodecError> {
    let advertisement = build_advertisement(identity)?;
    let mut out = String::new();

    for (uuid, bytes) in &advertisement.service_data {
        out.push_str(&format!(
            "ServiceData({uuid}): {}\n",
            codec::bytes_to_hex(bytes)
        ));
    }
    for uuid in &advertisement.service_uuids {
        out.push_str(&format!("ServiceUuid: {uuid}\n"));
    }
    out.push_str(&format!("DeviceName: {}\n", identity.device_name()));

    Ok(out.trim_end().to_string())
}

/// Assemble the dynamic MINIMAL-layout UUID: sixteen card digits, four
/// phone digits, then the reserved tail. Identity fields are all decimal
/// digits, which read directly as hex digits of the 128-bit value.
fn minimal_uuid(identity: &PaymentIdentity) -> Uuid {
    let mut value: u128 = 0;
    for b in identity
        .card_number()
        .bytes()
        .chain(identity.phone_last4().bytes())
    {
        value = (value << 4) | u128::from(b - b'0');
    }
    Uuid::from_u128((value << 48) | MINIMAL_UUID_TAIL)
}
