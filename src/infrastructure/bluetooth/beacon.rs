//! iBeacon Frame Parser
//!
//! Decodes the manufacturer-data frames the scan side observes. Input
//! comes straight off the radio, so parsing is total: anything malformed
//! is `None`, never a panic.
//!
//! # Frame structure (23+ bytes)
//!
//! ```text
//! [0]      : 0x02  (type)
//! [1]      : 0x15  (length)
//! [2..18]  : identity block, 16 ASCII bytes
//!            first 12 = order number (right-padded with spaces)
//!            last 4   = phone suffix
//! [18..20] : major (u16 big-endian)
//! [20..22] : minor (u16 big-endian)
//! [22]     : tx power (i8)
//! ```

use crate::domain::models::{IBeaconFrame, Observation};

/// Type/length prefix identifying an iBeacon manufacturer frame.
pub const IBEACON_PREFIX: [u8; 2] = [0x02, 0x15];

/// Minimum manufacturer payload length for a complete frame.
pub const MIN_FRAME_LEN: usize = 23;

/// Parse one manufacturer-data payload. Returns `None` for anything that
/// is not a well-formed frame, including a non-ASCII identity block.
pub fn parse_frame(data: &[u8], company_id: u16) -> Option<IBeaconFrame> {
    if data.len() < MIN_FRAME_LEN {
        return None;
    }
    if data[..2] != IBEACON_PREFIX {
        return None;
    }

    let mut uuid_raw = [0u8; 16];
    uuid_raw.copy_from_slice(&data[2..18]);
    if !uuid_raw.is_ascii() {
        return None;
    }
    let identity = std::str::from_utf8(&uuid_raw).ok()?;

    let order_number = identity[..12].trim_end().to_string();
    let phone_last4 = identity[12..16].to_string();

    let major = u16::from_be_bytes([data[18], data[19]]);
    let minor = u16::from_be_bytes([data[20], data[21]]);
    let tx_power = data[22] as i8;

    Some(IBeaconFrame {
        company_id,
        uuid_raw,
        order_number,
        phone_last4,
        major,
        minor,
        tx_power,
    })
}

/// Walk an observation's manufacturer-data entries and decode the first
/// one shaped like an iBeacon frame.
pub fn parse_observation(observation: &Observation) -> Option<IBeaconFrame> {
    observation
        .manufacturer_data
        .iter()
        .find_map(|(company_id, data)| parse_frame(data, *company_id))
}
