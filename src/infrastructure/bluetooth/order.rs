//! Order Write Parsing
//!
//! Two wire dialects for the order-write characteristic, plus the JSON
//! response payload the counterpart reads back. Which dialect a deployment
//! speaks is chosen when the order channel is constructed; both are
//! first-class.

use crate::domain::models::OrderRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderParseError {
    #[error("order payload is empty")]
    EmptyPayload,
    #[error("order_id key is missing")]
    MissingOrderId,
    #[error("malformed key=value pair: {0}")]
    MalformedPair(String),
}

/// Wire format of a non-command write while an order is awaited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDialect {
    /// The entire trimmed UTF-8 text is the order id.
    #[default]
    Raw,
    /// `&`-joined `key=value` pairs with a mandatory `order_id` key;
    /// remaining keys become additional fields.
    Keyed,
}

impl OrderDialect {
    /// Parse raw write bytes into an [`OrderRequest`]. Malformed UTF-8 is
    /// decoded lossily, matching what the counterpart devices send.
    pub fn parse(self, data: &[u8]) -> Result<OrderRequest, OrderParseError> {
        let text = String::from_utf8_lossy(data);
        let text = text.trim();
        if text.is_empty() {
            return Err(OrderParseError::EmptyPayload);
        }

        match self {
            OrderDialect::Raw => Ok(OrderRequest {
                order_id: text.to_string(),
                additional_fields: None,
            }),
            OrderDialect::Keyed => parse_keyed(text),
        }
    }
}

fn parse_keyed(text: &str) -> Result<OrderRequest, OrderParseError> {
    let mut order_id = None;
    let mut additional = BTreeMap::new();

    for pair in text.split('&') {
        // Every segment must carry exactly one '='.
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) if !value.contains('=') => (key, value),
            _ => return Err(OrderParseError::MalformedPair(pair.to_string())),
        };
        if key == "order_id" {
            order_id = Some(value.to_string());
        } else {
            additional.insert(key.to_string(), value.to_string());
        }
    }

    Ok(OrderRequest {
        order_id: order_id.ok_or(OrderParseError::MissingOrderId)?,
        additional_fields: (!additional.is_empty()).then_some(additional),
    })
}

#[derive(Serialize)]
struct ResponseBody<'a> {
    status: &'a str,
    message: &'a str,
}

/// Encode the single-line response payload: exactly the two string keys
/// `status` and `message`.
pub fn encode_response(success: bool, message: &str) -> Vec<u8> {
    let body = ResponseBody {
        status: if success { "success" } else { "error" },
        message,
    };
    // Serializing two plain string fields cannot fail.
    serde_json::to_vec(&body).unwrap_or_default()
}

/// The payload served before any command has produced a response.
pub fn default_response() -> Vec<u8> {
    encode_response(true, "No data")
}
