//! Bluetooth Module
//!
//! Protocol core for announcing a payment identity over BLE and exchanging
//! an order id once proximity is confirmed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     PaymentSession                       │
//! │   (actor loop - publish, await match or order, teardown) │
//! └───────┬──────────────────┬──────────────────┬───────────┘
//!         │                  │                  │
//!         ▼                  ▼                  ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Advertiser  │   │ ScanMatcher  │   │ OrderChannel │
//! │              │   │              │   │              │
//! │ - MINIMAL /  │   │ - filters    │   │ - AT+CONNECT │
//! │   DATA       │   │ - matching   │   │   handshake  │
//! │   layouts    │   │ - timeout    │   │ - dialects   │
//! │ - raw hex    │   │              │   │ - responses  │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │                  │                  │
//!        ▼                  ▼                  ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │    codec     │   │    beacon    │   │    order     │
//! │ ASCII / BCD  │   │ frame parser │   │ write parser │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`codec`] - ASCII/BCD digit codec and hex rendering
//! - [`advertiser`] - advertisement and scan-response builders
//! - [`beacon`] - iBeacon manufacturer-frame parser
//! - [`scanner`] - scan-matching state machine
//! - [`order`] - order-write dialects and response payloads
//! - [`gatt`] - order-channel state machine and GATT identifiers
//! - [`session`] - session orchestrator and the radio seam

pub mod advertiser;
pub mod beacon;
pub mod codec;
pub mod gatt;
pub mod order;
pub mod scanner;
pub mod session;

// Re-export the driving types for convenience
pub use gatt::OrderChannel;
pub use scanner::ScanMatcher;
pub use session::{PaymentSession, RadioControl, SessionConfig, SessionEvent, SessionHandle};
