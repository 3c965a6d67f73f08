//! # paybeacon
//!
//! Core protocol library for BLE proximity payments: a mobile device
//! announces a tokenized payment identity over BLE advertisements, a store
//! terminal discovers and correlates the announcement with an expected
//! customer, and the two exchange an order id over a minimal GATT
//! request/response channel.
//!
//! The platform radio and the user interface are external collaborators.
//! The library encodes payloads, runs the state machines, and surfaces
//! everything through event channels; drivers feed in raw observations,
//! GATT writes, link changes, and timer expiries.
//!
//! The advertised payload is plaintext card and phone digits. That is a
//! property of the deployed wire format, not something this crate can
//! harden; treat the card number as a tokenized pseudo-identity.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{
    AdvertiseLayout, Deadline, DeadlineToken, DigitEncoding, EncodedAdvertisement, IBeaconFrame,
    IdentityError, Observation, OrderEvent, OrderPhase, OrderRequest, PaymentIdentity, ScanEvent,
    ScanFilter, ScanResponsePayload, SeenDevice,
};
pub use domain::settings::{LogSettings, Settings, SettingsService};
pub use infrastructure::bluetooth::gatt::{ChannelState, OrderChannel};
pub use infrastructure::bluetooth::order::{OrderDialect, OrderParseError};
pub use infrastructure::bluetooth::scanner::{ScanError, ScanMatcher, ScanState};
pub use infrastructure::bluetooth::session::{
    PaymentSession, RadioControl, SessionConfig, SessionEvent, SessionHandle, SessionInput,
};
pub use infrastructure::logging::{init_logger, LoggingGuard};
