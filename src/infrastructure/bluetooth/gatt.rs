//! Order Channel
//!
//! GATT-side command protocol for receiving an order id once proximity is
//! established. The counterpart writes text commands to the order
//! characteristic and reads JSON responses back from the response
//! characteristic.
//!
//! # Protocol
//!
//! ```text
//! Idle --start--> AwaitingConnect --"AT+CONNECT"--> AwaitingOrder
//!                      |                                 |
//!                      |                       "AT+DISCONNECT" -> Disconnected
//!                      |                       <order write>   -> Completed
//!                      +--- deadline / link loss ---> Disconnected
//! ```
//!
//! The channel never touches the radio. Writes, reads, link changes, and
//! deadline signals are fed in by the driving layer, which also schedules
//! the [`Deadline`] values handed back.

use crate::domain::models::{Deadline, DeadlineToken, OrderEvent, OrderPhase};
use crate::infrastructure::bluetooth::order::{self, OrderDialect};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Service published for the order exchange, distinct from the
/// advertisement service identifier.
pub const ORDER_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FFF0_0000_1000_8000_00805F9B34FB);

/// Characteristic the counterpart writes commands and orders to.
pub const ORDER_WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000FFF1_0000_1000_8000_00805F9B34FB);

/// Characteristic the counterpart reads responses from.
pub const RESPONSE_READ_CHAR_UUID: Uuid = Uuid::from_u128(0x0000FFF2_0000_1000_8000_00805F9B34FB);

/// Client characteristic configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// Window for the counterpart to issue AT+CONNECT.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Window for the order write after the handshake.
pub const ORDER_TIMEOUT: Duration = Duration::from_secs(60);

const CMD_CONNECT: &str = "AT+CONNECT";
const CMD_DISCONNECT: &str = "AT+DISCONNECT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    AwaitingConnect,
    AwaitingOrder,
    Completed,
    Disconnected,
}

pub struct OrderChannel {
    state: ChannelState,
    dialect: OrderDialect,
    response: Option<Vec<u8>>,
    timer_generation: u64,
    armed: Option<DeadlineToken>,
    events: mpsc::UnboundedSender<OrderEvent>,
}

impl OrderChannel {
    pub fn new(dialect: OrderDialect, events: mpsc::UnboundedSender<OrderEvent>) -> Self {
        Self {
            state: ChannelState::Idle,
            dialect,
            response: None,
            timer_generation: 0,
            armed: None,
            events,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn dialect(&self) -> OrderDialect {
        self.dialect
    }

    /// Open the channel for a new counterpart: clears any previous
    /// response and arms the connect deadline the driver must schedule.
    pub fn start(&mut self) -> Deadline {
        self.response = None;
        self.transition(ChannelState::AwaitingConnect);
        let deadline = self.arm(CONNECT_TIMEOUT);
        info!(
            service = %ORDER_SERVICE_UUID,
            timeout_secs = CONNECT_TIMEOUT.as_secs(),
            "order channel awaiting connect"
        );
        deadline
    }

    /// A write arrived on some characteristic. Returns a new deadline when
    /// the write advanced the session into a phase with its own window.
    pub fn handle_write(&mut self, characteristic: Uuid, data: &[u8]) -> Option<Deadline> {
        if characteristic != ORDER_WRITE_CHAR_UUID {
            warn!(%characteristic, "write to unknown characteristic");
            self.set_response(false, "Unknown characteristic");
            return None;
        }

        let text = String::from_utf8_lossy(data);
        let text = text.trim();
        debug!(state = ?self.state, text, "order channel write");

        match self.state {
            ChannelState::AwaitingConnect => {
                if text.eq_ignore_ascii_case(CMD_CONNECT) {
                    self.transition(ChannelState::AwaitingOrder);
                    // Arming the order window invalidates the connect timer.
                    let deadline = self.arm(ORDER_TIMEOUT);
                    self.set_response(true, "Connected");
                    info!("connect command accepted");
                    self.emit(OrderEvent::Connected);
                    Some(deadline)
                } else {
                    warn!(text, "protocol violation before connect");
                    self.set_response(false, "Expected AT+CONNECT");
                    None
                }
            }
            ChannelState::AwaitingOrder => {
                if text.eq_ignore_ascii_case(CMD_DISCONNECT) {
                    self.disarm();
                    self.set_response(true, "Disconnected");
                    info!("disconnect command received");
                    self.emit(OrderEvent::Disconnected);
                    self.transition(ChannelState::Disconnected);
                    return None;
                }
                match self.dialect.parse(data) {
                    Ok(request) => {
                        self.disarm();
                        self.transition(ChannelState::Completed);
                        self.set_response(true, "Order received");
                        info!(order_id = %request.order_id, "order received");
                        self.emit(OrderEvent::OrderReceived(request));
                    }
                    Err(error) => {
                        warn!(%error, "order write rejected");
                        self.set_response(false, &error.to_string());
                    }
                }
                None
            }
            ChannelState::Idle | ChannelState::Completed | ChannelState::Disconnected => {
                warn!(state = ?self.state, "write outside an active session");
                self.set_response(false, "No active session");
                None
            }
        }
    }

    /// Serve a read of the response characteristic. Never changes state.
    pub fn read_response(&self) -> Vec<u8> {
        self.response.clone().unwrap_or_else(order::default_response)
    }

    /// A scheduled deadline fired. Stale tokens are dropped.
    pub fn handle_deadline(&mut self, token: DeadlineToken) {
        if self.armed != Some(token) {
            debug!(?token, "stale channel deadline ignored");
            return;
        }
        self.armed = None;

        let phase = match self.state {
            ChannelState::AwaitingConnect => OrderPhase::Connect,
            ChannelState::AwaitingOrder => OrderPhase::Order,
            _ => return,
        };
        info!(%phase, "order channel deadline elapsed");
        self.emit(OrderEvent::TimedOut(phase));
        self.transition(ChannelState::Disconnected);
    }

    /// The radio reported a physical link. Informational; the protocol
    /// handshake is the AT+CONNECT write.
    pub fn handle_link_connected(&mut self) {
        info!(state = ?self.state, "physical link connected");
        self.emit(OrderEvent::Info("Client connected".to_string()));
    }

    /// The physical link dropped. Before completion this ends the session
    /// and cancels any armed deadline.
    pub fn handle_link_disconnected(&mut self) {
        match self.state {
            ChannelState::AwaitingConnect | ChannelState::AwaitingOrder => {
                self.disarm();
                info!(state = ?self.state, "physical link lost");
                self.emit(OrderEvent::Disconnected);
                self.transition(ChannelState::Disconnected);
            }
            _ => {
                debug!(state = ?self.state, "link drop outside an active session");
            }
        }
    }

    fn arm(&mut self, after: Duration) -> Deadline {
        self.timer_generation += 1;
        let token = DeadlineToken(self.timer_generation);
        self.armed = Some(token);
        Deadline { token, after }
    }

    fn disarm(&mut self) {
        self.armed = None;
    }

    fn set_response(&mut self, success: bool, message: &str) {
        self.response = Some(order::encode_response(success, message));
    }

    fn transition(&mut self, next: ChannelState) {
        debug!(from = ?self.state, to = ?next, "channel state");
        self.state = next;
    }

    fn emit(&self, event: OrderEvent) {
        let _ = self.events.send(event);
    }
}
