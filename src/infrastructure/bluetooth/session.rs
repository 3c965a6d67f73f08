//! Payment Session
//!
//! Thin orchestrator tying the pieces together for one payment attempt:
//! encode and publish the identity, run the scan matcher and the order
//! channel side by side, and tear everything down once either produces an
//! outcome.
//!
//! The session is a single-consumer actor. Radio callbacks, GATT writes,
//! link changes, and timer expiries all enter through one queue, so no two
//! of them ever run concurrently for the same session. Deadlines handed
//! back by the state machines are scheduled as sleep tasks that feed the
//! token back into the same queue; stale tokens die inside the machines.

use crate::domain::models::{
    Deadline, DeadlineToken, EncodedAdvertisement, Observation, OrderEvent, PaymentIdentity,
    ScanEvent, ScanFilter, ScanResponsePayload,
};
use crate::infrastructure::bluetooth::advertiser;
use crate::infrastructure::bluetooth::gatt::OrderChannel;
use crate::infrastructure::bluetooth::order::OrderDialect;
use crate::infrastructure::bluetooth::scanner::{ScanMatcher, DEFAULT_SCAN_TIMEOUT};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Seam to the platform radio. The core hands it fully encoded payloads
/// and filter sets; the driver owns every platform API call.
pub trait RadioControl {
    fn start_advertising(
        &mut self,
        advertisement: &EncodedAdvertisement,
        scan_response: &ScanResponsePayload,
    ) -> Result<()>;

    fn stop_advertising(&mut self) -> Result<()>;

    fn start_observing(&mut self, filter: ScanFilter) -> Result<()>;

    fn stop_observing(&mut self) -> Result<()>;
}

/// Which state machine an armed timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOwner {
    Scan,
    Channel,
}

/// Everything the outside world can feed into a running session.
#[derive(Debug)]
pub enum SessionInput {
    Observation(Observation),
    GattWrite { characteristic: Uuid, data: Vec<u8> },
    LinkConnected,
    LinkDisconnected,
    ScanFailed(String),
    DeadlineElapsed(TimerOwner, DeadlineToken),
    Stop,
}

/// Events the session surfaces to the application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Scan(ScanEvent),
    Order(OrderEvent),
    /// Publishing failed; the session never became active.
    Failed(String),
    /// The session has torn down; no further events follow.
    Ended,
}

/// Per-attempt configuration. The scan target is the identity's own phone
/// suffix: the terminal beacons it back once it recognizes the customer.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub identity: PaymentIdentity,
    pub target_minor: Option<u16>,
    pub scan_timeout: Duration,
    pub filter: ScanFilter,
    pub dialect: OrderDialect,
}

impl SessionConfig {
    pub fn new(identity: PaymentIdentity) -> Self {
        Self {
            identity,
            target_minor: None,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            filter: ScanFilter::AcceptAll,
            dialect: OrderDialect::default(),
        }
    }
}

/// Cloneable handle for feeding inputs into a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inputs: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    pub fn observation(&self, observation: Observation) {
        let _ = self.inputs.send(SessionInput::Observation(observation));
    }

    pub fn gatt_write(&self, characteristic: Uuid, data: Vec<u8>) {
        let _ = self.inputs.send(SessionInput::GattWrite {
            characteristic,
            data,
        });
    }

    pub fn link_connected(&self) {
        let _ = self.inputs.send(SessionInput::LinkConnected);
    }

    pub fn link_disconnected(&self) {
        let _ = self.inputs.send(SessionInput::LinkDisconnected);
    }

    pub fn scan_failed(&self, reason: impl Into<String>) {
        let _ = self.inputs.send(SessionInput::ScanFailed(reason.into()));
    }

    pub fn stop(&self) {
        let _ = self.inputs.send(SessionInput::Stop);
    }
}

pub struct PaymentSession<R: RadioControl> {
    radio: R,
    config: SessionConfig,
    matcher: ScanMatcher,
    channel: OrderChannel,
    inputs: mpsc::UnboundedReceiver<SessionInput>,
    input_tx: mpsc::UnboundedSender<SessionInput>,
    scan_events: mpsc::UnboundedReceiver<ScanEvent>,
    order_events: mpsc::UnboundedReceiver<OrderEvent>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<R: RadioControl> PaymentSession<R> {
    pub fn new(
        radio: R,
        config: SessionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> (Self, SessionHandle) {
        let (input_tx, inputs) = mpsc::unbounded_channel();
        let (scan_tx, scan_events) = mpsc::unbounded_channel();
        let (order_tx, order_events) = mpsc::unbounded_channel();

        let session = Self {
            radio,
            matcher: ScanMatcher::new(scan_tx),
            channel: OrderChannel::new(config.dialect, order_tx),
            config,
            inputs,
            input_tx: input_tx.clone(),
            scan_events,
            order_events,
            events,
        };
        (session, SessionHandle { inputs: input_tx })
    }

    /// Publish the identity, then serve inputs until an outcome or `Stop`.
    /// Tears down the radio in all exit paths.
    pub async fn run(mut self) -> Result<()> {
        if let Err(error) = self.publish() {
            warn!(%error, "session publish failed");
            let _ = self
                .events
                .send(SessionEvent::Failed(error.to_string()));
            self.teardown();
            return Err(error);
        }

        let mut stopping = false;
        while !stopping {
            tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(input) => stopping = self.apply(input),
                    // Unreachable while we hold input_tx; keeps the match total.
                    None => stopping = true,
                },
                Some(event) = self.scan_events.recv() => {
                    stopping = forward_scan(&self.events, event);
                }
                Some(event) = self.order_events.recv() => {
                    stopping = forward_order(&self.events, event);
                }
            }
        }

        self.teardown();
        Ok(())
    }

    /// Encode the identity and bring up both halves of the protocol.
    /// Identity must be on the air before observation starts.
    fn publish(&mut self) -> Result<()> {
        let advertisement = advertiser::build_advertisement(&self.config.identity)?;
        let scan_response = advertiser::build_scan_response(&self.config.identity);
        self.radio.start_advertising(&advertisement, &scan_response)?;
        info!(layout = ?advertisement.layout, "identity published");

        let target = self.config.identity.phone_last4().to_string();
        let deadline = self.matcher.start(
            &target,
            self.config.target_minor,
            self.config.scan_timeout,
            self.config.filter,
        )?;
        self.schedule(TimerOwner::Scan, deadline);
        self.radio.start_observing(self.config.filter)?;

        let deadline = self.channel.start();
        self.schedule(TimerOwner::Channel, deadline);
        Ok(())
    }

    fn apply(&mut self, input: SessionInput) -> bool {
        match input {
            SessionInput::Observation(observation) => {
                self.matcher.handle_observation(&observation);
            }
            SessionInput::GattWrite {
                characteristic,
                data,
            } => {
                if let Some(deadline) = self.channel.handle_write(characteristic, &data) {
                    self.schedule(TimerOwner::Channel, deadline);
                }
            }
            SessionInput::LinkConnected => self.channel.handle_link_connected(),
            SessionInput::LinkDisconnected => self.channel.handle_link_disconnected(),
            SessionInput::ScanFailed(reason) => self.matcher.handle_failure(&reason),
            SessionInput::DeadlineElapsed(TimerOwner::Scan, token) => {
                self.matcher.handle_deadline(token);
            }
            SessionInput::DeadlineElapsed(TimerOwner::Channel, token) => {
                self.channel.handle_deadline(token);
            }
            SessionInput::Stop => return true,
        }
        false
    }

    fn schedule(&self, owner: TimerOwner, deadline: Deadline) {
        let tx = self.input_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline.after).await;
            let _ = tx.send(SessionInput::DeadlineElapsed(owner, deadline.token));
        });
    }

    fn teardown(&mut self) {
        self.matcher.stop();
        if let Err(error) = self.radio.stop_observing() {
            warn!(%error, "failed to stop observing");
        }
        if let Err(error) = self.radio.stop_advertising() {
            warn!(%error, "failed to stop advertising");
        }

        // Flush whatever the machines emitted while closing down.
        while let Ok(event) = self.scan_events.try_recv() {
            forward_scan(&self.events, event);
        }
        while let Ok(event) = self.order_events.try_recv() {
            forward_order(&self.events, event);
        }

        info!("session ended");
        let _ = self.events.send(SessionEvent::Ended);
    }
}

/// Forward a scan event upward; `true` when it concludes the session.
fn forward_scan(events: &mpsc::UnboundedSender<SessionEvent>, event: ScanEvent) -> bool {
    let terminal = matches!(
        event,
        ScanEvent::Matched(_) | ScanEvent::TimedOut(_) | ScanEvent::Failed(_)
    );
    let _ = events.send(SessionEvent::Scan(event));
    terminal
}

/// Forward an order event upward; only a completed order ends the session
/// (a dropped GATT link leaves the beacon side running).
fn forward_order(events: &mpsc::UnboundedSender<SessionEvent>, event: OrderEvent) -> bool {
    let terminal = matches!(event, OrderEvent::OrderReceived(_));
    let _ = events.send(SessionEvent::Order(event));
    terminal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AdvertiseLayout, DigitEncoding};
    use crate::infrastructure::bluetooth::gatt::ORDER_WRITE_CHAR_UUID;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct FakeRadio {
        calls: Arc<Mutex<Vec<String>>>,
        fail_advertise: bool,
    }

    impl FakeRadio {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    impl RadioControl for FakeRadio {
        fn start_advertising(
            &mut self,
            advertisement: &EncodedAdvertisement,
            _scan_response: &ScanResponsePayload,
        ) -> Result<()> {
            if self.fail_advertise {
                anyhow::bail!("advertiser unavailable");
            }
            self.record(&format!("start_advertising:{:?}", advertisement.layout));
            Ok(())
        }

        fn stop_advertising(&mut self) -> Result<()> {
            self.record("stop_advertising");
            Ok(())
        }

        fn start_observing(&mut self, _filter: ScanFilter) -> Result<()> {
            self.record("start_observing");
            Ok(())
        }

        fn stop_observing(&mut self) -> Result<()> {
            self.record("stop_observing");
            Ok(())
        }
    }

    fn identity() -> PaymentIdentity {
        PaymentIdentity::new(
            "1234567812345678",
            "1234",
            "mcandle",
            DigitEncoding::Ascii,
            AdvertiseLayout::Data,
        )
        .expect("valid test identity")
    }

    fn matching_observation() -> Observation {
        let mut data = vec![0x02, 0x15];
        data.extend_from_slice(b"ORD-42      1234");
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0xC5]);
        Observation {
            local_name: Some("terminal".to_string()),
            address: 0xBEEF,
            rssi: -42,
            manufacturer_data: vec![(0x5246, data)],
        }
    }

    async fn collect_until_ended(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Some(event) = events.recv().await {
            let ended = matches!(event, SessionEvent::Ended);
            out.push(event);
            if ended {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn publishes_then_matches_and_tears_down() {
        let radio = FakeRadio::default();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (session, handle) =
            PaymentSession::new(radio.clone(), SessionConfig::new(identity()), event_tx);
        let task = tokio::spawn(session.run());

        handle.observation(matching_observation());
        let seen = collect_until_ended(&mut events).await;
        task.await.unwrap().unwrap();

        assert!(seen.iter().any(|e| matches!(
            e,
            SessionEvent::Scan(ScanEvent::Matched(frame)) if frame.order_number == "ORD-42"
        )));
        assert!(matches!(seen.last(), Some(SessionEvent::Ended)));

        let calls = radio.calls();
        assert_eq!(calls[0], "start_advertising:Data");
        assert_eq!(calls[1], "start_observing");
        assert!(calls.contains(&"stop_observing".to_string()));
        assert!(calls.contains(&"stop_advertising".to_string()));
    }

    #[tokio::test]
    async fn order_write_completes_the_session() {
        let radio = FakeRadio::default();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (session, handle) =
            PaymentSession::new(radio.clone(), SessionConfig::new(identity()), event_tx);
        let task = tokio::spawn(session.run());

        handle.link_connected();
        handle.gatt_write(ORDER_WRITE_CHAR_UUID, b"AT+CONNECT".to_vec());
        handle.gatt_write(ORDER_WRITE_CHAR_UUID, b"ORD-9981".to_vec());

        let seen = collect_until_ended(&mut events).await;
        task.await.unwrap().unwrap();

        assert!(seen
            .iter()
            .any(|e| matches!(e, SessionEvent::Order(OrderEvent::Connected))));
        assert!(seen.iter().any(|e| matches!(
            e,
            SessionEvent::Order(OrderEvent::OrderReceived(req)) if req.order_id == "ORD-9981"
        )));
    }

    #[tokio::test]
    async fn stop_ends_the_session() {
        let radio = FakeRadio::default();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (session, handle) =
            PaymentSession::new(radio.clone(), SessionConfig::new(identity()), event_tx);
        let task = tokio::spawn(session.run());

        handle.stop();
        let seen = collect_until_ended(&mut events).await;
        task.await.unwrap().unwrap();

        assert!(matches!(seen.last(), Some(SessionEvent::Ended)));
        assert!(radio.calls().contains(&"stop_advertising".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_timeout_ends_the_session() {
        let radio = FakeRadio::default();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let mut config = SessionConfig::new(identity());
        config.scan_timeout = Duration::from_secs(5);
        let (session, _handle) = PaymentSession::new(radio.clone(), config, event_tx);
        let task = tokio::spawn(session.run());

        let seen = collect_until_ended(&mut events).await;
        task.await.unwrap().unwrap();

        assert!(seen.iter().any(|e| matches!(
            e,
            SessionEvent::Scan(ScanEvent::TimedOut(d)) if *d == Duration::from_secs(5)
        )));
    }

    #[tokio::test]
    async fn publish_failure_surfaces_and_ends() {
        let radio = FakeRadio {
            fail_advertise: true,
            ..Default::default()
        };
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (session, _handle) =
            PaymentSession::new(radio.clone(), SessionConfig::new(identity()), event_tx);

        let result = session.run().await;
        assert!(result.is_err());

        let seen = collect_until_ended(&mut events).await;
        assert!(seen
            .iter()
            .any(|e| matches!(e, SessionEvent::Failed(reason) if reason.contains("advertiser"))));
        assert!(matches!(seen.last(), Some(SessionEvent::Ended)));
    }
}
