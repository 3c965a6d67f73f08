//! Scan Matcher
//!
//! Owns the discovery state machine on the terminal side: filters
//! incoming observations, decodes iBeacon frames, and declares a match
//! against the expected customer exactly once per session.
//!
//! The matcher never talks to a radio. The driving layer feeds it
//! observations and deadline signals and schedules the [`Deadline`] values
//! it hands back; all outcomes surface as [`ScanEvent`]s on the channel
//! given at construction.

use crate::domain::models::{
    Deadline, DeadlineToken, Observation, ScanEvent, ScanFilter, SeenDevice,
};
use crate::infrastructure::bluetooth::beacon::{self, IBEACON_PREFIX};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default discovery window.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Shorter window used by the legacy device-list scan.
pub const LIST_SCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// Company identifier of the RFstar beacon modules.
pub const COMPANY_RFSTAR: u16 = 0x5246;

/// Apple's company identifier, used by off-the-shelf iBeacons.
pub const COMPANY_APPLE: u16 = 0x004C;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("target phone suffix must be exactly 4 digits")]
    InvalidTarget,
    #[error("a scan session is already active")]
    AlreadyActive,
}

/// Scan session lifecycle. Terminal outcomes reset to `Idle` so a new
/// session can start without an explicit acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Matched,
    TimedOut,
    Failed,
}

pub struct ScanMatcher {
    state: ScanState,
    target_phone_last4: String,
    target_minor: Option<u16>,
    filter: ScanFilter,
    timeout: Duration,
    timer_generation: u64,
    armed: Option<DeadlineToken>,
    events: mpsc::UnboundedSender<ScanEvent>,
}

impl ScanMatcher {
    pub fn new(events: mpsc::UnboundedSender<ScanEvent>) -> Self {
        Self {
            state: ScanState::Idle,
            target_phone_last4: String::new(),
            target_minor: None,
            filter: ScanFilter::AcceptAll,
            timeout: DEFAULT_SCAN_TIMEOUT,
            timer_generation: 0,
            armed: None,
            events,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.state == ScanState::Scanning
    }

    /// Begin a discovery session. Returns the deadline the driver must
    /// schedule. Concurrent starts are rejected, not queued.
    pub fn start(
        &mut self,
        target_phone_last4: &str,
        target_minor: Option<u16>,
        timeout: Duration,
        filter: ScanFilter,
    ) -> Result<Deadline, ScanError> {
        if self.state == ScanState::Scanning {
            return Err(ScanError::AlreadyActive);
        }
        if target_phone_last4.len() != 4
            || !target_phone_last4.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ScanError::InvalidTarget);
        }

        self.target_phone_last4 = target_phone_last4.to_string();
        self.target_minor = target_minor;
        self.filter = filter;
        self.timeout = timeout;
        self.transition(ScanState::Scanning);
        let deadline = self.arm(timeout);

        info!(
            target_phone = %self.target_phone_last4,
            ?target_minor,
            ?filter,
            timeout_secs = timeout.as_secs(),
            "scan session started"
        );
        self.emit(ScanEvent::Info("Scanning for matching signal...".to_string()));
        Ok(deadline)
    }

    /// Feed one observed advertisement into the session.
    ///
    /// Non-frame traffic is ignored silently; most of what a radio sees is
    /// unrelated. The first frame matching the target concludes the
    /// session, and nothing after it is evaluated.
    pub fn handle_observation(&mut self, observation: &Observation) {
        if self.state != ScanState::Scanning {
            return;
        }
        if !filter_accepts(self.filter, observation) {
            return;
        }

        self.emit(ScanEvent::DeviceSeen(SeenDevice {
            name: observation
                .local_name
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            address: observation.address,
            rssi: observation.rssi,
        }));

        let Some(frame) = beacon::parse_observation(observation) else {
            return;
        };

        if frame.phone_last4 != self.target_phone_last4 {
            debug!(
                frame_phone = %frame.phone_last4,
                expected = %self.target_phone_last4,
                "phone suffix mismatch"
            );
            return;
        }
        if let Some(minor) = self.target_minor {
            if frame.minor != minor {
                debug!(frame_minor = frame.minor, expected = minor, "minor mismatch");
                return;
            }
        }

        self.disarm();
        self.transition(ScanState::Matched);
        info!(order = %frame.order_number, phone = %frame.phone_last4, "scan matched");
        self.emit(ScanEvent::Matched(frame));
        self.transition(ScanState::Idle);
    }

    /// A scheduled deadline fired. Stale tokens are dropped, so a timer
    /// that outlived `stop()` or a match can never produce a late event.
    pub fn handle_deadline(&mut self, token: DeadlineToken) {
        if self.armed != Some(token) {
            debug!(?token, "stale scan deadline ignored");
            return;
        }
        self.armed = None;
        if self.state != ScanState::Scanning {
            return;
        }

        self.transition(ScanState::TimedOut);
        info!(
            timeout_secs = self.timeout.as_secs(),
            "scan window elapsed without a match"
        );
        self.emit(ScanEvent::TimedOut(self.timeout));
        self.emit(ScanEvent::Info(format!(
            "No matching signal found ({}s elapsed)",
            self.timeout.as_secs()
        )));
        self.transition(ScanState::Idle);
    }

    /// The radio layer failed mid-session. Surfaced upward; never retried.
    pub fn handle_failure(&mut self, reason: &str) {
        if self.state != ScanState::Scanning {
            return;
        }
        self.disarm();
        self.transition(ScanState::Failed);
        warn!(reason, "scan failed");
        self.emit(ScanEvent::Failed(reason.to_string()));
        self.transition(ScanState::Idle);
    }

    /// Idempotent: cancels the session from `Scanning`, no-op elsewhere.
    pub fn stop(&mut self) {
        if self.state != ScanState::Scanning {
            return;
        }
        self.disarm();
        self.transition(ScanState::Idle);
        info!("scan stopped");
        self.emit(ScanEvent::Info("Scan stopped.".to_string()));
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

    fn transition(&mut self, next: ScanState) {
        debug!(from = ?self.state, to = ?next, "scan state");
        self.state = next;
    }

    fn emit(&self, event: ScanEvent) {
        let _ = self.events.send(event);
    }
}

fn filter_accepts(filter: ScanFilter, observation: &Observation) -> bool {
    match filter {
        ScanFilter::AcceptAll => true,
        ScanFilter::Manufacturer(company_id) => observation
            .manufacturer_data
            .iter()
            .any(|(company, _)| *company == company_id),
        ScanFilter::ManufacturerIBeacon(company_id) => {
            observation.manufacturer_data.iter().any(|(company, data)| {
                *company == company_id && data.len() >= 2 && data[..2] == IBEACON_PREFIX
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(order: &str, phone: &str, minor: u16) -> Vec<u8> {
        let mut data = vec![0x02, 0x15];
        data.extend_from_slice(format!("{order:<12}").as_bytes());
        data.extend_from_slice(phone.as_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&minor.to_be_bytes());
        data.push(0xC5);
        data
    }

    fn beacon_observation(company: u16, phone: &str, minor: u16) -> Observation {
        Observation {
            local_name: Some("store-beacon".to_string()),
            address: 0xAA,
            rssi: -50,
            manufacturer_data: vec![(company, frame_bytes("ORD-1", phone, minor))],
        }
    }

    fn noise_observation() -> Observation {
        Observation {
            manufacturer_data: vec![(0x0001, vec![0xDE, 0xAD])],
            ..Default::default()
        }
    }

    fn matcher() -> (ScanMatcher, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ScanMatcher::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn start_validates_target() {
        let (mut m, _rx) = matcher();
        for bad in ["123", "12345", "12a4", ""] {
            assert_eq!(
                m.start(bad, None, DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll),
                Err(ScanError::InvalidTarget)
            );
        }
        assert_eq!(m.state(), ScanState::Idle);
    }

    #[test]
    fn concurrent_start_rejected() {
        let (mut m, _rx) = matcher();
        m.start("1234", None, DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll)
            .unwrap();
        assert_eq!(
            m.start("1234", None, DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll),
            Err(ScanError::AlreadyActive)
        );
    }

    #[test]
    fn matches_exactly_once() {
        let (mut m, mut rx) = matcher();
        m.start("1234", None, DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll)
            .unwrap();

        // Frames 1-4 miss, frame 5 matches, frame 6 arrives after the match.
        for _ in 0..4 {
            m.handle_observation(&beacon_observation(COMPANY_RFSTAR, "9999", 2));
        }
        m.handle_observation(&beacon_observation(COMPANY_RFSTAR, "1234", 2));
        m.handle_observation(&beacon_observation(COMPANY_RFSTAR, "1234", 2));

        let matched: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ScanEvent::Matched(frame) => Some(frame),
                _ => None,
            })
            .collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].phone_last4, "1234");
        assert_eq!(m.state(), ScanState::Idle);
    }

    #[test]
    fn minor_gate_applies_only_when_set() {
        let (mut m, mut rx) = matcher();
        m.start("1234", Some(7), DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll)
            .unwrap();
        m.handle_observation(&beacon_observation(COMPANY_RFSTAR, "1234", 8));
        assert!(m.is_scanning(), "minor mismatch must not match");
        m.handle_observation(&beacon_observation(COMPANY_RFSTAR, "1234", 7));
        assert!(!m.is_scanning());

        let events = drain(&mut rx);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ScanEvent::Matched(_)))
                .count(),
            1
        );
    }

    #[test]
    fn timeout_emits_once_and_returns_to_idle() {
        let (mut m, mut rx) = matcher();
        let deadline = m
            .start("1234", None, Duration::from_secs(60), ScanFilter::AcceptAll)
            .unwrap();

        m.handle_deadline(deadline.token);
        // Same token again is stale.
        m.handle_deadline(deadline.token);

        let timeouts: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ScanEvent::TimedOut(_)))
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert!(matches!(
            &timeouts[0],
            ScanEvent::TimedOut(d) if *d == Duration::from_secs(60)
        ));
        assert_eq!(m.state(), ScanState::Idle);
    }

    #[test]
    fn deadline_after_stop_is_ignored() {
        let (mut m, mut rx) = matcher();
        let deadline = m
            .start("1234", None, DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll)
            .unwrap();
        m.stop();
        drain(&mut rx);

        m.handle_deadline(deadline.token);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(m.state(), ScanState::Idle);
    }

    #[test]
    fn deadline_after_match_is_ignored() {
        let (mut m, mut rx) = matcher();
        let deadline = m
            .start("1234", None, DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll)
            .unwrap();
        m.handle_observation(&beacon_observation(COMPANY_RFSTAR, "1234", 2));
        drain(&mut rx);

        m.handle_deadline(deadline.token);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn stop_is_idempotent() {
        let (mut m, _rx) = matcher();
        m.stop();
        m.start("1234", None, DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll)
            .unwrap();
        m.stop();
        m.stop();
        assert_eq!(m.state(), ScanState::Idle);
    }

    #[test]
    fn failure_surfaces_and_resets() {
        let (mut m, mut rx) = matcher();
        m.start("1234", None, DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll)
            .unwrap();
        m.handle_failure("radio unavailable");

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ScanEvent::Failed(r) if r == "radio unavailable")));
        assert_eq!(m.state(), ScanState::Idle);
    }

    #[test]
    fn restart_after_outcome_is_allowed() {
        let (mut m, _rx) = matcher();
        let deadline = m
            .start("1234", None, DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll)
            .unwrap();
        m.handle_deadline(deadline.token);
        m.start("5678", None, LIST_SCAN_TIMEOUT, ScanFilter::AcceptAll)
            .unwrap();
        assert!(m.is_scanning());
    }

    #[test]
    fn manufacturer_filter_blocks_other_companies() {
        let (mut m, mut rx) = matcher();
        m.start(
            "1234",
            None,
            DEFAULT_SCAN_TIMEOUT,
            ScanFilter::Manufacturer(COMPANY_RFSTAR),
        )
        .unwrap();
        drain(&mut rx);

        m.handle_observation(&beacon_observation(COMPANY_APPLE, "1234", 2));
        assert!(m.is_scanning(), "filtered observation must not match");
        assert!(drain(&mut rx)
            .iter()
            .all(|e| !matches!(e, ScanEvent::DeviceSeen(_))));

        m.handle_observation(&beacon_observation(COMPANY_RFSTAR, "1234", 2));
        assert!(!m.is_scanning());
    }

    #[test]
    fn ibeacon_filter_requires_prefix() {
        let (mut m, mut rx) = matcher();
        m.start(
            "1234",
            None,
            DEFAULT_SCAN_TIMEOUT,
            ScanFilter::ManufacturerIBeacon(COMPANY_RFSTAR),
        )
        .unwrap();
        drain(&mut rx);

        // Right company, not an iBeacon payload.
        m.handle_observation(&Observation {
            manufacturer_data: vec![(COMPANY_RFSTAR, vec![0x01, 0x02, 0x03])],
            ..Default::default()
        });
        assert!(drain(&mut rx)
            .iter()
            .all(|e| !matches!(e, ScanEvent::DeviceSeen(_))));
        assert!(m.is_scanning());

        m.handle_observation(&beacon_observation(COMPANY_RFSTAR, "1234", 2));
        assert!(!m.is_scanning());
    }

    #[test]
    fn noise_is_ignored_without_events() {
        let (mut m, mut rx) = matcher();
        m.start("1234", None, DEFAULT_SCAN_TIMEOUT, ScanFilter::AcceptAll)
            .unwrap();
        drain(&mut rx);

        m.handle_observation(&noise_observation());
        let events = drain(&mut rx);
        // The device is surfaced, but nothing else happens.
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ScanEvent::DeviceSeen(_)));
        assert!(m.is_scanning());
    }
}
