use std::fmt;
use std::time::{Duration, Instant};

pub const TRACE_TARGET: &str = "phasebench::trace";

/// A protocol lifecycle event reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AcquireStart,
    DnsStart,
    DnsDone,
    ConnectStart,
    ConnectDone,
    HandshakeStart,
    HandshakeDone,
    Acquired,
    FirstResponseByte,
    ResponseRead,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::AcquireStart => "acquire_start",
            Phase::DnsStart => "dns_start",
            Phase::DnsDone => "dns_done",
            Phase::ConnectStart => "connect_start",
            Phase::ConnectDone => "connect_done",
            Phase::HandshakeStart => "handshake_start",
            Phase::HandshakeDone => "handshake_done",
            Phase::Acquired => "acquired",
            Phase::FirstResponseByte => "first_response_byte",
            Phase::ResponseRead => "response_read",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone)]
pub struct PhaseTimestamps {
    pub acquire_start: Option<Instant>,
    pub dns_start: Option<Instant>,
    pub dns_done: Option<Instant>,
    pub connect_start: Option<Instant>,
    pub connect_done: Option<Instant>,
    pub handshake_start: Option<Instant>,
    pub handshake_done: Option<Instant>,
    pub acquired: Option<Instant>,
    pub first_response_byte: Option<Instant>,
    pub response_read: Option<Instant>,
}

impl PhaseTimestamps {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, phase: Phase) -> &mut Option<Instant> {
        match phase {
            Phase::AcquireStart => &mut self.acquire_start,
            Phase::DnsStart => &mut self.dns_start,
            Phase::DnsDone => &mut self.dns_done,
            Phase::ConnectStart => &mut self.connect_start,
            Phase::ConnectDone => &mut self.connect_done,
            Phase::HandshakeStart => &mut self.handshake_start,
            Phase::HandshakeDone => &mut self.handshake_done,
            Phase::Acquired => &mut self.acquired,
            Phase::FirstResponseByte => &mut self.first_response_byte,
            Phase::ResponseRead => &mut self.response_read,
        }
    }

    /// Stores `at` for `phase` unless the phase already fired. Returns whether
    /// the instant was kept.
    pub fn record(&mut self, phase: Phase, at: Instant) -> bool {
        let slot = self.slot(phase);
        if slot.is_some() {
            return false;
        }
        *slot = Some(at);
        true
    }
}

fn between(start: Option<Instant>, end: Option<Instant>) -> Duration {
    match (start, end) {
        (Some(start), Some(end)) => end.saturating_duration_since(start),
        _ => Duration::ZERO,
    }
}

/// Collects phase events for a single exchange.
///
/// `finalize` takes the timer by value, so durations are derived exactly once
/// and only after the transport has handed the response back.
#[derive(Debug)]
pub struct PhaseTimer {
    task_id: usize,
    origin: Instant,
    stamps: PhaseTimestamps,
}

impl PhaseTimer {
    pub fn new(task_id: usize) -> Self {
        Self {
            task_id,
            origin: Instant::now(),
            stamps: PhaseTimestamps::new(),
        }
    }

    pub fn on_event(&mut self, phase: Phase) {
        self.on_event_at(phase, Instant::now());
    }

    pub fn on_event_at(&mut self, phase: Phase, at: Instant) {
        if self.stamps.record(phase, at) {
            trace!(
                target: TRACE_TARGET,
                task = self.task_id,
                phase = phase.as_str(),
                offset_us = at.saturating_duration_since(self.origin).as_micros() as u64,
                "phase event"
            );
        } else {
            trace!("task {}: ignoring repeated {} event", self.task_id, phase);
        }
    }

    pub fn timestamps(&self) -> &PhaseTimestamps {
        &self.stamps
    }

    pub fn finalize(self) -> PhaseDurations {
        PhaseDurations::from_timestamps(&self.stamps)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PhaseDurations {
    pub dns_lookup: Duration,
    pub connection_establishment: Duration,
    pub handshake: Duration,
    pub server_processing: Duration,
    pub content_transfer: Duration,
    pub connect: Duration,
    pub pre_transfer: Duration,
    pub start_transfer: Duration,
    pub total: Duration,
}

impl PhaseDurations {
    pub fn from_timestamps(t: &PhaseTimestamps) -> Self {
        Self {
            dns_lookup: between(t.dns_start, t.dns_done),
            connection_establishment: between(t.acquire_start, t.acquired),
            handshake: between(t.handshake_start, t.handshake_done),
            server_processing: between(t.acquired, t.first_response_byte),
            content_transfer: between(t.acquired, t.response_read),
            connect: between(t.dns_start, t.connect_done),
            pre_transfer: between(t.dns_start, t.acquired),
            start_transfer: between(t.dns_start, t.first_response_byte),
            total: between(t.acquire_start, t.response_read),
        }
    }

    /// The nine durations in persisted column order.
    pub fn as_array(&self) -> [Duration; 9] {
        [
            self.dns_lookup,
            self.connection_establishment,
            self.handshake,
            self.server_processing,
            self.content_transfer,
            self.connect,
            self.pre_transfer,
            self.start_transfer,
            self.total,
        ]
    }
}

impl fmt::Display for PhaseDurations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nTime breakdown:")?;
        writeln!(f, "  DNS lookup:        {:>12?}", self.dns_lookup)?;
        writeln!(f, "  Connection:        {:>12?}", self.connection_establishment)?;
        writeln!(f, "  Handshake:         {:>12?}", self.handshake)?;
        writeln!(f, "  Server processing: {:>12?}", self.server_processing)?;
        writeln!(f, "  Content transfer:  {:>12?}", self.content_transfer)?;
        writeln!(f, "  Connect:           {:>12?}", self.connect)?;
        writeln!(f, "  Pretransfer:       {:>12?}", self.pre_transfer)?;
        writeln!(f, "  Starttransfer:     {:>12?}", self.start_transfer)?;
        write!(f, "  Total:             {:>12?}", self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_sequence(base: Instant) -> PhaseTimestamps {
        let ms = |n: u64| base + Duration::from_millis(n);
        PhaseTimestamps {
            acquire_start: Some(ms(0)),
            dns_start: Some(ms(1)),
            dns_done: Some(ms(4)),
            connect_start: Some(ms(4)),
            connect_done: Some(ms(9)),
            handshake_start: Some(ms(9)),
            handshake_done: Some(ms(20)),
            acquired: Some(ms(22)),
            first_response_byte: Some(ms(30)),
            response_read: Some(ms(45)),
        }
    }

    #[test]
    fn derives_all_nine_phases() {
        let base = Instant::now();
        let d = PhaseDurations::from_timestamps(&full_sequence(base));
        let ms = Duration::from_millis;

        assert_eq!(d.dns_lookup, ms(3));
        assert_eq!(d.connection_establishment, ms(22));
        assert_eq!(d.handshake, ms(11));
        assert_eq!(d.server_processing, ms(8));
        assert_eq!(d.content_transfer, ms(23));
        assert_eq!(d.connect, ms(8));
        assert_eq!(d.pre_transfer, ms(21));
        assert_eq!(d.start_transfer, ms(29));
        assert_eq!(d.total, ms(45));
    }

    #[test]
    fn missing_operand_yields_zero() {
        let base = Instant::now();
        let mut stamps = full_sequence(base);
        stamps.dns_start = None;
        stamps.handshake_done = None;

        let d = PhaseDurations::from_timestamps(&stamps);
        assert_eq!(d.dns_lookup, Duration::ZERO);
        assert_eq!(d.connect, Duration::ZERO);
        assert_eq!(d.pre_transfer, Duration::ZERO);
        assert_eq!(d.start_transfer, Duration::ZERO);
        assert_eq!(d.handshake, Duration::ZERO);
        assert_eq!(d.total, Duration::from_millis(45));
    }

    #[test]
    fn empty_timestamps_are_all_zero() {
        let d = PhaseTimer::new(0).finalize();
        assert_eq!(d, PhaseDurations::default());
        assert!(d.as_array().iter().all(|v| v.is_zero()));
    }

    #[test]
    fn out_of_order_instants_never_go_negative() {
        let base = Instant::now();
        let mut stamps = full_sequence(base);
        stamps.first_response_byte = Some(base);

        let d = PhaseDurations::from_timestamps(&stamps);
        assert_eq!(d.server_processing, Duration::ZERO);
        assert_eq!(d.start_transfer, Duration::ZERO);
    }

    #[test]
    fn first_occurrence_wins() {
        let base = Instant::now();
        let mut timer = PhaseTimer::new(7);
        timer.on_event_at(Phase::AcquireStart, base);
        timer.on_event_at(Phase::AcquireStart, base + Duration::from_millis(50));
        timer.on_event_at(Phase::ResponseRead, base + Duration::from_millis(60));

        assert_eq!(timer.timestamps().acquire_start, Some(base));
        assert_eq!(timer.finalize().total, Duration::from_millis(60));
    }
}
