//! Latency measurement through `Ping`/`Pong` messages.
//!
//! The rollback algorithm never looks at these numbers; they exist so applications can
//! pick a prediction window or show a connection indicator.

use std::collections::BTreeMap;

use web_time::{Duration, Instant};

use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationSeverity};

/// Pings older than this many outstanding requests are forgotten.
const MAX_OUTSTANDING_PINGS: usize = 16;

/// Snapshot of link and engine health.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "NetworkStats should be inspected or used after being queried"]
pub struct NetworkStats {
    /// Smoothed round-trip time in milliseconds. 0 until the first `Pong`.
    pub ping: u128,
    /// The most recent round-trip sample in milliseconds.
    pub last_round_trip: u128,
    /// Pings sent so far.
    pub pings_sent: u64,
    /// Pongs matched to an outstanding ping.
    pub pongs_received: u64,
    /// History entries beyond the confirmed frontier.
    pub unconfirmed_frames: usize,
    /// Remote inputs waiting for frames this peer has not simulated yet.
    pub queued_inputs: usize,
}

impl NetworkStats {
    /// Creates empty stats.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            ping,
            last_round_trip,
            pings_sent,
            pongs_received,
            unconfirmed_frames,
            queued_inputs,
        } = self;

        write!(
            f,
            "NetworkStats {{ ping: {}ms (last {}ms), pongs: {}/{}, unconfirmed: {}, queued: {} }}",
            ping, last_round_trip, pongs_received, pings_sent, unconfirmed_frames, queued_inputs
        )
    }
}

/// Matches `Pong`s to the `Ping`s that caused them and keeps a smoothed round-trip time.
#[derive(Debug, Clone, Default)]
pub struct PingTracker {
    next_nonce: u64,
    outstanding: BTreeMap<u64, Instant>,
    smoothed: Option<Duration>,
    last_sample: Option<Duration>,
    pings_sent: u64,
    pongs_received: u64,
}

impl PingTracker {
    /// Creates a tracker with no samples.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a ping sent now and returns the nonce to put in the message.
    pub fn send_ping(&mut self) -> u64 {
        self.send_ping_at(Instant::now())
    }

    /// Registers a ping sent at `now`.
    pub fn send_ping_at(&mut self, now: Instant) -> u64 {
        let nonce = self.next_nonce;
        self.next_nonce = self.next_nonce.wrapping_add(1);
        self.outstanding.insert(nonce, now);
        while self.outstanding.len() > MAX_OUTSTANDING_PINGS {
            self.outstanding.pop_first();
        }
        self.pings_sent += 1;
        nonce
    }

    /// Handles a pong received now. Returns the round trip, or `None` for an unknown nonce.
    pub fn on_pong(&mut self, nonce: u64) -> Option<Duration> {
        self.on_pong_at(nonce, Instant::now())
    }

    /// Handles a pong received at `now`.
    pub fn on_pong_at(&mut self, nonce: u64, now: Instant) -> Option<Duration> {
        let Some(sent) = self.outstanding.remove(&nonce) else {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::Network,
                "pong with unknown or expired nonce {}",
                nonce
            );
            return None;
        };
        let sample = now.saturating_duration_since(sent);
        // exponentially weighted, 1/8 gain
        self.smoothed = Some(match self.smoothed {
            None => sample,
            Some(previous) => (previous * 7 + sample) / 8,
        });
        self.last_sample = Some(sample);
        self.pongs_received += 1;
        Some(sample)
    }

    /// Smoothed round-trip time, once at least one pong arrived.
    #[must_use]
    pub fn round_trip(&self) -> Option<Duration> {
        self.smoothed
    }

    /// Number of pings still waiting for an answer.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Writes the latency fields of `stats`.
    pub fn fill(&self, stats: &mut NetworkStats) {
        stats.ping = self.smoothed.map_or(0, |d| d.as_millis());
        stats.last_round_trip = self.last_sample.map_or(0, |d| d.as_millis());
        stats.pings_sent = self.pings_sent;
        stats.pongs_received = self.pongs_received;
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_sets_round_trip() {
        let start = Instant::now();
        let mut tracker = PingTracker::new();
        let nonce = tracker.send_ping_at(start);
        let rtt = tracker
            .on_pong_at(nonce, start + Duration::from_millis(80))
            .unwrap();
        assert_eq!(rtt, Duration::from_millis(80));
        assert_eq!(tracker.round_trip(), Some(Duration::from_millis(80)));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn later_samples_are_smoothed() {
        let start = Instant::now();
        let mut tracker = PingTracker::new();
        let a = tracker.send_ping_at(start);
        tracker.on_pong_at(a, start + Duration::from_millis(80));
        let b = tracker.send_ping_at(start);
        tracker.on_pong_at(b, start + Duration::from_millis(160));
        assert_eq!(tracker.round_trip(), Some(Duration::from_millis(90)));
    }

    #[test]
    fn unknown_nonce_is_ignored() {
        let mut tracker = PingTracker::new();
        assert!(tracker.on_pong(42).is_none());
        assert!(tracker.round_trip().is_none());
    }

    #[test]
    fn duplicate_pong_counts_once() {
        let start = Instant::now();
        let mut tracker = PingTracker::new();
        let nonce = tracker.send_ping_at(start);
        assert!(tracker.on_pong_at(nonce, start).is_some());
        assert!(tracker.on_pong_at(nonce, start).is_none());
    }

    #[test]
    fn outstanding_pings_are_bounded() {
        let start = Instant::now();
        let mut tracker = PingTracker::new();
        let first = tracker.send_ping_at(start);
        for _ in 0..MAX_OUTSTANDING_PINGS {
            tracker.send_ping_at(start);
        }
        assert_eq!(tracker.outstanding(), MAX_OUTSTANDING_PINGS);
        assert!(tracker.on_pong_at(first, start).is_none());
    }

    #[test]
    fn fill_writes_latency_fields() {
        let start = Instant::now();
        let mut tracker = PingTracker::new();
        let nonce = tracker.send_ping_at(start);
        tracker.on_pong_at(nonce, start + Duration::from_millis(30));

        let mut stats = NetworkStats::new();
        tracker.fill(&mut stats);
        assert_eq!(stats.ping, 30);
        assert_eq!(stats.pings_sent, 1);
        assert_eq!(stats.pongs_received, 1);
        assert!(stats.to_string().contains("ping: 30ms"));
    }
}
