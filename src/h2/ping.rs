//! Adaptive flow-control (BDP) and keep-alive PING management.
//!
//! Ported from the teacher's `proto/h2/ping.rs` BDP algorithm (comment
//! block copied almost verbatim below — it is the exact algorithm this
//! module implements) and its `KeepAlive` state machine, reworked from a
//! `Future`-polling design into one driven by explicit calls from a
//! blocking connection read loop.
//!
//! # BDP Algorithm
//!
//! 1. When receiving a DATA frame, if a BDP ping isn't outstanding:
//!    1a. Record current time.
//!    1b. Send a BDP ping.
//! 2. Increment the number of received bytes.
//! 3. When the BDP ping ack is received:
//!    3a. Record duration from sent time.
//!    3b. Merge RTT with a running average.
//!    3c. Calculate bdp as bytes/rtt.
//!    3d. If bdp is over 2/3 max, set new max to bdp and update windows.

use std::time::{Duration, Instant};

pub type WindowSize = u32;

#[derive(Debug, Clone)]
pub struct Config {
    pub bdp_initial_window: Option<WindowSize>,
    pub keep_alive_interval: Option<Duration>,
    pub keep_alive_timeout: Duration,
    pub keep_alive_while_idle: bool,
}

impl Config {
    pub fn is_enabled(&self) -> bool {
        self.bdp_initial_window.is_some() || self.keep_alive_interval.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bdp_initial_window: None,
            keep_alive_interval: None,
            keep_alive_timeout: Duration::from_secs(20),
            keep_alive_while_idle: false,
        }
    }
}

struct Bdp {
    bdp: WindowSize,
    max_bandwidth: f64,
    rtt: f64,
    ping_delay: Duration,
    stable_count: u32,
}

/// Tracks in-flight pings and derives when the next BDP or keep-alive ping
/// should fire. One instance per connection.
pub struct PingManager {
    bdp: Option<Bdp>,
    keep_alive_interval: Option<Duration>,
    keep_alive_timeout: Duration,
    keep_alive_while_idle: bool,
    bytes_since_ping: u32,
    ping_sent_at: Option<Instant>,
    last_frame_at: Instant,
    active_streams: u32,
}

/// What the caller should do after an event is recorded.
pub enum Action {
    None,
    SendBdpPing,
    SendKeepAlivePing,
    CloseConnection,
}

impl PingManager {
    pub fn new(config: Config) -> PingManager {
        let bdp = config.bdp_initial_window.map(|wnd| Bdp {
            bdp: wnd,
            max_bandwidth: 0.0,
            rtt: 0.0,
            ping_delay: Duration::from_millis(100),
            stable_count: 0,
        });
        PingManager {
            bdp,
            keep_alive_interval: config.keep_alive_interval,
            keep_alive_timeout: config.keep_alive_timeout,
            keep_alive_while_idle: config.keep_alive_while_idle,
            bytes_since_ping: 0,
            ping_sent_at: None,
            last_frame_at: Instant::now(),
            active_streams: 0,
        }
    }

    pub fn note_stream_opened(&mut self) {
        self.active_streams += 1;
    }

    pub fn note_stream_closed(&mut self) {
        self.active_streams = self.active_streams.saturating_sub(1);
    }

    /// Call on every DATA frame received; returns whether a BDP ping should
    /// be sent now (step 1 of the algorithm above).
    pub fn on_data_received(&mut self, len: u32) -> bool {
        self.last_frame_at = Instant::now();
        self.bytes_since_ping += len;
        self.bdp.is_some() && self.ping_sent_at.is_none()
    }

    pub fn note_bdp_ping_sent(&mut self) {
        self.ping_sent_at = Some(Instant::now());
    }

    /// Call when a PING ack is received; returns the new initial window
    /// size if the BDP estimate grew enough to raise it (step 3d).
    pub fn on_ping_ack(&mut self) -> Option<WindowSize> {
        let sent_at = self.ping_sent_at.take()?;
        let bdp = self.bdp.as_mut()?;
        let rtt_seconds = sent_at.elapsed().as_secs_f64();
        bdp.rtt = if bdp.rtt == 0.0 {
            rtt_seconds
        } else {
            bdp.rtt * 0.9 + rtt_seconds * 0.1
        };

        let bytes = std::mem::replace(&mut self.bytes_since_ping, 0);
        if bdp.rtt <= 0.0 {
            return None;
        }
        let bandwidth = bytes as f64 / bdp.rtt;
        bdp.max_bandwidth = bdp.max_bandwidth.max(bandwidth);
        let estimate = (bdp.max_bandwidth * bdp.rtt) as u32;

        if (estimate as f64) > (bdp.bdp as f64) * 2.0 / 3.0 {
            bdp.stable_count = 0;
            bdp.bdp = estimate.max(bdp.bdp);
            Some(bdp.bdp)
        } else {
            bdp.stable_count += 1;
            None
        }
    }

    /// Call periodically (e.g. once per read-loop timeout tick) to decide
    /// whether a keep-alive PING or a timeout-driven close is due.
    pub fn tick_keep_alive(&mut self) -> Action {
        let interval = match self.keep_alive_interval {
            Some(i) => i,
            None => return Action::None,
        };
        if !self.keep_alive_while_idle && self.active_streams == 0 {
            return Action::None;
        }
        if let Some(sent_at) = self.ping_sent_at {
            if sent_at.elapsed() > self.keep_alive_timeout {
                return Action::CloseConnection;
            }
            return Action::None;
        }
        if self.last_frame_at.elapsed() >= interval {
            Action::SendKeepAlivePing
        } else {
            Action::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bdp_ping_triggers_once_per_round_trip() {
        let mut mgr = PingManager::new(Config {
            bdp_initial_window: Some(65_535),
            ..Config::default()
        });
        assert!(mgr.on_data_received(1000));
        mgr.note_bdp_ping_sent();
        assert!(!mgr.on_data_received(1000));
    }

    #[test]
    fn keep_alive_while_idle_false_skips_idle_connection() {
        let mut mgr = PingManager::new(Config {
            keep_alive_interval: Some(Duration::from_millis(1)),
            keep_alive_while_idle: false,
            ..Config::default()
        });
        assert!(matches!(mgr.tick_keep_alive(), Action::None));
    }
}
