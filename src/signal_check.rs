//! "Is anything coming in?" diagnostic.
//!
//! Listens to the input for a fixed wall-clock window and keeps a rolling
//! log of what arrived. The log holds at most `LOG_LIMIT` lines; when it
//! fills up it is wiped and starts over, like a console that clears itself.

use crate::types::*;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{info, warn};
use std::time::{Duration, Instant};

pub const LOG_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalReport {
    /// Nothing arrived before the timeout.
    NoSignal,
    /// `total` messages arrived; `lines` are the most recent log page.
    Received { total: usize, lines: Vec<String> },
}

pub struct SignalCheck {
    lines: Vec<String>,
    total: usize,
}

impl SignalCheck {
    pub fn new() -> Self {
        Self {
            lines: Vec::with_capacity(LOG_LIMIT),
            total: 0,
        }
    }

    fn add_log(&mut self, line: String) {
        if self.lines.len() >= LOG_LIMIT {
            self.lines.clear();
        }
        self.lines.push(line);
        self.total += 1;
    }

    /// Block for up to `timeout`, logging every MIDI event received.
    /// Returns early if the input disconnects.
    pub fn listen(mut self, rx: &Receiver<InputEvent>, timeout: Duration) -> SignalReport {
        info!("Listening for MIDI input for {:?}...", timeout);
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(InputEvent::Midi(ev)) => {
                    let line = format!("{:>10}µs  {}", ev.timestamp_us, ev.message);
                    info!("{}", line);
                    self.add_log(line);
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if self.total == 0 {
            warn!("No signal");
            SignalReport::NoSignal
        } else {
            info!("Received {} message(s)", self.total);
            SignalReport::Received {
                total: self.total,
                lines: self.lines,
            }
        }
    }
}

impl Default for SignalCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn event(ts: u64, note: u8) -> InputEvent {
        InputEvent::Midi(MidiEvent {
            timestamp_us: ts,
            message: MidiMessage::NoteOn { channel: 0, note, velocity: 90 },
        })
    }

    #[test]
    fn test_silence_reports_no_signal() {
        let (_tx, rx) = unbounded::<InputEvent>();
        let report = SignalCheck::new().listen(&rx, Duration::from_millis(30));
        assert_eq!(report, SignalReport::NoSignal);
    }

    #[test]
    fn test_logs_received_messages() {
        let (tx, rx) = unbounded();
        tx.send(event(10, 64)).unwrap();
        tx.send(event(20, 65)).unwrap();
        drop(tx);
        match SignalCheck::new().listen(&rx, Duration::from_secs(2)) {
            SignalReport::Received { total, lines } => {
                assert_eq!(total, 2);
                assert_eq!(lines.len(), 2);
                assert!(lines[1].contains("note=65"), "got {}", lines[1]);
            }
            other => panic!("expected messages, got {:?}", other),
        }
    }

    #[test]
    fn test_log_wraps_at_limit() {
        let (tx, rx) = unbounded();
        for i in 0..(LOG_LIMIT + 3) {
            tx.send(event(i as u64, 60)).unwrap();
        }
        drop(tx);
        match SignalCheck::new().listen(&rx, Duration::from_secs(2)) {
            SignalReport::Received { total, lines } => {
                assert_eq!(total, LOG_LIMIT + 3);
                assert_eq!(lines.len(), 3);
            }
            other => panic!("expected messages, got {:?}", other),
        }
    }
}
