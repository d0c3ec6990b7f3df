use crate::interpreter::{InterpreterStats, Outcome, SignalInterpreter};
use crate::types::*;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The coordinator receives InputEvents, feeds each MIDI message to the
/// signal interpreter, and publishes a VisualState snapshot after every
/// message addressed to one of the six strings.
///
/// Messages are applied strictly in arrival order, one at a time. Each
/// consumer gets its own owned snapshot, so no renderer ever sees a
/// half-applied transition (a hammer-on moves its key in one snapshot).
///
/// The session ends when every input sender is dropped or the shutdown
/// flag is raised.
pub struct Coordinator {
    input_rx: Receiver<InputEvent>,
    state_txs: Vec<Sender<VisualState>>,
    interpreter: SignalInterpreter,
    shutdown: Arc<AtomicBool>,
}

/// How often the run loop looks at the shutdown flag while idle.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

impl Coordinator {
    pub fn new(
        input_rx: Receiver<InputEvent>,
        state_txs: Vec<Sender<VisualState>>,
        interpreter: SignalInterpreter,
    ) -> Self {
        Self {
            input_rx,
            state_txs,
            interpreter,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a flag that ends the session when set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    /// Run until the input closes or shutdown is requested.
    /// Returns the interpreter counters for the session.
    pub fn run(&mut self) -> InterpreterStats {
        info!("Coordinator running");

        // Renderers start from a blank picture.
        self.publish(self.interpreter.snapshot());

        while !self.shutdown.load(Ordering::Relaxed) {
            let first = match self.input_rx.recv_timeout(SHUTDOWN_POLL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            // Drain everything already pending before looking at the flag again.
            self.apply(first);
            while let Ok(event) = self.input_rx.try_recv() {
                self.apply(event);
            }
        }

        let stats = self.interpreter.stats();
        info!(
            "Coordinator shutting down after {} messages ({} ignored, {} mismatched note-offs, {} hammer-ons/pull-offs)",
            stats.processed, stats.ignored, stats.inconsistent, stats.hammers
        );
        stats
    }

    fn apply(&mut self, event: InputEvent) {
        match event {
            InputEvent::Midi(midi) => {
                let outcome = self.interpreter.handle(&midi.message);
                if outcome == Outcome::Ignored {
                    return;
                }
                let snapshot = self.interpreter.snapshot();
                trace!("t={}µs {}", midi.timestamp_us, snapshot);
                if snapshot.seq % 1000 == 0 {
                    debug!("Coordinator: {} messages processed", snapshot.seq);
                }
                self.publish(snapshot);
            }
        }
    }

    fn publish(&self, snapshot: VisualState) {
        for tx in &self.state_txs {
            let _ = tx.send(snapshot.clone());
        }
    }
}
