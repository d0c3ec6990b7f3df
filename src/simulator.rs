use crate::tuning::Tuning;
use crate::types::*;
use crossbeam_channel::Sender;
use log::{info, warn};
use std::thread;
use std::time::Duration;

/// Plays a scripted guitar performance as MIDI messages, the way a
/// hexaphonic guitar controller would send them: one channel per string,
/// bends on the pitch wheel, hammer-ons and pull-offs only as wheel moves.
pub struct Simulator {
    clock: SessionClock,
    tx: Sender<InputEvent>,
    tuning: Tuning,
    one_step: [i16; 2],
}

/// One message of a rendered script, `at_ms` after the script starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedMessage {
    pub at_ms: u64,
    pub message: MidiMessage,
}

/// Spacing of pitch-wheel messages during a bend ramp.
const WHEEL_STEP_MS: u32 = 10;

impl Simulator {
    pub fn new(clock: SessionClock, tx: Sender<InputEvent>, tuning: Tuning, one_step: [i16; 2]) -> Self {
        Self {
            clock,
            tx,
            tuning,
            one_step,
        }
    }

    /// Play a named demo in real time. Blocks the calling thread.
    /// With `repeat`, loops until the receiving side goes away.
    pub fn run(&mut self, demo: &str, repeat: bool) {
        let gestures = match demo {
            "basic" => basic_sequence(),
            "licks" => lick_sequence(),
            other => {
                warn!("Unknown demo '{}', playing 'basic'", other);
                basic_sequence()
            }
        };
        let script = render(&gestures, &self.tuning, self.one_step);
        info!("Simulator playing '{}' ({} messages)", demo, script.len());

        loop {
            if !self.play(&script) {
                info!("Simulator output closed");
                return;
            }
            if !repeat {
                info!("Demo sequence complete");
                return;
            }
        }
    }

    /// Returns false once nobody is listening.
    fn play(&self, script: &[TimedMessage]) -> bool {
        let mut elapsed_ms = 0;
        for tm in script {
            if tm.at_ms > elapsed_ms {
                thread::sleep(Duration::from_millis(tm.at_ms - elapsed_ms));
                elapsed_ms = tm.at_ms;
            }
            let event = MidiEvent {
                timestamp_us: self.clock.now_us(),
                message: tm.message,
            };
            if self.tx.send(InputEvent::Midi(event)).is_err() {
                return false;
            }
        }
        true
    }
}

// ─── Gesture types ──────────────────────────────────────────────────────────

/// Strings are numbered 1..=6 as on the instrument.
#[derive(Debug, Clone)]
pub enum Gesture {
    Hold { ms: u32 },
    /// Pick a string at a fret.
    Pluck { string: u8, fret: u8 },
    /// Pick several strings, `spread_ms` apart from string 6 up to string 1.
    Strum { frets: [Option<u8>; STRING_COUNT], spread_ms: u32 },
    /// Ramp the wheel to `to` over `ms`.
    Bend { string: u8, to: i16, ms: u32 },
    /// Snap the wheel back to centre.
    BendRelease { string: u8 },
    /// Bend a full step up then reset: the controller's hammer-on.
    HammerOn { string: u8, ms: u32 },
    /// Jump straight to the lower one-step value: the controller's pull-off.
    PullOff { string: u8 },
    /// Note-off for the note first picked on the string.
    Release { string: u8 },
    /// Note-off on a string for a note it is not playing.
    StrayNoteOff { string: u8, note: u8 },
    /// Message on a channel outside the guitar (a drum pad, say).
    Foreign { channel: u8, note: u8 },
}

#[derive(Clone, Copy, Default)]
struct StringTrack {
    /// Note the controller picked, used for its note-off.
    picked: Option<u8>,
    wheel: i16,
}

/// Turn gestures into a timed message list.
pub fn render(gestures: &[Gesture], tuning: &Tuning, one_step: [i16; 2]) -> Vec<TimedMessage> {
    let mut out = Vec::new();
    let mut tracks = [StringTrack::default(); STRING_COUNT];
    let mut now: u64 = 0;
    let [down, up] = one_step;

    for gesture in gestures {
        match gesture {
            Gesture::Hold { ms } => now += *ms as u64,

            Gesture::Pluck { string, fret } => {
                pluck(&mut out, &mut tracks, tuning, now, *string, *fret);
            }

            Gesture::Strum { frets, spread_ms } => {
                for idx in (0..STRING_COUNT).rev() {
                    if let Some(fret) = frets[idx] {
                        pluck(&mut out, &mut tracks, tuning, now, idx as u8 + 1, fret);
                        now += *spread_ms as u64;
                    }
                }
            }

            Gesture::Bend { string, to, ms } => {
                now = ramp(&mut out, &mut tracks, now, *string, *to, *ms);
            }

            Gesture::BendRelease { string } => {
                wheel(&mut out, &mut tracks, now, *string, 0);
            }

            Gesture::HammerOn { string, ms } => {
                now = ramp(&mut out, &mut tracks, now, *string, up, *ms);
                now += WHEEL_STEP_MS as u64;
                wheel(&mut out, &mut tracks, now, *string, 0);
            }

            Gesture::PullOff { string } => {
                wheel(&mut out, &mut tracks, now, *string, down);
            }

            Gesture::Release { string } => {
                let track = &mut tracks[(*string - 1) as usize];
                if let Some(note) = track.picked.take() {
                    out.push(TimedMessage {
                        at_ms: now,
                        message: MidiMessage::NoteOff {
                            channel: *string - 1,
                            note,
                        },
                    });
                }
                track.wheel = 0;
            }

            Gesture::StrayNoteOff { string, note } => {
                out.push(TimedMessage {
                    at_ms: now,
                    message: MidiMessage::NoteOff {
                        channel: *string - 1,
                        note: *note,
                    },
                });
            }

            Gesture::Foreign { channel, note } => {
                out.push(TimedMessage {
                    at_ms: now,
                    message: MidiMessage::NoteOn {
                        channel: *channel,
                        note: *note,
                        velocity: 100,
                    },
                });
            }
        }
    }
    out
}

fn pluck(
    out: &mut Vec<TimedMessage>,
    tracks: &mut [StringTrack; STRING_COUNT],
    tuning: &Tuning,
    at_ms: u64,
    string: u8,
    fret: u8,
) {
    let idx = (string - 1) as usize;
    let note = tuning.open_strings[idx] + fret;
    // A real controller re-centres the wheel before the next pick.
    if tracks[idx].wheel != 0 {
        wheel(out, tracks, at_ms, string, 0);
    }
    out.push(TimedMessage {
        at_ms,
        message: MidiMessage::NoteOn {
            channel: string - 1,
            note,
            velocity: 96,
        },
    });
    tracks[idx].picked = Some(note);
}

fn wheel(
    out: &mut Vec<TimedMessage>,
    tracks: &mut [StringTrack; STRING_COUNT],
    at_ms: u64,
    string: u8,
    pitch: i16,
) {
    tracks[(string - 1) as usize].wheel = pitch;
    out.push(TimedMessage {
        at_ms,
        message: MidiMessage::PitchWheel {
            channel: string - 1,
            pitch,
        },
    });
}

/// Linear wheel ramp ending exactly on `to`. Returns the time of the last step.
fn ramp(
    out: &mut Vec<TimedMessage>,
    tracks: &mut [StringTrack; STRING_COUNT],
    start_ms: u64,
    string: u8,
    to: i16,
    ms: u32,
) -> u64 {
    let from = tracks[(string - 1) as usize].wheel as f32;
    let steps = (ms / WHEEL_STEP_MS).max(1);
    let mut at = start_ms;
    for i in 1..=steps {
        at += WHEEL_STEP_MS as u64;
        let pitch = if i == steps {
            to
        } else {
            lerp(from, to as f32, smoothstep(i as f32 / steps as f32)).round() as i16
        };
        wheel(out, tracks, at, string, pitch);
    }
    at
}

/// Open chords and a few bends: every message kind, no implicit notes.
pub fn basic_sequence() -> Vec<Gesture> {
    vec![
        Gesture::Hold { ms: 300 },
        // E major, open
        Gesture::Strum {
            frets: [Some(0), Some(0), Some(1), Some(2), Some(2), Some(0)],
            spread_ms: 15,
        },
        Gesture::Hold { ms: 800 },
        Gesture::Release { string: 1 },
        Gesture::Release { string: 2 },
        Gesture::Release { string: 3 },
        Gesture::Release { string: 4 },
        Gesture::Release { string: 5 },
        Gesture::Release { string: 6 },
        Gesture::Hold { ms: 200 },
        // Half-step bend on string 2, 8th fret, and back
        Gesture::Pluck { string: 2, fret: 8 },
        Gesture::Hold { ms: 200 },
        Gesture::Bend { string: 2, to: 2500, ms: 250 },
        Gesture::Hold { ms: 300 },
        Gesture::Bend { string: 2, to: 0, ms: 200 },
        Gesture::Release { string: 2 },
        // A drum pad on channel 10 must not disturb anything
        Gesture::Foreign { channel: 9, note: 36 },
        Gesture::Hold { ms: 300 },
        // A5 power chord
        Gesture::Strum {
            frets: [None, None, None, Some(7), Some(7), Some(5)],
            spread_ms: 10,
        },
        Gesture::Hold { ms: 600 },
        Gesture::StrayNoteOff { string: 5, note: 40 },
        Gesture::Release { string: 4 },
        Gesture::Release { string: 5 },
        Gesture::Release { string: 6 },
        Gesture::Hold { ms: 500 },
    ]
}

/// Blues phrase in E with hammer-ons and pull-offs.
pub fn lick_sequence() -> Vec<Gesture> {
    vec![
        Gesture::Hold { ms: 300 },
        Gesture::Pluck { string: 3, fret: 7 },
        Gesture::Hold { ms: 150 },
        Gesture::HammerOn { string: 3, ms: 60 },
        Gesture::Hold { ms: 250 },
        Gesture::Release { string: 3 },
        Gesture::Pluck { string: 2, fret: 8 },
        Gesture::Hold { ms: 200 },
        Gesture::PullOff { string: 2 },
        Gesture::Hold { ms: 250 },
        Gesture::Release { string: 2 },
        Gesture::Pluck { string: 1, fret: 12 },
        Gesture::Hold { ms: 100 },
        Gesture::Bend { string: 1, to: 5000, ms: 300 },
        Gesture::Hold { ms: 400 },
        Gesture::BendRelease { string: 1 },
        Gesture::Hold { ms: 100 },
        Gesture::Release { string: 1 },
        Gesture::Pluck { string: 5, fret: 7 },
        Gesture::Pluck { string: 6, fret: 0 },
        Gesture::Hold { ms: 700 },
        Gesture::Release { string: 5 },
        Gesture::Release { string: 6 },
        Gesture::Hold { ms: 500 },
    ]
}

// ─── Math helpers ───────────────────────────────────────────────────────────

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Smooth interpolation (ease in/out)
fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::standard;

    const ONE_STEP: [i16; 2] = [-4095, 4096];

    #[test]
    fn test_pluck_and_release() {
        let script = render(
            &[
                Gesture::Pluck { string: 6, fret: 3 },
                Gesture::Hold { ms: 100 },
                Gesture::Release { string: 6 },
            ],
            &standard(),
            ONE_STEP,
        );
        assert_eq!(
            script,
            vec![
                TimedMessage {
                    at_ms: 0,
                    message: MidiMessage::NoteOn { channel: 5, note: 43, velocity: 96 }
                },
                TimedMessage {
                    at_ms: 100,
                    message: MidiMessage::NoteOff { channel: 5, note: 43 }
                },
            ]
        );
    }

    #[test]
    fn test_ramp_ends_exactly_on_target() {
        let script = render(
            &[
                Gesture::Pluck { string: 1, fret: 5 },
                Gesture::Bend { string: 1, to: 3333, ms: 95 },
            ],
            &standard(),
            ONE_STEP,
        );
        let wheel: Vec<i16> = script
            .iter()
            .filter_map(|t| match t.message {
                MidiMessage::PitchWheel { pitch, .. } => Some(pitch),
                _ => None,
            })
            .collect();
        assert_eq!(wheel.len(), 9);
        assert_eq!(*wheel.last().unwrap(), 3333);
        assert!(wheel.windows(2).all(|w| w[0] <= w[1]), "ramp is monotonic");
    }

    #[test]
    fn test_hammer_on_ramps_to_extreme_then_resets() {
        let script = render(
            &[
                Gesture::Pluck { string: 3, fret: 7 },
                Gesture::HammerOn { string: 3, ms: 40 },
            ],
            &standard(),
            ONE_STEP,
        );
        let n = script.len();
        assert_eq!(script[n - 2].message, MidiMessage::PitchWheel { channel: 2, pitch: 4096 });
        assert_eq!(script[n - 1].message, MidiMessage::PitchWheel { channel: 2, pitch: 0 });
        assert!(script.windows(2).all(|w| w[0].at_ms <= w[1].at_ms));
    }

    #[test]
    fn test_strum_goes_low_to_high() {
        let script = render(
            &[Gesture::Strum {
                frets: [Some(0), None, None, None, None, Some(0)],
                spread_ms: 20,
            }],
            &standard(),
            ONE_STEP,
        );
        assert_eq!(script.len(), 2);
        assert_eq!(script[0].message.channel(), 5);
        assert_eq!(script[1].message.channel(), 0);
        assert_eq!(script[1].at_ms, 20);
    }

    #[test]
    fn test_demo_sequences_render() {
        assert!(!render(&basic_sequence(), &standard(), ONE_STEP).is_empty());
        assert!(!render(&lick_sequence(), &standard(), ONE_STEP).is_empty());
    }
}
