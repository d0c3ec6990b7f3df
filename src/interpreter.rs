use crate::bend::BendMapper;
use crate::note_table::NoteTable;
use crate::tuning::SessionConfig;
use crate::types::*;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which earlier message the hammer-on detector compares against.
///
/// `Shared` keeps one slot for the whole instrument, so a bend on one string
/// can decide whether a reset on another string is a hammer-on. `PerString`
/// only looks at the previous message on the same string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrevEventScope {
    Shared,
    #[default]
    PerString,
}

/// What one message did to the interpreter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A new note is held. `fret` is None when the string cannot play it
    /// (keyboard only), `key` is None when the keyboard cannot.
    Started {
        string: StringChannel,
        note: u8,
        fret: Option<u8>,
        key: Option<KeyIndex>,
    },
    Stopped { string: StringChannel, note: u8 },
    /// Note-off for a note the string is not holding. Nothing changed.
    Inconsistent {
        string: StringChannel,
        held: u8,
        released: u8,
    },
    /// Note-off on a silent string.
    AlreadyIdle { string: StringChannel },
    Bent { string: StringChannel, amount: u16 },
    /// Implicit note change inferred from the pitch wheel.
    Hammered {
        string: StringChannel,
        from: u8,
        to: u8,
    },
    /// Pitch wheel on a string with nothing on the fretboard.
    Unheld { string: StringChannel },
    /// Channel outside the instrument.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InterpreterStats {
    pub processed: u64,
    pub ignored: u64,
    pub inconsistent: u64,
    pub hammers: u64,
    pub cleanups: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringState {
    Idle,
    Sounding(ActiveNote),
    /// Holding a note that has no position on this string.
    Offboard { note: u8 },
}

impl StringState {
    fn held_note(&self) -> Option<u8> {
        match self {
            StringState::Idle => None,
            StringState::Sounding(active) => Some(active.note),
            StringState::Offboard { note } => Some(*note),
        }
    }
}

/// Pressed keyboard keys. Two strings in unison hold the same key, so each
/// key counts its holders and only goes up when the last one lets go.
#[derive(Debug, Clone, Default)]
struct KeyBed {
    held: BTreeMap<KeyIndex, u8>,
}

impl KeyBed {
    fn press(&mut self, key: KeyIndex) {
        *self.held.entry(key).or_insert(0) += 1;
    }

    fn release(&mut self, key: KeyIndex) {
        if let Some(count) = self.held.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.held.remove(&key);
            }
        }
    }

    fn clear(&mut self) {
        self.held.clear();
    }

    fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    fn keys(&self) -> BTreeSet<KeyIndex> {
        self.held.keys().copied().collect()
    }
}

/// Per-string state machine turning MIDI guitar messages into what is
/// being played.
///
/// Messages are applied one at a time, run to completion. Nothing here
/// blocks or fails: anomalies are reported through [`Outcome`] and logged.
pub struct SignalInterpreter {
    table: NoteTable,
    bend: BendMapper,
    one_step: [i16; 2],
    scope: PrevEventScope,
    strings: [StringState; STRING_COUNT],
    keys: KeyBed,
    prev_shared: Option<MidiMessage>,
    prev_per_string: [Option<MidiMessage>; STRING_COUNT],
    stats: InterpreterStats,
}

impl SignalInterpreter {
    pub fn new(
        table: NoteTable,
        bend: BendMapper,
        one_step: [i16; 2],
        scope: PrevEventScope,
    ) -> Self {
        Self {
            table,
            bend,
            one_step,
            scope,
            strings: [StringState::Idle; STRING_COUNT],
            keys: KeyBed::default(),
            prev_shared: None,
            prev_per_string: [None; STRING_COUNT],
            stats: InterpreterStats::default(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            NoteTable::from_config(config),
            BendMapper::new(config.max_visual_bend, config.max_pitch_shift),
            config.one_step_pitch,
            config.prev_event_scope,
        )
    }

    /// Apply one message.
    pub fn handle(&mut self, message: &MidiMessage) -> Outcome {
        let string = match StringChannel::from_midi_channel(message.channel()) {
            Some(s) => s,
            None => {
                self.stats.ignored += 1;
                trace!("Ignoring {} (outside the instrument)", message);
                return Outcome::Ignored;
            }
        };

        let outcome = match *message {
            MidiMessage::NoteOn { note, velocity, .. } if velocity > 0 => {
                self.note_on(string, note)
            }
            MidiMessage::NoteOn { note, .. } | MidiMessage::NoteOff { note, .. } => {
                self.note_off(string, note)
            }
            MidiMessage::PitchWheel { pitch, .. } => self.pitch_wheel(string, pitch),
        };

        self.prev_shared = Some(*message);
        self.prev_per_string[string.index()] = Some(*message);
        self.cleanup();
        self.stats.processed += 1;

        match outcome {
            Outcome::Inconsistent { string, held, released } => {
                self.stats.inconsistent += 1;
                warn!(
                    "Note-off mismatch on {}: released {} but holding {}",
                    string,
                    note_name(released),
                    note_name(held)
                );
            }
            Outcome::Hammered { .. } => {
                self.stats.hammers += 1;
                debug!("{:?}", outcome);
            }
            _ => debug!("{:?}", outcome),
        }
        outcome
    }

    fn note_on(&mut self, string: StringChannel, note: u8) -> Outcome {
        let i = string.index();
        if let Some(old) = self.strings[i].held_note() {
            self.release_key(old);
        }

        let entry = self.table.fret_entry(string, note).copied();
        self.strings[i] = match entry {
            Some(e) => StringState::Sounding(ActiveNote::at(&e)),
            None => StringState::Offboard { note },
        };
        let key = self.table.key_index(note);
        if let Some(k) = key {
            self.keys.press(k);
        }

        Outcome::Started {
            string,
            note,
            fret: entry.map(|e| e.fret),
            key,
        }
    }

    fn note_off(&mut self, string: StringChannel, note: u8) -> Outcome {
        let i = string.index();
        let held = match self.strings[i].held_note() {
            Some(h) => h,
            None => return Outcome::AlreadyIdle { string },
        };
        // Some controllers release the nearest semitone of a bent pitch.
        if (held as i32 - note as i32).abs() > 1 {
            return Outcome::Inconsistent {
                string,
                held,
                released: note,
            };
        }
        self.strings[i] = StringState::Idle;
        self.release_key(held);
        Outcome::Stopped { string, note: held }
    }

    fn pitch_wheel(&mut self, string: StringChannel, pitch: i16) -> Outcome {
        let i = string.index();
        let mut active = match self.strings[i] {
            StringState::Sounding(active) => active,
            _ => return Outcome::Unheld { string },
        };

        if let Some(step) = self.inferred_step(string, pitch) {
            match self.table.fret_entry_i32(string, active.note as i32 + step).copied() {
                Some(target) => {
                    // Old key up and new key down before anyone sees a snapshot.
                    self.release_key(active.note);
                    if let Some(k) = self.table.key_index(target.note) {
                        self.keys.press(k);
                    }
                    self.strings[i] = StringState::Sounding(ActiveNote::at(&target));
                    return Outcome::Hammered {
                        string,
                        from: active.note,
                        to: target.note,
                    };
                }
                None => trace!(
                    "{} step {:+} from fret {} leaves the fretboard; treating as bend",
                    string,
                    step,
                    active.fret
                ),
            }
        }

        let amount = self.bend.clamp(pitch as i32);
        active.bend = Some(amount);
        self.strings[i] = StringState::Sounding(active);
        Outcome::Bent { string, amount }
    }

    /// Semitone step implied by `pitch` given the previous message, if the
    /// wheel movement encodes a hammer-on or pull-off:
    ///   - reset to 0 right after sitting on a one-step extreme, or
    ///   - a jump straight onto an extreme with no bend in progress.
    fn inferred_step(&self, string: StringChannel, pitch: i16) -> Option<i32> {
        let prev = match self.scope {
            PrevEventScope::Shared => self.prev_shared,
            PrevEventScope::PerString => self.prev_per_string[string.index()],
        };
        if pitch == 0 {
            return match prev {
                Some(MidiMessage::PitchWheel { pitch: p, .. }) => self.step_of(p),
                _ => None,
            };
        }
        if prev.map_or(false, |m| m.is_pitch_wheel()) {
            return None;
        }
        self.step_of(pitch)
    }

    fn step_of(&self, pitch: i16) -> Option<i32> {
        let [down, up] = self.one_step;
        if pitch == down {
            Some(-1)
        } else if pitch == up {
            Some(1)
        } else {
            None
        }
    }

    fn release_key(&mut self, note: u8) {
        if let Some(k) = self.table.key_index(note) {
            self.keys.release(k);
        }
    }

    /// Keys left down with nothing on the fretboard are stale.
    fn cleanup(&mut self) {
        let any_sounding = self
            .strings
            .iter()
            .any(|s| matches!(s, StringState::Sounding(_)));
        if any_sounding || self.keys.is_empty() {
            return;
        }
        debug!("Clearing {} stale key(s)", self.keys.held.len());
        self.keys.clear();
        for s in self.strings.iter_mut() {
            if matches!(s, StringState::Offboard { .. }) {
                *s = StringState::Idle;
            }
        }
        self.stats.cleanups += 1;
    }

    pub fn snapshot(&self) -> VisualState {
        let mut strings = [None; STRING_COUNT];
        for (slot, state) in strings.iter_mut().zip(self.strings.iter()) {
            if let StringState::Sounding(active) = state {
                *slot = Some(*active);
            }
        }
        VisualState {
            seq: self.stats.processed,
            strings,
            keys_down: self.keys.keys(),
        }
    }

    pub fn active(&self, string: StringChannel) -> Option<&ActiveNote> {
        match &self.strings[string.index()] {
            StringState::Sounding(active) => Some(active),
            _ => None,
        }
    }

    pub fn stats(&self) -> InterpreterStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::{scale_by_name, standard, KeyboardRange};

    const UP: i16 = 4096;
    const DOWN: i16 = -4095;

    fn interp(scope: PrevEventScope) -> SignalInterpreter {
        let table = NoteTable::build(
            &standard(),
            4,
            &scale_by_name("major").unwrap(),
            24,
            KeyboardRange::default(),
        );
        SignalInterpreter::new(table, BendMapper::new(20.0, 6000), [DOWN, UP], scope)
    }

    fn on(channel: u8, note: u8) -> MidiMessage {
        MidiMessage::NoteOn { channel, note, velocity: 100 }
    }

    fn off(channel: u8, note: u8) -> MidiMessage {
        MidiMessage::NoteOff { channel, note }
    }

    fn wheel(channel: u8, pitch: i16) -> MidiMessage {
        MidiMessage::PitchWheel { channel, pitch }
    }

    fn s(n: u8) -> StringChannel {
        StringChannel::new(n).unwrap()
    }

    #[test]
    fn test_note_on_sets_active_and_key() {
        let mut it = interp(PrevEventScope::PerString);
        // String 1 (E4=64), fret 3 = G4 = 67
        let out = it.handle(&on(0, 67));
        assert_eq!(
            out,
            Outcome::Started { string: s(1), note: 67, fret: Some(3), key: Some(27) }
        );
        let v = it.snapshot();
        let a = v.active(s(1)).unwrap();
        assert_eq!(a.fret, 3);
        assert_eq!(a.interval, IntervalTag::MinorThird);
        assert_eq!(a.bend, None);
        assert!(v.keys_down.contains(&27));
    }

    #[test]
    fn test_round_trip_restores_state() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(3, 52));
        let before = it.snapshot();
        it.handle(&on(0, 67));
        it.handle(&off(0, 67));
        assert!(it.snapshot().same_picture(&before));
    }

    #[test]
    fn test_zero_velocity_is_note_off() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(1, 60));
        let out = it.handle(&MidiMessage::NoteOn { channel: 1, note: 60, velocity: 0 });
        assert_eq!(out, Outcome::Stopped { string: s(2), note: 60 });
        assert!(it.snapshot().is_silent());
    }

    #[test]
    fn test_repeated_note_off_is_noop() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(2, 57));
        it.handle(&on(4, 50));
        it.handle(&off(2, 57));
        let once = it.snapshot();
        assert_eq!(it.handle(&off(2, 57)), Outcome::AlreadyIdle { string: s(3) });
        assert!(it.snapshot().same_picture(&once));
    }

    #[test]
    fn test_note_off_within_one_semitone() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 67));
        assert_eq!(it.handle(&off(0, 68)), Outcome::Stopped { string: s(1), note: 67 });
        assert!(it.snapshot().is_silent());
    }

    #[test]
    fn test_mismatched_note_off_changes_nothing() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 67));
        let before = it.snapshot();
        let out = it.handle(&off(0, 70));
        assert_eq!(out, Outcome::Inconsistent { string: s(1), held: 67, released: 70 });
        assert!(it.snapshot().same_picture(&before));
        assert_eq!(it.stats().inconsistent, 1);
    }

    #[test]
    fn test_second_note_on_replaces_first() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 67));
        it.handle(&on(0, 69));
        let v = it.snapshot();
        assert_eq!(v.active(s(1)).unwrap().note, 69);
        assert!(!v.keys_down.contains(&27));
        assert!(v.keys_down.contains(&29));
        assert_eq!(v.keys_down.len(), 1);
    }

    #[test]
    fn test_unison_strings_share_a_key() {
        let mut it = interp(PrevEventScope::PerString);
        // E4 on string 1 (open) and string 2 (fret 5)
        it.handle(&on(0, 64));
        it.handle(&on(1, 64));
        it.handle(&off(0, 64));
        let v = it.snapshot();
        assert!(v.keys_down.contains(&24), "string 2 still holds E4");
        assert_eq!(v.active(s(2)).unwrap().fret, 5);
    }

    #[test]
    fn test_plain_bend_is_clamped() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(2, 57));
        assert_eq!(it.handle(&wheel(2, 1200)), Outcome::Bent { string: s(3), amount: 1200 });
        assert_eq!(it.handle(&wheel(2, 7000)), Outcome::Bent { string: s(3), amount: 6000 });
        assert_eq!(it.handle(&wheel(2, -300)), Outcome::Bent { string: s(3), amount: 0 });
        let a = *it.active(s(3)).unwrap();
        assert_eq!(a.note, 57);
        assert_eq!(a.fret, 2);
    }

    #[test]
    fn test_ramp_then_reset_hammers_on() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 67)); // fret 3
        it.handle(&wheel(0, 2000));
        it.handle(&wheel(0, UP));
        let before_keys = it.snapshot().keys_down;
        assert!(before_keys.contains(&27));
        let out = it.handle(&wheel(0, 0));
        assert_eq!(out, Outcome::Hammered { string: s(1), from: 67, to: 68 });
        let v = it.snapshot();
        let a = v.active(s(1)).unwrap();
        assert_eq!(a.fret, 4);
        assert_eq!(a.note, 68);
        assert_eq!(a.bend, None);
        assert!(!v.keys_down.contains(&27));
        assert!(v.keys_down.contains(&28));
    }

    #[test]
    fn test_jump_to_lower_extreme_pulls_off() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(5, 45)); // string 6, fret 5
        let out = it.handle(&wheel(5, DOWN));
        assert_eq!(out, Outcome::Hammered { string: s(6), from: 45, to: 44 });
        assert_eq!(it.active(s(6)).unwrap().fret, 4);
        assert_eq!(it.stats().hammers, 1);
    }

    #[test]
    fn test_ramp_down_then_reset_pulls_off() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 67));
        it.handle(&wheel(0, -2000));
        it.handle(&wheel(0, DOWN));
        let out = it.handle(&wheel(0, 0));
        assert_eq!(out, Outcome::Hammered { string: s(1), from: 67, to: 66 });
        let v = it.snapshot();
        assert_eq!(v.active(s(1)).unwrap().fret, 2);
        assert_eq!(v.keys_down.iter().copied().collect::<Vec<_>>(), vec![26]);
    }

    #[test]
    fn test_jump_to_upper_extreme_hammers_on() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 67));
        let out = it.handle(&wheel(0, UP));
        assert_eq!(out, Outcome::Hammered { string: s(1), from: 67, to: 68 });
        let v = it.snapshot();
        assert_eq!(v.active(s(1)).unwrap().fret, 4);
        assert_eq!(v.keys_down.iter().copied().collect::<Vec<_>>(), vec![28]);
    }

    #[test]
    fn test_jump_then_recentre_steps_twice() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 67));
        it.handle(&wheel(0, UP));
        assert_eq!(
            it.handle(&wheel(0, 0)),
            Outcome::Hammered { string: s(1), from: 68, to: 69 }
        );
        assert_eq!(it.active(s(1)).unwrap().fret, 5);
        assert_eq!(it.stats().hammers, 2);
    }

    #[test]
    fn test_hammer_past_last_fret_falls_back_to_bend() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 88)); // fret 24
        assert_eq!(it.handle(&wheel(0, UP)), Outcome::Bent { string: s(1), amount: 4096 });
        let v = it.snapshot();
        let a = v.active(s(1)).unwrap();
        assert_eq!((a.fret, a.note, a.bend), (24, 88, Some(4096)));
        assert_eq!(v.keys_down.iter().copied().collect::<Vec<_>>(), vec![48]);
    }

    #[test]
    fn test_extreme_after_ramp_is_a_bend() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 67));
        it.handle(&wheel(0, 3000));
        assert_eq!(it.handle(&wheel(0, UP)), Outcome::Bent { string: s(1), amount: 4096 });
    }

    #[test]
    fn test_pull_off_from_open_string_falls_back_to_bend() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 64)); // open string
        assert_eq!(it.handle(&wheel(0, DOWN)), Outcome::Bent { string: s(1), amount: 0 });
        assert_eq!(it.active(s(1)).unwrap().fret, 0);
    }

    #[test]
    fn test_pitch_wheel_without_note_is_ignored() {
        let mut it = interp(PrevEventScope::PerString);
        assert_eq!(it.handle(&wheel(4, 1000)), Outcome::Unheld { string: s(5) });
        assert!(it.snapshot().is_silent());
    }

    #[test]
    fn test_unknown_channel_changes_nothing() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 67));
        let before = it.snapshot();
        assert_eq!(it.handle(&on(7, 60)), Outcome::Ignored);
        assert_eq!(it.handle(&wheel(7, UP)), Outcome::Ignored);
        assert_eq!(it.handle(&off(9, 67)), Outcome::Ignored);
        assert_eq!(it.snapshot(), before);
        assert_eq!(it.stats().ignored, 3);
    }

    #[test]
    fn test_stray_key_is_cleared_on_next_event() {
        let mut it = interp(PrevEventScope::PerString);
        it.keys.press(10);
        it.handle(&wheel(2, 100));
        assert!(it.snapshot().keys_down.is_empty());
        assert_eq!(it.stats().cleanups, 1);
    }

    #[test]
    fn test_keyboard_only_note_without_fretboard_note_is_cleared() {
        let mut it = interp(PrevEventScope::PerString);
        // Note 50 is below string 1's open E4 but on the keyboard
        let out = it.handle(&on(0, 50));
        assert_eq!(out, Outcome::Started { string: s(1), note: 50, fret: None, key: Some(10) });
        assert!(it.snapshot().is_silent());
    }

    #[test]
    fn test_keyboard_only_note_shown_alongside_fretted_note() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(5, 40)); // string 6 open
        it.handle(&on(0, 50)); // off string 1's board
        let v = it.snapshot();
        assert!(v.active(s(1)).is_none());
        assert!(v.keys_down.contains(&10));
        it.handle(&off(0, 50));
        assert!(!it.snapshot().keys_down.contains(&10));
    }

    #[test]
    fn test_shared_scope_lets_strings_interfere() {
        // Bend on string 2 reaches the extreme, then string 1 resets to 0.
        let mut shared = interp(PrevEventScope::Shared);
        shared.handle(&on(0, 67));
        shared.handle(&on(1, 62));
        shared.handle(&wheel(1, 2000));
        shared.handle(&wheel(1, UP));
        assert_eq!(
            shared.handle(&wheel(0, 0)),
            Outcome::Hammered { string: s(1), from: 67, to: 68 }
        );

        let mut per_string = interp(PrevEventScope::PerString);
        per_string.handle(&on(0, 67));
        per_string.handle(&on(1, 62));
        per_string.handle(&wheel(1, 2000));
        per_string.handle(&wheel(1, UP));
        assert_eq!(
            per_string.handle(&wheel(0, 0)),
            Outcome::Bent { string: s(1), amount: 0 }
        );
    }

    #[test]
    fn test_seq_counts_accepted_messages() {
        let mut it = interp(PrevEventScope::PerString);
        it.handle(&on(0, 67));
        it.handle(&on(8, 67));
        it.handle(&off(0, 67));
        assert_eq!(it.snapshot().seq, 2);
    }
}
