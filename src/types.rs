use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

// ─── MIDI messages ──────────────────────────────────────────────────────────

/// The three message kinds the visualizer understands.
/// Everything else a device sends is dropped at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    /// Pitch wheel, centred on 0: -8192 ..= 8191.
    PitchWheel { channel: u8, pitch: i16 },
}

impl MidiMessage {
    /// Parse one raw MIDI message as delivered by the device driver.
    /// Returns None for message kinds we do not interpret.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        let channel = status & 0x0F;
        match status & 0xF0 {
            0x90 if bytes.len() >= 3 => Some(MidiMessage::NoteOn {
                channel,
                note: bytes[1] & 0x7F,
                velocity: bytes[2] & 0x7F,
            }),
            0x80 if bytes.len() >= 3 => Some(MidiMessage::NoteOff {
                channel,
                note: bytes[1] & 0x7F,
            }),
            0xE0 if bytes.len() >= 3 => {
                let lsb = (bytes[1] & 0x7F) as i16;
                let msb = (bytes[2] & 0x7F) as i16;
                Some(MidiMessage::PitchWheel {
                    channel,
                    pitch: ((msb << 7) | lsb) - 8192,
                })
            }
            _ => None,
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::PitchWheel { channel, .. } => channel,
        }
    }

    pub fn is_pitch_wheel(&self) -> bool {
        matches!(self, MidiMessage::PitchWheel { .. })
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiMessage::NoteOn { channel, note, velocity } => write!(
                f,
                "note_on  channel={} note={} velocity={}",
                channel, note, velocity
            ),
            MidiMessage::NoteOff { channel, note } => {
                write!(f, "note_off channel={} note={}", channel, note)
            }
            MidiMessage::PitchWheel { channel, pitch } => {
                write!(f, "pitchwheel channel={} pitch={}", channel, pitch)
            }
        }
    }
}

/// A parsed message stamped with session time.
#[derive(Debug, Clone, Copy)]
pub struct MidiEvent {
    /// Microseconds since session start
    pub timestamp_us: u64,
    pub message: MidiMessage,
}

// ─── Inter-thread messages ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum InputEvent {
    Midi(MidiEvent),
}

// ─── Strings and keys ───────────────────────────────────────────────────────

/// Guitar string number, 1 (high E) ..= 6 (low E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StringChannel(u8);

impl StringChannel {
    /// MIDI channels 0..=5 carry strings 1..=6; anything else is off the instrument.
    pub fn from_midi_channel(channel: u8) -> Option<Self> {
        if (channel as usize) < STRING_COUNT {
            Some(Self(channel + 1))
        } else {
            None
        }
    }

    pub fn new(number: u8) -> Option<Self> {
        if (1..=STRING_COUNT as u8).contains(&number) {
            Some(Self(number))
        } else {
            None
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-based index into per-string arrays.
    pub fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    pub fn all() -> impl Iterator<Item = StringChannel> {
        (1..=STRING_COUNT as u8).map(StringChannel)
    }
}

impl fmt::Display for StringChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "string {}", self.0)
    }
}

/// Keyboard key, 0 = lowest key of the configured keyboard.
pub type KeyIndex = u8;

// ─── Intervals ──────────────────────────────────────────────────────────────

/// Pitch-class distance from the configured root note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntervalTag {
    Root,
    MinorSecond,
    MajorSecond,
    MinorThird,
    MajorThird,
    Fourth,
    Tritone,
    Fifth,
    MinorSixth,
    MajorSixth,
    MinorSeventh,
    MajorSeventh,
}

impl IntervalTag {
    pub const ALL: [IntervalTag; 12] = [
        IntervalTag::Root,
        IntervalTag::MinorSecond,
        IntervalTag::MajorSecond,
        IntervalTag::MinorThird,
        IntervalTag::MajorThird,
        IntervalTag::Fourth,
        IntervalTag::Tritone,
        IntervalTag::Fifth,
        IntervalTag::MinorSixth,
        IntervalTag::MajorSixth,
        IntervalTag::MinorSeventh,
        IntervalTag::MajorSeventh,
    ];

    /// Interval for a semitone distance; any integer is reduced mod 12.
    pub fn from_semitones(distance: i32) -> Self {
        Self::ALL[distance.rem_euclid(12) as usize]
    }

    pub fn semitones(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        INTERVAL_LABELS[self as usize]
    }
}

impl fmt::Display for IntervalTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ─── Fretboard records ──────────────────────────────────────────────────────

/// One playable position, produced by the note table at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FretEntry {
    pub fret: u8,
    pub interval: IntervalTag,
    pub note: u8,
    /// Whether `interval` belongs to the selected scale.
    pub in_scale: bool,
}

/// The note currently sounding on a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveNote {
    pub fret: u8,
    pub interval: IntervalTag,
    pub note: u8,
    /// Clamped pitch-wheel value, None when the string is not bent.
    pub bend: Option<u16>,
}

impl ActiveNote {
    pub fn at(entry: &FretEntry) -> Self {
        Self {
            fret: entry.fret,
            interval: entry.interval,
            note: entry.note,
            bend: None,
        }
    }
}

// ─── Visual state snapshot ──────────────────────────────────────────────────

/// What is being played right now, as published after each processed message.
/// Owned by consumers; never mutated after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualState {
    /// Number of messages the interpreter had processed when this was taken.
    pub seq: u64,
    /// Index 0 = string 1.
    pub strings: [Option<ActiveNote>; STRING_COUNT],
    pub keys_down: BTreeSet<KeyIndex>,
}

impl VisualState {
    pub fn empty() -> Self {
        Self {
            seq: 0,
            strings: [None; STRING_COUNT],
            keys_down: BTreeSet::new(),
        }
    }

    pub fn active(&self, string: StringChannel) -> Option<&ActiveNote> {
        self.strings[string.index()].as_ref()
    }

    pub fn is_silent(&self) -> bool {
        self.strings.iter().all(|s| s.is_none()) && self.keys_down.is_empty()
    }

    /// Same strings and keys, ignoring the sequence number.
    pub fn same_picture(&self, other: &VisualState) -> bool {
        self.strings == other.strings && self.keys_down == other.keys_down
    }
}

impl fmt::Display for VisualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:<6}", self.seq)?;
        for (i, s) in self.strings.iter().enumerate() {
            match s {
                Some(n) => match n.bend {
                    Some(b) => write!(f, " {}:{}({})~{}", i + 1, n.fret, n.interval, b)?,
                    None => write!(f, " {}:{}({})", i + 1, n.fret, n.interval)?,
                },
                None => write!(f, " {}:-", i + 1)?,
            }
        }
        write!(f, "  keys={:?}", self.keys_down)
    }
}

// ─── Compact serialization ──────────────────────────────────────────────────

/// Short-key representation for WS streaming.
/// Field mapping: q=seq, s=strings as [fret, interval semitones, note, bend]
/// (bend -1 when unbent), k=keys_down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactState {
    pub q: u64,
    pub s: [Option<[i32; 4]>; STRING_COUNT],
    pub k: Vec<KeyIndex>,
}

impl From<&VisualState> for CompactState {
    fn from(v: &VisualState) -> Self {
        let mut s = [None; STRING_COUNT];
        for (slot, note) in s.iter_mut().zip(v.strings.iter()) {
            *slot = note.map(|n| {
                [
                    n.fret as i32,
                    n.interval.semitones() as i32,
                    n.note as i32,
                    n.bend.map(|b| b as i32).unwrap_or(-1),
                ]
            });
        }
        Self {
            q: v.seq,
            s,
            k: v.keys_down.iter().copied().collect(),
        }
    }
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the visualization session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Constants ──────────────────────────────────────────────────────────────

pub const STRING_COUNT: usize = 6;

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub const INTERVAL_LABELS: [&str; 12] = [
    "R", "b2", "2", "b3", "3", "4", "b5", "5", "b6", "6", "b7", "7",
];

/// Largest pitch-wheel value that still moves the bend display.
pub const DEFAULT_MAX_PITCH_SHIFT: u16 = 6000;

/// Pitch-wheel values a guitar controller sends for a full one-semitone
/// step down and up.
pub const DEFAULT_ONE_STEP_PITCH: [i16; 2] = [-4095, 4096];

/// "E4", "C#3", ... for a MIDI note number.
pub fn note_name(note: u8) -> String {
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", NOTE_NAMES[(note % 12) as usize], octave)
}
