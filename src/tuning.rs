use crate::error::{Error, Result};
use crate::interpreter::PrevEventScope;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Open-string pitches of a six-string guitar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuning {
    pub name: String,
    /// MIDI note numbers. Index 0 = string 1 (high, nearest the floor).
    pub open_strings: [u8; STRING_COUNT],
}

impl Tuning {
    pub fn open_note(&self, string: StringChannel) -> u8 {
        self.open_strings[string.index()]
    }
}

/// Standard tuning.
///
///   1:E4  2:B3  3:G3  4:D3  5:A2  6:E2
pub fn standard() -> Tuning {
    Tuning {
        name: "Standard E".to_string(),
        //            str1 str2 str3 str4 str5 str6
        //            E4   B3   G3   D3   A2   E2
        open_strings: [64, 59, 55, 50, 45, 40],
    }
}

/// Standard with string 6 dropped a whole step to D2.
pub fn drop_d() -> Tuning {
    Tuning {
        name: "Drop D".to_string(),
        open_strings: [64, 59, 55, 50, 45, 38],
    }
}

/// Open G: D2 G2 D3 G3 B3 D4 (low to high).
pub fn open_g() -> Tuning {
    Tuning {
        name: "Open G".to_string(),
        open_strings: [62, 59, 55, 50, 43, 38],
    }
}

/// DADGAD: D2 A2 D3 G3 A3 D4 (low to high).
pub fn dadgad() -> Tuning {
    Tuning {
        name: "DADGAD".to_string(),
        open_strings: [62, 57, 55, 50, 45, 38],
    }
}

pub fn tuning_by_name(name: &str) -> Result<Tuning> {
    match name.to_ascii_lowercase().as_str() {
        "standard" | "e" => Ok(standard()),
        "drop-d" | "dropd" => Ok(drop_d()),
        "open-g" => Ok(open_g()),
        "dadgad" => Ok(dadgad()),
        other => Err(Error::InvalidConfig(format!("unknown tuning: {}", other))),
    }
}

// ─── Scales ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    pub name: String,
    pub intervals: Vec<IntervalTag>,
}

impl Scale {
    fn from_steps(name: &str, steps: &[i32]) -> Self {
        Self {
            name: name.to_string(),
            intervals: steps.iter().map(|&s| IntervalTag::from_semitones(s)).collect(),
        }
    }

    pub fn contains(&self, interval: IntervalTag) -> bool {
        self.intervals.contains(&interval)
    }
}

pub const SCALE_NAMES: [&str; 9] = [
    "major",
    "minor",
    "major-pentatonic",
    "minor-pentatonic",
    "blues",
    "dorian",
    "mixolydian",
    "harmonic-minor",
    "chromatic",
];

pub fn scale_by_name(name: &str) -> Result<Scale> {
    let key = name.to_ascii_lowercase();
    let scale = match key.as_str() {
        "major" => Scale::from_steps("major", &[0, 2, 4, 5, 7, 9, 11]),
        "minor" => Scale::from_steps("minor", &[0, 2, 3, 5, 7, 8, 10]),
        "major-pentatonic" => Scale::from_steps("major-pentatonic", &[0, 2, 4, 7, 9]),
        "minor-pentatonic" => Scale::from_steps("minor-pentatonic", &[0, 3, 5, 7, 10]),
        "blues" => Scale::from_steps("blues", &[0, 3, 5, 6, 7, 10]),
        "dorian" => Scale::from_steps("dorian", &[0, 2, 3, 5, 7, 9, 10]),
        "mixolydian" => Scale::from_steps("mixolydian", &[0, 2, 4, 5, 7, 9, 10]),
        "harmonic-minor" => Scale::from_steps("harmonic-minor", &[0, 2, 3, 5, 7, 8, 11]),
        "chromatic" => Scale::from_steps("chromatic", &(0..12).collect::<Vec<_>>()),
        other => {
            return Err(Error::InvalidConfig(format!(
                "unknown scale: {} (expected one of {})",
                other,
                SCALE_NAMES.join(", ")
            )))
        }
    };
    Ok(scale)
}

/// Parse a root note name ("E", "F#", "Bb") into a pitch class 0..12.
pub fn parse_pitch_class(name: &str) -> Result<u8> {
    let mut chars = name.trim().chars();
    let letter = chars
        .next()
        .ok_or_else(|| Error::InvalidConfig("empty root note".into()))?;
    let natural: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(Error::InvalidConfig(format!("bad root note: {}", name))),
    };
    let accidental: i32 = match chars.as_str() {
        "" => 0,
        "#" | "s" => 1,
        "b" => -1,
        _ => return Err(Error::InvalidConfig(format!("bad root note: {}", name))),
    };
    Ok((natural + accidental).rem_euclid(12) as u8)
}

// ─── Keyboard ───────────────────────────────────────────────────────────────

/// Keyboard span: `octaves` full octaves from `lowest_note`, plus the closing
/// note of the last octave (4 octaves from E2 → E2..=E6, 49 keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardRange {
    pub lowest_note: u8,
    pub octaves: u8,
}

impl KeyboardRange {
    pub fn key_count(&self) -> usize {
        self.octaves as usize * 12 + 1
    }

    pub fn highest_note(&self) -> u8 {
        self.lowest_note + self.octaves * 12
    }

    pub fn contains(&self, note: u8) -> bool {
        (self.lowest_note..=self.highest_note()).contains(&note)
    }

    /// Black keys by pitch class: C# D# F# G# A#.
    pub fn is_black(note: u8) -> bool {
        matches!(note % 12, 1 | 3 | 6 | 8 | 10)
    }
}

impl Default for KeyboardRange {
    fn default() -> Self {
        Self {
            lowest_note: 40,
            octaves: 4,
        }
    }
}

// ─── Session configuration ──────────────────────────────────────────────────

/// Everything the visualizer needs to know before the first message arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub tuning: Tuning,
    /// Root pitch class, 0 = C.
    pub root: u8,
    pub scale: Scale,
    /// Highest fret in the lookup table (0 = open string).
    pub fret_count: u8,
    /// Displayed fret range, inclusive.
    pub first_fret: u8,
    pub last_fret: u8,
    pub keyboard: KeyboardRange,
    /// Largest visual string displacement, in renderer units.
    pub max_visual_bend: f32,
    pub max_pitch_shift: u16,
    /// Pitch-wheel values meaning "one semitone down" and "one semitone up".
    pub one_step_pitch: [i16; 2],
    pub prev_event_scope: PrevEventScope,
    pub show_guitar: bool,
    pub show_keyboard: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tuning: standard(),
            root: 4,
            scale: Scale::from_steps("major", &[0, 2, 4, 5, 7, 9, 11]),
            fret_count: 24,
            first_fret: 0,
            last_fret: 24,
            keyboard: KeyboardRange::default(),
            max_visual_bend: 20.0,
            max_pitch_shift: DEFAULT_MAX_PITCH_SHIFT,
            one_step_pitch: DEFAULT_ONE_STEP_PITCH,
            prev_event_scope: PrevEventScope::PerString,
            show_guitar: true,
            show_keyboard: true,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.root > 11 {
            return Err(Error::InvalidConfig(format!("root pitch class {} > 11", self.root)));
        }
        if self.first_fret > self.last_fret {
            return Err(Error::InvalidConfig(format!(
                "fret range {}..{} is reversed",
                self.first_fret, self.last_fret
            )));
        }
        if self.last_fret > self.fret_count {
            return Err(Error::InvalidConfig(format!(
                "last fret {} beyond fret count {}",
                self.last_fret, self.fret_count
            )));
        }
        for (i, &open) in self.tuning.open_strings.iter().enumerate() {
            if open as u32 + self.fret_count as u32 > 127 {
                return Err(Error::InvalidConfig(format!(
                    "string {} runs past MIDI note 127",
                    i + 1
                )));
            }
        }
        if self.keyboard.octaves == 0
            || self.keyboard.lowest_note as u32 + self.keyboard.octaves as u32 * 12 > 127
        {
            return Err(Error::InvalidConfig(format!(
                "keyboard span {:?} out of MIDI range",
                self.keyboard
            )));
        }
        if self.max_pitch_shift == 0 {
            return Err(Error::InvalidConfig("max pitch shift must be > 0".into()));
        }
        if !(self.max_visual_bend.is_finite() && self.max_visual_bend >= 0.0) {
            return Err(Error::InvalidConfig("max visual bend must be >= 0".into()));
        }
        let [down, up] = self.one_step_pitch;
        if !(down < 0 && up > 0) {
            return Err(Error::InvalidConfig(format!(
                "one-step pitch pair ({}, {}) must straddle 0",
                down, up
            )));
        }
        if !self.show_guitar && !self.show_keyboard {
            return Err(Error::InvalidConfig("nothing to show".into()));
        }
        Ok(())
    }
}
