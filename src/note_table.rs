use crate::tuning::{KeyboardRange, Scale, SessionConfig, Tuning};
use crate::types::*;
use log::debug;

/// Precomputed lookups from MIDI notes to instrument positions.
///
/// Built once per configuration. Per string, entries are stored densely from
/// the open note upward, so `fret_entry` is an index calculation, not a search.
#[derive(Debug, Clone)]
pub struct NoteTable {
    open_notes: [u8; STRING_COUNT],
    /// `frets[s][f]` is the entry for string s+1 at fret f.
    frets: [Vec<FretEntry>; STRING_COUNT],
    keyboard: KeyboardRange,
}

impl NoteTable {
    pub fn build(
        tuning: &Tuning,
        root: u8,
        scale: &Scale,
        fret_count: u8,
        keyboard: KeyboardRange,
    ) -> Self {
        let frets: [Vec<FretEntry>; STRING_COUNT] = std::array::from_fn(|s| {
            let open = tuning.open_strings[s];
            (0..=fret_count)
                .map(|fret| {
                    let note = open + fret;
                    let interval = IntervalTag::from_semitones(note as i32 - root as i32);
                    FretEntry {
                        fret,
                        interval,
                        note,
                        in_scale: scale.contains(interval),
                    }
                })
                .collect()
        });

        debug!(
            "Note table: {} ({} frets), root {}, scale {}, keyboard {}..={}",
            tuning.name,
            fret_count,
            NOTE_NAMES[root as usize % 12],
            scale.name,
            note_name(keyboard.lowest_note),
            note_name(keyboard.highest_note()),
        );

        Self {
            open_notes: tuning.open_strings,
            frets,
            keyboard,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::build(
            &config.tuning,
            config.root,
            &config.scale,
            config.fret_count,
            config.keyboard,
        )
    }

    /// Position of `note` on `string`, or None if the string cannot play it.
    pub fn fret_entry(&self, string: StringChannel, note: u8) -> Option<&FretEntry> {
        let open = self.open_notes[string.index()];
        let fret = note.checked_sub(open)?;
        self.frets[string.index()].get(fret as usize)
    }

    /// Same lookup for a note that may have been shifted out of MIDI range.
    pub fn fret_entry_i32(&self, string: StringChannel, note: i32) -> Option<&FretEntry> {
        u8::try_from(note).ok().and_then(|n| self.fret_entry(string, n))
    }

    pub fn key_index(&self, note: u8) -> Option<KeyIndex> {
        if self.keyboard.contains(note) {
            Some(note - self.keyboard.lowest_note)
        } else {
            None
        }
    }

    /// MIDI note of a keyboard key.
    pub fn key_note(&self, key: KeyIndex) -> Option<u8> {
        if (key as usize) < self.keyboard.key_count() {
            Some(self.keyboard.lowest_note + key)
        } else {
            None
        }
    }

    /// Every in-scale position inside the displayed fret range.
    pub fn scale_positions(&self, first_fret: u8, last_fret: u8) -> Vec<(StringChannel, FretEntry)> {
        let mut out = Vec::new();
        for string in StringChannel::all() {
            for entry in &self.frets[string.index()] {
                if entry.in_scale && (first_fret..=last_fret).contains(&entry.fret) {
                    out.push((string, *entry));
                }
            }
        }
        out
    }

    pub fn open_note(&self, string: StringChannel) -> u8 {
        self.open_notes[string.index()]
    }

    pub fn keyboard(&self) -> KeyboardRange {
        self.keyboard
    }
}
