use crate::bend::BendMapper;
use crate::note_table::NoteTable;
use crate::tuning::KeyboardRange;
use crate::types::*;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::{Duration, Instant};

const WIDTH: usize = 106;
const CELL: usize = 4;

/// Renders a live ASCII fretboard and keyboard from VisualState snapshots.
pub struct ConsoleDisplay {
    rx: Receiver<VisualState>,
    table: NoteTable,
    bend: BendMapper,
    first_fret: u8,
    last_fret: u8,
    show_guitar: bool,
    show_keyboard: bool,
    update_hz: u32,
}

impl ConsoleDisplay {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: Receiver<VisualState>,
        table: NoteTable,
        bend: BendMapper,
        first_fret: u8,
        last_fret: u8,
        show_guitar: bool,
        show_keyboard: bool,
        update_hz: u32,
    ) -> Self {
        Self {
            rx,
            table,
            bend,
            first_fret,
            last_fret,
            show_guitar,
            show_keyboard,
            update_hz,
        }
    }

    /// Redraw at most `update_hz` times a second, always ending on the
    /// newest snapshot. Returns when the coordinator goes away.
    pub fn run(&self) {
        let interval = Duration::from_millis(1000 / self.update_hz.max(1) as u64);
        let mut last_draw: Option<Instant> = None;
        let mut pending: Option<VisualState> = None;
        let mut stdout = io::stdout();

        loop {
            let wait = match pending {
                Some(_) => last_draw.map_or(Duration::ZERO, |t| interval.saturating_sub(t.elapsed())),
                None => Duration::from_secs(1),
            };
            match self.rx.recv_timeout(wait) {
                Ok(state) => pending = Some(state),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if last_draw.is_some_and(|t| t.elapsed() < interval) {
                continue;
            }
            if let Some(state) = pending.take() {
                print!("\x1b[2J\x1b[H{}", self.render(&state));
                let _ = stdout.flush();
                last_draw = Some(Instant::now());
            }
        }
    }

    /// The full screen for one snapshot.
    pub fn render(&self, state: &VisualState) -> String {
        let mut out = String::new();
        header(&mut out, "SEE-MIDI  Live Fretboard");
        line(&mut out, &format!("Message #{}", state.seq));

        if self.show_guitar {
            blank(&mut out);
            self.render_fretboard(&mut out, state);
            blank(&mut out);
            for string in StringChannel::all() {
                if let Some(n) = state.active(string) {
                    let mut text = format!(
                        "{}: {} fret {} ({})",
                        string,
                        note_name(n.note),
                        n.fret,
                        n.interval
                    );
                    if let Some(b) = n.bend {
                        let _ = write!(text, "  bend {} ({:+.1})", b, self.bend.offset(b as i32, string));
                    }
                    line(&mut out, &text);
                }
            }
        }

        if self.show_keyboard {
            blank(&mut out);
            render_keyboard(&mut out, self.table.keyboard(), state);
        }

        footer(&mut out);
        out
    }

    fn render_fretboard(&self, out: &mut String, state: &VisualState) {
        // fret numbers
        let mut numbers = String::from("   ");
        for fret in self.first_fret..=self.last_fret {
            numbers.push_str(&format!("{:^width$}", fret, width = CELL));
        }
        line(out, &numbers);

        let markers = self.table.scale_positions(self.first_fret, self.last_fret);
        for string in StringChannel::all() {
            let played = state.active(string);
            let mut row = format!("{}  ", string.number());
            for fret in self.first_fret..=self.last_fret {
                let cell = match played {
                    Some(n) if n.fret == fret => played_cell(n, string, &self.bend),
                    _ => match markers
                        .iter()
                        .find(|(s, e)| *s == string && e.fret == fret)
                    {
                        Some((_, e)) if e.interval == IntervalTag::Root => "─R─".to_string(),
                        Some(_) => "─·─".to_string(),
                        None => "───".to_string(),
                    },
                };
                row.push_str(&cell);
                row.push('│');
            }
            line(out, &row);
        }
    }
}

/// Interval label, with ^ or v when the string is bent.
fn played_cell(note: &ActiveNote, string: StringChannel, bend: &BendMapper) -> String {
    let mark = match note.bend {
        Some(b) if bend.offset(b as i32, string) > 0.0 => "^",
        Some(b) if bend.offset(b as i32, string) < 0.0 => "v",
        _ => "",
    };
    format!("{:<3}", format!("{}{}", note.interval.label(), mark))
}

fn render_keyboard(out: &mut String, keyboard: KeyboardRange, state: &VisualState) {
    let mut strip = String::new();
    for idx in 0..keyboard.key_count() {
        let note = keyboard.lowest_note + idx as u8;
        let ch = if state.keys_down.contains(&(idx as KeyIndex)) {
            '█'
        } else if KeyboardRange::is_black(note) {
            '▪'
        } else {
            '·'
        };
        strip.push(ch);
    }
    line(
        out,
        &format!(
            "Keys {}..{}",
            note_name(keyboard.lowest_note),
            note_name(keyboard.highest_note())
        ),
    );
    line(out, &strip);
    let down: Vec<String> = state
        .keys_down
        .iter()
        .map(|&k| note_name(keyboard.lowest_note + k))
        .collect();
    if down.is_empty() {
        line(out, "Down: ---");
    } else {
        line(out, &format!("Down: {}", down.join(" ")));
    }
}

// ─── Static screens ─────────────────────────────────────────────────────────

/// Shown instead of the live view when no MIDI input could be opened.
pub fn no_input_screen(reason: &str) -> String {
    let mut out = String::new();
    header(&mut out, "SEE-MIDI");
    blank(&mut out);
    line(&mut out, "No MIDI input detected.");
    line(&mut out, reason);
    blank(&mut out);
    line(&mut out, "Connect a MIDI guitar or keyboard and restart,");
    line(&mut out, "or run without --hardware to watch a scripted performance.");
    footer(&mut out);
    out
}

/// Shown when both the guitar and the keyboard are switched off.
pub fn nothing_selected_screen() -> String {
    let mut out = String::new();
    header(&mut out, "SEE-MIDI");
    blank(&mut out);
    line(&mut out, "Nothing to show: both instruments are hidden.");
    line(&mut out, "Drop --no-guitar or --no-keyboard.");
    footer(&mut out);
    out
}

// ─── Box drawing ────────────────────────────────────────────────────────────

fn header(out: &mut String, title: &str) {
    let _ = writeln!(out, "╔{}╗", "═".repeat(WIDTH));
    line(out, title);
    let _ = writeln!(out, "╠{}╣", "═".repeat(WIDTH));
}

fn footer(out: &mut String) {
    let _ = writeln!(out, "╚{}╝", "═".repeat(WIDTH));
}

fn blank(out: &mut String) {
    line(out, "");
}

/// One boxed line, padded or cut by char count.
fn line(out: &mut String, text: &str) {
    let inner = WIDTH - 2;
    let mut body: String = text.chars().take(inner).collect();
    let len = body.chars().count();
    body.push_str(&" ".repeat(inner - len));
    let _ = writeln!(out, "║  {}║", body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::{scale_by_name, standard};
    use crossbeam_channel::unbounded;

    fn display(show_guitar: bool, show_keyboard: bool) -> ConsoleDisplay {
        let (_tx, rx) = unbounded();
        let scale = scale_by_name("major").unwrap();
        let table = NoteTable::build(&standard(), 4, &scale, 12, KeyboardRange::default());
        ConsoleDisplay::new(rx, table, BendMapper::new(20.0, 6000), 0, 12, show_guitar, show_keyboard, 30)
    }

    fn playing_a_on_string_1() -> VisualState {
        let mut state = VisualState::empty();
        state.seq = 7;
        state.strings[0] = Some(ActiveNote {
            fret: 5,
            interval: IntervalTag::Fourth,
            note: 69,
            bend: Some(3000),
        });
        state.keys_down.insert(29);
        state
    }

    #[test]
    fn test_render_shows_played_note_and_key() {
        let screen = display(true, true).render(&playing_a_on_string_1());
        assert!(screen.contains("Message #7"));
        assert!(screen.contains("string 1: A4 fret 5 (4)"), "{}", screen);
        assert!(screen.contains("bend 3000 (+10.0)"), "{}", screen);
        assert!(screen.contains("Down: A4"), "{}", screen);
    }

    #[test]
    fn test_string_1_bends_up_others_down() {
        let bend = BendMapper::new(20.0, 6000);
        let note = ActiveNote {
            fret: 3,
            interval: IntervalTag::Fifth,
            note: 0,
            bend: Some(1000),
        };
        assert!(played_cell(&note, StringChannel::new(1).unwrap(), &bend).contains('^'));
        assert!(played_cell(&note, StringChannel::new(4).unwrap(), &bend).contains('v'));
    }

    #[test]
    fn test_hidden_instruments_are_not_drawn() {
        let state = playing_a_on_string_1();
        let keys_only = display(false, true).render(&state);
        assert!(!keys_only.contains("string 1:"));
        assert!(keys_only.contains("Down: A4"));

        let guitar_only = display(true, false).render(&state);
        assert!(guitar_only.contains("string 1:"));
        assert!(!guitar_only.contains("Down:"));
    }

    #[test]
    fn test_scale_markers_on_open_strings() {
        // Open low E is the root of E major.
        let screen = display(true, false).render(&VisualState::empty());
        let row6 = screen.lines().find(|l| l.starts_with("║  6  ")).unwrap();
        assert!(row6.contains("─R─"), "{}", row6);
    }

    #[test]
    fn test_lines_have_equal_width() {
        let screen = display(true, true).render(&playing_a_on_string_1());
        let widths: Vec<usize> = screen.lines().map(|l| l.chars().count()).collect();
        assert!(widths.iter().all(|&w| w == widths[0]), "{:?}", widths);
    }

    #[test]
    fn test_fallback_screens() {
        let screen = no_input_screen("no ports");
        assert!(screen.contains("No MIDI input detected"));
        assert!(screen.contains("run without --hardware"));
        assert!(!screen.contains("--demo"));
        assert!(nothing_selected_screen().contains("both instruments are hidden"));
    }
}
