use see_midi::bend::BendMapper;
use see_midi::console_display::{self, ConsoleDisplay};
use see_midi::coordinator::Coordinator;
use see_midi::error::{Error, Result};
use see_midi::interpreter::{PrevEventScope, SignalInterpreter};
#[cfg(feature = "hardware")]
use see_midi::midi_input;
use see_midi::note_table::NoteTable;
use see_midi::signal_check::{SignalCheck, SignalReport};
use see_midi::simulator::Simulator;
use see_midi::tuning::{self, KeyboardRange, SessionConfig};
use see_midi::types::*;
use see_midi::ws_server::WsServer;

use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use log::{error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "see-midi")]
#[command(about = "Live fretboard and keyboard view of a MIDI guitar")]
struct Cli {
    /// Read a MIDI input port instead of playing the demo
    #[arg(long)]
    hardware: bool,

    /// Open the first input port whose name contains this text
    #[arg(long)]
    #[cfg_attr(not(feature = "hardware"), allow(dead_code))]
    port: Option<String>,

    /// List MIDI input ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Log incoming messages for a while, report, and exit
    #[arg(long)]
    check_signal: bool,

    /// How long --check-signal listens (ms)
    #[arg(long, default_value_t = 10_000)]
    check_timeout_ms: u64,

    /// Tuning preset: standard, drop-d, open-g, dadgad
    #[arg(long, default_value = "standard")]
    tuning: String,

    /// Root note of the scale (C, F#, Bb, ...)
    #[arg(long, default_value = "E")]
    root: String,

    /// Scale shown on the fretboard
    #[arg(long, default_value = "major")]
    scale: String,

    /// Number of frets on the neck
    #[arg(long, default_value_t = 24)]
    frets: u8,

    /// First displayed fret
    #[arg(long, default_value_t = 0)]
    first_fret: u8,

    /// Last displayed fret (defaults to --frets)
    #[arg(long)]
    last_fret: Option<u8>,

    /// MIDI note of the lowest keyboard key
    #[arg(long, default_value_t = 40)]
    keyboard_low: u8,

    /// Keyboard span in octaves
    #[arg(long, default_value_t = 4)]
    octaves: u8,

    /// Largest drawn string displacement
    #[arg(long, default_value_t = 20.0)]
    max_bend: f32,

    /// Pitch-wheel value at which the drawn bend stops growing
    #[arg(long, default_value_t = DEFAULT_MAX_PITCH_SHIFT)]
    max_pitch_shift: u16,

    /// Use one previous-event slot for all strings instead of one per string
    #[arg(long)]
    shared_prev_event: bool,

    /// Hide the fretboard
    #[arg(long)]
    no_guitar: bool,

    /// Hide the keyboard
    #[arg(long)]
    no_keyboard: bool,

    /// Draw the console view (on by default when --ws is not given)
    #[arg(long)]
    console: bool,

    /// Console redraw rate (Hz)
    #[arg(long, default_value_t = 20)]
    display_hz: u32,

    /// Stream snapshots to browsers over WebSocket
    #[arg(long)]
    ws: bool,

    /// WebSocket server bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    ws_addr: String,

    /// WebSocket broadcast rate (Hz)
    #[arg(long, default_value_t = 60)]
    ws_fps: u32,

    /// Page served at / by the WebSocket server
    #[arg(long, default_value = "visualization.html")]
    viz: PathBuf,

    /// Simulator demo: "basic" or "licks"
    #[arg(long, default_value = "basic")]
    demo: String,

    /// Repeat the demo until stopped
    #[arg(long)]
    loop_demo: bool,
}

impl Cli {
    fn session_config(&self) -> Result<SessionConfig> {
        let config = SessionConfig {
            tuning: tuning::tuning_by_name(&self.tuning)?,
            root: tuning::parse_pitch_class(&self.root)?,
            scale: tuning::scale_by_name(&self.scale)?,
            fret_count: self.frets,
            first_fret: self.first_fret,
            last_fret: self.last_fret.unwrap_or(self.frets),
            keyboard: KeyboardRange {
                lowest_note: self.keyboard_low,
                octaves: self.octaves,
            },
            max_visual_bend: self.max_bend,
            max_pitch_shift: self.max_pitch_shift,
            one_step_pitch: DEFAULT_ONE_STEP_PITCH,
            prev_event_scope: if self.shared_prev_event {
                PrevEventScope::Shared
            } else {
                PrevEventScope::PerString
            },
            show_guitar: !self.no_guitar,
            show_keyboard: !self.no_keyboard,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Keeps the input alive for the session.
enum InputSource {
    Simulator(thread::JoinHandle<()>),
    #[cfg(feature = "hardware")]
    Device(midi_input::MidiInputSource),
}

fn start_input(cli: &Cli, config: &SessionConfig, tx: Sender<InputEvent>) -> Result<InputSource> {
    let clock = SessionClock::new();
    if cli.hardware {
        #[cfg(feature = "hardware")]
        {
            let source = midi_input::MidiInputSource::open(cli.port.as_deref(), tx, clock)?;
            info!("  Input: {}", source.port_name());
            return Ok(InputSource::Device(source));
        }
        #[cfg(not(feature = "hardware"))]
        {
            return Err(Error::DeviceUnavailable(
                "built without the 'hardware' feature".into(),
            ));
        }
    }

    info!("Starting simulator...");
    let demo = cli.demo.clone();
    let repeat = cli.loop_demo;
    let tuning = config.tuning.clone();
    let one_step = config.one_step_pitch;
    let handle = thread::Builder::new().name("simulator".into()).spawn(move || {
        Simulator::new(clock, tx, tuning, one_step).run(&demo, repeat);
    })?;
    Ok(InputSource::Simulator(handle))
}

fn list_ports() -> Result<()> {
    #[cfg(feature = "hardware")]
    {
        let ports = midi_input::list_ports()?;
        if ports.is_empty() {
            println!("No MIDI input ports");
        }
        for (i, name) in ports.iter().enumerate() {
            println!("{}: {}", i, name);
        }
        Ok(())
    }
    #[cfg(not(feature = "hardware"))]
    {
        Err(Error::DeviceUnavailable(
            "built without the 'hardware' feature".into(),
        ))
    }
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_ports {
        return list_ports();
    }

    if cli.no_guitar && cli.no_keyboard {
        print!("{}", console_display::nothing_selected_screen());
        return Ok(());
    }

    let config = cli.session_config()?;
    let show_console = cli.console || !cli.ws;

    info!("═══════════════════════════════════════════════");
    info!("  SEE-MIDI v{}", env!("CARGO_PKG_VERSION"));
    info!("  Tuning: {}", config.tuning.name);
    info!("  Scale: {} {}", NOTE_NAMES[config.root as usize], config.scale.name);
    info!("  Frets: {}..={} of {}", config.first_fret, config.last_fret, config.fret_count);
    info!("  Mode: {}", if cli.hardware { "HARDWARE" } else { "SIMULATOR" });
    info!("  Prev event: {:?}", config.prev_event_scope);
    if cli.ws { info!("  UI: WebSocket on {}", cli.ws_addr); }
    if show_console { info!("  UI: Console"); }
    info!("═══════════════════════════════════════════════");

    // Channel: input → coordinator
    let (input_tx, input_rx) = bounded::<InputEvent>(4096);

    let input = match start_input(&cli, &config, input_tx) {
        Ok(input) => input,
        Err(Error::DeviceUnavailable(reason)) => {
            warn!("No MIDI input: {}", reason);
            print!("{}", console_display::no_input_screen(&reason));
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if cli.check_signal {
        let timeout = Duration::from_millis(cli.check_timeout_ms);
        match SignalCheck::new().listen(&input_rx, timeout) {
            SignalReport::NoSignal => println!("No signal"),
            SignalReport::Received { total, lines } => {
                for line in &lines {
                    println!("{}", line);
                }
                println!("{} message(s) received", total);
            }
        }
        return Ok(());
    }

    // Channels: coordinator → renderers
    let mut state_txs: Vec<Sender<VisualState>> = Vec::new();
    let mut handles = Vec::new();

    // ─── Console display ────────────────────────────────────────────
    if show_console {
        let (tx, rx) = bounded::<VisualState>(256);
        state_txs.push(tx);
        let display = ConsoleDisplay::new(
            rx,
            NoteTable::from_config(&config),
            BendMapper::new(config.max_visual_bend, config.max_pitch_shift),
            config.first_fret,
            config.last_fret,
            config.show_guitar,
            config.show_keyboard,
            cli.display_hz,
        );
        handles.push(thread::Builder::new().name("display".into()).spawn(move || {
            display.run();
        })?);
    }

    // ─── WebSocket server ───────────────────────────────────────────
    if cli.ws {
        let (tx, rx) = bounded::<VisualState>(1024);
        state_txs.push(tx);
        let server = WsServer::new(rx, cli.ws_addr.clone(), cli.ws_fps, cli.viz.clone());
        handles.push(thread::Builder::new().name("ws-server".into()).spawn(move || {
            if let Err(e) = server.run() {
                error!("WebSocket server failed: {}", e);
            }
        })?);
    }

    // ─── Coordinator ────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let interpreter = SignalInterpreter::from_config(&config);
    let coord_shutdown = shutdown.clone();
    let coordinator = thread::Builder::new().name("coordinator".into()).spawn(move || {
        Coordinator::new(input_rx, state_txs, interpreter)
            .with_shutdown(coord_shutdown)
            .run()
    })?;

    // Enter on the terminal ends the session. A closed stdin leaves it running.
    thread::Builder::new().name("stdin-stop".into()).spawn(move || {
        let mut line = String::new();
        if let Ok(n) = std::io::stdin().lock().read_line(&mut line) {
            if n > 0 {
                info!("Stop requested");
                shutdown.store(true, Ordering::Relaxed);
            }
        }
    })?;

    info!("Running. Press Enter to stop.");
    match coordinator.join() {
        Ok(stats) => info!(
            "Session over: {} messages, {} cleanups",
            stats.processed, stats.cleanups
        ),
        Err(_) => error!("Coordinator thread panicked"),
    }

    match input {
        InputSource::Simulator(handle) => {
            let _ = handle.join();
        }
        #[cfg(feature = "hardware")]
        InputSource::Device(source) => drop(source),
    }
    for h in handles {
        let _ = h.join();
    }
    Ok(())
}
