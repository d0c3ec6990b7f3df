pub mod bend;
pub mod console_display;
pub mod coordinator;
pub mod error;
pub mod interpreter;
pub mod note_table;
pub mod signal_check;
pub mod simulator;
pub mod tuning;
pub mod types;
pub mod ws_server;

#[cfg(feature = "hardware")]
pub mod midi_input;
