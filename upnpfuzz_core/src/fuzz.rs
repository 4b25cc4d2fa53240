/// contains the campaign engine which runs the generate, send, check loop and the TUI
pub mod engine;

/// Phases and state owned by a single campaign
pub mod state;

/// Contains all statistical data collected by the campaign engine. If used with a TUI they will be
/// displayed there.
pub mod stats;

mod ui;
