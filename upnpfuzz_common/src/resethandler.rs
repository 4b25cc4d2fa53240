/// Restarts the target with a shell command
pub mod command;

/// Only waits for the target to come back on its own
pub mod wait;
