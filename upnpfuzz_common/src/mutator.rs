/// Runs an external program like radamsa for every mutation
pub mod command;
