//! Interactive command line
//!
//! Renders incoming messages and drives a node from standard input.

pub mod commands;

pub use commands::{print_message, run};
