//! rdec command-line front end
//!
//! Argument handling lives in the binary; this library holds the command
//! handlers so they can be tested without spawning a process.

pub mod commands;
