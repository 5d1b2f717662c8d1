// ABOUTME: Library root for chainrun - runs a script over a chain of SSH bastions.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod runner;
pub mod ssh;

pub use runner::Runner;
