//! CLI module for toolgate
//!
//! Handles command-line argument parsing and settings management.

pub mod config;
pub mod args;

pub use config::Settings;
pub use args::{Args, Verbosity};
