//! Command-line argument parsing for the toolgate runner
//!
//! Provides clap-based CLI with verbosity control. Flags override the
//! settings file.

use crate::cli::config::Settings;
use clap::Parser;
use std::path::PathBuf;

/// toolgate - run a batch of tool calls through the dispatcher
#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(version)]
#[command(about = "Approval-gated, retrying tool call dispatch", long_about = None)]
pub struct Args {
    /// JSON file holding an array of tool calls
    #[arg(long, value_name = "FILE")]
    pub calls: PathBuf,

    /// Settings file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run calls concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Concurrency bound in parallel mode
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Gate every tool
    #[arg(long)]
    pub gate_all: bool,

    /// Approve every gated call
    #[arg(long, conflicts_with = "deny")]
    pub approve: bool,

    /// Deny every gated call
    #[arg(long)]
    pub deny: bool,

    /// Verbosity level: -q (quiet), default (normal), -v (verbose), -vv (very verbose)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (print only the result messages)
    #[arg(short, long)]
    pub quiet: bool,
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }

    /// Apply flag overrides on top of loaded settings
    pub fn apply(&self, settings: &mut Settings) {
        if self.parallel {
            settings.dispatch.parallel = true;
        }
        if let Some(max) = self.max_concurrent {
            settings.dispatch.max_concurrent = max;
        }
        if let Some(ms) = self.timeout_ms {
            settings.dispatch.timeout_ms = Some(ms);
        }
        if self.gate_all {
            settings.approval.all_tools = true;
        }
    }
}

impl Verbosity {
    /// Default `tracing` filter for this level
    pub fn log_filter(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "toolgate=error",
            Verbosity::Normal => "toolgate=info",
            Verbosity::Verbose => "toolgate=debug",
            Verbosity::VeryVerbose => "toolgate=trace",
        }
    }

    /// Check if should print the event stream
    pub fn show_events(&self) -> bool {
        !matches!(self, Verbosity::Quiet)
    }
}
