use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// dotpatch - run one live patch cycle
#[derive(Debug, Parser)]
#[command(name = "dotpatch", version, about, long_about = None)]
pub struct Cli {
    /// Cycle configuration (JSON).
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Where to write the cycle report (JSON).
    #[arg(value_name = "REPORT")]
    pub report: PathBuf,

    /// Pass `debug` to pause for a debugger before the cycle starts.
    #[arg(value_enum, value_name = "MODE")]
    pub mode: Option<Mode>,

    /// Also print the report to stdout.
    #[arg(long)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Print the process id and wait for Enter.
    Debug,
}
