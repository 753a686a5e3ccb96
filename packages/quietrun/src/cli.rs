use std::path::PathBuf;

use clap::Parser;
use quiet_exec::{Capture, Command};

use crate::config::{Format, OutputPolicy};

#[derive(Parser, Debug)]
#[command(name = "quietrun", version)]
#[command(about = "Run a command quietly and report whether it succeeded")]
pub struct Args {
    /// Title for the report line (defaults to the command)
    #[arg(short, long)]
    pub title: Option<String>,

    /// Test number used by TAP output
    #[arg(short, long, default_value_t = 1)]
    pub number: u32,

    /// Which streams to capture: none, stdout, stderr or both
    #[arg(short, long)]
    pub capture: Option<Capture>,

    /// Run the command on a pseudo-terminal
    #[arg(short = 'y', long)]
    pub pty: bool,

    /// Run the command through the platform shell
    #[arg(short, long)]
    pub shell: bool,

    /// Exit 0 even when the command fails
    #[arg(short = 'z', long)]
    pub allow_failure: bool,

    /// When to print the captured output
    #[arg(long, value_enum)]
    pub output: Option<OutputPolicy>,

    /// Report format
    #[arg(short, long, value_enum)]
    pub format: Option<Format>,

    /// Text written to the command's stdin
    #[arg(long, value_name = "TEXT")]
    pub stdin: Option<String>,

    /// Config file (defaults to ./quietrun.toml when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Command to run; a single argument is taken as a command line
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Args {
    pub fn command(&self) -> Command {
        match self.command.as_slice() {
            [line] => Command::Line(line.clone()),
            argv => Command::Argv(argv.to_vec()),
        }
    }
}
