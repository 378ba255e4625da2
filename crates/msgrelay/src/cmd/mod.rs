use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use msgrelay_frame::MessageId;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod exec;
pub mod listen;
pub mod send;
pub mod version;

/// Sleep between event loop turns while waiting on a socket.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command to completion and print its output.
    Exec(ExecArgs),
    /// Send a single message.
    Send(SendArgs),
    /// Listen and print received messages.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Exec(args) => exec::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Program to run.
    pub command: String,
    /// Arguments passed to the program.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Leave the child's stdin open instead of closing it after start.
    #[arg(long)]
    pub keep_stdin: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Message id to send with.
    #[arg(long, default_value = "1")]
    pub id: MessageId,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Give up if the message is not flushed within this many milliseconds.
    #[arg(long, default_value = "5000", value_name = "MS")]
    pub timeout_ms: u64,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Only print messages with these ids (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub ids: Option<Vec<MessageId>>,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
