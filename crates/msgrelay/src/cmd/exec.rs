use msgrelay_process::{ExecFlags, Process};
use tracing::debug;

use crate::cmd::ExecArgs;
use crate::exit::{process_error, CliResult, FAILURE};
use crate::output::{print_exec, ExecReport, OutputFormat};

pub fn run(args: ExecArgs, format: OutputFormat) -> CliResult<i32> {
    let flags = if args.keep_stdin {
        ExecFlags::NO_CLOSE_STDIN
    } else {
        ExecFlags::NONE
    };
    let argv: Vec<&str> = args.args.iter().map(String::as_str).collect();

    let mut process = Process::new();
    process
        .exec(&args.command, &argv, None, flags)
        .map_err(|err| process_error("exec failed", err))?;

    let report = ExecReport {
        pid: process.pid(),
        exit_code: process.return_code(),
        stdout: process.read_all_stdout(),
        stderr: process.read_all_stderr(),
        command: args.command,
        args: args.args,
    };
    debug!(pid = ?report.pid, exit_code = ?report.exit_code, "command finished");
    print_exec(&report, format);

    Ok(report.exit_code.unwrap_or(FAILURE))
}
