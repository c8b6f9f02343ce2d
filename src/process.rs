use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::{ExitCode, ExitStatus},
};

/// A subprocess ran but exited unsuccessfully.
///
/// The exit code is carried through the `anyhow` chain so the binaries can
/// mirror it as their own exit status.
#[derive(Debug, thiserror::Error)]
#[error("`{command}` exited with status {code}")]
pub struct CommandFailed {
    pub command: String,
    pub code: i32,
}

impl CommandFailed {
    pub fn new(program: &Path, args: &[OsString], status: ExitStatus) -> Self {
        Self {
            command: command_line(program, args),
            // Killed by a signal: there is no code to forward.
            code: status.code().unwrap_or(1),
        }
    }
}

/// Renders a program invocation for log lines and error messages.
pub fn command_line(program: &Path, args: &[OsString]) -> String {
    std::iter::once(program.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exit code for a failed run: the code of the first failed subprocess in
/// the error chain, otherwise 1.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CommandFailed>())
        .and_then(|failed| u8::try_from(failed.code).ok())
        .filter(|code| *code != 0)
        .unwrap_or(1)
}

/// Turns the outcome of a binary's `run` into its process exit status.
pub fn report(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}
