use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::{iter, thread};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, debug_span, warn, Span};

use crate::ui::{Status, Ui};

/// Runs the process, waiting for completion, and mapping non-success exit codes to an error.
#[tracing::instrument(level = "trace", skip_all)]
pub fn exec(cmd: &mut Command, ui: &Ui) -> Result<()> {
    exec_piping(
        cmd,
        ui,
        |line: &str| {
            debug!("{line}");
        },
        |line: &str| {
            debug!("{line}");
        },
    )
}

/// Runs the process capturing its standard output, mapping non-success exit codes to an error.
pub fn output(cmd: &mut Command, ui: &Ui) -> Result<String> {
    let cmd_str = shlex_join(cmd);
    ui.verbose(Status::new("Running", &cmd_str));
    debug!("{cmd_str}");
    let out = cmd
        .stdin(Stdio::null())
        .output()
        .with_context(|| anyhow!("could not execute process: {cmd_str}"))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        for line in stderr.lines() {
            warn!("{line}");
        }
        bail!(
            "process did not exit successfully: {cmd_str}: {}",
            out.status
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Runs the process, streaming its output lines to the given callbacks.
#[tracing::instrument(level = "trace", skip_all)]
pub fn exec_piping(
    cmd: &mut Command,
    ui: &Ui,
    stdout_callback: impl Fn(&str) + Send,
    stderr_callback: impl Fn(&str) + Send,
) -> Result<()> {
    let cmd_str = shlex_join(cmd);

    ui.verbose(Status::new("Running", &cmd_str));

    return thread::scope(move |s| {
        let mut proc = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| anyhow!("could not execute process: {cmd_str}"))?;

        let span = Arc::new(debug_span!("exec", pid = proc.id()));
        let _enter = span.enter();
        debug!("{cmd_str}");

        let stdout = proc.stdout.take().expect("we asked Rust to pipe stdout");
        s.spawn({
            let span = debug_span!("out");
            move || {
                let mut stdout = stdout;
                pipe(&span, &mut stdout, stdout_callback);
            }
        });

        let stderr = proc.stderr.take().expect("we asked Rust to pipe stderr");
        s.spawn({
            let span = debug_span!("err");
            move || {
                let mut stderr = stderr;
                pipe(&span, &mut stderr, stderr_callback);
            }
        });

        let exit_status = proc
            .wait()
            .with_context(|| anyhow!("could not wait for process termination: {cmd_str}"))?;
        if exit_status.success() {
            Ok(())
        } else {
            bail!("process did not exit successfully: {exit_status}");
        }
    });

    fn pipe(span: &Span, stream: &mut dyn Read, callback: impl Fn(&str)) {
        let _enter = span.enter();
        let stream = BufReader::with_capacity(128, stream);
        for line in stream.lines() {
            match line {
                Ok(line) => callback(&line),
                Err(err) => warn!("{err:?}"),
            }
        }
    }
}

fn shlex_join(cmd: &Command) -> String {
    iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|arg| {
            let arg = arg.to_string_lossy();
            if arg.contains(char::is_whitespace) {
                format!("{arg:?}")
            } else {
                arg.into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
