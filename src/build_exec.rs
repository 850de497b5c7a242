//! Runs the external build tool and streams its output into the `exec`
//! console.
//!
//! The tool is a black box: each line it prints on stdout or stderr is
//! queued as-is, and compiler diagnostics among them are picked up by the
//! annotation tracker on the way to the console.

use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::error::BuildError;
use crate::message_queue::LineMessageQueue;
use crate::state::AppState;

/// Build tool targets exposed by the plugin menus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildTarget {
    Build,
    Upload,
    Clean,
}

impl BuildTarget {
    /// Arguments passed to `pio run`.
    pub fn args(self) -> &'static [&'static str] {
        match self {
            BuildTarget::Build => &["run"],
            BuildTarget::Upload => &["run", "--target", "upload"],
            BuildTarget::Clean => &["run", "--target", "clean"],
        }
    }
}

/// Run `program` in `cwd`, printing its output to the `exec` console.
/// Returns the exit code (`-1` when the process was killed by a signal).
///
/// Diagnostics from the previous run are cleared first. The call returns
/// only once every line of output has reached the console.
pub fn run_build<S: AsRef<OsStr>>(
    state: &AppState,
    program: &str,
    args: &[S],
    cwd: &Path,
) -> Result<i32, BuildError> {
    state.annotations.reset();
    let queue = state.exec_queue().clone();
    queue.start();
    let shown: Vec<_> = args.iter().map(|a| a.as_ref().to_string_lossy()).collect();
    queue.put(&format!("Running {program} {}", shown.join(" ")));

    let result = run_streaming(&queue, program, args, cwd);
    match &result {
        Ok(0) => queue.put("Finished successfully"),
        Ok(code) => queue.put(&format!("Finished with exit code {code}")),
        Err(e) => queue.put(&format!("Error: {e}")),
    }
    queue.stop();

    tracing::info!(program, ?result, "build tool finished");
    result
}

/// Convenience wrapper resolving the build tool binary.
pub fn run_target(state: &AppState, target: BuildTarget, project_dir: &Path) -> Result<i32, BuildError> {
    let tool = crate::cli::resolve_build_tool();
    let mut args: Vec<OsString> = target.args().iter().map(OsString::from).collect();
    args.push("--project-dir".into());
    args.push(project_dir.as_os_str().to_owned());
    run_build(state, &tool, &args, project_dir)
}

fn run_streaming<S: AsRef<OsStr>>(
    queue: &Arc<LineMessageQueue>,
    program: &str,
    args: &[S],
    cwd: &Path,
) -> Result<i32, BuildError> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| BuildError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let readers: Vec<_> = [
        child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
        child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
    ]
    .into_iter()
    .flatten()
    .map(|stream| {
        let queue = queue.clone();
        std::thread::spawn(move || forward_lines(stream, &queue))
    })
    .collect();

    for reader in readers {
        let _ = reader.join();
    }

    let status = child.wait().map_err(|source| BuildError::Wait {
        program: program.to_string(),
        source,
    })?;
    Ok(status.code().unwrap_or(-1))
}

fn forward_lines(stream: Box<dyn Read + Send>, queue: &LineMessageQueue) {
    for line in BufReader::new(stream).split(b'\n') {
        match line {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                queue.put_raw(&format!("{}\n", text.trim_end_matches('\r')));
            }
            Err(e) => {
                tracing::warn!("build output stream failed: {e}");
                break;
            }
        }
    }
}
