//! Runs a [`Program`] in a subshell and works out, from what the shell
//! prints, which block was running when something went wrong.
//!
//! Each block is followed in the executed script by a line echoing
//! [`MSG_HAPPY`]. Stdout and stderr are each read line by line on their own
//! threads and folded into a stream of [`BlockOutput`]s, one per marker.
//! The coordinator walks the program's blocks in order, taking one output
//! from stdout per block, and stops at the first one that did not end in
//! a marker.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use cfg_if::cfg_if;
use tracing::{debug, info, trace};

use crate::program::Program;
use crate::result::{BlockOutput, Problem, RunResult};
use crate::scanner::{read_lines, scan_lines, MSG_ERROR, MSG_HAPPY, MSG_TIMEOUT};
use crate::script::Script;

pub const DEFAULT_SHELL: &str = "bash";

/// How long to wait, once a block has failed, for the shell's stderr to
/// close.
pub const STDERR_TIMEOUT: Duration = Duration::from_secs(60);

const TIMEOUT_NOTE: &str = "A subprocess might still be running.";

pub(crate) enum Step {
    Continue,
    Emit(BlockOutput),
    Stop(BlockOutput),
}

/// Folds the lines of one stream into per-block outputs.
#[derive(Default)]
pub(crate) struct Accumulator {
    buf: String,
}

impl Accumulator {
    pub(crate) fn feed(&mut self, line: &str) -> Step {
        if line.starts_with(MSG_TIMEOUT) {
            self.buf.push('\n');
            self.buf.push_str(line);
            self.buf.push('\n');
            self.buf.push_str(TIMEOUT_NOTE);
            self.buf.push('\n');
            return Step::Stop(BlockOutput::failure(self.take()));
        }
        if line.starts_with(MSG_ERROR) {
            self.buf.push_str(line);
            self.buf.push('\n');
            return Step::Stop(BlockOutput::failure(self.take()));
        }
        if line.starts_with(MSG_HAPPY) {
            return Step::Emit(BlockOutput::success(self.take()));
        }
        self.buf.push_str(line);
        self.buf.push('\n');
        Step::Continue
    }

    /// Output left over when the stream closed without a marker means the
    /// block never finished.
    pub(crate) fn finish(self) -> Option<BlockOutput> {
        if self.buf.trim().is_empty() {
            None
        } else {
            Some(BlockOutput::failure(self.buf))
        }
    }

    fn take(&mut self) -> String {
        std::mem::take(&mut self.buf)
    }
}

/// Spawns a thread folding `lines` into block outputs.
///
/// The returned channel closes after the first failure, or once `lines`
/// closes.
pub fn accumulate(name: &'static str, lines: Receiver<String>) -> Result<Receiver<BlockOutput>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("mdrip-{name}-accumulator"))
        .spawn(move || {
            let mut acc = Accumulator::default();
            for line in lines {
                match acc.feed(&line) {
                    Step::Continue => trace!("accumulate {name}: [{line}]"),
                    Step::Emit(output) => {
                        trace!("accumulate {name}: {line}");
                        if tx.send(output).is_err() {
                            return;
                        }
                    }
                    Step::Stop(output) => {
                        debug!("accumulate {name}: failure return");
                        let _ = tx.send(output);
                        return;
                    }
                }
            }
            debug!("accumulate {name}: stream closed");
            if let Some(output) = acc.finish() {
                debug!("accumulate {name}: output without a success marker");
                let _ = tx.send(output);
            }
        })
        .with_context(|| format!("Fail to spawn {name} accumulator"))?;
    Ok(rx)
}

/// Matches stdout outputs to blocks, in order, until one fails.
///
/// A closed stdout counts as a failure of the block that was running: the
/// shell exits as soon as a command fails. Stderr is read once, and only
/// after a failure, waiting at most `stderr_timeout` for it.
pub fn coordinate(
    scripts: &[Script],
    out: &Receiver<BlockOutput>,
    err: &Receiver<BlockOutput>,
    stderr_timeout: Duration,
) -> RunResult {
    match first_failure(scripts, out) {
        Some(failed) => explain_failure(failed, err, stderr_timeout),
        None => RunResult::default(),
    }
}

/// Locates the failing block without yet saying why it failed.
fn first_failure(scripts: &[Script], out: &Receiver<BlockOutput>) -> Option<RunResult> {
    for script in scripts {
        let count = script.blocks().len();
        for (i, block) in script.blocks().iter().enumerate() {
            info!(
                "Running {} ({}/{}) from {}",
                block.name(),
                i + 1,
                count,
                script.file_name()
            );
            trace!("coordinate: expecting output of {:?}", block.code());
            let output = match out.recv() {
                Ok(output) if output.succeeded() => continue,
                Ok(output) => output.output().to_string(),
                Err(_) => {
                    debug!("coordinate: stdout closed early");
                    String::new()
                }
            };
            return Some(RunResult::failed_block(
                script.file_name().clone(),
                i,
                block.clone(),
                output,
            ));
        }
    }
    info!("All done, no errors triggered.");
    None
}

/// The sentinel line left in the output of a block that went silent.
fn timeout_line(result: &RunResult) -> Option<String> {
    result
        .output()
        .lines()
        .find(|line| line.starts_with(MSG_TIMEOUT))
        .map(str::to_string)
}

fn explain_failure(
    result: RunResult,
    err: &Receiver<BlockOutput>,
    stderr_timeout: Duration,
) -> RunResult {
    let timeout = timeout_line(&result);
    let stderr = match err.recv_timeout(stderr_timeout) {
        Ok(stderr) => Some(stderr),
        Err(RecvTimeoutError::Timeout) => {
            debug!("coordinate: stderr still open after {stderr_timeout:?}");
            None
        }
        Err(RecvTimeoutError::Disconnected) => {
            debug!("coordinate: nothing on stderr");
            None
        }
    };
    match (timeout, stderr) {
        (Some(note), Some(stderr)) => {
            let message = format!("{note}\n{}", stderr.output());
            result.with_problem(Problem::Timeout(note), message)
        }
        (Some(note), None) => result.with_problem(Problem::Timeout(note.clone()), note),
        (None, Some(stderr)) => {
            let message = stderr.output().to_string();
            result.with_problem(Problem::Stderr(message.clone()), message)
        }
        (None, None) => {
            let message = result.output().to_string();
            result.with_problem(Problem::Unknown, message)
        }
    }
}

type Streams = (Receiver<BlockOutput>, Receiver<BlockOutput>);

/// Hooks accumulators onto the child's stdout and stderr. Stdout is timed
/// per block; stderr is drained for as long as the child keeps it open.
///
/// On error the child is killed and reaped.
fn watch_child(child: &mut Child, block_timeout: Duration) -> Result<Streams> {
    let streams = open_streams(child, block_timeout);
    if let Err(err) = &streams {
        debug!("abandoning shell: {err:#}");
        let _ = child.kill();
        let _ = child.wait();
    }
    streams
}

fn open_streams(child: &mut Child, block_timeout: Duration) -> Result<Streams> {
    let stdout = child.stdout.take().context("Fail to open stdout pipe")?;
    let stderr = child.stderr.take().context("Fail to open stderr pipe")?;
    let out = accumulate("stdout", scan_lines(block_timeout, "stdout", stdout)?)?;
    let err = accumulate("stderr", read_lines("stderr", stderr)?)?;
    Ok((out, err))
}

cfg_if! {
    if #[cfg(unix)] {
        fn make_executable(path: &Path) -> Result<()> {
            use std::os::unix::fs::PermissionsExt;

            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o744))
                .with_context(|| format!("Fail to chmod {}", path.display()))
        }
    } else {
        fn make_executable(_path: &Path) -> Result<()> {
            Ok(())
        }
    }
}

/// Runs programs in a subshell started with `-e`, so the first failing
/// command ends the run.
pub struct Runner {
    shell: String,
    stderr_timeout: Duration,
    temp_dir: Option<PathBuf>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

impl Runner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            stderr_timeout: STDERR_TIMEOUT,
            temp_dir: None,
        }
    }

    pub fn with_stderr_timeout(self, stderr_timeout: Duration) -> Self {
        Self {
            stderr_timeout,
            ..self
        }
    }

    /// Writes the script file under `temp_dir` instead of the system's
    /// temporary directory.
    pub fn with_temp_dir(self, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: Some(temp_dir.into()),
            ..self
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Runs every block of `program`, stopping at the first failure.
    ///
    /// Errors are reserved for setup problems (temp file, pipes, spawning
    /// the shell); failing blocks are described by the returned result.
    pub fn run(&self, program: &Program) -> Result<RunResult> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("mdrip-script-");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut file = file.context("Fail to create temp file")?;
        program
            .write_executable(file.as_file_mut())
            .and_then(|_| file.as_file_mut().flush())
            .context("Fail to write temp file")?;
        make_executable(file.path())?;
        debug!("running commands from {}", file.path().display());

        let mut shell = Command::new(&self.shell);
        shell
            .arg("-e")
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = shell
            .spawn()
            .with_context(|| format!("Fail to start {}", self.shell))?;
        debug!(pid = child.id(), "shell started");

        let (out, err) = watch_child(&mut child, program.block_timeout())?;

        let result = match first_failure(program.scripts(), &out) {
            Some(failed) => {
                // Stdout is still drained, so a live shell would go on to
                // the next blocks.
                if timeout_line(&failed).is_some() {
                    debug!("killing shell after timeout");
                    let _ = child.kill();
                }
                explain_failure(failed, &err, self.stderr_timeout)
            }
            None => RunResult::default(),
        };
        debug!("waiting for shell to end");
        let status = child.wait().context("Fail to wait for shell")?;
        debug!("shell done: {status}");
        let result = if status.success() {
            result
        } else {
            result.or_problem(Problem::Exit(status.to_string()))
        };

        file.close().context("Fail to delete temp file")?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{accumulate, coordinate, Accumulator, Step, TIMEOUT_NOTE};

    const WAIT: Duration = Duration::from_secs(5);
    use crate::block::CommandBlock;
    use crate::result::{BlockOutput, Problem};
    use crate::scanner::{MSG_ERROR, MSG_HAPPY, MSG_TIMEOUT};
    use crate::script::Script;

    fn outputs(lines: &[&str]) -> Vec<BlockOutput> {
        let (tx, rx) = mpsc::channel();
        for line in lines {
            tx.send(line.to_string()).unwrap();
        }
        drop(tx);
        accumulate("test", rx).unwrap().iter().collect()
    }

    fn channel_of(items: Vec<BlockOutput>) -> Receiver<BlockOutput> {
        let (tx, rx) = mpsc::channel();
        for item in items {
            tx.send(item).unwrap();
        }
        rx
    }

    fn script(name: &str, blocks: &[&str]) -> Script {
        Script::new(
            name.into(),
            blocks
                .iter()
                .enumerate()
                .map(|(i, code)| Arc::new(CommandBlock::new(vec!["t".into()], i + 1, *code)))
                .collect(),
        )
    }

    #[test]
    pub fn test_markers_split_output() {
        let happy = format!("{MSG_HAPPY} t");
        let got = outputs(&["a", "b", happy.as_str(), happy.as_str(), "c", happy.as_str()]);
        assert_eq!(
            got,
            vec![
                BlockOutput::success("a\nb\n"),
                BlockOutput::success(""),
                BlockOutput::success("c\n"),
            ]
        );
    }

    #[test]
    pub fn test_error_marker_stops() {
        let happy = format!("{MSG_HAPPY} t");
        let error = format!("{MSG_ERROR}: bad");
        let got = outputs(&["a", happy.as_str(), "b", error.as_str(), "ignored", happy.as_str()]);
        assert_eq!(
            got,
            vec![
                BlockOutput::success("a\n"),
                BlockOutput::failure(format!("b\n{error}\n")),
            ]
        );
    }

    #[test]
    pub fn test_timeout_marker_adds_note() {
        let mut acc = Accumulator::default();
        assert!(matches!(acc.feed("partial"), Step::Continue));
        let timeout = format!("{MSG_TIMEOUT}: no line on stdout within 1s.");
        match acc.feed(&timeout) {
            Step::Stop(output) => {
                assert!(!output.succeeded());
                assert_eq!(
                    output.output(),
                    format!("partial\n\n{timeout}\n{TIMEOUT_NOTE}\n")
                );
            }
            _ => panic!("timeout should stop the accumulator"),
        }
    }

    #[test]
    pub fn test_trailing_output_is_a_failure() {
        let happy = format!("{MSG_HAPPY} t");
        assert_eq!(
            outputs(&[happy.as_str(), "left", "over"]),
            vec![BlockOutput::success(""), BlockOutput::failure("left\nover\n")]
        );
        assert_eq!(outputs(&[happy.as_str(), "  "]), vec![BlockOutput::success("")]);
    }

    #[test]
    pub fn test_coordinate_all_succeed() {
        let scripts = vec![script("a.md", &["x", "y"]), script("b.md", &["z"])];
        let out = channel_of(vec![
            BlockOutput::success("1"),
            BlockOutput::success("2"),
            BlockOutput::success("3"),
        ]);
        let err = channel_of(vec![]);
        let result = coordinate(&scripts, &out, &err, WAIT);
        assert!(result.succeeded());
        assert_eq!(result.index(), None);
    }

    #[test]
    pub fn test_coordinate_stops_at_first_failure() {
        let scripts = vec![script("a.md", &["x"]), script("b.md", &["y", "z", "w"])];
        let out = channel_of(vec![
            BlockOutput::success("1"),
            BlockOutput::success("2"),
            BlockOutput::failure("broken\n"),
            BlockOutput::success("never read"),
        ]);
        let err = channel_of(vec![BlockOutput::failure("z: not found\n")]);
        let result = coordinate(&scripts, &out, &err, WAIT);
        assert_eq!(result.file_name().unwrap().as_str(), "b.md");
        assert_eq!(result.index(), Some(1));
        assert_eq!(result.block().unwrap().code(), "z");
        assert_eq!(result.output(), "broken\n");
        assert_eq!(result.message(), "z: not found\n");
        assert_eq!(
            result.problem(),
            Some(&Problem::Stderr("z: not found\n".into()))
        );
        assert_eq!(out.recv().unwrap().output(), "never read");
    }

    #[test]
    pub fn test_coordinate_closed_streams() {
        let scripts = vec![script("a.md", &["x"])];
        let (_, out) = mpsc::channel::<BlockOutput>();
        let (_, err) = mpsc::channel::<BlockOutput>();
        let result = coordinate(&scripts, &out, &err, WAIT);
        assert_eq!(result.index(), Some(0));
        assert_eq!(result.output(), "");
        assert_eq!(result.problem(), Some(&Problem::Unknown));
    }

    #[test]
    pub fn test_coordinate_timeout_survives_stderr() {
        let scripts = vec![script("a.md", &["sleep 100"])];
        let note = format!("{MSG_TIMEOUT}: no line on stdout within {:?}.", Duration::from_secs(1));
        let out = channel_of(vec![BlockOutput::failure(format!("\n{note}\n{TIMEOUT_NOTE}\n"))]);
        let err = channel_of(vec![BlockOutput::failure("warning: slow\n")]);
        let result = coordinate(&scripts, &out, &err, WAIT);
        assert_eq!(result.problem(), Some(&Problem::Timeout(note.clone())));
        assert!(result.message().starts_with(&note));
        assert!(result.message().contains("warning: slow"));
    }

    #[test]
    pub fn test_coordinate_gives_up_on_open_stderr() {
        let scripts = vec![script("a.md", &["serve &", "false"])];
        let out = channel_of(vec![BlockOutput::success(""), BlockOutput::failure("half\n")]);
        let (_still_open, err) = mpsc::channel::<BlockOutput>();
        let result = coordinate(&scripts, &out, &err, Duration::from_millis(50));
        assert_eq!(result.index(), Some(1));
        assert_eq!(result.problem(), Some(&Problem::Unknown));
        assert_eq!(result.message(), "half\n");
    }

    #[cfg(unix)]
    #[test]
    pub fn test_watch_child_reaps_on_error() {
        use std::process::{Command, Stdio};

        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        assert!(super::watch_child(&mut child, WAIT).is_err());
        let status = child.try_wait().unwrap().expect("child should be reaped");
        assert!(!status.success());
    }
}
