use std::io::{self, Write};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::block::{CommandBlock, FileName};
use crate::label::Label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

/// What one stream (stdout or stderr) produced while all or part of a
/// command block ran, and whether the block got as far as its success
/// marker.
///
/// Output on stderr is not by itself a sign of failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockOutput {
    status: Status,
    output: String,
}

impl BlockOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            status: Status::Failure,
            output: output.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == Status::Success
    }

    pub fn output(&self) -> &str {
        &self.output
    }
}

/// Why a run failed, distinct from the text it captured.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Problem {
    #[error("{0}")]
    Stderr(String),
    #[error("{0}")]
    Timeout(String),
    #[error("shell exited abnormally: {0}")]
    Exit(String),
    #[error("unknown")]
    Unknown,
}

/// Outcome of running a program in a subshell.
///
/// A default result means no block has failed; its index is `None`.
/// Otherwise it names the first failing block and carries what the
/// block wrote to stdout (`output`) and stderr (`message`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    #[serde(flatten)]
    output: BlockOutput,
    file_name: Option<FileName>,
    index: Option<usize>,
    block: Option<Arc<CommandBlock>>,
    problem: Option<Problem>,
    message: String,
}

impl Default for RunResult {
    fn default() -> Self {
        Self {
            output: BlockOutput::success(""),
            file_name: None,
            index: None,
            block: None,
            problem: None,
            message: String::new(),
        }
    }
}

impl RunResult {
    pub(crate) fn failed_block(
        file_name: FileName,
        index: usize,
        block: Arc<CommandBlock>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            output: BlockOutput::failure(output),
            file_name: Some(file_name),
            index: Some(index),
            block: Some(block),
            ..Self::default()
        }
    }

    pub(crate) fn with_problem(self, problem: Problem, message: impl Into<String>) -> Self {
        Self {
            problem: Some(problem),
            message: message.into(),
            ..self
        }
    }

    /// Records `problem` unless one is already set.
    pub(crate) fn or_problem(self, problem: Problem) -> Self {
        match self.problem {
            Some(_) => self,
            None => Self {
                problem: Some(problem),
                ..self
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        self.problem.is_none()
    }

    pub fn output(&self) -> &str {
        self.output.output()
    }

    pub fn file_name(&self) -> Option<&FileName> {
        self.file_name.as_ref()
    }

    /// Position of the failing block within its script, counting from 0.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn block(&self) -> Option<&Arc<CommandBlock>> {
        self.block.as_ref()
    }

    pub fn problem(&self) -> Option<&Problem> {
        self.problem.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Writes a delimited failure report naming the failing block and
    /// both captured streams.
    pub fn dump(&self, w: &mut dyn Write, selected: &Label) -> io::Result<()> {
        let delim = format!("{}\n", "-".repeat(70));
        w.write_all(delim.as_bytes())?;
        match (&self.block, &self.file_name) {
            (Some(block), Some(file_name)) => {
                let n = self.index.map(|i| i + 1).unwrap_or_default();
                block.print(w, "# Error", n, selected, file_name)?;
            }
            _ => writeln!(w, "# Error: no block failed")?,
        }
        if let Some(problem) = &self.problem {
            writeln!(w, "# Problem: {}", first_line(&problem.to_string()))?;
        }
        w.write_all(delim.as_bytes())?;
        dump_captured_output(w, "Stdout", &delim, self.output())?;
        if !self.message.is_empty() && self.message != self.output() {
            dump_captured_output(w, "Stderr", &delim, &self.message)?;
        }
        Ok(())
    }
}

fn dump_captured_output(w: &mut dyn Write, name: &str, delim: &str, output: &str) -> io::Result<()> {
    write!(w, "\n{name} capture:\n{delim}{output}\n{delim}")
}

fn first_line(text: &str) -> &str {
    text.lines().find(|line| !line.trim().is_empty()).unwrap_or_default()
}
