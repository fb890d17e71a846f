use std::fs;
use std::io::{self, Write};
use std::process;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::block::FileName;
use crate::label::Label;
use crate::lexer;
use crate::scanner::MSG_HAPPY;
use crate::script::Script;
use crate::utils::{single_quote, with_trailing_newline};

/// Pause injected after blocks labelled `@sleep`, giving a process they
/// put in the background time to come up.
const SLEEP_SECONDS: u32 = 2;

const HERE_DOC_NAME: &str = "HANDLED_SCRIPT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgramError {
    #[error("No blocks found in the given files.")]
    NoBlocks,
    #[error("No blocks labelled {0:?} found in the given files.")]
    NoLabelledBlocks(String),
}

/// Scripts built from a list of markdown files, one per file holding at
/// least one block with the selected label.
#[derive(Debug, Clone)]
pub struct Program {
    block_timeout: Duration,
    label: Label,
    file_names: Vec<FileName>,
    scripts: Vec<Script>,
}

impl Program {
    pub fn new(block_timeout: Duration, label: Label, file_names: Vec<FileName>) -> Self {
        Self {
            block_timeout,
            label,
            file_names,
            scripts: Vec::new(),
        }
    }

    /// Reads and parses every file, failing if none of them holds a block
    /// with the selected label.
    pub fn load(
        block_timeout: Duration,
        label: Label,
        file_names: Vec<FileName>,
    ) -> Result<Self, ProgramError> {
        let mut program = Self::new(block_timeout, label, file_names);
        program.reload()?;
        Ok(program)
    }

    /// Like [`Program::load`], but a program without blocks ends the
    /// process: there is nothing sensible to run or print.
    pub fn load_or_exit(block_timeout: Duration, label: Label, file_names: Vec<FileName>) -> Self {
        match Self::load(block_timeout, label, file_names) {
            Ok(program) => program,
            Err(err) => {
                error!("{err}");
                process::exit(1);
            }
        }
    }

    /// Builds a program from documents already in memory.
    pub fn from_documents(
        block_timeout: Duration,
        label: Label,
        documents: Vec<(FileName, String)>,
    ) -> Result<Self, ProgramError> {
        let file_names = documents.iter().map(|(name, _)| name.clone()).collect();
        let mut program = Self::new(block_timeout, label, file_names);
        program.compile(documents)?;
        Ok(program)
    }

    /// Rebuilds every script from the files on disk. Unreadable files are
    /// skipped with a warning.
    pub fn reload(&mut self) -> Result<(), ProgramError> {
        let documents = self
            .file_names
            .iter()
            .filter_map(|file_name| match fs::read_to_string(file_name.as_path()) {
                Ok(text) => Some((file_name.clone(), text)),
                Err(err) => {
                    warn!("Unable to read file {:?}: {err}", file_name.as_str());
                    None
                }
            })
            .collect::<Vec<_>>();
        self.compile(documents)
    }

    fn compile(&mut self, documents: Vec<(FileName, String)>) -> Result<(), ProgramError> {
        self.scripts.clear();
        for (file_name, text) in documents {
            let mut index = lexer::parse(&text);
            if let Some(blocks) = index.remove(&self.label) {
                debug!("{} blocks labelled @{} in {file_name}", blocks.len(), self.label);
                self.add(Script::new(file_name, blocks));
            }
        }
        if !self.scripts.is_empty() {
            return Ok(());
        }
        if self.label.is_any() {
            Err(ProgramError::NoBlocks)
        } else {
            Err(ProgramError::NoLabelledBlocks(self.label.to_string()))
        }
    }

    pub fn add(&mut self, script: Script) -> &mut Self {
        self.scripts.push(script);
        self
    }

    pub fn block_timeout(&self) -> Duration {
        self.block_timeout
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    pub fn block_count(&self) -> usize {
        self.scripts.iter().map(|s| s.blocks().len()).sum()
    }

    /// Source of one block, addressed by script and block position.
    pub fn block_code(&self, script: usize, block: usize) -> Option<&str> {
        self.scripts
            .get(script)
            .and_then(|s| s.blocks().get(block))
            .map(|b| b.code())
    }

    /// Prints every script, then a closing message.
    pub fn print_normal(&self, w: &mut dyn Write) -> io::Result<()> {
        for script in &self.scripts {
            script.print(w, &self.label, None)?;
        }
        writeln!(w, "echo \" \"")?;
        writeln!(w, "echo \"All done.  No errors.\"")
    }

    /// Prints the first `n` blocks of the first script as-is, then the
    /// whole program again inside a `bash -euo pipefail` subshell.
    ///
    /// Sourced into a terminal, the leading blocks can set variables or
    /// define functions in the user's shell, while a failure in the rest
    /// only exits the subshell. The leading blocks must therefore never
    /// fail.
    pub fn print_preambled(&self, w: &mut dyn Write, n: usize) -> io::Result<()> {
        let Some(first) = self.scripts.first() else {
            return self.print_normal(w);
        };
        first.print(w, &self.label, Some(n))?;
        writeln!(w, " bash -euo pipefail <<'{HERE_DOC_NAME}'")?;
        writeln!(w, "function handledTrouble() {{")?;
        writeln!(w, "  echo \" \"")?;
        writeln!(w, "  echo \"Unable to continue!\"")?;
        writeln!(w, "  exit 1")?;
        writeln!(w, "}}")?;
        writeln!(w, "trap handledTrouble INT TERM")?;
        self.print_normal(w)?;
        writeln!(w, "{HERE_DOC_NAME}")
    }

    /// Writes the program as one shell script, each block followed by a
    /// line echoing [`MSG_HAPPY`] and the block's name.
    pub fn write_executable(&self, w: &mut dyn Write) -> io::Result<()> {
        let sleep = Label::sleep();
        for script in &self.scripts {
            for block in script.blocks() {
                w.write_all(with_trailing_newline(block.code()).as_bytes())?;
                if block.has_label(&sleep) {
                    writeln!(w, "sleep {SLEEP_SECONDS}")?;
                }
                let marker = format!("{MSG_HAPPY} {}", block.name());
                writeln!(w, "echo {}", single_quote(&marker))?;
            }
        }
        Ok(())
    }
}
