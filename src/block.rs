use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::label::Label;
use crate::utils::with_trailing_newline;

/// Identifies the markdown document a block came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FileName(String);

impl FileName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<&Path> for FileName {
    fn from(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }
}

/// One fenced region of shell code pulled out of a markdown document,
/// along with the labels that preceded it.
///
/// The first label is the block's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandBlock {
    labels: Vec<Label>,
    line: usize,
    code: String,
}

impl CommandBlock {
    pub fn new(labels: Vec<Label>, line: usize, code: impl Into<String>) -> Self {
        Self {
            labels,
            line,
            code: code.into(),
        }
    }

    pub fn name(&self) -> &str {
        self.labels.first().map(Label::as_str).unwrap_or_default()
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }

    /// Line of the opening fence, counting from 1.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Writes a comment header identifying the block, followed by its code.
    ///
    /// `n` is the 1-based position of the block within its script.
    pub fn print(
        &self,
        w: &mut dyn Write,
        prefix: &str,
        n: usize,
        label: &Label,
        file_name: &FileName,
    ) -> io::Result<()> {
        write!(w, "{prefix} {n}: block \"{}\"", self.name())?;
        if !label.is_any() {
            write!(w, " (@{label})")?;
        }
        writeln!(w, " at {file_name}:{}", self.line)?;
        write!(w, "{}", with_trailing_newline(&self.code))
    }
}
