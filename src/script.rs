use std::io::{self, Write};
use std::sync::Arc;

use serde::Serialize;

use crate::block::{CommandBlock, FileName};
use crate::label::Label;

/// The blocks from one document that carry the selected label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Script {
    file_name: FileName,
    blocks: Vec<Arc<CommandBlock>>,
}

impl Script {
    pub fn new(file_name: FileName, blocks: Vec<Arc<CommandBlock>>) -> Self {
        Self { file_name, blocks }
    }

    pub fn file_name(&self) -> &FileName {
        &self.file_name
    }

    pub fn blocks(&self) -> &[Arc<CommandBlock>] {
        &self.blocks
    }

    /// Prints the script as shell code, each block between delimiter
    /// comments.
    ///
    /// With `limit` of `None` every block is printed, otherwise only the
    /// first `limit` blocks (a count, not an index).
    pub fn print(&self, w: &mut dyn Write, label: &Label, limit: Option<usize>) -> io::Result<()> {
        writeln!(w, "#\n# Script @{label} from {} \n#", self.file_name)?;
        let count = self.blocks.len();
        let delim = format!("#{}#", "-".repeat(70));
        for (i, block) in self.blocks.iter().enumerate() {
            if limit.is_some_and(|n| i >= n) {
                break;
            }
            writeln!(w, "{delim}  Start {} of {count}", i + 1)?;
            block.print(w, "#", i + 1, label, &self.file_name)?;
            writeln!(w, "{delim}  End {} of {count}", i + 1)?;
            writeln!(w)?;
        }
        Ok(())
    }
}
