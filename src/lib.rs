//! Turns the shell snippets in your markdown into an integration test.
//!
//! mdrip pulls labelled code blocks out of one or more markdown files and
//! runs them, in order, as a single shell script. When a block fails, it
//! reports which block it was, where it came from, and what it wrote to
//! stdout and stderr.
//!
//! # Getting started
//!
//! ```sh
//! cargo install mdrip
//! ```
//!
//! # How to
//!
//! Label a code block by putting a comment with one or more `@label`s
//! right above it:
//!
//! ````markdown
//! # Install
//!
//! <!-- @install @test -->
//! ```sh
//! mkdir -p /tmp/demo && cd /tmp/demo
//! git init
//! ```
//!
//! Then check it worked:
//!
//! <!-- @test -->
//! ```sh
//! test -d .git
//! ```
//! ````
//!
//! Then run every `@test` block from the file:
//!
//! ```sh
//! mdrip test --label test README.md
//! ```
//!
//! Nothing is printed when every block succeeds. Otherwise the failing
//! block is printed along with what it wrote, and the exit status is 1:
//!
//! ```text
//! ----------------------------------------------------------------------
//! # Error 2: block "test" (@test) at README.md:12
//! test -d .git
//! # Problem: unknown
//! ----------------------------------------------------------------------
//! ...
//! ```
//!
//! # Details
//!
//! The annotation can be a one-line HTML comment, an HTML comment spread
//! over several lines, or a link-reference comment such as
//! `[//]: # (@test)`. Blank lines and other comments may separate it from
//! the fence; any other text cancels it. Blocks without labels are
//! ignored, and so is a fence left open at the end of a file.
//!
//! All selected blocks are written to a temporary file, each followed by a
//! line echoing a marker, and the file is run with `bash -e`. Blocks also
//! labelled `@sleep` are followed by a two second pause, for blocks that
//! start a server in the background.
//!
//! If a block prints nothing for longer than the block timeout, the run is
//! reported as timed out.
//!
//! Besides `test`, the `print` command writes the selected blocks out as a
//! script, and `serve` exposes them over HTTP so they can be sent one at a
//! time to a shell.
pub mod block;
pub mod config;
pub mod label;
pub mod lexer;
pub mod program;
pub mod result;
pub mod runner;
pub mod scanner;
pub mod script;
pub mod serve;
mod utils;

pub use block::{CommandBlock, FileName};
pub use config::MdripConfig;
pub use label::Label;
pub use program::{Program, ProgramError};
pub use result::{BlockOutput, Problem, RunResult};
pub use runner::Runner;
pub use script::Script;
pub use serve::BlockServer;
