//! Pulls labelled command blocks out of markdown.
//!
//! A block is a fenced code region immediately preceded by an annotation
//! naming one or more labels:
//!
//! ````markdown
//! <!-- @install @test -->
//! ```sh
//! cargo install mdrip
//! ```
//! ````
//!
//! Annotations may also span several lines of an HTML comment, or use the
//! link-reference comment form `[//]: # (@install)`. Blank lines and other
//! comments may sit between an annotation and its fence; anything else
//! cancels the pending labels.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::trace;

use crate::block::CommandBlock;
use crate::label::Label;

/// Blocks found in one document, keyed by label, each list in document
/// order. Every labelled block also appears under [`Label::Any`].
pub type LabelIndex = BTreeMap<Label, Vec<Arc<CommandBlock>>>;

lazy_static! {
    static ref HTML_COMMENT: Regex = Regex::new(r"^\s*<!--(.*?)-->\s*$")
        .expect("Failed to init regex for finding html comments");
    static ref HTML_COMMENT_OPEN: Regex = Regex::new(r"^\s*<!--(.*)$")
        .expect("Failed to init regex for finding multi-line html comments");
    static ref LINK_COMMENT: Regex = Regex::new(r"^\s*\[[^\]]*\]:\s*(?:#|<>)\s*\((.*)\)\s*$")
        .expect("Failed to init regex for finding link-reference comments");
    static ref FENCE_OPEN: Regex =
        Regex::new(r"^(\s*)(`{3,})[^`]*$").expect("Failed to init regex for finding fences");
    static ref FENCE_CLOSE: Regex =
        Regex::new(r"^\s*(`{3,})\s*$").expect("Failed to init regex for finding fence ends");
}

enum State {
    Seeking {
        pending: Vec<Label>,
    },
    InAnnotation {
        pending: Vec<Label>,
    },
    InFence {
        labels: Vec<Label>,
        indent: usize,
        fence_len: usize,
        line: usize,
        code: String,
    },
}

pub fn parse(text: &str) -> LabelIndex {
    let mut index = LabelIndex::new();
    let mut state = State::Seeking {
        pending: Vec::new(),
    };

    for (line_idx, line) in text.lines().enumerate() {
        state = match state {
            State::Seeking { pending } => seek(pending, line, line_idx + 1),
            State::InAnnotation { mut pending } => match line.split_once("-->") {
                Some((inside, _)) => {
                    add_labels(&mut pending, inside);
                    State::Seeking { pending }
                }
                None => {
                    add_labels(&mut pending, line);
                    State::InAnnotation { pending }
                }
            },
            State::InFence {
                labels,
                indent,
                fence_len,
                line: start,
                mut code,
            } => {
                if closes_fence(line, fence_len) {
                    emit(&mut index, labels, start, code);
                    State::Seeking {
                        pending: Vec::new(),
                    }
                } else {
                    code.push_str(strip_indent(line, indent));
                    code.push('\n');
                    State::InFence {
                        labels,
                        indent,
                        fence_len,
                        line: start,
                        code,
                    }
                }
            }
        };
    }

    if let State::InFence { line, .. } = state {
        trace!(line, "dropping unterminated fence");
    }
    index
}

fn seek(mut pending: Vec<Label>, line: &str, line_no: usize) -> State {
    if line.trim().is_empty() {
        return State::Seeking { pending };
    }
    if let Some(caps) = FENCE_OPEN.captures(line) {
        return State::InFence {
            labels: pending,
            indent: caps[1].len(),
            fence_len: caps[2].len(),
            line: line_no,
            code: String::new(),
        };
    }
    if let Some(caps) = HTML_COMMENT
        .captures(line)
        .or_else(|| LINK_COMMENT.captures(line))
    {
        add_labels(&mut pending, &caps[1]);
        return State::Seeking { pending };
    }
    if let Some(caps) = HTML_COMMENT_OPEN.captures(line) {
        // `<!-- x --> trailing text` is prose, not an annotation.
        if !caps[1].contains("-->") {
            add_labels(&mut pending, &caps[1]);
            return State::InAnnotation { pending };
        }
    }
    if !pending.is_empty() {
        trace!(line = line_no, "labels not followed by a fence");
    }
    State::Seeking {
        pending: Vec::new(),
    }
}

fn add_labels(pending: &mut Vec<Label>, text: &str) {
    for token in text.split_whitespace() {
        let Some(name) = token.strip_prefix('@') else {
            continue;
        };
        let label = Label::new(name);
        if !label.is_any() && !pending.contains(&label) {
            pending.push(label);
        }
    }
}

fn closes_fence(line: &str, fence_len: usize) -> bool {
    FENCE_CLOSE
        .captures(line)
        .map(|caps| caps[1].len() >= fence_len)
        .unwrap_or(false)
}

fn strip_indent(line: &str, indent: usize) -> &str {
    let mut start = 0;
    for (count, (idx, ch)) in line.char_indices().enumerate() {
        if count >= indent || !ch.is_whitespace() {
            break;
        }
        start = idx + ch.len_utf8();
    }
    &line[start..]
}

fn emit(index: &mut LabelIndex, labels: Vec<Label>, line: usize, code: String) {
    if labels.is_empty() {
        trace!(line, "dropping unlabelled block");
        return;
    }
    let block = Arc::new(CommandBlock::new(labels, line, code));
    for label in block.labels() {
        index.entry(label.clone()).or_default().push(block.clone());
    }
    index.entry(Label::Any).or_default().push(block);
}
