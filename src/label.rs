use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

const ANY_LABEL_NAME: &str = "__AnyLabel__";
const SLEEP_LABEL_NAME: &str = "sleep";

/// A tag attached to command blocks in markdown, e.g. `@test` in
/// `<!-- @test -->`.
///
/// `Any` is the unset value: selecting it selects every labelled block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    #[default]
    Any,
    Named(Arc<str>),
}

impl Label {
    pub fn new(name: &str) -> Self {
        let name = name.trim().trim_start_matches('@');
        if name.is_empty() || name == ANY_LABEL_NAME {
            Label::Any
        } else {
            Label::Named(Arc::from(name))
        }
    }

    /// Blocks carrying this label get a pause injected after them.
    pub fn sleep() -> Self {
        Label::Named(Arc::from(SLEEP_LABEL_NAME))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Label::Any)
    }

    pub fn is_sleep(&self) -> bool {
        matches!(self, Label::Named(name) if name.as_ref() == SLEEP_LABEL_NAME)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Label::Any => ANY_LABEL_NAME,
            Label::Named(name) => name.as_ref(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Label::new(name)
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
