use std::borrow::Cow;

// Wraps text in single quotes for the shell, so that `#` and `$` inside
// reach `echo` untouched.
pub fn single_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r#"'\''"#))
}

// Command blocks are concatenated into one file, so each one must end on
// a line of its own or the injected sentinel would join its last command.
pub fn with_trailing_newline(text: &str) -> Cow<'_, str> {
    if text.is_empty() || text.ends_with('\n') {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{text}\n"))
    }
}
